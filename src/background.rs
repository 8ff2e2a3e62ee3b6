//! Background task scaffolding (§5's "background task set").
//!
//! Grounded on the teacher's per-task WAL flush thread in
//! `database/mod.rs` (an `Arc<AtomicBool>` shutdown flag plus a named
//! `JoinHandle`, sleeping in a loop and checking the flag before and
//! after each sleep): generalized here into one reusable spawner since
//! the facade owns five independent cadences instead of the teacher's
//! one, rather than duplicating the spawn/shutdown boilerplate five
//! times.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

/// One named, cadence-driven background worker with cooperative shutdown.
pub(crate) struct BackgroundTask {
    shutdown: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTask {
    /// Spawn a thread named `name` that calls `tick` every `interval`
    /// until stopped. The first tick happens after the first sleep, not
    /// immediately, so a task started right before `close()` never races
    /// its own first iteration against shutdown.
    pub(crate) fn spawn(name: &str, interval: Duration, mut tick: impl FnMut() + Send + 'static) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let shutdown_clone = Arc::clone(&shutdown);
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !shutdown_clone.load(Ordering::Relaxed) {
                    std::thread::sleep(interval);
                    if shutdown_clone.load(Ordering::Relaxed) {
                        break;
                    }
                    tick();
                }
            })
            .expect("failed to spawn background thread");
        BackgroundTask {
            shutdown,
            handle: Some(handle),
        }
    }

    /// Signal shutdown and join. Idempotent.
    pub(crate) fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BackgroundTask {
    fn drop(&mut self) {
        self.stop();
    }
}
