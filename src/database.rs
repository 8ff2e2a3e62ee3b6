//! The top-level `Database` facade (§6's programmatic operations).
//!
//! Wires the four crates together: `mantis-durability`'s layout, WAL, and
//! recovery/checkpoint engines; `mantis-storage`'s storage map, cache, and
//! integrity scanner; `mantis-concurrency`'s transaction manager. Grounded
//! on the teacher's `Database` in `engine/src/database/mod.rs`: open runs
//! recovery before accepting traffic, a durability-mode-gated background
//! thread keeps the WAL flushed, and close flushes and marks clean
//! shutdown.

use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{info, warn};

use mantis_core::config::{CacheEvictionPolicy, Config, DurabilityMode, IsolationLevel};
use mantis_core::limits::LimitError;
use mantis_core::{IntegritySource, Key, Lsn, MantisError, MantisResult, TxId, Value, Version};
use mantis_concurrency::TransactionManager;
use mantis_durability::checkpoint::CheckpointTrigger;
use mantis_durability::{CheckpointController, Layout, RecoveryEngine};
use mantis_storage::{Cache, EvictionPolicy, IntegrityScanner, StorageMap};

use crate::background::BackgroundTask;

/// A transaction handle returned by [`Database::begin`]. Re-exported as
/// `mantis_txn_core::Transaction`.
pub type Transaction = mantis_concurrency::TransactionContext;

/// Poll cadence for the checkpoint background task. The controller itself
/// owns the real time/byte/RPO thresholds (`due_trigger`); this is only
/// how often the facade asks it whether one has fired.
const CHECKPOINT_POLL_INTERVAL_MS: u64 = 200;

/// Fixed internal cadence for the cache TTL sweeper (§5: "fixed internal cadence").
const CACHE_SWEEP_INTERVAL_MS: u64 = 250;

fn to_mantis_err(e: LimitError) -> MantisError {
    MantisError::InvalidConfig(e.to_string())
}

fn eviction_policy_of(policy: CacheEvictionPolicy) -> EvictionPolicy {
    match policy {
        CacheEvictionPolicy::Lru => EvictionPolicy::Lru,
        CacheEvictionPolicy::Lfu => EvictionPolicy::Lfu,
    }
}

fn dir_size_bytes(dir: &Path) -> u64 {
    let mut total = 0u64;
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            if let Ok(meta) = entry.metadata() {
                total += meta.len();
            }
        }
    }
    total
}

/// Top-level handle over one open database directory. Construct with
/// [`Database::open`]; every operation is safe to call concurrently from
/// multiple threads via `Arc<Database>`.
pub struct Database {
    layout: Layout,
    config: Config,
    storage: Arc<StorageMap>,
    cache: Arc<Cache>,
    scanner: Arc<IntegrityScanner>,
    txn_manager: Arc<TransactionManager>,
    checkpoint: Mutex<CheckpointController>,
    active_tx_ids: Mutex<HashSet<TxId>>,
    safe_mode: AtomicBool,
    wal_bytes_at_last_checkpoint: Mutex<u64>,
    background_tasks: Mutex<Vec<BackgroundTask>>,
}

impl Database {
    /// Open (or create) a database at `path`, running recovery first.
    ///
    /// A post-redo integrity digest mismatch does not fail `open`: it
    /// enters safe mode (reads allowed, writes rejected) and returns a
    /// handle anyway, per §4.9/§7's safe-mode policy. A prior, unresolved
    /// safe-mode entry (the `meta/safe_mode` sentinel already present) does
    /// fail `open` with [`MantisError::SafeMode`] until an operator calls
    /// [`Database::clear_safe_mode`].
    pub fn open(path: impl AsRef<Path>, config: Config) -> MantisResult<Arc<Database>> {
        config.validate().map_err(|e| MantisError::InvalidConfig(e.to_string()))?;

        let layout = Layout::open(path.as_ref())?;
        let storage = Arc::new(StorageMap::new());

        let report = RecoveryEngine::run(&layout, storage.as_ref())?;
        info!(
            shutdown_state = ?report.shutdown_state,
            winners = report.winners.len(),
            losers = report.losers.len(),
            frames_redone = report.frames_redone,
            "recovery complete"
        );
        storage.advance_version(Version(report.next_lsn.as_u64().saturating_sub(1)));

        let cache = Arc::new(Cache::new(
            config.cache_bytes as usize,
            eviction_policy_of(config.cache_policy),
        ));
        let scanner = Arc::new(IntegrityScanner::new());

        let mut wal = mantis_durability::WalWriter::open(
            layout.clone(),
            config.wal_segment_size_bytes,
            config.durability,
        )?;
        wal.resume_at(report.next_lsn.as_u64());

        let txn_manager = Arc::new(TransactionManager::new(
            Arc::clone(&storage),
            Arc::clone(&cache),
            wal,
            config.clone(),
        ));

        let checkpoint = CheckpointController::new(
            layout.clone(),
            config.checkpoint_interval_ms,
            config.checkpoint_bytes,
            config.rpo_seconds,
        );

        let db = Arc::new(Database {
            layout,
            config: config.clone(),
            storage,
            cache,
            scanner,
            txn_manager,
            checkpoint: Mutex::new(checkpoint),
            active_tx_ids: Mutex::new(HashSet::new()),
            safe_mode: AtomicBool::new(report.safe_mode_entered),
            wal_bytes_at_last_checkpoint: Mutex::new(0),
            background_tasks: Mutex::new(Vec::new()),
        });

        if report.safe_mode_entered {
            warn!("database opened in safe mode: integrity digest mismatch after recovery");
        }

        db.spawn_background_tasks();
        Ok(db)
    }

    fn spawn_background_tasks(self: &Arc<Self>) {
        let mut tasks = self.background_tasks.lock();

        if let DurabilityMode::Async { interval_ms } = self.config.durability {
            let db = Arc::clone(self);
            tasks.push(BackgroundTask::spawn(
                "mantis-wal-fsync",
                Duration::from_millis(interval_ms.max(1)),
                move || {
                    if let Err(e) = db.txn_manager.flush_wal() {
                        warn!(error = %e, "background fsync failed");
                    }
                },
            ));
        }

        if self.txn_manager.deadlock_detector().is_periodic() {
            let db = Arc::clone(self);
            let interval = self
                .txn_manager
                .deadlock_detector()
                .periodic_interval()
                .unwrap_or(Duration::from_millis(50));
            tasks.push(BackgroundTask::spawn("mantis-deadlock-detect", interval, move || {
                let victims = db.txn_manager.run_deadlock_scan();
                if !victims.is_empty() {
                    warn!(count = victims.len(), "deadlock detector poisoned victims");
                }
            }));
        }

        {
            let db = Arc::clone(self);
            tasks.push(BackgroundTask::spawn(
                "mantis-checkpoint",
                Duration::from_millis(CHECKPOINT_POLL_INTERVAL_MS),
                move || {
                    db.maybe_checkpoint();
                },
            ));
        }

        if self.config.integrity_scan_interval_ms > 0 {
            let db = Arc::clone(self);
            tasks.push(BackgroundTask::spawn(
                "mantis-integrity-scan",
                Duration::from_millis(self.config.integrity_scan_interval_ms),
                move || {
                    let events = db.scanner.scan_storage(&db.storage);
                    let wal_events = db.scanner.scan_wal(&db.txn_manager_wal_dir());
                    if !events.is_empty() || !wal_events.is_empty() {
                        warn!(
                            storage_events = events.len(),
                            wal_events = wal_events.len(),
                            "integrity scan found corruption"
                        );
                    }
                },
            ));
        }

        {
            let db = Arc::clone(self);
            tasks.push(BackgroundTask::spawn(
                "mantis-cache-sweep",
                Duration::from_millis(CACHE_SWEEP_INTERVAL_MS),
                move || {
                    db.cache.evict_expired(std::time::Instant::now());
                },
            ));
        }
    }

    fn txn_manager_wal_dir(&self) -> std::path::PathBuf {
        self.layout.wal_dir()
    }

    /// Checks the checkpoint controller's due-trigger and, if one has
    /// fired, takes a checkpoint. Shared by the background task and
    /// [`Database::checkpoint`]'s explicit path.
    fn maybe_checkpoint(&self) {
        let current_bytes = dir_size_bytes(&self.layout.wal_dir());
        let mut baseline = self.wal_bytes_at_last_checkpoint.lock();
        let delta = current_bytes.saturating_sub(*baseline);
        if delta > 0 {
            self.checkpoint.lock().record_durable_bytes(delta);
            *baseline = current_bytes;
        }
        drop(baseline);

        let trigger = self.checkpoint.lock().due_trigger();
        if let Some(trigger) = trigger {
            if let Err(e) = self.run_checkpoint(trigger) {
                warn!(error = %e, "background checkpoint failed");
            }
        }
    }

    fn run_checkpoint(&self, trigger: CheckpointTrigger) -> MantisResult<Lsn> {
        self.txn_manager.flush_wal()?;
        let lsn = self.txn_manager.durable_lsn();
        let active: Vec<TxId> = self.active_tx_ids.lock().iter().copied().collect();

        let manifest = self
            .checkpoint
            .lock()
            .checkpoint(lsn, self.storage.as_ref() as &dyn IntegritySource, active.clone())?;
        self.txn_manager
            .append_checkpoint_frame(manifest.integrity_digest, manifest.active_tx_ids)?;
        *self.wal_bytes_at_last_checkpoint.lock() = dir_size_bytes(&self.layout.wal_dir());
        info!(lsn = lsn.as_u64(), ?trigger, "checkpoint taken");

        // Opportunistic version-chain compaction (§5): safe to prune
        // anything at or below this checkpoint's LSN, since recovery
        // never needs to replay past a validated checkpoint.
        let pruned = self.storage.gc(Version(lsn.as_u64()));
        if pruned > 0 {
            info!(pruned, "version-chain compaction after checkpoint");
        }

        // Reclaiming WAL segments is only safe while no transaction is
        // still in flight: a transaction's frames are written contiguously
        // within one `commit_lock` critical section, but a large
        // transaction's own frames can still span a segment rotation, so
        // an in-flight transaction could have earlier frames in a segment
        // this checkpoint would otherwise consider redundant. Deferring
        // truncation to a quiescent checkpoint keeps this simple and safe
        // rather than tracking each transaction's oldest referenced LSN.
        if active.is_empty() {
            let current_segment = self.txn_manager.current_wal_segment();
            if let Ok(segments) = self.txn_manager.wal_segment_numbers() {
                let prunable: Vec<u64> = segments.into_iter().filter(|&s| s < current_segment).collect();
                if !prunable.is_empty() {
                    if let Err(e) = self.txn_manager.truncate_wal_prefix(&prunable) {
                        warn!(error = %e, "failed to truncate WAL prefix after checkpoint");
                    }
                }
            }
        }

        Ok(lsn)
    }

    /// Take a checkpoint right now, regardless of the controller's own
    /// cadence, returning the LSN it covers.
    pub fn checkpoint(&self) -> MantisResult<Lsn> {
        self.run_checkpoint(CheckpointTrigger::Explicit)
    }

    /// Begin a transaction at the configured default isolation level.
    pub fn begin(&self) -> Transaction {
        let txn = self.txn_manager.begin();
        self.active_tx_ids.lock().insert(txn.tx_id());
        txn
    }

    /// Begin a transaction at an explicit isolation level.
    pub fn begin_with_isolation(&self, isolation: IsolationLevel) -> Transaction {
        let txn = self.txn_manager.begin_with_isolation(isolation);
        self.active_tx_ids.lock().insert(txn.tx_id());
        txn
    }

    /// Read `key` within `txn`.
    pub fn read(&self, txn: &mut Transaction, key: &[u8]) -> MantisResult<Option<Vec<u8>>> {
        let key = Key::new(key.to_vec()).map_err(to_mantis_err)?;
        if self.scanner.is_quarantined(key.as_bytes()) {
            return Err(MantisError::CorruptionDetected {
                detail: "key is quarantined by the integrity scanner".into(),
            });
        }
        let value = self.txn_manager.get(txn, &key)?;
        Ok(value.map(|v: Value| v.as_bytes().to_vec()))
    }

    /// Buffer a write of `value` at `key` within `txn`.
    pub fn write(&self, txn: &mut Transaction, key: &[u8], value: &[u8]) -> MantisResult<()> {
        self.ensure_writable()?;
        let key = Key::new(key.to_vec()).map_err(to_mantis_err)?;
        let value = Value::new(value.to_vec()).map_err(to_mantis_err)?;
        self.txn_manager.put(txn, &key, value)
    }

    /// Buffer a delete of `key` within `txn`.
    pub fn delete(&self, txn: &mut Transaction, key: &[u8]) -> MantisResult<()> {
        self.ensure_writable()?;
        let key = Key::new(key.to_vec()).map_err(to_mantis_err)?;
        self.txn_manager.delete(txn, &key)
    }

    fn ensure_writable(&self) -> MantisResult<()> {
        if self.safe_mode.load(Ordering::Acquire) {
            return Err(MantisError::SafeMode {
                reason: "database is in safe mode; writes are rejected until cleared".into(),
            });
        }
        Ok(())
    }

    /// Commit `txn`, durably logging and applying its buffered writes.
    pub fn commit(&self, txn: &mut Transaction) -> MantisResult<()> {
        let result = self.txn_manager.commit(txn);
        self.active_tx_ids.lock().remove(&txn.tx_id());
        result
    }

    /// Abort `txn`, discarding its buffered writes.
    pub fn abort(&self, txn: &mut Transaction) -> MantisResult<()> {
        let result = self.txn_manager.abort(txn);
        self.active_tx_ids.lock().remove(&txn.tx_id());
        result
    }

    /// Whether the database is currently in safe mode (reads only).
    pub fn is_safe_mode(&self) -> bool {
        self.safe_mode.load(Ordering::Acquire)
    }

    /// Clear safe mode after an operator has verified and repaired the
    /// on-disk state. Required before a future `open` will succeed if the
    /// database was left in safe mode by recovery (§4.9's manual-exit policy).
    pub fn clear_safe_mode(&self) -> MantisResult<()> {
        self.layout.clear_safe_mode()?;
        self.safe_mode.store(false, Ordering::Release);
        Ok(())
    }

    /// Flush, take a final checkpoint, stop background tasks, and mark
    /// clean shutdown. Idempotent only in the sense that calling it twice
    /// is safe; it is not meant to be called concurrently with other
    /// operations on the same handle.
    pub fn close(&self) -> MantisResult<()> {
        self.background_tasks.lock().clear();

        if !self.safe_mode.load(Ordering::Acquire) {
            self.run_checkpoint(CheckpointTrigger::Explicit)?;
            self.layout.mark_clean()?;
        } else {
            self.txn_manager.flush_wal()?;
        }
        Ok(())
    }
}
