//! End-to-end deadlock detection: two Serializable transactions forming a
//! real wait-for cycle across threads, resolved by the periodic detector
//! rather than by lock timeouts racing each other.
//!
//! Grounded on the teacher's multi-threaded `concurrent_tests.rs` idiom
//! (real `thread::spawn` plus `Barrier` to force an interleaving, not just
//! sequential calls on one thread) and on this crate's own
//! `deadlock.rs`/`lock.rs` unit tests for the cycle shape itself.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use mantis_core::config::{Config, IsolationLevel};
use mantis_core::{Key, MantisError, Value};
use mantis_concurrency::{TransactionManager, TxStatus};
use mantis_durability::wal::writer::WalWriter;
use mantis_durability::Layout;
use mantis_storage::{Cache, EvictionPolicy, StorageMap};

fn manager(dir: &std::path::Path) -> Arc<TransactionManager> {
    let layout = Layout::open(dir).unwrap();
    let wal = WalWriter::open(layout, 1024 * 1024, mantis_core::config::DurabilityMode::Sync).unwrap();
    let storage = Arc::new(StorageMap::new());
    let cache = Arc::new(Cache::new(64 * 1024, EvictionPolicy::Lru));
    let config = Config::for_testing().with_isolation_default(IsolationLevel::Serializable);
    Arc::new(TransactionManager::new(storage, cache, wal, config))
}

/// S4: Tx1 holds Shared(k1) and blocks on Exclusive(k2); Tx2 holds
/// Shared(k2) and blocks on Exclusive(k1). The periodic scan must pick one
/// victim, which fails its commit with `Deadlock`, while the other
/// proceeds to commit normally.
#[test]
fn cyclic_lock_wait_resolves_to_one_deadlock_and_one_commit() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    let k1 = Key::new("k1").unwrap();
    let k2 = Key::new("k2").unwrap();

    // Seed both keys so a read acquires a real Shared lock.
    {
        let mut setup = mgr.begin();
        mgr.put(&mut setup, &k1, Value::new("v0").unwrap()).unwrap();
        mgr.put(&mut setup, &k2, Value::new("v0").unwrap()).unwrap();
        mgr.commit(&mut setup).unwrap();
    }

    let both_reading = Arc::new(Barrier::new(2));
    let stop = Arc::new(AtomicBool::new(false));

    // Drives the periodic detector while the two transaction threads are
    // stuck waiting on each other; `TransactionManager` only exposes the
    // poll function itself, the cadence is the caller's job (the root
    // facade runs this on a background task; here the test thread does).
    let scanner_mgr = Arc::clone(&mgr);
    let scanner_stop = Arc::clone(&stop);
    let scanner = thread::spawn(move || {
        while !scanner_stop.load(Ordering::Relaxed) {
            scanner_mgr.run_deadlock_scan();
            thread::sleep(Duration::from_millis(5));
        }
    });

    let mgr1 = Arc::clone(&mgr);
    let k1a = k1.clone();
    let k2a = k2.clone();
    let barrier1 = Arc::clone(&both_reading);
    let t1 = thread::spawn(move || {
        let mut txn = mgr1.begin();
        mgr1.get(&mut txn, &k1a).unwrap();
        barrier1.wait();
        let write_result = mgr1.put(&mut txn, &k2a, Value::new("from-1").unwrap());
        if write_result.is_err() {
            return write_result;
        }
        mgr1.commit(&mut txn)
    });

    let mgr2 = Arc::clone(&mgr);
    let k1b = k1.clone();
    let k2b = k2.clone();
    let barrier2 = Arc::clone(&both_reading);
    let t2 = thread::spawn(move || {
        let mut txn = mgr2.begin();
        mgr2.get(&mut txn, &k2b).unwrap();
        barrier2.wait();
        let write_result = mgr2.put(&mut txn, &k1b, Value::new("from-2").unwrap());
        if write_result.is_err() {
            return write_result;
        }
        mgr2.commit(&mut txn)
    });

    let r1 = t1.join().unwrap();
    let r2 = t2.join().unwrap();
    stop.store(true, Ordering::Relaxed);
    scanner.join().unwrap();

    let results = [&r1, &r2];
    let deadlocks = results.iter().filter(|r| matches!(r, Err(MantisError::Deadlock { .. }))).count();
    let commits = results.iter().filter(|r| r.is_ok()).count();

    assert_eq!(deadlocks, 1, "exactly one side of the cycle must be poisoned: {r1:?} / {r2:?}");
    assert_eq!(commits, 1, "the surviving side must still commit: {r1:?} / {r2:?}");
}

/// Two transactions touching disjoint keys never form a wait-for cycle,
/// so the periodic scan must never manufacture a false victim.
#[test]
fn independent_keys_never_deadlock() {
    let dir = tempfile::tempdir().unwrap();
    let mgr = manager(dir.path());
    let k1 = Key::new("k1").unwrap();
    let k2 = Key::new("k2").unwrap();

    let mut txn1 = mgr.begin();
    let mut txn2 = mgr.begin();
    mgr.put(&mut txn1, &k1, Value::new("a").unwrap()).unwrap();
    mgr.put(&mut txn2, &k2, Value::new("b").unwrap()).unwrap();

    assert!(mgr.run_deadlock_scan().is_empty());
    mgr.commit(&mut txn1).unwrap();
    mgr.commit(&mut txn2).unwrap();
    assert!(matches!(txn1.status(), TxStatus::Committed));
    assert!(matches!(txn2.status(), TxStatus::Committed));
}
