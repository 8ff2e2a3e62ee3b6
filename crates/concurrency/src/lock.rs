//! Lock manager (component C4).
//!
//! A striped table of per-key lock state: each key hashes to one of a
//! fixed number of shards, each shard guarded by its own mutex and
//! condvar, so unrelated keys never contend on the same lock even under
//! heavy concurrency (§5: "striped lock table, fixed size, no resize").
//! Grounded on the teacher's `commit_locks: DashMap<BranchId, Mutex<()>>`
//! idiom in `manager.rs`, generalized from one coarse lock per branch to
//! one lock-state entry per key with real Shared/Exclusive semantics,
//! writer-preference waiter queues, and hierarchical acquisition order.

use std::collections::{HashSet, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;

use mantis_core::{MantisError, MantisResult, TxId};

const STRIPE_COUNT: usize = 64;

/// Shared (read) or Exclusive (write) lock mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

impl LockMode {
    fn label(self) -> &'static str {
        match self {
            LockMode::Shared => "Shared",
            LockMode::Exclusive => "Exclusive",
        }
    }
}

#[derive(Debug, Default)]
struct KeyLock {
    exclusive_holder: Option<TxId>,
    shared_holders: HashSet<TxId>,
    // Arrival-ordered; the manager enforces writer preference by refusing
    // a Shared grant while an Exclusive waiter is ahead of it in queue.
    waiters: VecDeque<TxId>,
    granted_count: u64,
    wait_count: u64,
}

impl KeyLock {
    fn is_empty(&self) -> bool {
        self.exclusive_holder.is_none() && self.shared_holders.is_empty() && self.waiters.is_empty()
    }

    fn can_grant(&self, tx_id: TxId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => {
                if self.exclusive_holder.is_some() {
                    return false;
                }
                // Writer preference: a new shared reader must not cut
                // ahead of a waiting writer.
                match self.waiters.front() {
                    Some(&head) if head != tx_id => false,
                    _ => true,
                }
            }
            LockMode::Exclusive => {
                // Upgrade case: sole shared holder is this transaction.
                let shared_ok = self.shared_holders.is_empty()
                    || (self.shared_holders.len() == 1 && self.shared_holders.contains(&tx_id));
                let exclusive_ok = self.exclusive_holder.is_none() || self.exclusive_holder == Some(tx_id);
                if !shared_ok || !exclusive_ok {
                    return false;
                }
                // Must be at the head of the waiter queue (or not queued
                // at all, the uncontended fast path).
                matches!(self.waiters.front(), None | Some(&tx_id))
            }
        }
    }

    fn grant(&mut self, tx_id: TxId, mode: LockMode) {
        match mode {
            LockMode::Shared => {
                self.shared_holders.insert(tx_id);
            }
            LockMode::Exclusive => {
                self.exclusive_holder = Some(tx_id);
            }
        }
        if self.waiters.front() == Some(&tx_id) {
            self.waiters.pop_front();
        }
        self.granted_count += 1;
    }

    fn release(&mut self, tx_id: TxId) {
        self.shared_holders.remove(&tx_id);
        if self.exclusive_holder == Some(tx_id) {
            self.exclusive_holder = None;
        }
    }
}

struct Stripe {
    table: Mutex<FxHashMap<Vec<u8>, KeyLock>>,
    condvar: Condvar,
}

impl Stripe {
    fn new() -> Self {
        Stripe {
            table: Mutex::new(FxHashMap::default()),
            condvar: Condvar::new(),
        }
    }
}

fn stripe_index(key: &[u8]) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in key {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % STRIPE_COUNT
}

/// Per-key lock grant/wait counters, exposed for operator metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct LockMetrics {
    pub granted: u64,
    pub waited: u64,
}

/// Striped lock table granting Shared/Exclusive locks with writer
/// preference and hierarchical acquisition order (§4.4).
pub struct LockManager {
    stripes: Vec<Stripe>,
    // Highest hierarchy level acquired so far, per transaction. A new
    // acquisition at a strictly lower level is an eager HierarchyViolation
    // rather than a deadlock discovered later.
    held_levels: Mutex<FxHashMap<TxId, usize>>,
    default_timeout: Duration,
    max_waiters_per_key: usize,
    // Transactions the deadlock detector (C5) has chosen as a cycle's
    // victim. A waiter checks this set each time it wakes and, if
    // poisoned, gives up immediately with `Deadlock` rather than waiting
    // out its full timeout.
    poisoned: Mutex<HashSet<TxId>>,
}

impl LockManager {
    /// A lock manager with the given default waiter deadline and per-key
    /// waiter queue cap (§5 resource limits).
    pub fn new(default_timeout: Duration, max_waiters_per_key: usize) -> Self {
        let mut stripes = Vec::with_capacity(STRIPE_COUNT);
        for _ in 0..STRIPE_COUNT {
            stripes.push(Stripe::new());
        }
        LockManager {
            stripes,
            held_levels: Mutex::new(FxHashMap::default()),
            default_timeout,
            max_waiters_per_key,
            poisoned: Mutex::new(HashSet::new()),
        }
    }

    /// Mark `tx_id` as a deadlock victim: any lock wait it's currently
    /// blocked on will fail fast with `MantisError::Deadlock` instead of
    /// running out its timeout.
    pub fn poison(&self, tx_id: TxId) {
        self.poisoned.lock().insert(tx_id);
        for stripe in &self.stripes {
            stripe.condvar.notify_all();
        }
    }

    /// Clear `tx_id`'s poison mark, called once it has actually aborted.
    pub fn clear_poison(&self, tx_id: TxId) {
        self.poisoned.lock().remove(&tx_id);
    }

    /// Acquire `mode` on `key` for `tx_id`, enforcing non-decreasing
    /// hierarchy order across this transaction's acquisitions, blocking up
    /// to `deadline` if the lock can't be granted immediately.
    pub fn acquire(
        &self,
        tx_id: TxId,
        key: &[u8],
        level: usize,
        mode: LockMode,
        deadline: Instant,
    ) -> MantisResult<()> {
        self.check_hierarchy(tx_id, level)?;

        let idx = stripe_index(key);
        let stripe = &self.stripes[idx];
        let mut table = stripe.table.lock();
        let entry = table.entry(key.to_vec()).or_default();

        if entry.can_grant(tx_id, mode) {
            entry.grant(tx_id, mode);
            self.record_level(tx_id, level);
            return Ok(());
        }

        if entry.waiters.len() >= self.max_waiters_per_key {
            return Err(MantisError::LockTimeout {
                mode: mode.label(),
                waited_ms: 0,
            });
        }
        if !entry.waiters.contains(&tx_id) {
            // An upgrade (this tx already holds Shared and wants Exclusive)
            // enqueues at the head, not the tail: `can_grant`'s Exclusive
            // arm requires being at the front of the queue, so a fair
            // back-of-queue enqueue would leave it stuck behind whatever
            // reader or writer is already waiting on this key while it
            // itself blocks them from ever being satisfied (§4.4).
            let is_upgrade = mode == LockMode::Exclusive && entry.shared_holders.contains(&tx_id);
            if is_upgrade {
                entry.waiters.push_front(tx_id);
            } else {
                entry.waiters.push_back(tx_id);
            }
        }
        entry.wait_count += 1;
        let started = Instant::now();

        loop {
            if self.poisoned.lock().remove(&tx_id) {
                if let Some(entry) = table.get_mut(key) {
                    entry.waiters.retain(|&w| w != tx_id);
                }
                return Err(MantisError::Deadlock { tx_id });
            }
            let key_owned = key.to_vec();
            if table.get(&key_owned).map(|e| e.can_grant(tx_id, mode)).unwrap_or(false) {
                let entry = table.get_mut(&key_owned).unwrap();
                entry.grant(tx_id, mode);
                self.record_level(tx_id, level);
                return Ok(());
            }
            if Instant::now() >= deadline {
                if let Some(entry) = table.get_mut(&key_owned) {
                    entry.waiters.retain(|&w| w != tx_id);
                }
                let waited_ms = started.elapsed().as_millis() as u64;
                return Err(MantisError::LockTimeout {
                    mode: mode.label(),
                    waited_ms,
                });
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            let wait_result = stripe.condvar.wait_for(&mut table, remaining);
            if wait_result.timed_out() && Instant::now() >= deadline {
                let key_owned = key.to_vec();
                if let Some(entry) = table.get_mut(&key_owned) {
                    entry.waiters.retain(|&w| w != tx_id);
                }
                let waited_ms = started.elapsed().as_millis() as u64;
                return Err(MantisError::LockTimeout {
                    mode: mode.label(),
                    waited_ms,
                });
            }
        }
    }

    /// Acquire using the manager's default timeout.
    pub fn acquire_default(&self, tx_id: TxId, key: &[u8], level: usize, mode: LockMode) -> MantisResult<()> {
        let deadline = Instant::now() + self.default_timeout;
        self.acquire(tx_id, key, level, mode, deadline)
    }

    /// Release `tx_id`'s lock on `key`, waking any waiters that may now
    /// be grantable.
    pub fn release(&self, tx_id: TxId, key: &[u8]) {
        let idx = stripe_index(key);
        let stripe = &self.stripes[idx];
        let mut table = stripe.table.lock();
        if let Some(entry) = table.get_mut(key) {
            entry.release(tx_id);
            if entry.is_empty() {
                table.remove(key);
            }
        }
        stripe.condvar.notify_all();
    }

    /// Release every lock held by `tx_id`, called at transaction end.
    /// Also clears the transaction's recorded hierarchy level.
    pub fn release_all(&self, tx_id: TxId, keys: &[Vec<u8>]) {
        for key in keys {
            self.release(tx_id, key);
        }
        self.held_levels.lock().remove(&tx_id);
    }

    /// Current holder(s) of `key`'s lock, for the deadlock detector's
    /// wait-for graph: empty if unheld, one entry for Exclusive, possibly
    /// several for Shared.
    pub fn holders(&self, key: &[u8]) -> Vec<TxId> {
        let idx = stripe_index(key);
        let table = self.stripes[idx].table.lock();
        match table.get(key) {
            Some(entry) => {
                let mut holders: Vec<TxId> = entry.shared_holders.iter().copied().collect();
                holders.extend(entry.exclusive_holder);
                holders
            }
            None => Vec::new(),
        }
    }

    /// Metrics for `key`, or zeroed defaults if no lock state exists for it.
    pub fn metrics(&self, key: &[u8]) -> LockMetrics {
        let idx = stripe_index(key);
        let table = self.stripes[idx].table.lock();
        table
            .get(key)
            .map(|e| LockMetrics {
                granted: e.granted_count,
                waited: e.wait_count,
            })
            .unwrap_or_default()
    }

    fn check_hierarchy(&self, tx_id: TxId, level: usize) -> MantisResult<()> {
        let mut held = self.held_levels.lock();
        match held.get(&tx_id) {
            Some(&current) if level < current => Err(MantisError::HierarchyViolation {
                held: current,
                requested: level,
            }),
            _ => {
                held.insert(tx_id, level);
                Ok(())
            }
        }
    }

    fn record_level(&self, tx_id: TxId, level: usize) {
        let mut held = self.held_levels.lock();
        let entry = held.entry(tx_id).or_insert(level);
        if level > *entry {
            *entry = level;
        }
    }
}
