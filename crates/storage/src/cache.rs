//! Cache and invalidator (component C8).
//!
//! A bounded, sharded cache sitting in front of [`crate::map::StorageMap`].
//! Each shard carries its own latch (§5: "sharded map; each shard has its
//! own latch"), matching the teacher's DashMap sharding idiom but with an
//! explicit `Mutex` per shard since the spec calls for a bounded admission
//! policy that a lock-free map can't enforce atomically. A single
//! reader-writer latch protects the cross-key dependency graph used for
//! cascading invalidation, since that structure is read on every
//! invalidation and written rarely.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use mantis_core::Version;

const SHARD_COUNT: usize = 16;

/// LRU or LFU eviction, selected by [`mantis_core::config::CacheEvictionPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionPolicy {
    Lru,
    Lfu,
}

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Vec<u8>,
    version: Version,
    size: usize,
    last_access: Instant,
    access_count: u64,
    expires_at: Option<Instant>,
}

struct CacheShard {
    entries: FxHashMap<Vec<u8>, CacheEntry>,
    bytes_used: usize,
}

impl CacheShard {
    fn new() -> Self {
        CacheShard {
            entries: FxHashMap::default(),
            bytes_used: 0,
        }
    }
}

fn shard_index(key: &[u8]) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for &b in key {
        hash ^= b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash as usize) % SHARD_COUNT
}

/// Bounded cache with cascading dependency invalidation (I7: a cache
/// entry's version never exceeds the authoritative storage version).
pub struct Cache {
    shards: Vec<Mutex<CacheShard>>,
    capacity_bytes: usize,
    total_bytes: AtomicUsize,
    policy: EvictionPolicy,
    default_ttl: Option<Duration>,
    // key -> set of keys that depend on it; invalidating `k` also
    // invalidates everything reachable from `k` through this graph.
    dependencies: RwLock<HashMap<Vec<u8>, HashSet<Vec<u8>>>>,
    ttl_index: Mutex<std::collections::BTreeMap<Instant, HashSet<Vec<u8>>>>,
}

impl Cache {
    /// A cache bounded to `capacity_bytes` total entry size, using `policy`
    /// for eviction when admission would exceed that bound.
    pub fn new(capacity_bytes: usize, policy: EvictionPolicy) -> Self {
        let mut shards = Vec::with_capacity(SHARD_COUNT);
        for _ in 0..SHARD_COUNT {
            shards.push(Mutex::new(CacheShard::new()));
        }
        Cache {
            shards,
            capacity_bytes,
            total_bytes: AtomicUsize::new(0),
            policy,
            default_ttl: None,
            dependencies: RwLock::new(HashMap::new()),
            ttl_index: Mutex::new(std::collections::BTreeMap::new()),
        }
    }

    /// Attach a default TTL applied to entries inserted via [`Cache::put`].
    pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
        self.default_ttl = Some(ttl);
        self
    }

    /// Insert `value` for `key`. An entry whose size alone exceeds the
    /// whole cache's capacity is rejected outright (admission policy,
    /// §4.8: "new entries are admitted unconditionally unless they alone
    /// exceed the cache size") rather than evicting everything else to
    /// make room for it.
    pub fn put(&self, key: &[u8], value: Vec<u8>, version: Version) -> bool {
        let size = key.len() + value.len();
        if size > self.capacity_bytes {
            return false;
        }
        let now = instant_now();
        let expires_at = self.default_ttl.map(|ttl| now + ttl);
        let idx = shard_index(key);
        let mut shard = self.shards[idx].lock();

        if let Some(old) = shard.entries.get(key) {
            shard.bytes_used -= old.size;
            self.total_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
        // Eviction is latched per shard, but the bound it evicts against
        // is the cache-wide total, not this shard's own share of it: once
        // this shard runs dry, reach into whichever other shard still
        // holds entries rather than admitting over the cap.
        while self.total_bytes.load(Ordering::Relaxed) + size > self.capacity_bytes {
            if !shard.entries.is_empty() {
                evict_one(&mut shard, self.policy, &self.total_bytes);
            } else if !self.evict_from_other_shard(idx) {
                break;
            }
        }
        shard.bytes_used += size;
        self.total_bytes.fetch_add(size, Ordering::Relaxed);
        shard.entries.insert(
            key.to_vec(),
            CacheEntry {
                value,
                version,
                size,
                last_access: now,
                access_count: 0,
                expires_at,
            },
        );
        drop(shard);

        if let Some(expires_at) = expires_at {
            self.ttl_index
                .lock()
                .entry(expires_at)
                .or_default()
                .insert(key.to_vec());
        }
        true
    }

    /// Look up `key`, lazily expiring it first if its TTL has elapsed.
    pub fn get(&self, key: &[u8]) -> Option<(Vec<u8>, Version)> {
        let idx = shard_index(key);
        let now = instant_now();
        let mut shard = self.shards[idx].lock();
        let expired = shard
            .entries
            .get(key)
            .and_then(|e| e.expires_at)
            .map(|exp| exp <= now)
            .unwrap_or(false);
        if expired {
            if let Some(old) = shard.entries.remove(key) {
                shard.bytes_used -= old.size;
                self.total_bytes.fetch_sub(old.size, Ordering::Relaxed);
            }
            return None;
        }
        let entry = shard.entries.get_mut(key)?;
        entry.last_access = now;
        entry.access_count += 1;
        Some((entry.value.clone(), entry.version))
    }

    /// Remove `key` from the cache.
    pub fn remove(&self, key: &[u8]) {
        let idx = shard_index(key);
        let mut shard = self.shards[idx].lock();
        if let Some(old) = shard.entries.remove(key) {
            shard.bytes_used -= old.size;
            self.total_bytes.fetch_sub(old.size, Ordering::Relaxed);
        }
    }

    /// Register that `dependent` must be invalidated whenever `on` is
    /// invalidated, for cache entries derived from other keys.
    pub fn add_dependency(&self, on: &[u8], dependent: &[u8]) {
        self.dependencies
            .write()
            .entry(on.to_vec())
            .or_default()
            .insert(dependent.to_vec());
    }

    /// Invalidate `key` and cascade through the dependency graph. A
    /// visited set guards against cycles (§9) so a dependency loop can't
    /// recurse forever.
    pub fn invalidate(&self, key: &[u8]) {
        let mut visited: HashSet<Vec<u8>> = HashSet::new();
        let mut stack = vec![key.to_vec()];
        let deps = self.dependencies.read();
        while let Some(k) = stack.pop() {
            if !visited.insert(k.clone()) {
                continue;
            }
            self.remove(&k);
            if let Some(children) = deps.get(&k) {
                for child in children {
                    if !visited.contains(child) {
                        stack.push(child.clone());
                    }
                }
            }
        }
    }

    /// Sweep and evict all entries whose TTL has elapsed as of `now`,
    /// using the TTL index to avoid scanning live entries (grounded on
    /// the teacher's `TTLIndex::remove_expired`).
    pub fn evict_expired(&self, now: Instant) -> usize {
        let mut index = self.ttl_index.lock();
        let still_future = index.split_off(&now);
        let expired = std::mem::replace(&mut *index, still_future);
        drop(index);

        let mut count = 0;
        for (_, keys) in expired {
            for key in keys {
                self.remove(&key);
                count += 1;
            }
        }
        count
    }

    /// Total bytes currently held across all shards.
    pub fn bytes_used(&self) -> usize {
        self.total_bytes.load(Ordering::Relaxed)
    }

    /// Total entries currently held across all shards.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.lock().entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict one entry from some other shard than `skip_idx`, for when the
    /// shard under the caller's latch has already run dry but the cache's
    /// global total is still over capacity. Uses `try_lock` rather than
    /// `lock`: blocking here while already holding `skip_idx`'s latch would
    /// let two `put` calls on different shards lock each other's shard in
    /// opposite order and deadlock. A shard that's busy is just skipped.
    fn evict_from_other_shard(&self, skip_idx: usize) -> bool {
        for i in 0..SHARD_COUNT {
            if i == skip_idx {
                continue;
            }
            if let Some(mut other) = self.shards[i].try_lock() {
                if !other.entries.is_empty() {
                    evict_one(&mut other, self.policy, &self.total_bytes);
                    return true;
                }
            }
        }
        false
    }
}

fn evict_one(shard: &mut CacheShard, policy: EvictionPolicy, total_bytes: &AtomicUsize) {
    let victim = match policy {
        EvictionPolicy::Lru => shard
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_access)
            .map(|(k, _)| k.clone()),
        EvictionPolicy::Lfu => shard
            .entries
            .iter()
            .min_by_key(|(_, e)| e.access_count)
            .map(|(k, _)| k.clone()),
    };
    if let Some(key) = victim {
        if let Some(entry) = shard.entries.remove(&key) {
            shard.bytes_used -= entry.size;
            total_bytes.fetch_sub(entry.size, Ordering::Relaxed);
        }
    }
}

fn instant_now() -> Instant {
    Instant::now()
}
