//! Storage map (component C7): the authoritative in-memory keyed store.
//!
//! Each key maps to a version chain, newest first, so readers can answer
//! both "latest" and "latest at or before LSN X" lookups without scanning
//! the whole chain in the common case. `DashMap` gives lock-free reads and
//! per-key write latching, the same sharding trade-off the teacher's
//! `ShardedStore` makes for its per-branch shards.
//!
//! ## Version numbering
//!
//! A key's `Version` is numerically identical to the `Lsn` of the commit
//! frame that produced it. The WAL's `Write`/`Delete` payload carries only
//! `prev_version` (§6), not the new version, so recovery has no way to
//! recover a version number independent of the frame's own LSN. Rather
//! than inventing an auxiliary counter that the WAL format doesn't record
//! and that replay couldn't reconstruct, the transaction manager and the
//! recovery engine both derive a write's version from its commit LSN. This
//! keeps `StorageMap::replay_write` trivially correct: replay produces the
//! exact state a from-scratch sequential commit stream would have.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use mantis_core::checksum::{Checksum, Crc32cChecksum};
use mantis_core::checksum::{ChecksumTag, Sha256Checksum};
use mantis_core::{IntegritySource, Lsn, ReplayTarget, Version};

/// One version of a key's value, plus the frame-checksum C11 verifies
/// against during a background scan.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    /// The value bytes, empty for a tombstone.
    pub value: Vec<u8>,
    /// This entry's version (== its commit LSN, see module docs).
    pub version: Version,
    /// Whether this entry represents a delete.
    pub tombstone: bool,
    /// CRC32C over `key || value || version`, computed at write time and
    /// re-verified by the integrity scanner (C11).
    pub entry_checksum: u32,
}

impl StoredEntry {
    fn new(key: &[u8], value: Vec<u8>, version: Version, tombstone: bool) -> Self {
        let entry_checksum = compute_entry_checksum(key, &value, version);
        StoredEntry {
            value,
            version,
            tombstone,
            entry_checksum,
        }
    }
}

fn compute_entry_checksum(key: &[u8], value: &[u8], version: Version) -> u32 {
    let mut buf = Vec::with_capacity(key.len() + value.len() + 8);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf.extend_from_slice(&version.as_u64().to_be_bytes());
    match Crc32cChecksum.compute(&buf) {
        ChecksumTag::Crc32c(v) => v,
        ChecksumTag::Sha256(_) => unreachable!("Crc32cChecksum always produces Crc32c tags"),
    }
}

#[derive(Debug, Default)]
struct VersionChain {
    // Newest first, matching the teacher's `VersionChain` in sharded.rs.
    versions: VecDeque<StoredEntry>,
}

impl VersionChain {
    fn push(&mut self, entry: StoredEntry) {
        self.versions.push_front(entry);
    }

    fn latest(&self) -> Option<&StoredEntry> {
        self.versions.front()
    }

    fn at_or_before(&self, max_version: Version) -> Option<&StoredEntry> {
        self.versions.iter().find(|e| e.version <= max_version)
    }

    /// Drop versions older than `min_version`, always keeping the latest.
    /// Returns the number of versions pruned.
    fn gc(&mut self, min_version: Version) -> usize {
        if self.versions.len() <= 1 {
            return 0;
        }
        let mut pruned = 0;
        while self.versions.len() > 1 {
            match self.versions.back() {
                Some(oldest) if oldest.version < min_version => {
                    self.versions.pop_back();
                    pruned += 1;
                }
                _ => break,
            }
        }
        pruned
    }
}

/// The authoritative in-memory keyed store (§4.7). Not itself durable;
/// durability is owned by the WAL and reconstructed here by [`ReplayTarget`].
pub struct StorageMap {
    entries: DashMap<Vec<u8>, VersionChain>,
    version: AtomicU64,
}

impl StorageMap {
    /// An empty storage map.
    pub fn new() -> Self {
        StorageMap {
            entries: DashMap::new(),
            version: AtomicU64::new(0),
        }
    }

    /// The highest version installed so far.
    pub fn current_version(&self) -> Version {
        Version(self.version.load(Ordering::Acquire))
    }

    /// Advance the map's notion of "current version" without installing a
    /// value, used when the caller (recovery, a checkpoint restore) already
    /// knows the high-water mark.
    pub fn advance_version(&self, version: Version) {
        self.version.fetch_max(version.as_u64(), Ordering::AcqRel);
    }

    /// Install `value` at `key` with the given version, pushed to the head
    /// of the key's version chain.
    pub fn put(&self, key: &[u8], value: Vec<u8>, version: Version) {
        let entry = StoredEntry::new(key, value, version, false);
        self.entries
            .entry(key.to_vec())
            .or_default()
            .push(entry);
        self.advance_version(version);
    }

    /// Install a tombstone at `key` with the given version.
    pub fn delete(&self, key: &[u8], version: Version) {
        let entry = StoredEntry::new(key, Vec::new(), version, true);
        self.entries
            .entry(key.to_vec())
            .or_default()
            .push(entry);
        self.advance_version(version);
    }

    /// The latest value for `key`, or `None` if absent or tombstoned.
    pub fn get(&self, key: &[u8]) -> Option<StoredEntry> {
        self.entries.get(key).and_then(|chain| {
            chain
                .latest()
                .filter(|e| !e.tombstone)
                .cloned()
        })
    }

    /// The latest value for `key` at or before `max_version`, for snapshot
    /// reads (Repeatable Read / Snapshot / Serializable, §4.6).
    pub fn get_versioned(&self, key: &[u8], max_version: Version) -> Option<StoredEntry> {
        self.entries.get(key).and_then(|chain| {
            chain
                .at_or_before(max_version)
                .filter(|e| !e.tombstone)
                .cloned()
        })
    }

    /// Whether `key` currently has a live (non-tombstoned) value.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.get(key).is_some()
    }

    /// Garbage-collect versions older than `min_version` across every key.
    /// Called by the background version-chain compactor once no active
    /// snapshot can observe them and a checkpoint already covers them.
    pub fn gc(&self, min_version: Version) -> usize {
        let mut pruned = 0;
        for mut entry in self.entries.iter_mut() {
            pruned += entry.gc(min_version);
        }
        pruned
    }

    /// Number of distinct keys tracked (including tombstoned ones).
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// All keys with a live latest value, sorted, with their latest entry.
    /// Used by the integrity scanner (C11) and the integrity digest.
    pub fn snapshot_latest(&self) -> Vec<(Vec<u8>, StoredEntry)> {
        let mut out: Vec<(Vec<u8>, StoredEntry)> = self
            .entries
            .iter()
            .filter_map(|entry| {
                entry
                    .latest()
                    .filter(|e| !e.tombstone)
                    .map(|e| (entry.key().clone(), e.clone()))
            })
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}

impl Default for StorageMap {
    fn default() -> Self {
        Self::new()
    }
}

impl ReplayTarget for StorageMap {
    fn replay_write(&self, key: &[u8], value: &[u8], version: Version) {
        self.put(key, value.to_vec(), version);
    }

    fn replay_delete(&self, key: &[u8], version: Version) {
        self.delete(key, version);
    }
}

impl IntegritySource for StorageMap {
    fn integrity_digest(&self) -> [u8; 32] {
        let entries = self.snapshot_latest();
        let mut buf = Vec::new();
        for (key, entry) in &entries {
            buf.extend_from_slice(&(key.len() as u64).to_be_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&(entry.value.len() as u64).to_be_bytes());
            buf.extend_from_slice(&entry.value);
            buf.extend_from_slice(&entry.version.as_u64().to_be_bytes());
        }
        match Sha256Checksum.compute(&buf) {
            ChecksumTag::Sha256(digest) => digest,
            ChecksumTag::Crc32c(_) => unreachable!("Sha256Checksum always produces Sha256 tags"),
        }
    }
}

/// Unused directly by the storage map but kept alongside it: the LSN a
/// replayed write belonged to, for callers that want to log provenance.
pub fn version_as_lsn(version: Version) -> Lsn {
    Lsn(version.as_u64())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_returns_latest() {
        let map = StorageMap::new();
        map.put(b"k1", b"v1".to_vec(), Version(1));
        map.put(b"k1", b"v2".to_vec(), Version(2));
        let entry = map.get(b"k1").unwrap();
        assert_eq!(entry.value, b"v2");
        assert_eq!(entry.version, Version(2));
    }

    #[test]
    fn delete_tombstones_latest() {
        let map = StorageMap::new();
        map.put(b"k1", b"v1".to_vec(), Version(1));
        map.delete(b"k1", Version(2));
        assert!(map.get(b"k1").is_none());
        assert!(!map.contains(b"k1"));
    }

    #[test]
    fn get_versioned_sees_snapshot() {
        let map = StorageMap::new();
        map.put(b"k1", b"v1".to_vec(), Version(1));
        map.put(b"k1", b"v2".to_vec(), Version(5));
        let at_snapshot = map.get_versioned(b"k1", Version(3)).unwrap();
        assert_eq!(at_snapshot.value, b"v1");
    }

    #[test]
    fn get_versioned_before_any_write_is_none() {
        let map = StorageMap::new();
        map.put(b"k1", b"v1".to_vec(), Version(5));
        assert!(map.get_versioned(b"k1", Version(1)).is_none());
    }

    #[test]
    fn gc_keeps_latest_and_prunes_old() {
        let map = StorageMap::new();
        for v in 1..=5u64 {
            map.put(b"k1", format!("v{v}").into_bytes(), Version(v));
        }
        let pruned = map.gc(Version(4));
        assert_eq!(pruned, 3);
        assert!(map.get_versioned(b"k1", Version(1)).is_none());
        assert_eq!(map.get(b"k1").unwrap().value, b"v5");
    }

    #[test]
    fn gc_never_prunes_the_last_remaining_version() {
        let map = StorageMap::new();
        map.put(b"k1", b"only".to_vec(), Version(1));
        let pruned = map.gc(Version(1000));
        assert_eq!(pruned, 0);
        assert_eq!(map.get(b"k1").unwrap().value, b"only");
    }

    #[test]
    fn replay_write_and_delete_install_directly() {
        let map = StorageMap::new();
        map.replay_write(b"k1", b"v1", Version(10));
        assert_eq!(map.get(b"k1").unwrap().value, b"v1");
        map.replay_delete(b"k1", Version(11));
        assert!(map.get(b"k1").is_none());
    }

    #[test]
    fn integrity_digest_is_deterministic_and_order_independent() {
        let a = StorageMap::new();
        a.put(b"k1", b"v1".to_vec(), Version(1));
        a.put(b"k2", b"v2".to_vec(), Version(2));

        let b = StorageMap::new();
        b.put(b"k2", b"v2".to_vec(), Version(2));
        b.put(b"k1", b"v1".to_vec(), Version(1));

        assert_eq!(a.integrity_digest(), b.integrity_digest());
    }

    #[test]
    fn integrity_digest_changes_on_mutation() {
        let map = StorageMap::new();
        let before = map.integrity_digest();
        map.put(b"k1", b"v1".to_vec(), Version(1));
        let after = map.integrity_digest();
        assert_ne!(before, after);
    }

    #[test]
    fn current_version_tracks_highest_write() {
        let map = StorageMap::new();
        map.put(b"k1", b"v1".to_vec(), Version(7));
        map.put(b"k2", b"v1".to_vec(), Version(3));
        assert_eq!(map.current_version(), Version(7));
    }
}
