//! Integrity scanner (component C11).
//!
//! A background pass that re-verifies checksums the write path already
//! computed once, looking for bit rot or torn writes that slipped past
//! the write-time check (disk errors surfacing later, a corrupted backup
//! restore). Two independent sources are scanned: live storage entries
//! (their per-entry CRC32C, recomputed from key+value+version) and WAL
//! segments behind the current write head (via [`mantis_durability`]'s
//! reader, which already verifies every frame's CRC32C as it decodes).
//! Findings are quarantined rather than silently dropped, so a read can
//! refuse to serve a key known to be corrupt instead of returning bad
//! bytes (§4.11).

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use mantis_core::checksum::{Checksum, ChecksumTag, Crc32cChecksum};
use mantis_durability::wal::reader::{ReadStopReason, WalReader};

use crate::map::StorageMap;

/// Which algorithm flagged the corruption, and where it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorruptionSource {
    /// A storage entry's checksum didn't match its stored value.
    StorageEntry { key: Vec<u8> },
    /// A WAL segment had a checksum mismatch at the given segment number.
    WalSegment { segment: u64 },
}

/// A single detected corruption, recorded for quarantine and reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptionEvent {
    pub source: CorruptionSource,
    pub algorithm: &'static str,
    /// Seconds since the epoch, for operator-facing reporting.
    pub detected_at_unix: u64,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Background corruption detector over storage entries and WAL segments.
/// Quarantined keys are tracked independently of the storage map itself,
/// so a scan can flag a key without mutating or removing it.
pub struct IntegrityScanner {
    quarantine: DashMap<Vec<u8>, CorruptionEvent>,
}

impl IntegrityScanner {
    pub fn new() -> Self {
        IntegrityScanner {
            quarantine: DashMap::new(),
        }
    }

    /// Recompute each live entry's checksum and quarantine any mismatch.
    /// Returns the events raised by this pass.
    pub fn scan_storage(&self, storage: &StorageMap) -> Vec<CorruptionEvent> {
        let mut events = Vec::new();
        for (key, entry) in storage.snapshot_latest() {
            let mut buf = Vec::with_capacity(key.len() + entry.value.len() + 8);
            buf.extend_from_slice(&key);
            buf.extend_from_slice(&entry.value);
            buf.extend_from_slice(&entry.version.as_u64().to_be_bytes());
            let recomputed = match Crc32cChecksum.compute(&buf) {
                ChecksumTag::Crc32c(v) => v,
                ChecksumTag::Sha256(_) => unreachable!(),
            };
            if recomputed != entry.entry_checksum {
                let event = CorruptionEvent {
                    source: CorruptionSource::StorageEntry { key: key.clone() },
                    algorithm: "crc32c",
                    detected_at_unix: now_unix(),
                };
                self.quarantine.insert(key, event.clone());
                events.push(event);
            }
        }
        events
    }

    /// Verify every WAL segment's frame checksums. A mid-stream mismatch
    /// (the only case [`WalReader::read_all`] treats as fatal) is recorded
    /// as a corruption event against that segment; a torn tail at the very
    /// end is expected crash behavior, not corruption, and is not reported.
    pub fn scan_wal(&self, wal_dir: &Path) -> Vec<CorruptionEvent> {
        match WalReader::read_all(wal_dir) {
            Ok(result) => {
                // A torn tail that isn't the last segment would already
                // have surfaced as an Err from read_all; EndOfData/TornTail
                // here are both clean outcomes for this scan's purposes.
                debug_assert!(!matches!(result.stop_reason, ReadStopReason::Corrupt { .. }));
                Vec::new()
            }
            Err(_) => {
                let segment = last_segment_number(wal_dir).unwrap_or(0);
                let event = CorruptionEvent {
                    source: CorruptionSource::WalSegment { segment },
                    algorithm: "crc32c",
                    detected_at_unix: now_unix(),
                };
                self.quarantine
                    .insert(format!("wal-segment-{segment}").into_bytes(), event.clone());
                vec![event]
            }
        }
    }

    /// Whether `key` is currently quarantined.
    pub fn is_quarantined(&self, key: &[u8]) -> bool {
        self.quarantine.contains_key(key)
    }

    /// All currently quarantined keys, for operator reporting.
    pub fn quarantined_keys(&self) -> Vec<Vec<u8>> {
        self.quarantine.iter().map(|e| e.key().clone()).collect()
    }

    /// Clear a quarantine entry once an operator has resolved it (restored
    /// from a known-good checkpoint, replaced the bad segment).
    pub fn clear_quarantine(&self, key: &[u8]) {
        self.quarantine.remove(key);
    }
}

impl Default for IntegrityScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn last_segment_number(wal_dir: &Path) -> Option<u64> {
    std::fs::read_dir(wal_dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| {
            e.file_name()
                .to_string_lossy()
                .strip_suffix(".seg")
                .and_then(|s| s.parse::<u64>().ok())
        })
        .max()
}
