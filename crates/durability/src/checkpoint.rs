//! Checkpoint / RPO controller (component C10).
//!
//! A checkpoint is a consistent durability horizon: the storage map's
//! state as of some LSN, captured with an integrity digest so recovery
//! (C9) can validate its redo pass against it. The controller tracks
//! when a new checkpoint is due (time, bytes, or an explicit request)
//! and whether the configured Recovery Point Objective is at risk.

use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use mantis_core::checksum::{checkpoint_checksum, Checksum};
use mantis_core::error::{MantisError, MantisResult};
use mantis_core::ids::{Lsn, TxId};
use mantis_core::traits::IntegritySource;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::layout::Layout;

/// Why a checkpoint is being taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointTrigger {
    /// `checkpoint_interval_ms` has elapsed since the last checkpoint.
    TimeElapsed,
    /// `checkpoint_bytes` of WAL have been written since the last checkpoint.
    BytesWritten,
    /// The caller asked for one explicitly (`Database::checkpoint`).
    Explicit,
    /// The configured RPO is at risk of being violated.
    RpoPressure,
}

/// On-disk checkpoint manifest: the LSN it covers, the integrity digest
/// of the storage map at that LSN, and the transactions still active
/// (uncommitted) at that instant, which recovery must treat as losers
/// even if their Commit frame later appears to have been truncated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointManifest {
    /// The LSN this checkpoint covers; replay resumes after it.
    pub lsn: Lsn,
    /// 256-bit digest over the storage map's contents at `lsn`.
    pub integrity_digest: [u8; 32],
    /// Transactions active (not yet committed or aborted) at checkpoint time.
    pub active_tx_ids: Vec<TxId>,
}

impl CheckpointManifest {
    fn to_bytes(&self) -> MantisResult<Vec<u8>> {
        rmp_serde::to_vec(self).map_err(|e| MantisError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> MantisResult<Self> {
        rmp_serde::from_slice(bytes).map_err(|e| MantisError::Serialization(e.to_string()))
    }
}

/// Drives checkpoint scheduling and writes checkpoint manifests to disk.
pub struct CheckpointController {
    layout: Layout,
    checkpoint_interval_ms: u64,
    checkpoint_bytes: u64,
    rpo_seconds: u64,
    last_checkpoint_at: Instant,
    bytes_since_checkpoint: u64,
    last_durable_at: Instant,
}

impl CheckpointController {
    /// Build a controller for a given layout and cadence configuration.
    pub fn new(layout: Layout, checkpoint_interval_ms: u64, checkpoint_bytes: u64, rpo_seconds: u64) -> Self {
        CheckpointController {
            layout,
            checkpoint_interval_ms,
            checkpoint_bytes,
            rpo_seconds,
            last_checkpoint_at: Instant::now(),
            bytes_since_checkpoint: 0,
            last_durable_at: Instant::now(),
        }
    }

    /// Record that `bytes` of WAL have been durably written, advancing
    /// the RPO clock and the byte-trigger accumulator.
    pub fn record_durable_bytes(&mut self, bytes: u64) {
        self.bytes_since_checkpoint += bytes;
        self.last_durable_at = Instant::now();
    }

    /// Whether a checkpoint should be taken right now, and why. Checked
    /// by the background checkpoint task on each tick.
    pub fn due_trigger(&self) -> Option<CheckpointTrigger> {
        if self.last_checkpoint_at.elapsed() >= Duration::from_millis(self.checkpoint_interval_ms) {
            return Some(CheckpointTrigger::TimeElapsed);
        }
        if self.bytes_since_checkpoint >= self.checkpoint_bytes {
            return Some(CheckpointTrigger::BytesWritten);
        }
        if let Some(trigger) = self.rpo_pressure() {
            return Some(trigger);
        }
        None
    }

    /// Checks whether the time since the last durable LSN is approaching
    /// the configured RPO. `rpo_seconds == 0` means every commit must
    /// already be durable (enforced by `Sync` durability at config
    /// validation time), so there is nothing to monitor here.
    fn rpo_pressure(&self) -> Option<CheckpointTrigger> {
        if self.rpo_seconds == 0 {
            return None;
        }
        let budget = Duration::from_secs(self.rpo_seconds);
        let elapsed = self.last_durable_at.elapsed();
        if elapsed >= budget {
            warn!(
                elapsed_secs = elapsed.as_secs(),
                rpo_seconds = self.rpo_seconds,
                "RPO violation: time since last durable write exceeds configured bound"
            );
            return Some(CheckpointTrigger::RpoPressure);
        }
        // Checkpoint preemptively once within 80% of budget, to avoid the violation.
        if elapsed.as_secs_f64() >= budget.as_secs_f64() * 0.8 {
            return Some(CheckpointTrigger::RpoPressure);
        }
        None
    }

    /// Take a checkpoint at `lsn`, capturing an integrity digest from
    /// `source` over the storage map's current state. Writes the
    /// manifest to `<root>/checkpoints/<lsn>.ckpt`, fsyncing both the
    /// file and its containing directory entry before returning.
    pub fn checkpoint(
        &mut self,
        lsn: Lsn,
        source: &dyn IntegritySource,
        active_tx_ids: Vec<TxId>,
    ) -> MantisResult<CheckpointManifest> {
        let manifest = CheckpointManifest {
            lsn,
            integrity_digest: source.integrity_digest(),
            active_tx_ids,
        };
        self.write_manifest(&manifest)?;

        self.last_checkpoint_at = Instant::now();
        self.bytes_since_checkpoint = 0;
        info!(lsn = lsn.as_u64(), "checkpoint written");
        Ok(manifest)
    }

    fn write_manifest(&self, manifest: &CheckpointManifest) -> MantisResult<()> {
        let body = manifest.to_bytes()?;
        let checksum = checkpoint_checksum();
        let tag = checksum.compute(&body);

        let mut framed = Vec::with_capacity(body.len() + 32);
        framed.extend_from_slice(&body);
        framed.extend_from_slice(&tag.to_bytes());

        let path = self.layout.checkpoint_path(manifest.lsn.as_u64());
        let tmp_path = path.with_extension("ckpt.tmp");
        std::fs::write(&tmp_path, &framed)?;
        let file = std::fs::File::open(&tmp_path)?;
        file.sync_all()?;
        drop(file);
        std::fs::rename(&tmp_path, &path)?;
        Layout::fsync_parent_dir(&path)?;
        Ok(())
    }

    /// Read and validate the manifest at `lsn`, checking its trailing
    /// checksum before deserializing.
    pub fn read_manifest(&self, lsn: u64) -> MantisResult<CheckpointManifest> {
        Self::read_manifest_at(&self.layout.checkpoint_path(lsn))
    }

    fn read_manifest_at(path: &Path) -> MantisResult<CheckpointManifest> {
        let bytes = std::fs::read(path)?;
        if bytes.len() < 32 {
            return Err(MantisError::CorruptionDetected {
                detail: format!("checkpoint manifest {} shorter than its checksum trailer", path.display()),
            });
        }
        let (body, tag_bytes) = bytes.split_at(bytes.len() - 32);
        let checksum = checkpoint_checksum();
        let mut tag_array = [0u8; 32];
        tag_array.copy_from_slice(tag_bytes);
        let tag = mantis_core::checksum::ChecksumTag::Sha256(tag_array);
        if !checksum.verify(body, &tag) {
            return Err(MantisError::CorruptionDetected {
                detail: format!("checkpoint manifest {} failed checksum verification", path.display()),
            });
        }
        CheckpointManifest::from_bytes(body)
    }

    /// The highest-LSN checkpoint manifest that passes checksum
    /// validation, falling back to progressively older ones. Returns
    /// `None` if no checkpoint validates (a fresh database, or every
    /// manifest is corrupt).
    pub fn latest_valid_checkpoint(&self) -> Option<(u64, CheckpointManifest)> {
        let mut lsns = self.list_checkpoint_lsns().ok()?;
        lsns.sort_unstable_by(|a, b| b.cmp(a));
        for lsn in lsns {
            match self.read_manifest(lsn) {
                Ok(manifest) => return Some((lsn, manifest)),
                Err(e) => warn!(lsn, error = %e, "skipping invalid checkpoint manifest"),
            }
        }
        None
    }

    fn list_checkpoint_lsns(&self) -> io::Result<Vec<u64>> {
        let mut lsns = Vec::new();
        for entry in std::fs::read_dir(self.layout.checkpoints_dir())? {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(stem) = name.strip_suffix(".ckpt") {
                if let Ok(lsn) = stem.parse::<u64>() {
                    lsns.push(lsn);
                }
            }
        }
        Ok(lsns)
    }

    /// Segment numbers that are now covered by `covering_lsn` and may be
    /// truncated by the WAL writer, given the full list of segments and
    /// each segment's highest LSN.
    pub fn segments_covered_by(covering_lsn: Lsn, segment_max_lsns: &[(u64, Lsn)]) -> Vec<u64> {
        segment_max_lsns
            .iter()
            .filter(|(_, max_lsn)| *max_lsn <= covering_lsn)
            .map(|(segment, _)| *segment)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedDigest([u8; 32]);
    impl IntegritySource for FixedDigest {
        fn integrity_digest(&self) -> [u8; 32] {
            self.0
        }
    }

    fn controller(dir: &Path) -> CheckpointController {
        let layout = Layout::open(dir).unwrap();
        CheckpointController::new(layout, 60_000, 128 * 1024 * 1024, 0)
    }

    #[test]
    fn checkpoint_roundtrips_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        let source = FixedDigest([9u8; 32]);
        let manifest = controller.checkpoint(Lsn(42), &source, vec![TxId(7)]).unwrap();
        assert_eq!(manifest.lsn, Lsn(42));

        let reloaded = controller.read_manifest(42).unwrap();
        assert_eq!(reloaded, manifest);
    }

    #[test]
    fn corrupted_manifest_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        let source = FixedDigest([1u8; 32]);
        controller.checkpoint(Lsn(1), &source, vec![]).unwrap();

        let path = controller.layout.checkpoint_path(1);
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        assert!(controller.read_manifest(1).is_err());
    }

    #[test]
    fn latest_valid_checkpoint_skips_corrupt_ones() {
        let dir = tempfile::tempdir().unwrap();
        let mut controller = controller(dir.path());
        let source = FixedDigest([2u8; 32]);
        controller.checkpoint(Lsn(1), &source, vec![]).unwrap();
        controller.checkpoint(Lsn(2), &source, vec![]).unwrap();

        let path = controller.layout.checkpoint_path(2);
        let mut bytes = std::fs::read(&path).unwrap();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let (lsn, _) = controller.latest_valid_checkpoint().unwrap();
        assert_eq!(lsn, 1);
    }

    #[test]
    fn time_trigger_fires_after_interval() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let mut controller = CheckpointController::new(layout, 0, u64::MAX, 0);
        controller.last_checkpoint_at = Instant::now() - Duration::from_millis(10);
        assert_eq!(controller.due_trigger(), Some(CheckpointTrigger::TimeElapsed));
    }

    #[test]
    fn byte_trigger_fires_past_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let mut controller = CheckpointController::new(layout, u64::MAX, 100, 0);
        controller.record_durable_bytes(200);
        assert_eq!(controller.due_trigger(), Some(CheckpointTrigger::BytesWritten));
    }

    #[test]
    fn zero_rpo_never_signals_pressure() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let controller = CheckpointController::new(layout, u64::MAX, u64::MAX, 0);
        assert!(controller.rpo_pressure().is_none());
    }

    #[test]
    fn segments_covered_by_filters_correctly() {
        let covered = CheckpointController::segments_covered_by(
            Lsn(10),
            &[(1, Lsn(5)), (2, Lsn(10)), (3, Lsn(15))],
        );
        assert_eq!(covered, vec![1, 2]);
    }
}
