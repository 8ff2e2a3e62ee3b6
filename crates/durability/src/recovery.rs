//! Recovery engine (component C9).
//!
//! Runs once at startup, before any client traffic is accepted:
//! 1. Detect whether the previous instance shut down cleanly.
//! 2. Find the latest checkpoint whose manifest validates.
//! 3. Analysis pass: classify every transaction seen in the WAL as a
//!    winner (has a `Commit` frame) or a loser (does not).
//! 4. Redo pass: apply winners' writes/deletes to the storage map, in
//!    LSN order.
//! 5. Validate the reconstructed state's integrity digest.
//! 6. Resume: truncate any torn tail, open the WAL for new appends.

use std::collections::{HashMap, HashSet};

use mantis_core::error::{MantisError, MantisResult};
use mantis_core::ids::{Lsn, TxId};
use mantis_core::traits::{IntegritySource, ReplayTarget};
use tracing::{error, info, warn};

use crate::checkpoint::CheckpointController;
use crate::layout::Layout;
use crate::wal::frame::{FrameError, FrameKind, Payload};
use crate::wal::reader::WalReader;
use crate::wal::segment::WalSegment;

/// Whether the previous instance shut down cleanly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownState {
    /// The clean-shutdown marker was present; recovery is a formality.
    Clean,
    /// No clean-shutdown marker; the WAL must be fully analyzed.
    Unclean,
}

/// Outcome of a recovery pass.
#[derive(Debug)]
pub struct RecoveryReport {
    /// Whether the previous instance shut down cleanly.
    pub shutdown_state: ShutdownState,
    /// The checkpoint LSN recovery started from, if any checkpoint validated.
    pub starting_checkpoint_lsn: Option<Lsn>,
    /// Transactions whose `Commit` frame was observed.
    pub winners: Vec<TxId>,
    /// Transactions with writes but no `Commit` frame.
    pub losers: Vec<TxId>,
    /// Number of `Write`/`Delete` frames applied during the redo pass.
    pub frames_redone: usize,
    /// The LSN the WAL writer should resume appending at.
    pub next_lsn: Lsn,
    /// True if the post-redo integrity digest failed to validate and the
    /// database must start in safe mode.
    pub safe_mode_entered: bool,
    /// The integrity digest computed over the reconstructed state.
    pub integrity_digest: [u8; 32],
}

/// Orchestrates the recovery algorithm described in the module docs.
pub struct RecoveryEngine;

impl RecoveryEngine {
    /// Run recovery against `layout`, applying redo to `target`. `target`
    /// doubles as the [`IntegritySource`] used for post-redo validation,
    /// since both are implemented by the same storage map in practice.
    ///
    /// Returns `Err` only for conditions recovery itself cannot proceed
    /// past (the database is already in safe mode and must be cleared
    /// manually first, or the WAL could not be read at all). A digest
    /// mismatch after a successful redo pass is *not* an error: it is
    /// reported via `safe_mode_entered` so `open` can still return a
    /// (read-only) handle.
    pub fn run<T>(layout: &Layout, target: &T) -> MantisResult<RecoveryReport>
    where
        T: ReplayTarget + IntegritySource,
    {
        if layout.in_safe_mode() {
            return Err(MantisError::SafeMode {
                reason: "database entered safe mode on a prior run; clear_safe_mode() required".into(),
            });
        }

        let shutdown_state = if layout.was_clean_shutdown() {
            ShutdownState::Clean
        } else {
            ShutdownState::Unclean
        };
        layout.clear_clean_marker()?;
        info!(?shutdown_state, "starting recovery");

        let checkpoint_controller = CheckpointController::new(layout.clone(), u64::MAX, u64::MAX, 0);
        let starting_checkpoint = checkpoint_controller.latest_valid_checkpoint();
        let starting_checkpoint_lsn = starting_checkpoint.as_ref().map(|(lsn, _)| Lsn(*lsn));

        let wal_dir = layout.wal_dir();
        let read_result = WalReader::read_all(&wal_dir).map_err(|e| Self::classify_read_error(layout, e))?;

        if let Some((segment_number, valid_len)) = read_result.truncate_to {
            Self::truncate_torn_tail(&wal_dir, segment_number, valid_len)?;
        }

        let (winners, losers) = Self::classify_transactions(&read_result.frames);

        let mut frames_redone = 0usize;
        for frame in &read_result.frames {
            if let Some(floor) = starting_checkpoint_lsn {
                if frame.lsn <= floor {
                    continue;
                }
            }
            if !winners.contains(&frame.tx_id) {
                continue;
            }
            match (&frame.kind, &frame.payload) {
                (FrameKind::Write, Payload::Write { key, value, .. }) => {
                    target.replay_write(key, value, Self::version_for(frame.lsn));
                    frames_redone += 1;
                }
                (FrameKind::Delete, Payload::Delete { key, .. }) => {
                    target.replay_delete(key, Self::version_for(frame.lsn));
                    frames_redone += 1;
                }
                _ => {}
            }
        }

        let integrity_digest = target.integrity_digest();
        let mut safe_mode_entered = false;

        if let Some((_, manifest)) = &starting_checkpoint {
            let replayed_past_checkpoint = read_result
                .frames
                .iter()
                .any(|f| f.lsn > starting_checkpoint_lsn.unwrap() && winners.contains(&f.tx_id));
            if !replayed_past_checkpoint && integrity_digest != manifest.integrity_digest {
                error!("integrity digest mismatch against checkpoint; entering safe mode");
                layout.mark_safe_mode()?;
                safe_mode_entered = true;
            }
        }

        let next_lsn = read_result
            .frames
            .iter()
            .map(|f| f.lsn)
            .max()
            .map(Lsn::next)
            .or(starting_checkpoint_lsn.map(Lsn::next))
            .unwrap_or(Lsn(1));

        if !losers.is_empty() {
            warn!(count = losers.len(), "recovery discarded uncommitted transactions");
        }

        Ok(RecoveryReport {
            shutdown_state,
            starting_checkpoint_lsn,
            winners,
            losers,
            frames_redone,
            next_lsn,
            safe_mode_entered,
            integrity_digest,
        })
    }

    /// WAL frames don't carry a `Version` directly (only `prev_version`);
    /// recovery assigns the post-write version from the frame's LSN,
    /// which is monotonic and unique, matching the storage map's own
    /// version-assignment invariant (I4).
    fn version_for(lsn: Lsn) -> mantis_core::ids::Version {
        mantis_core::ids::Version(lsn.as_u64())
    }

    fn classify_transactions(frames: &[crate::wal::frame::Frame]) -> (Vec<TxId>, Vec<TxId>) {
        let mut committed: HashSet<TxId> = HashSet::new();
        let mut seen: HashMap<TxId, ()> = HashMap::new();

        for frame in frames {
            // A Checkpoint frame isn't owned by any transaction (it's
            // logged under the TxId(0) sentinel) and must not be mistaken
            // for an uncommitted one.
            if frame.kind == FrameKind::Checkpoint {
                continue;
            }
            seen.entry(frame.tx_id).or_insert(());
            if frame.kind == FrameKind::Commit {
                committed.insert(frame.tx_id);
            }
        }

        let winners: Vec<TxId> = seen.keys().filter(|tx| committed.contains(tx)).copied().collect();
        let losers: Vec<TxId> = seen.keys().filter(|tx| !committed.contains(tx)).copied().collect();
        (winners, losers)
    }

    fn truncate_torn_tail(wal_dir: &std::path::Path, segment_number: u64, valid_len: u64) -> MantisResult<()> {
        let mut segment = WalSegment::open_append(wal_dir, segment_number)?;
        segment.truncate(valid_len)?;
        segment.sync()?;
        warn!(segment_number, valid_len, "truncated torn WAL tail");
        Ok(())
    }

    fn classify_read_error(layout: &Layout, e: FrameError) -> MantisError {
        let _ = layout.mark_safe_mode();
        match e {
            FrameError::ChecksumMismatch => MantisError::CorruptionDetected {
                detail: "WAL frame checksum mismatch during recovery".into(),
            },
            other => MantisError::RecoveryFailed {
                detail: other.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::frame::{Frame, Payload};
    use crate::wal::writer::WalWriter;
    use mantis_core::config::DurabilityMode;
    use std::sync::Mutex;

    struct RecordingTarget {
        writes: Mutex<Vec<(Vec<u8>, Vec<u8>)>>,
        deletes: Mutex<Vec<Vec<u8>>>,
    }

    impl RecordingTarget {
        fn new() -> Self {
            RecordingTarget {
                writes: Mutex::new(Vec::new()),
                deletes: Mutex::new(Vec::new()),
            }
        }
    }

    impl ReplayTarget for RecordingTarget {
        fn replay_write(&self, key: &[u8], value: &[u8], _version: mantis_core::ids::Version) {
            self.writes.lock().unwrap().push((key.to_vec(), value.to_vec()));
        }
        fn replay_delete(&self, key: &[u8], _version: mantis_core::ids::Version) {
            self.deletes.lock().unwrap().push(key.to_vec());
        }
    }

    impl IntegritySource for RecordingTarget {
        fn integrity_digest(&self) -> [u8; 32] {
            [0u8; 32]
        }
    }

    fn write_payload(key: &[u8], value: &[u8]) -> Payload {
        Payload::Write {
            key: key.to_vec(),
            value: value.to_vec(),
            prev_version: mantis_core::ids::Version::NONE,
        }
    }

    #[test]
    fn redoes_only_committed_transactions() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        {
            let mut writer = WalWriter::open(layout.clone(), 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Begin,
                    payload: Payload::Empty,
                })
                .unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Write,
                    payload: write_payload(b"k1", b"v1"),
                })
                .unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Commit,
                    payload: Payload::Empty,
                })
                .unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(2),
                    kind: FrameKind::Begin,
                    payload: Payload::Empty,
                })
                .unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(2),
                    kind: FrameKind::Write,
                    payload: write_payload(b"k2", b"v2"),
                })
                .unwrap();
            // tx 2 never commits: torn/aborted transaction, must not be redone.
        }

        let target = RecordingTarget::new();
        let report = RecoveryEngine::run(&layout, &target).unwrap();

        assert_eq!(report.winners, vec![TxId(1)]);
        assert_eq!(report.losers, vec![TxId(2)]);
        assert_eq!(report.frames_redone, 1);
        assert_eq!(target.writes.lock().unwrap().as_slice(), &[(b"k1".to_vec(), b"v1".to_vec())]);
    }

    #[test]
    fn clean_shutdown_marker_is_observed_and_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        layout.mark_clean().unwrap();

        let target = RecordingTarget::new();
        let report = RecoveryEngine::run(&layout, &target).unwrap();

        assert_eq!(report.shutdown_state, ShutdownState::Clean);
        assert!(!layout.was_clean_shutdown());
    }

    #[test]
    fn unclean_shutdown_is_detected() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();

        let target = RecordingTarget::new();
        let report = RecoveryEngine::run(&layout, &target).unwrap();

        assert_eq!(report.shutdown_state, ShutdownState::Unclean);
    }

    #[test]
    fn refuses_to_run_while_already_in_safe_mode() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        layout.mark_safe_mode().unwrap();

        let target = RecordingTarget::new();
        let result = RecoveryEngine::run(&layout, &target);
        assert!(matches!(result, Err(MantisError::SafeMode { .. })));
    }

    #[test]
    fn mid_segment_corruption_enters_safe_mode_via_error() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        {
            let mut writer = WalWriter::open(layout.clone(), 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Begin,
                    payload: Payload::Empty,
                })
                .unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Commit,
                    payload: Payload::Empty,
                })
                .unwrap();
        }
        let path = layout.wal_dir().join("00000001.seg");
        let mut bytes = std::fs::read(&path).unwrap();
        let header_size = crate::wal::segment::SEGMENT_HEADER_SIZE;
        bytes[header_size + 5] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let target = RecordingTarget::new();
        let result = RecoveryEngine::run(&layout, &target);
        assert!(result.is_err());
        assert!(layout.in_safe_mode());
    }

    #[test]
    fn next_lsn_resumes_after_highest_seen() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        {
            let mut writer = WalWriter::open(layout.clone(), 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Begin,
                    payload: Payload::Empty,
                })
                .unwrap();
            writer
                .append(Frame {
                    lsn: Lsn(0),
                    tx_id: TxId(1),
                    kind: FrameKind::Commit,
                    payload: Payload::Empty,
                })
                .unwrap();
        }
        let target = RecordingTarget::new();
        let report = RecoveryEngine::run(&layout, &target).unwrap();
        assert_eq!(report.next_lsn, Lsn(3));
    }
}
