//! WAL segment writer (component C2).

use std::io;
use std::path::PathBuf;
use std::time::Instant;

use mantis_core::config::DurabilityMode;
use mantis_core::error::{MantisError, MantisResult};
use mantis_core::ids::Lsn;
use tracing::{debug, warn};

use super::frame::Frame;
use super::segment::WalSegment;
use crate::layout::Layout;

/// Default WAL segment rotation threshold, mirrored from [`mantis_core::Config`].
const DEFAULT_SEGMENT_SIZE: u64 = 64 * 1024 * 1024;

/// Appends framed WAL records to rotating segment files and enforces the
/// configured durability mode's fsync policy.
///
/// A writer is single-threaded by construction: callers serialize access
/// (the transaction manager holds it behind a `Mutex`), which keeps LSN
/// assignment, append order, and on-disk append order identical (§5).
pub struct WalWriter {
    layout: Layout,
    segment: WalSegment,
    segment_size_limit: u64,
    durability: DurabilityMode,
    next_lsn: u64,
    bytes_since_sync: u64,
    writes_since_sync: usize,
    last_sync: Instant,
    degraded: bool,
}

impl WalWriter {
    /// Open (or create) the WAL writer at the given layout, resuming the
    /// latest existing segment if present.
    pub fn open(layout: Layout, segment_size_limit: u64, durability: DurabilityMode) -> MantisResult<Self> {
        let segment_size_limit = if segment_size_limit == 0 {
            DEFAULT_SEGMENT_SIZE
        } else {
            segment_size_limit
        };
        let segments = layout.list_segments()?;
        let segment = match segments.last() {
            Some(&latest) => WalSegment::open_append(&layout.wal_dir(), latest)?,
            None => WalSegment::create(&layout.wal_dir(), 1)?,
        };
        Ok(WalWriter {
            layout,
            segment,
            segment_size_limit,
            durability,
            next_lsn: 1,
            bytes_since_sync: 0,
            writes_since_sync: 0,
            last_sync: Instant::now(),
            degraded: false,
        })
    }

    /// Resume with an explicit starting LSN, used after recovery has
    /// determined the highest LSN already present on disk.
    pub fn resume_at(&mut self, next_lsn: u64) {
        self.next_lsn = next_lsn;
    }

    /// The next LSN that will be assigned.
    pub fn next_lsn(&self) -> Lsn {
        Lsn(self.next_lsn)
    }

    /// Current durability mode.
    pub fn durability(&self) -> DurabilityMode {
        self.durability
    }

    /// Append one frame (its LSN is overwritten with the writer's next
    /// LSN), returning the LSN it was assigned. Rotates the segment first
    /// if the frame would overflow the configured limit.
    pub fn append(&mut self, mut frame: Frame) -> MantisResult<Lsn> {
        if self.degraded {
            return Err(MantisError::DurabilityFailure {
                lsn: Lsn(self.next_lsn),
                detail: "writer is degraded after a prior fsync failure".into(),
            });
        }

        let lsn = Lsn(self.next_lsn);
        frame.lsn = lsn;
        let bytes = frame.to_bytes();

        if self.segment.size() + bytes.len() as u64 > self.segment_size_limit {
            self.rotate_segment()?;
        }

        self.segment.append(&bytes).map_err(|e| self.to_out_of_space_or_io(e))?;
        self.next_lsn += 1;
        self.bytes_since_sync += bytes.len() as u64;
        self.writes_since_sync += 1;

        self.maybe_sync(lsn)?;
        Ok(lsn)
    }

    fn to_out_of_space_or_io(&self, e: io::Error) -> MantisError {
        if e.kind() == io::ErrorKind::Other || e.raw_os_error() == Some(28) {
            MantisError::OutOfSpace {
                detail: e.to_string(),
            }
        } else {
            MantisError::IoError(e)
        }
    }

    fn maybe_sync(&mut self, lsn: Lsn) -> MantisResult<()> {
        let should_sync = match self.durability {
            DurabilityMode::Sync => true,
            DurabilityMode::GroupCommit { .. } => {
                // Group-commit coalescing is orchestrated by the caller
                // (the transaction manager batches commits within the
                // window); once invoked, this writer always flushes.
                true
            }
            DurabilityMode::Async { interval_ms } => {
                self.writes_since_sync >= 1000
                    || self.last_sync.elapsed().as_millis() as u64 >= interval_ms
            }
        };

        if should_sync {
            self.sync(lsn)?;
        }
        Ok(())
    }

    /// Fsync the active segment. Per §4.2's rotation resolution, if the
    /// most recent append triggered a rotation, both the closed segment
    /// and the new segment's directory entry are made durable.
    pub fn sync(&mut self, _upto_lsn: Lsn) -> MantisResult<()> {
        if let Err(e) = self.segment.sync() {
            self.degraded = true;
            warn!(error = %e, "fsync failed, WAL writer is now degraded");
            return Err(MantisError::DurabilityFailure {
                lsn: Lsn(self.next_lsn),
                detail: e.to_string(),
            });
        }
        self.bytes_since_sync = 0;
        self.writes_since_sync = 0;
        self.last_sync = Instant::now();
        Ok(())
    }

    fn rotate_segment(&mut self) -> MantisResult<()> {
        self.segment
            .sync()
            .map_err(|e| self.to_out_of_space_or_io(e))?;
        let next_number = self.segment.segment_number() + 1;
        let new_segment = WalSegment::create(&self.layout.wal_dir(), next_number)
            .map_err(|e| self.to_out_of_space_or_io(e))?;
        Layout::fsync_parent_dir(&new_segment.path().to_path_buf())
            .map_err(|e| self.to_out_of_space_or_io(e))?;
        debug!(segment = next_number, "rotated WAL segment");
        self.segment = new_segment;
        Ok(())
    }

    /// Drop the segments whose highest LSN is covered by `upto_lsn`,
    /// i.e. every segment strictly below the one currently open that a
    /// checkpoint has already made redundant. Only ever called by the
    /// checkpoint controller after a checkpoint manifest is durable.
    pub fn truncate_prefix(&self, segments_to_remove: &[u64]) -> io::Result<()> {
        for segment_number in segments_to_remove {
            let path = self.layout.segment_path(*segment_number);
            if path.exists() {
                std::fs::remove_file(path)?;
            }
        }
        Ok(())
    }

    /// Path to the WAL directory.
    pub fn wal_dir(&self) -> PathBuf {
        self.layout.wal_dir()
    }

    /// Current active segment's number.
    pub fn current_segment_number(&self) -> u64 {
        self.segment.segment_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::frame::{FrameKind, Payload};
    use mantis_core::TxId;

    fn begin_frame(tx: u64) -> Frame {
        Frame {
            lsn: Lsn(0),
            tx_id: TxId(tx),
            kind: FrameKind::Begin,
            payload: Payload::Empty,
        }
    }

    #[test]
    fn append_assigns_increasing_lsns() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
        let lsn1 = writer.append(begin_frame(1)).unwrap();
        let lsn2 = writer.append(begin_frame(1)).unwrap();
        assert_eq!(lsn1, Lsn(1));
        assert_eq!(lsn2, Lsn(2));
    }

    #[test]
    fn rotation_happens_when_segment_full() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let mut writer = WalWriter::open(layout, 64, DurabilityMode::Sync).unwrap();
        for i in 0..20 {
            writer.append(begin_frame(i)).unwrap();
        }
        assert!(writer.current_segment_number() > 1);
    }

    #[test]
    fn resume_reopens_existing_segment() {
        let dir = tempfile::tempdir().unwrap();
        {
            let layout = Layout::open(dir.path()).unwrap();
            let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer.append(begin_frame(1)).unwrap();
        }
        let layout = Layout::open(dir.path()).unwrap();
        let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
        writer.resume_at(2);
        let lsn = writer.append(begin_frame(2)).unwrap();
        assert_eq!(lsn, Lsn(2));
    }

    #[test]
    fn async_mode_does_not_sync_on_every_write() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let mut writer = WalWriter::open(
            layout,
            1024 * 1024,
            DurabilityMode::Async { interval_ms: 100_000 },
        )
        .unwrap();
        writer.append(begin_frame(1)).unwrap();
        assert_eq!(writer.writes_since_sync, 1);
    }

    #[test]
    fn truncate_prefix_removes_segments() {
        let dir = tempfile::tempdir().unwrap();
        let layout = Layout::open(dir.path()).unwrap();
        let mut writer = WalWriter::open(layout, 64, DurabilityMode::Sync).unwrap();
        for i in 0..20 {
            writer.append(begin_frame(i)).unwrap();
        }
        let wal_dir = writer.wal_dir();
        writer.truncate_prefix(&[1]).unwrap();
        assert!(!wal_dir.join("00000001.seg").exists());
    }
}
