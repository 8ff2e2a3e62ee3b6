//! WAL reader / replayer (component C3).

use std::path::Path;

use super::frame::{Frame, FrameError};
use super::segment::WalSegment;
use crate::layout::Layout;

/// Why reading a segment stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadStopReason {
    /// Reached the end of written data cleanly.
    EndOfData,
    /// The final frame was incomplete — a torn write, expected after a crash.
    TornTail,
    /// A frame's checksum did not validate. Always fatal: a valid frame
    /// after an invalid one means the log itself is corrupt, not merely
    /// truncated (§4.3).
    Corrupt {
        /// Byte offset, relative to the segment's record region, where corruption begins.
        offset: usize,
    },
}

/// Result of reading every segment in a WAL directory.
#[derive(Debug)]
pub struct WalReadResult {
    /// All frames successfully decoded, in LSN order.
    pub frames: Vec<Frame>,
    /// Why the scan stopped (reflects the last segment read).
    pub stop_reason: ReadStopReason,
    /// If the last segment's tail was torn, the byte length it should be
    /// truncated to before new appends resume.
    pub truncate_to: Option<(u64, u64)>,
}

/// Reads WAL segments in LSN order, verifying each frame's checksum.
pub struct WalReader;

impl WalReader {
    /// Read every segment in `wal_dir`, in order, returning all valid
    /// frames and the unified stop reason. Returns `Err` the moment any
    /// segment shows mid-stream corruption (§4.3): a torn tail is only
    /// tolerated as the very last thing in the very last segment.
    pub fn read_all(wal_dir: &Path) -> Result<WalReadResult, FrameError> {
        let segment_numbers = list_segments(wal_dir)?;
        let mut frames = Vec::new();
        let mut stop_reason = ReadStopReason::EndOfData;
        let mut truncate_to = None;

        for (idx, segment_number) in segment_numbers.iter().enumerate() {
            let is_last = idx == segment_numbers.len() - 1;
            let mut segment = WalSegment::open_read(wal_dir, *segment_number).map_err(FrameError::Io)?;
            let body = segment.read_body().map_err(FrameError::Io)?;
            let (segment_frames, consumed, reason) = Self::read_body(&body);
            frames.extend(segment_frames);
            stop_reason = reason.clone();

            if let ReadStopReason::Corrupt { .. } = reason {
                return Err(FrameError::ChecksumMismatch);
            }
            if let ReadStopReason::TornTail = reason {
                if !is_last {
                    return Err(FrameError::Malformed(
                        "non-terminal segment ended with a torn tail",
                    ));
                }
                truncate_to = Some((
                    *segment_number,
                    consumed + super::segment::SEGMENT_HEADER_SIZE as u64,
                ));
            }
        }

        Ok(WalReadResult {
            frames,
            stop_reason,
            truncate_to,
        })
    }

    /// Decode frames from a segment's record-region bytes, returning the
    /// decoded frames, the byte offset consumed, and why decoding stopped.
    fn read_body(body: &[u8]) -> (Vec<Frame>, u64, ReadStopReason) {
        let mut frames = Vec::new();
        let mut offset = 0usize;

        while offset < body.len() {
            match Frame::from_bytes(&body[offset..]) {
                Ok((frame, consumed)) => {
                    frames.push(frame);
                    offset += consumed;
                }
                Err(FrameError::InsufficientData) => {
                    return (frames, offset as u64, ReadStopReason::TornTail);
                }
                Err(FrameError::ChecksumMismatch) => {
                    // A bad checksum alone doesn't say whether the log is
                    // corrupt or merely torn: a partial-sector write can
                    // extend the file to its declared length while leaving
                    // the content garbage. Only call it corrupt if a valid
                    // frame actually follows (§4.3); otherwise this is the
                    // torn tail and everything from here is discarded.
                    if let Some(next_offset) = skip_claimed_frame(&body[offset..]) {
                        if next_offset < body.len() - offset
                            && Frame::from_bytes(&body[offset + next_offset..]).is_ok()
                        {
                            return (frames, offset as u64, ReadStopReason::Corrupt { offset });
                        }
                    }
                    return (frames, offset as u64, ReadStopReason::TornTail);
                }
                Err(_) => {
                    return (frames, offset as u64, ReadStopReason::Corrupt { offset });
                }
            }
        }

        (frames, offset as u64, ReadStopReason::EndOfData)
    }
}

const FRAME_LEN_PREFIX: usize = 4;
const FRAME_CRC_LEN: usize = 4;

/// The byte length a frame claims to occupy (length prefix + body + CRC),
/// read without validating its checksum. `Frame::from_bytes` only returns
/// `ChecksumMismatch` once it has already confirmed this many bytes are
/// present, so this never fails when called right after one.
fn skip_claimed_frame(bytes: &[u8]) -> Option<usize> {
    if bytes.len() < FRAME_LEN_PREFIX {
        return None;
    }
    let body_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
    Some(FRAME_LEN_PREFIX + body_len + FRAME_CRC_LEN)
}

fn list_segments(wal_dir: &Path) -> Result<Vec<u64>, FrameError> {
    let mut segments = Vec::new();
    let entries = std::fs::read_dir(wal_dir).map_err(FrameError::Io)?;
    for entry in entries {
        let entry = entry.map_err(FrameError::Io)?;
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if let Some(stem) = name.strip_suffix(".seg") {
            if let Ok(n) = stem.parse::<u64>() {
                segments.push(n);
            }
        }
    }
    segments.sort_unstable();
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wal::frame::{FrameKind, Payload};
    use crate::wal::writer::WalWriter;
    use mantis_core::config::DurabilityMode;
    use mantis_core::{Lsn, TxId};

    fn begin_frame(tx: u64) -> Frame {
        Frame {
            lsn: Lsn(0),
            tx_id: TxId(tx),
            kind: FrameKind::Begin,
            payload: Payload::Empty,
        }
    }

    #[test]
    fn reads_back_written_frames() {
        let dir = tempfile::tempdir().unwrap();
        {
            let layout = Layout::open(dir.path()).unwrap();
            let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer.append(begin_frame(1)).unwrap();
            writer.append(begin_frame(2)).unwrap();
        }
        let result = WalReader::read_all(&dir.path().join("wal")).unwrap();
        assert_eq!(result.frames.len(), 2);
        assert_eq!(result.stop_reason, ReadStopReason::EndOfData);
    }

    #[test]
    fn torn_tail_is_non_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        {
            let layout = Layout::open(dir.path()).unwrap();
            let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer.append(begin_frame(1)).unwrap();
        }
        // Simulate a torn write: append a few extra, truncated bytes.
        let path = wal_dir.join("00000001.seg");
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        std::fs::write(&path, bytes).unwrap();

        let result = WalReader::read_all(&wal_dir).unwrap();
        assert_eq!(result.frames.len(), 1);
        assert_eq!(result.stop_reason, ReadStopReason::TornTail);
        assert!(result.truncate_to.is_some());
    }

    #[test]
    fn mid_segment_corruption_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        {
            let layout = Layout::open(dir.path()).unwrap();
            let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer.append(begin_frame(1)).unwrap();
            writer.append(begin_frame(2)).unwrap();
        }
        let path = wal_dir.join("00000001.seg");
        let mut bytes = std::fs::read(&path).unwrap();
        // Flip a byte inside the first frame's body, leaving the second frame intact.
        let header_size = super::super::segment::SEGMENT_HEADER_SIZE;
        bytes[header_size + 5] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = WalReader::read_all(&wal_dir);
        assert!(result.is_err());
    }

    #[test]
    fn full_length_frame_with_bad_checksum_at_tail_is_torn_not_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        {
            let layout = Layout::open(dir.path()).unwrap();
            let mut writer = WalWriter::open(layout, 1024 * 1024, DurabilityMode::Sync).unwrap();
            writer.append(begin_frame(1)).unwrap();
        }
        // Flip a byte in the trailing CRC itself: the frame still declares
        // its full length (nothing truncated), but its checksum no longer
        // validates. With nothing after it, this must read as a torn tail,
        // not a fatal corruption (a bit flip here is indistinguishable from
        // a partial-sector write that still extended the file).
        let path = wal_dir.join("00000001.seg");
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let result = WalReader::read_all(&wal_dir).unwrap();
        assert!(result.frames.is_empty());
        assert_eq!(result.stop_reason, ReadStopReason::TornTail);
        assert!(result.truncate_to.is_some());
    }

    #[test]
    fn empty_wal_dir_reads_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let wal_dir = dir.path().join("wal");
        std::fs::create_dir_all(&wal_dir).unwrap();
        let result = WalReader::read_all(&wal_dir).unwrap();
        assert!(result.frames.is_empty());
        assert_eq!(result.stop_reason, ReadStopReason::EndOfData);
    }
}
