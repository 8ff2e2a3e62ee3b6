//! WAL frame encoding (§6, bit-exact layout):
//!
//! ```text
//! offset  size    field
//! 0       4       length   (big-endian u32, excludes this field)
//! 4       8       lsn      (big-endian u64)
//! 12      8       tx_id    (big-endian u64)
//! 20      1       kind     (1=Begin 2=Write 3=Delete 4=Commit 5=Abort 6=Checkpoint)
//! 21      var     payload  (kind-dependent)
//! end-4   4       crc32c   (Castagnoli polynomial over bytes [0 .. end-4))
//! ```
//!
//! `Write` payload: `key_len:u16, key, value_len:u32, value, prev_version:u64`.
//! `Delete` payload: `key_len:u16, key, prev_version:u64`.
//! `Checkpoint` payload: `integrity_digest:32B, active_tx_count:u32, active_tx_ids:u64[]`.
//! `Begin`/`Commit`/`Abort` payloads are empty.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use mantis_core::checksum::{Checksum, Crc32cChecksum};
use mantis_core::{Lsn, TxId, Version};
use std::io::{self, Cursor, Read, Write};

const HEADER_LEN: usize = 21; // length(4) + lsn(8) + tx_id(8) + kind(1)
const CRC_LEN: usize = 4;

/// The kind of a WAL frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Marks the start of a transaction (may be deferred for read-only transactions).
    Begin = 1,
    /// A key write with its previous version (for recovery bookkeeping).
    Write = 2,
    /// A key delete with its previous version.
    Delete = 3,
    /// Marks a transaction as committed; without this frame its writes are ignored by recovery.
    Commit = 4,
    /// Marks a transaction as aborted.
    Abort = 5,
    /// Records a checkpoint's integrity digest and active-transaction set.
    Checkpoint = 6,
}

impl FrameKind {
    fn from_u8(v: u8) -> Result<Self, FrameError> {
        match v {
            1 => Ok(FrameKind::Begin),
            2 => Ok(FrameKind::Write),
            3 => Ok(FrameKind::Delete),
            4 => Ok(FrameKind::Commit),
            5 => Ok(FrameKind::Abort),
            6 => Ok(FrameKind::Checkpoint),
            other => Err(FrameError::UnknownKind(other)),
        }
    }
}

/// Payload carried by a [`Frame`], varying by [`FrameKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// No payload (Begin, Commit, Abort).
    Empty,
    /// A write: the key, the new value, and the version it replaces.
    Write {
        /// Key bytes.
        key: Vec<u8>,
        /// New value bytes.
        value: Vec<u8>,
        /// Version being replaced (`Version::NONE` for a first write).
        prev_version: Version,
    },
    /// A delete: the key and the version it replaces.
    Delete {
        /// Key bytes.
        key: Vec<u8>,
        /// Version being replaced.
        prev_version: Version,
    },
    /// A checkpoint's manifest summary.
    Checkpoint {
        /// 256-bit integrity digest over the snapshot.
        integrity_digest: [u8; 32],
        /// Transactions active (uncommitted) at checkpoint time.
        active_tx_ids: Vec<TxId>,
    },
}

/// A single framed WAL record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// This frame's log sequence number.
    pub lsn: Lsn,
    /// The transaction this frame belongs to.
    pub tx_id: TxId,
    /// The frame kind.
    pub kind: FrameKind,
    /// The kind-dependent payload.
    pub payload: Payload,
}

impl Frame {
    /// Serialize the frame to its bit-exact wire layout, including the
    /// length prefix and trailing CRC32C.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(HEADER_LEN + 32);
        body.write_u64::<BigEndian>(self.lsn.as_u64()).unwrap();
        body.write_u64::<BigEndian>(self.tx_id.as_u64()).unwrap();
        body.write_u8(self.kind as u8).unwrap();
        encode_payload(&self.payload, &mut body).unwrap();

        let mut framed = Vec::with_capacity(4 + body.len() + CRC_LEN);
        framed
            .write_u32::<BigEndian>(body.len() as u32)
            .unwrap();
        framed.extend_from_slice(&body);

        let checksum = Crc32cChecksum;
        let tag = checksum.compute(&framed);
        framed.extend_from_slice(&tag.to_bytes());
        framed
    }

    /// Parse one frame from the front of `bytes`, returning the frame and
    /// the number of bytes consumed. Distinguishes an incomplete tail
    /// (`InsufficientData`, expected after a crash) from a checksum
    /// mismatch (`ChecksumMismatch`, fatal mid-segment).
    pub fn from_bytes(bytes: &[u8]) -> Result<(Frame, usize), FrameError> {
        if bytes.len() < 4 {
            return Err(FrameError::InsufficientData);
        }
        let body_len = u32::from_be_bytes(bytes[0..4].try_into().unwrap()) as usize;
        let total_len = 4 + body_len + CRC_LEN;
        if bytes.len() < total_len {
            return Err(FrameError::InsufficientData);
        }
        if body_len < HEADER_LEN - 4 {
            return Err(FrameError::Malformed("frame body shorter than header"));
        }

        let framed = &bytes[0..total_len - CRC_LEN];
        let expected_crc = &bytes[total_len - CRC_LEN..total_len];
        let checksum = Crc32cChecksum;
        let computed = checksum.compute(framed);
        if computed.to_bytes() != expected_crc {
            return Err(FrameError::ChecksumMismatch);
        }

        let body = &bytes[4..4 + body_len];
        let mut cursor = Cursor::new(body);
        let lsn = Lsn(cursor.read_u64::<BigEndian>()?);
        let tx_id = TxId(cursor.read_u64::<BigEndian>()?);
        let kind = FrameKind::from_u8(cursor.read_u8()?)?;
        let payload = decode_payload(kind, &mut cursor)?;

        Ok((
            Frame {
                lsn,
                tx_id,
                kind,
                payload,
            },
            total_len,
        ))
    }
}

fn encode_payload(payload: &Payload, out: &mut Vec<u8>) -> io::Result<()> {
    match payload {
        Payload::Empty => Ok(()),
        Payload::Write {
            key,
            value,
            prev_version,
        } => {
            out.write_u16::<BigEndian>(key.len() as u16)?;
            out.write_all(key)?;
            out.write_u32::<BigEndian>(value.len() as u32)?;
            out.write_all(value)?;
            out.write_u64::<BigEndian>(prev_version.as_u64())?;
            Ok(())
        }
        Payload::Delete { key, prev_version } => {
            out.write_u16::<BigEndian>(key.len() as u16)?;
            out.write_all(key)?;
            out.write_u64::<BigEndian>(prev_version.as_u64())?;
            Ok(())
        }
        Payload::Checkpoint {
            integrity_digest,
            active_tx_ids,
        } => {
            out.write_all(integrity_digest)?;
            out.write_u32::<BigEndian>(active_tx_ids.len() as u32)?;
            for tx_id in active_tx_ids {
                out.write_u64::<BigEndian>(tx_id.as_u64())?;
            }
            Ok(())
        }
    }
}

fn decode_payload(kind: FrameKind, cursor: &mut Cursor<&[u8]>) -> Result<Payload, FrameError> {
    match kind {
        FrameKind::Begin | FrameKind::Commit | FrameKind::Abort => Ok(Payload::Empty),
        FrameKind::Write => {
            let key_len = cursor.read_u16::<BigEndian>()? as usize;
            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;
            let value_len = cursor.read_u32::<BigEndian>()? as usize;
            let mut value = vec![0u8; value_len];
            cursor.read_exact(&mut value)?;
            let prev_version = Version(cursor.read_u64::<BigEndian>()?);
            Ok(Payload::Write {
                key,
                value,
                prev_version,
            })
        }
        FrameKind::Delete => {
            let key_len = cursor.read_u16::<BigEndian>()? as usize;
            let mut key = vec![0u8; key_len];
            cursor.read_exact(&mut key)?;
            let prev_version = Version(cursor.read_u64::<BigEndian>()?);
            Ok(Payload::Delete { key, prev_version })
        }
        FrameKind::Checkpoint => {
            let mut digest = [0u8; 32];
            cursor.read_exact(&mut digest)?;
            let count = cursor.read_u32::<BigEndian>()? as usize;
            let mut active_tx_ids = Vec::with_capacity(count);
            for _ in 0..count {
                active_tx_ids.push(TxId(cursor.read_u64::<BigEndian>()?));
            }
            Ok(Payload::Checkpoint {
                integrity_digest: digest,
                active_tx_ids,
            })
        }
    }
}

/// Errors from decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not enough bytes buffered yet to decode a full frame. Expected at
    /// a segment's tail after a crash (torn write).
    #[error("insufficient data for a complete frame")]
    InsufficientData,

    /// The frame's CRC32C did not match its contents. Fatal if found
    /// anywhere but the last frame of the last segment.
    #[error("checksum mismatch")]
    ChecksumMismatch,

    /// The frame kind byte did not match any known kind.
    #[error("unknown frame kind: {0}")]
    UnknownKind(u8),

    /// The frame body was internally inconsistent.
    #[error("malformed frame: {0}")]
    Malformed(&'static str),

    /// Short read while decoding a payload field.
    #[error("I/O error decoding frame: {0}")]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_frame(lsn: u64, tx_id: u64) -> Frame {
        Frame {
            lsn: Lsn(lsn),
            tx_id: TxId(tx_id),
            kind: FrameKind::Write,
            payload: Payload::Write {
                key: b"k1".to_vec(),
                value: b"v1".to_vec(),
                prev_version: Version::NONE,
            },
        }
    }

    #[test]
    fn roundtrip_write_frame() {
        let frame = write_frame(1, 1);
        let bytes = frame.to_bytes();
        let (decoded, consumed) = Frame::from_bytes(&bytes).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
    }

    #[test]
    fn roundtrip_all_kinds() {
        let begin = Frame {
            lsn: Lsn(1),
            tx_id: TxId(1),
            kind: FrameKind::Begin,
            payload: Payload::Empty,
        };
        let delete = Frame {
            lsn: Lsn(2),
            tx_id: TxId(1),
            kind: FrameKind::Delete,
            payload: Payload::Delete {
                key: b"k1".to_vec(),
                prev_version: Version(3),
            },
        };
        let commit = Frame {
            lsn: Lsn(3),
            tx_id: TxId(1),
            kind: FrameKind::Commit,
            payload: Payload::Empty,
        };
        let checkpoint = Frame {
            lsn: Lsn(4),
            tx_id: TxId(0),
            kind: FrameKind::Checkpoint,
            payload: Payload::Checkpoint {
                integrity_digest: [7u8; 32],
                active_tx_ids: vec![TxId(5), TxId(6)],
            },
        };
        for frame in [begin, delete, commit, checkpoint] {
            let bytes = frame.to_bytes();
            let (decoded, consumed) = Frame::from_bytes(&bytes).unwrap();
            assert_eq!(consumed, bytes.len());
            assert_eq!(decoded, frame);
        }
    }

    #[test]
    fn truncated_tail_is_insufficient_data() {
        let frame = write_frame(1, 1);
        let bytes = frame.to_bytes();
        let truncated = &bytes[..bytes.len() - 3];
        assert!(matches!(
            Frame::from_bytes(truncated),
            Err(FrameError::InsufficientData)
        ));
    }

    #[test]
    fn corrupted_byte_is_checksum_mismatch() {
        let frame = write_frame(1, 1);
        let mut bytes = frame.to_bytes();
        let mid = bytes.len() / 2;
        bytes[mid] ^= 0xFF;
        assert!(matches!(
            Frame::from_bytes(&bytes),
            Err(FrameError::ChecksumMismatch)
        ));
    }

    #[test]
    fn two_frames_back_to_back_decode_independently() {
        let f1 = write_frame(1, 1);
        let f2 = write_frame(2, 1);
        let mut buf = f1.to_bytes();
        buf.extend(f2.to_bytes());

        let (decoded1, consumed1) = Frame::from_bytes(&buf).unwrap();
        assert_eq!(decoded1, f1);
        let (decoded2, consumed2) = Frame::from_bytes(&buf[consumed1..]).unwrap();
        assert_eq!(decoded2, f2);
        assert_eq!(consumed1 + consumed2, buf.len());
    }
}
