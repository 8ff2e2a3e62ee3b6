//! WAL segment file header and handle.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

const SEGMENT_MAGIC: [u8; 4] = *b"MNTS";
const SEGMENT_FORMAT_VERSION: u32 = 1;
/// `magic(4) + format_version(4) + segment_number(8)`.
pub const SEGMENT_HEADER_SIZE: usize = 16;

/// Fixed-size header at the start of every segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    format_version: u32,
    segment_number: u64,
}

impl SegmentHeader {
    fn new(segment_number: u64) -> Self {
        SegmentHeader {
            format_version: SEGMENT_FORMAT_VERSION,
            segment_number,
        }
    }

    fn to_bytes(self) -> [u8; SEGMENT_HEADER_SIZE] {
        let mut buf = [0u8; SEGMENT_HEADER_SIZE];
        buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
        buf[4..8].copy_from_slice(&self.format_version.to_be_bytes());
        buf[8..16].copy_from_slice(&self.segment_number.to_be_bytes());
        buf
    }

    fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < SEGMENT_HEADER_SIZE {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "short segment header"));
        }
        if buf[0..4] != SEGMENT_MAGIC {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "bad segment magic"));
        }
        let format_version = u32::from_be_bytes(buf[4..8].try_into().unwrap());
        let segment_number = u64::from_be_bytes(buf[8..16].try_into().unwrap());
        Ok(SegmentHeader {
            format_version,
            segment_number,
        })
    }
}

/// An open WAL segment file: either the active (appendable) segment or
/// one opened read-only for replay.
pub struct WalSegment {
    file: File,
    segment_number: u64,
    write_position: u64,
    path: PathBuf,
}

impl WalSegment {
    /// Create a brand-new segment file. Fails if the file already exists.
    pub fn create(wal_dir: &Path, segment_number: u64) -> io::Result<Self> {
        let path = wal_dir.join(format!("{segment_number:08}.seg"));
        let mut file = OpenOptions::new()
            .create_new(true)
            .read(true)
            .write(true)
            .open(&path)?;
        let header = SegmentHeader::new(segment_number);
        file.write_all(&header.to_bytes())?;
        file.flush()?;
        Ok(WalSegment {
            file,
            segment_number,
            write_position: SEGMENT_HEADER_SIZE as u64,
            path,
        })
    }

    /// Open an existing segment for appending, positioned at end-of-file.
    pub fn open_append(wal_dir: &Path, segment_number: u64) -> io::Result<Self> {
        let path = wal_dir.join(format!("{segment_number:08}.seg"));
        let mut file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mut header_buf = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        SegmentHeader::from_bytes(&header_buf)?;
        let write_position = file.seek(SeekFrom::End(0))?;
        Ok(WalSegment {
            file,
            segment_number,
            write_position,
            path,
        })
    }

    /// Open an existing segment read-only, for replay.
    pub fn open_read(wal_dir: &Path, segment_number: u64) -> io::Result<Self> {
        let path = wal_dir.join(format!("{segment_number:08}.seg"));
        let mut file = OpenOptions::new().read(true).open(&path)?;
        let mut header_buf = [0u8; SEGMENT_HEADER_SIZE];
        file.read_exact(&mut header_buf)?;
        SegmentHeader::from_bytes(&header_buf)?;
        let write_position = file.seek(SeekFrom::End(0))?;
        file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        Ok(WalSegment {
            file,
            segment_number,
            write_position,
            path,
        })
    }

    /// This segment's number.
    pub fn segment_number(&self) -> u64 {
        self.segment_number
    }

    /// Current size of the segment file in bytes, including its header.
    pub fn size(&self) -> u64 {
        self.write_position
    }

    /// Path to the segment file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw framed bytes (produced by [`crate::wal::frame::Frame::to_bytes`]).
    pub fn append(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.file.seek(SeekFrom::Start(self.write_position))?;
        self.file.write_all(bytes)?;
        self.write_position += bytes.len() as u64;
        Ok(())
    }

    /// fsync the segment's contents.
    pub fn sync(&self) -> io::Result<()> {
        self.file.sync_all()
    }

    /// Truncate the segment to `len` bytes (used to drop a torn tail
    /// before reopening for append).
    pub fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.file.set_len(len)?;
        self.write_position = len;
        Ok(())
    }

    /// Read the full record region (everything after the header) into a buffer.
    pub fn read_body(&mut self) -> io::Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(SEGMENT_HEADER_SIZE as u64))?;
        let mut buf = Vec::new();
        self.file.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
