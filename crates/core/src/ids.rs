//! Monotonic identifiers used throughout the storage core.
//!
//! `Lsn`, `TxId`, and `Version` are all thin `u64` newtypes, but they are
//! never interchangeable: an LSN orders WAL frames, a TxId names a
//! transaction, and a Version orders the writes to a single key. Keeping
//! them distinct types catches mixups at compile time that a bare `u64`
//! would not.

use std::fmt;

/// Log Sequence Number: a monotonic position in the write-ahead log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// The LSN preceding the first frame ever written.
    pub const ZERO: Lsn = Lsn(0);

    /// Returns the next LSN in sequence.
    pub fn next(self) -> Lsn {
        Lsn(self.0 + 1)
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

impl From<u64> for Lsn {
    fn from(v: u64) -> Self {
        Lsn(v)
    }
}

/// Transaction identifier, unique within a process lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct TxId(pub u64);

impl TxId {
    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tx:{}", self.0)
    }
}

impl From<u64> for TxId {
    fn from(v: u64) -> Self {
        TxId(v)
    }
}

/// Per-key monotonic version. Incremented on every successful write to a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Version(pub u64);

impl Version {
    /// The version preceding any write, used as `prev_version` for a key's first write.
    pub const NONE: Version = Version(0);

    /// Returns the next version in sequence.
    pub fn next(self) -> Version {
        Version(self.0 + 1)
    }

    /// Raw numeric value.
    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

impl From<u64> for Version {
    fn from(v: u64) -> Self {
        Version(v)
    }
}
