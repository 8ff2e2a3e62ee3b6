//! Key type: an opaque byte string used to address values in the store.
//!
//! Keys are not interpreted by the storage core beyond equality and
//! lexicographic ordering (needed for hierarchy-level derivation in the
//! lock manager and for range operations in the integrity scanner).

use crate::limits::{LimitError, Limits};
use std::fmt;

/// An opaque key, 1-4096 bytes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize)]
pub struct Key(Vec<u8>);

impl Key {
    /// Construct a key, validating it against default limits.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, LimitError> {
        Self::with_limits(bytes, &Limits::default())
    }

    /// Construct a key, validating it against custom limits.
    pub fn with_limits(bytes: impl Into<Vec<u8>>, limits: &Limits) -> Result<Self, LimitError> {
        let bytes = bytes.into();
        limits.validate_key_len(bytes.len())?;
        Ok(Key(bytes))
    }

    /// Borrow the key's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The hierarchy level used by the lock manager's acquisition-order
    /// check (§4.4): the number of `/`-separated segments before the
    /// first wildcard-free component. Keys with no `/` are level 0.
    pub fn hierarchy_level(&self) -> usize {
        self.0.iter().filter(|&&b| b == b'/').count()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "{s}"),
            Err(_) => write!(f, "{:02x?}", self.0),
        }
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}
