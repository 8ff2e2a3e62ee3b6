//! Unified error taxonomy for the transactional storage core.
//!
//! One enum covers every component (C1-C11) so callers across crate
//! boundaries match on the same type. Constructors and classification
//! predicates follow the pattern established across this codebase's
//! error types: structured variants, `#[error(...)]` messages carrying
//! context, and `is_*` helpers so callers can branch on error category
//! without a full match.

use std::io;

use crate::ids::{Lsn, TxId};

/// Result alias used throughout the storage core.
pub type MantisResult<T> = Result<T, MantisError>;

/// The unified error type for the transactional storage core.
#[derive(Debug, thiserror::Error)]
pub enum MantisError {
    // --- Not found ---
    /// No value exists at the given key (at the requested version, if any).
    #[error("key not found")]
    NotFound,

    // --- Locking ---
    /// A lock request exceeded its deadline before being granted.
    #[error("lock timeout acquiring {mode:?} lock after {waited_ms}ms")]
    LockTimeout {
        /// The mode that was requested.
        mode: &'static str,
        /// How long the waiter was queued before giving up.
        waited_ms: u64,
    },

    /// The deadlock detector chose this transaction as the cycle-breaking victim.
    #[error("transaction {tx_id} aborted to break a deadlock cycle")]
    Deadlock {
        /// The victim transaction.
        tx_id: TxId,
    },

    /// A lock request would acquire a key out of non-decreasing hierarchy order.
    #[error("lock acquisition violates hierarchy order: requested level {requested} after level {held}")]
    HierarchyViolation {
        /// The level already held by the transaction.
        held: usize,
        /// The level of the newly requested key.
        requested: usize,
    },

    // --- Transactions ---
    /// A concurrent committer invalidated this transaction's read or write set.
    #[error("transaction conflict on commit: {reason}")]
    Conflict {
        /// Human-readable conflict description.
        reason: String,
    },

    /// A transaction's write set grew past the configured cap.
    #[error("write set full: {entries} entries exceeds maximum {max}")]
    WriteSetFull {
        /// Number of entries already buffered.
        entries: usize,
        /// Configured maximum.
        max: usize,
    },

    /// The transaction is no longer active (already committed or aborted).
    #[error("transaction {tx_id} is aborted: {reason}")]
    Aborted {
        /// The affected transaction.
        tx_id: TxId,
        /// Why it was aborted.
        reason: String,
    },

    // --- Resource / durability ---
    /// The filesystem rejected a write due to lack of space.
    #[error("out of space: {detail}")]
    OutOfSpace {
        /// Underlying detail from the filesystem.
        detail: String,
    },

    /// An I/O operation failed.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    /// A durability guarantee (fsync, directory sync) could not be met.
    #[error("durability failure at lsn {lsn}: {detail}")]
    DurabilityFailure {
        /// The LSN that could not be made durable.
        lsn: Lsn,
        /// Underlying detail.
        detail: String,
    },

    // --- Integrity ---
    /// A checksum mismatch or other structural corruption was detected.
    #[error("corruption detected: {detail}")]
    CorruptionDetected {
        /// Where the corruption was found.
        detail: String,
    },

    /// Recovery could not reconstruct a consistent state from the WAL and checkpoints.
    #[error("recovery failed: {detail}")]
    RecoveryFailed {
        /// Why recovery failed.
        detail: String,
    },

    /// The database is in safe mode (read-only) following a failed integrity validation.
    #[error("database is in safe mode: {reason}")]
    SafeMode {
        /// Why safe mode was entered.
        reason: String,
    },

    // --- Configuration / serialization ---
    /// Configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl MantisError {
    /// True for errors the caller should consider retrying (after backoff).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MantisError::LockTimeout { .. }
                | MantisError::Deadlock { .. }
                | MantisError::Conflict { .. }
        )
    }

    /// True for operational failures that require external intervention
    /// (disk full, fsync failure) rather than a client retry.
    pub fn is_operational(&self) -> bool {
        matches!(
            self,
            MantisError::OutOfSpace { .. }
                | MantisError::IoError(_)
                | MantisError::DurabilityFailure { .. }
        )
    }

    /// True for correctness failures that put the database in safe mode.
    pub fn is_serious(&self) -> bool {
        matches!(
            self,
            MantisError::CorruptionDetected { .. }
                | MantisError::RecoveryFailed { .. }
                | MantisError::SafeMode { .. }
        )
    }

    /// True if this is a lock/conflict-family error raised during normal
    /// concurrent operation, as opposed to a structural failure.
    pub fn is_concurrency_error(&self) -> bool {
        matches!(
            self,
            MantisError::LockTimeout { .. }
                | MantisError::Deadlock { .. }
                | MantisError::HierarchyViolation { .. }
                | MantisError::Conflict { .. }
        )
    }
}
