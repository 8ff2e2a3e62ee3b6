//! Concurrency layer for the MantisDB transactional storage core.
//!
//! Owns the lock manager (C4), the deadlock detector (C5), and the
//! transaction manager (C6) that ties locking, WAL append, and the
//! storage/cache layers together into the four supported isolation
//! levels.

#![warn(missing_docs)]

pub mod deadlock;
pub mod lock;
pub mod txn;

pub use deadlock::{DeadlockDetector, TxCost};
pub use lock::{LockManager, LockMetrics, LockMode};
pub use txn::{TransactionContext, TransactionManager, TxStatus};
