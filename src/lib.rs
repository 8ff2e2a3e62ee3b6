//! MantisDB transactional storage core.
//!
//! A single-process, embedded transactional storage engine: write-ahead
//! logging with configurable durability (C1/C2/C3), crash recovery (C9),
//! four isolation levels over pessimistic and optimistic concurrency
//! control (C4/C5/C6), a bounded cache with dependency invalidation (C8)
//! in front of an MVCC storage map (C7), a background integrity scanner
//! (C11), and a time/byte/RPO-driven checkpoint controller (C10).
//!
//! [`Database`] is the single entry point: open a directory, begin
//! transactions, read/write/delete keys within them, and commit or abort.

#![warn(missing_docs)]

mod background;
mod database;

pub use database::{Database, Transaction};

pub use mantis_concurrency::TxStatus;
pub use mantis_core::config::{CacheEvictionPolicy, Config, ConfigError, DurabilityMode, IsolationLevel};
pub use mantis_core::{Key, MantisError, MantisResult, Value};
pub use mantis_durability::checkpoint::CheckpointTrigger;
