//! Storage layer for the MantisDB transactional storage core.
//!
//! Owns the authoritative in-memory keyed store (C7), the bounded cache
//! and dependency-invalidation layer sitting in front of it (C8), and the
//! background integrity scanner (C11) that re-verifies checksums against
//! both storage entries and WAL segments. `StorageMap` is the type that
//! plugs into `mantis-durability`'s recovery engine and checkpoint
//! controller via the `ReplayTarget`/`IntegritySource` seam defined in
//! `mantis-core`.

#![warn(missing_docs)]

pub mod cache;
pub mod map;
pub mod scanner;

pub use cache::{Cache, EvictionPolicy};
pub use map::{StorageMap, StoredEntry};
pub use scanner::{CorruptionEvent, CorruptionSource, IntegrityScanner};
