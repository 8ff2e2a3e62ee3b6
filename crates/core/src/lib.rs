//! Core types and traits for the MantisDB transactional storage core
//!
//! This crate defines the foundational types shared by the durability,
//! concurrency, and storage crates:
//! - `Key` / `Value`: opaque byte payloads with size limits
//! - `Lsn`, `TxId`, `Version`: monotonic identifiers
//! - `MantisError`: the unified error taxonomy
//! - `Config`: validated, builder-style database configuration
//! - `checksum`: CRC32C and SHA-256 integrity tags

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod checksum;
pub mod config;
pub mod error;
pub mod ids;
pub mod key;
pub mod limits;
pub mod traits;
pub mod value;

pub use checksum::{Checksum, ChecksumAlgorithm, ChecksumTag};
pub use config::{CacheEvictionPolicy, Config, ConfigError, DurabilityMode, IsolationLevel};
pub use error::{MantisError, MantisResult};
pub use ids::{Lsn, TxId, Version};
pub use key::Key;
pub use limits::Limits;
pub use traits::{IntegritySource, ReplayTarget};
pub use value::Value;
