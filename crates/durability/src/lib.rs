//! Durability layer for the MantisDB transactional storage core.
//!
//! Owns the on-disk layout (§6): WAL segments, checkpoint manifests, and
//! the clean-shutdown / safe-mode sentinels. Exposes the WAL writer/reader
//! (C2, C3), the recovery engine (C9), and the checkpoint/RPO controller
//! (C10).

#![warn(missing_docs)]

pub mod checkpoint;
pub mod layout;
pub mod recovery;
pub mod wal;

pub use checkpoint::{CheckpointController, CheckpointManifest, CheckpointTrigger};
pub use layout::Layout;
pub use recovery::{RecoveryEngine, RecoveryReport, ShutdownState};
pub use wal::frame::{Frame, FrameKind};
pub use wal::reader::{ReadStopReason, WalReadResult, WalReader};
pub use wal::writer::WalWriter;
