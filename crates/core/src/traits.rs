//! Cross-crate seams between the durability layer and the storage layer.
//!
//! The durability crate (recovery engine, checkpoint controller) needs to
//! apply redo frames to, and compute an integrity digest over, the
//! storage map without depending on the `mantis-storage` crate directly
//! (that dependency runs the other way: storage depends on durability's
//! WAL writer). These traits are the seam: `mantis-storage`'s storage map
//! implements them, `mantis-durability` only knows the trait.

use crate::ids::Version;

/// A target that redo frames can be applied to. Implemented by the
/// primary storage map (C7).
pub trait ReplayTarget: Send + Sync {
    /// Apply a redo write: install `value` at `key` with the given version.
    fn replay_write(&self, key: &[u8], value: &[u8], version: Version);

    /// Apply a redo delete: remove `key`, recording the given version as
    /// a tombstone.
    fn replay_delete(&self, key: &[u8], version: Version);
}

/// A source the checkpoint controller can snapshot for an integrity
/// digest. Implemented by the primary storage map (C7).
pub trait IntegritySource: Send + Sync {
    /// Compute a 256-bit digest summarizing the current contents,
    /// suitable for comparison against a checkpoint manifest after replay.
    fn integrity_digest(&self) -> [u8; 32];
}
