//! Database configuration.
//!
//! Covers every option in the external-interfaces configuration table:
//! durability mode, WAL sizing, checkpoint/RPO cadence, lock timeouts,
//! cache sizing/policy, default isolation, and the integrity scan
//! interval.

use crate::checksum::ChecksumAlgorithm;
use thiserror::Error;

/// Durability mode governing when a commit's WAL frames are fsynced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync before every commit returns. Zero data loss on crash.
    Sync,
    /// Coalesce commits within a window before a single fsync.
    GroupCommit {
        /// Maximum time a commit waits for others to coalesce with it.
        window_ms: u64,
    },
    /// A background task fsyncs on a fixed cadence; commits return immediately.
    Async {
        /// Background fsync cadence.
        interval_ms: u64,
    },
}

impl DurabilityMode {
    /// `GroupCommit` with the recommended 2ms window.
    pub fn group_commit_default() -> Self {
        DurabilityMode::GroupCommit { window_ms: 2 }
    }

    /// `Async` with the recommended 100ms cadence.
    pub fn async_default() -> Self {
        DurabilityMode::Async { interval_ms: 100 }
    }

    /// Whether this mode fsyncs synchronously with commit (no background lag).
    pub fn is_synchronous(&self) -> bool {
        matches!(self, DurabilityMode::Sync)
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Sync
    }
}

/// Cache eviction policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheEvictionPolicy {
    /// Least-recently-used.
    Lru,
    /// Least-frequently-used.
    Lfu,
}

impl Default for CacheEvictionPolicy {
    fn default() -> Self {
        CacheEvictionPolicy::Lru
    }
}

/// Transaction isolation level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Reads see the latest committed value; no snapshot.
    ReadCommitted,
    /// Reads see a snapshot as of transaction start; first-committer-wins on overlap.
    RepeatableRead,
    /// Reads see a snapshot as of transaction start; abort on any concurrent write-set overlap.
    Snapshot,
    /// Snapshot semantics plus read-set locking and cycle detection.
    Serializable,
}

impl Default for IsolationLevel {
    fn default() -> Self {
        IsolationLevel::Snapshot
    }
}

/// Validated, builder-style configuration for a [`Database`](../../mantis_txn_core/struct.Database.html) instance.
#[derive(Debug, Clone)]
pub struct Config {
    /// Durability mode for commits.
    pub durability: DurabilityMode,
    /// WAL segment rotation threshold in bytes.
    pub wal_segment_size_bytes: u64,
    /// WAL bytes retained beyond the checkpoint horizon before a checkpoint is forced.
    pub wal_retention_bytes: u64,
    /// Checkpoint time-based trigger.
    pub checkpoint_interval_ms: u64,
    /// Checkpoint byte-based trigger.
    pub checkpoint_bytes: u64,
    /// Recovery Point Objective in seconds; 0 requires `Sync` durability.
    pub rpo_seconds: u64,
    /// Default lock waiter deadline.
    pub lock_timeout_ms: u64,
    /// Deadlock detector periodic interval; 0 disables periodic detection
    /// (timeout-only mode).
    pub deadlock_detection_ms: u64,
    /// Cache size cap in bytes.
    pub cache_bytes: u64,
    /// Cache eviction policy.
    pub cache_policy: CacheEvictionPolicy,
    /// Default isolation level for transactions opened without an explicit choice.
    pub isolation_default: IsolationLevel,
    /// Integrity scanner cadence; 0 disables background scanning.
    pub integrity_scan_interval_ms: u64,
    /// Per-transaction write-set cap before `WriteSetFull`.
    pub max_write_set_entries: usize,
    /// Checksum algorithm used for WAL framing.
    pub checksum_algorithm: ChecksumAlgorithm,
    /// Bounded waiter queue depth per lock.
    pub max_lock_waiters_per_key: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            durability: DurabilityMode::Sync,
            wal_segment_size_bytes: 64 * 1024 * 1024,
            wal_retention_bytes: 256 * 1024 * 1024,
            checkpoint_interval_ms: 60_000,
            checkpoint_bytes: 128 * 1024 * 1024,
            rpo_seconds: 0,
            lock_timeout_ms: 5_000,
            deadlock_detection_ms: 50,
            cache_bytes: 64 * 1024 * 1024,
            cache_policy: CacheEvictionPolicy::Lru,
            isolation_default: IsolationLevel::Snapshot,
            integrity_scan_interval_ms: 30_000,
            max_write_set_entries: 10_000,
            checksum_algorithm: ChecksumAlgorithm::Crc32c,
            max_lock_waiters_per_key: 256,
        }
    }
}

impl Config {
    /// Configuration with `Sync` durability (the default): zero data loss, highest commit latency.
    pub fn strict() -> Self {
        Config {
            durability: DurabilityMode::Sync,
            rpo_seconds: 0,
            ..Default::default()
        }
    }

    /// Configuration favoring throughput over commit latency.
    pub fn group_commit() -> Self {
        Config {
            durability: DurabilityMode::group_commit_default(),
            ..Default::default()
        }
    }

    /// Configuration for tests: small segments, fast cadences.
    pub fn for_testing() -> Self {
        Config {
            wal_segment_size_bytes: 64 * 1024,
            wal_retention_bytes: 256 * 1024,
            checkpoint_interval_ms: 200,
            checkpoint_bytes: 128 * 1024,
            lock_timeout_ms: 200,
            deadlock_detection_ms: 10,
            cache_bytes: 64 * 1024,
            integrity_scan_interval_ms: 100,
            max_write_set_entries: 1_000,
            ..Default::default()
        }
    }

    /// Set durability mode.
    pub fn with_durability(mut self, mode: DurabilityMode) -> Self {
        self.durability = mode;
        self
    }

    /// Set WAL segment size in bytes.
    pub fn with_wal_segment_size(mut self, bytes: u64) -> Self {
        self.wal_segment_size_bytes = bytes;
        self
    }

    /// Set the RPO in seconds.
    pub fn with_rpo_seconds(mut self, seconds: u64) -> Self {
        self.rpo_seconds = seconds;
        self
    }

    /// Set the default isolation level.
    pub fn with_isolation_default(mut self, level: IsolationLevel) -> Self {
        self.isolation_default = level;
        self
    }

    /// Set the cache size cap in bytes.
    pub fn with_cache_bytes(mut self, bytes: u64) -> Self {
        self.cache_bytes = bytes;
        self
    }

    /// Set the cache eviction policy.
    pub fn with_cache_policy(mut self, policy: CacheEvictionPolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Set the checksum algorithm.
    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    /// Validate the configuration, returning the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.wal_segment_size_bytes < 1024 {
            return Err(ConfigError::SegmentSizeTooSmall);
        }
        if self.rpo_seconds == 0 && !self.durability.is_synchronous() {
            return Err(ConfigError::ZeroRpoRequiresSync);
        }
        if self.lock_timeout_ms == 0 {
            return Err(ConfigError::ZeroLockTimeout);
        }
        if self.max_write_set_entries == 0 {
            return Err(ConfigError::ZeroWriteSetCap);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// WAL segment size below the 1KB floor.
    #[error("WAL segment size must be at least 1KB")]
    SegmentSizeTooSmall,

    /// `rpo_seconds = 0` was requested without `Sync` durability.
    #[error("rpo_seconds = 0 requires Sync durability")]
    ZeroRpoRequiresSync,

    /// Lock timeout of zero would never grant a blocked lock.
    #[error("lock_timeout_ms must be greater than zero")]
    ZeroLockTimeout,

    /// A write-set cap of zero would reject every write.
    #[error("max_write_set_entries must be greater than zero")]
    ZeroWriteSetCap,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn strict_config_is_sync() {
        let config = Config::strict();
        assert!(matches!(config.durability, DurabilityMode::Sync));
        assert_eq!(config.rpo_seconds, 0);
    }

    #[test]
    fn group_commit_config() {
        let config = Config::group_commit();
        assert!(matches!(
            config.durability,
            DurabilityMode::GroupCommit { .. }
        ));
    }

    #[test]
    fn builder_pattern_chains() {
        let config = Config::default()
            .with_durability(DurabilityMode::async_default())
            .with_cache_bytes(1024)
            .with_isolation_default(IsolationLevel::Serializable);
        assert!(matches!(config.durability, DurabilityMode::Async { .. }));
        assert_eq!(config.cache_bytes, 1024);
        assert_eq!(config.isolation_default, IsolationLevel::Serializable);
    }

    #[test]
    fn zero_rpo_with_async_is_invalid() {
        let config = Config::default()
            .with_durability(DurabilityMode::async_default())
            .with_rpo_seconds(0);
        assert_eq!(config.validate(), Err(ConfigError::ZeroRpoRequiresSync));
    }

    #[test]
    fn zero_rpo_with_sync_is_valid() {
        let config = Config::default().with_durability(DurabilityMode::Sync);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn segment_too_small_is_invalid() {
        let config = Config::default().with_wal_segment_size(512);
        assert_eq!(config.validate(), Err(ConfigError::SegmentSizeTooSmall));
    }

    #[test]
    fn for_testing_has_small_segments() {
        let config = Config::for_testing();
        assert!(config.wal_segment_size_bytes < Config::default().wal_segment_size_bytes);
        assert!(config.validate().is_ok());
    }
}
