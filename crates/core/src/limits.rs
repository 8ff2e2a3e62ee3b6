//! Size limits for keys and values.
//!
//! ## Contract
//!
//! After stabilization, the default limits are FROZEN and cannot change
//! without a major version bump. Custom limits can be set at database
//! open time via [`crate::Config`].

/// Size limits enforced on keys and values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Minimum key length in bytes (default: 1).
    pub min_key_bytes: usize,
    /// Maximum key length in bytes (default: 4096).
    pub max_key_bytes: usize,
    /// Maximum value length in bytes (default: 16MiB).
    pub max_value_bytes: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            min_key_bytes: 1,
            max_key_bytes: 4096,
            max_value_bytes: 16 * 1024 * 1024,
        }
    }
}

impl Limits {
    /// Create limits with small values, for tests that need to exercise
    /// limit enforcement without allocating huge buffers.
    pub fn with_small_limits() -> Self {
        Limits {
            min_key_bytes: 1,
            max_key_bytes: 64,
            max_value_bytes: 1024,
        }
    }

    /// Validate a key's length against these limits.
    pub fn validate_key_len(&self, len: usize) -> Result<(), LimitError> {
        if len < self.min_key_bytes {
            return Err(LimitError::KeyTooShort {
                actual: len,
                min: self.min_key_bytes,
            });
        }
        if len > self.max_key_bytes {
            return Err(LimitError::KeyTooLong {
                actual: len,
                max: self.max_key_bytes,
            });
        }
        Ok(())
    }

    /// Validate a value's length against these limits.
    pub fn validate_value_len(&self, len: usize) -> Result<(), LimitError> {
        if len > self.max_value_bytes {
            return Err(LimitError::ValueTooLarge {
                actual: len,
                max: self.max_value_bytes,
            });
        }
        Ok(())
    }
}

/// Limit validation errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LimitError {
    /// Key is shorter than the minimum allowed length.
    #[error("key too short: {actual} bytes, minimum {min}")]
    KeyTooShort {
        /// Actual key length.
        actual: usize,
        /// Minimum allowed length.
        min: usize,
    },

    /// Key exceeds the maximum allowed length.
    #[error("key too long: {actual} bytes exceeds maximum {max}")]
    KeyTooLong {
        /// Actual key length.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },

    /// Value exceeds the maximum allowed length.
    #[error("value too large: {actual} bytes exceeds maximum {max}")]
    ValueTooLarge {
        /// Actual value length.
        actual: usize,
        /// Maximum allowed length.
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_limits_match_spec() {
        let limits = Limits::default();
        assert_eq!(limits.min_key_bytes, 1);
        assert_eq!(limits.max_key_bytes, 4096);
        assert_eq!(limits.max_value_bytes, 16 * 1024 * 1024);
    }

    #[test]
    fn key_at_bounds_is_valid() {
        let limits = Limits::default();
        assert!(limits.validate_key_len(1).is_ok());
        assert!(limits.validate_key_len(4096).is_ok());
    }

    #[test]
    fn key_empty_is_too_short() {
        let limits = Limits::default();
        assert!(matches!(
            limits.validate_key_len(0),
            Err(LimitError::KeyTooShort { .. })
        ));
    }

    #[test]
    fn key_over_max_is_too_long() {
        let limits = Limits::default();
        assert!(matches!(
            limits.validate_key_len(4097),
            Err(LimitError::KeyTooLong { .. })
        ));
    }

    #[test]
    fn value_at_max_is_valid() {
        let limits = Limits::default();
        assert!(limits.validate_value_len(16 * 1024 * 1024).is_ok());
    }

    #[test]
    fn value_over_max_is_too_large() {
        let limits = Limits::default();
        assert!(matches!(
            limits.validate_value_len(16 * 1024 * 1024 + 1),
            Err(LimitError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn small_limits_are_smaller_than_default() {
        let small = Limits::with_small_limits();
        let default = Limits::default();
        assert!(small.max_key_bytes < default.max_key_bytes);
        assert!(small.max_value_bytes < default.max_value_bytes);
    }
}
