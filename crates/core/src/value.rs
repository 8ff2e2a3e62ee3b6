//! Value type: an opaque byte payload, 0-16MiB. The storage core never
//! interprets the contents of a value.

use crate::limits::{LimitError, Limits};

/// An opaque value, 0-16MiB.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Value(Vec<u8>);

impl Value {
    /// Construct a value, validating it against default limits.
    pub fn new(bytes: impl Into<Vec<u8>>) -> Result<Self, LimitError> {
        Self::with_limits(bytes, &Limits::default())
    }

    /// Construct a value, validating it against custom limits.
    pub fn with_limits(bytes: impl Into<Vec<u8>>, limits: &Limits) -> Result<Self, LimitError> {
        let bytes = bytes.into();
        limits.validate_value_len(bytes.len())?;
        Ok(Value(bytes))
    }

    /// Borrow the value's bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Length in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the value is zero-length.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl AsRef<[u8]> for Value {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_value_is_valid() {
        assert!(Value::new(Vec::new()).is_ok());
    }

    #[test]
    fn oversized_value_rejected() {
        let limits = Limits::with_small_limits();
        let big = vec![0u8; limits.max_value_bytes + 1];
        assert!(matches!(
            Value::with_limits(big, &limits),
            Err(LimitError::ValueTooLarge { .. })
        ));
    }

    #[test]
    fn len_and_is_empty() {
        let v = Value::new("hello").unwrap();
        assert_eq!(v.len(), 5);
        assert!(!v.is_empty());
        let e = Value::new(Vec::new()).unwrap();
        assert!(e.is_empty());
    }
}
