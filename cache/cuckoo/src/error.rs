//! Error types for cache operations.

use std::fmt;

/// Errors that can occur during cache operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// The configured slot size cannot hold a header plus a maximum-length
    /// key. Rejected at startup, never truncated.
    ItemSizeTooSmall,

    /// The configured slot count is zero.
    CapacityZero,

    /// The key is empty or contains no bytes to hash.
    InvalidKey,

    /// The key exceeds the maximum length (250 bytes).
    KeyTooLong,

    /// Key plus value do not fit in a slot.
    ItemTooLarge,

    /// Key not found (for CAS/INCR/DECR operations).
    KeyNotFound,

    /// Stored value is not an unsigned decimal integer.
    NotNumeric,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ItemSizeTooSmall => write!(f, "item size cannot hold header and maximum key"),
            Self::CapacityZero => write!(f, "slot count must be nonzero"),
            Self::InvalidKey => write!(f, "invalid key"),
            Self::KeyTooLong => write!(f, "key too long (max 250 bytes)"),
            Self::ItemTooLarge => write!(f, "object too large for cache"),
            Self::KeyNotFound => write!(f, "key not found"),
            Self::NotNumeric => write!(f, "cannot increment or decrement non-numeric value"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            format!("{}", CacheError::ItemTooLarge),
            "object too large for cache"
        );
        assert_eq!(format!("{}", CacheError::KeyNotFound), "key not found");
        assert_eq!(
            format!("{}", CacheError::NotNumeric),
            "cannot increment or decrement non-numeric value"
        );
    }

    #[test]
    fn test_error_is_error_trait() {
        fn assert_error<E: std::error::Error>() {}
        assert_error::<CacheError>();
    }
}
