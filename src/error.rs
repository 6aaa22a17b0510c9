//! Error taxonomy for the cache engine.
//!
//! Read paths (`get`, `has`, `ttl`, `get_many`) never surface these to callers
//! directly — they are logged and degraded to `None`/`false`/`-1`. Write and
//! invalidation paths propagate them.

use thiserror::Error;

/// The single error type returned by every fallible `CacheService` operation.
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    /// Key failed validation: empty, whitespace, over-length, or out-of-alphabet.
    #[error("invalid cache key {key:?}: {reason}")]
    CacheKeyInvalid { key: String, reason: String },

    /// Bad TTL, empty event pattern, illegal pattern alphabet, too many tags.
    #[error("validation failed: {reason}")]
    ValidationFailed { reason: String },

    /// Serializer round-trip failure.
    #[error("serialization failed: {reason}")]
    SerializationFailed { reason: String },

    /// The caller-supplied loader raised an error.
    #[error("loader failed: {reason}")]
    LoaderFailed { reason: String },

    /// Loader or waiter exceeded its configured bound.
    #[error("stampede timeout after {elapsed_ms}ms for key {key:?}")]
    StampedeTimeout { key: String, elapsed_ms: u64 },

    /// Driver error during tag-set mutation; retains the offending tag.
    #[error("tag invalidation failed for tag {tag:?}: {reason}")]
    TagInvalidationFailed { tag: String, reason: String },

    /// Generic driver-layer failure.
    #[error("operation failed: {reason}")]
    OperationFailed { reason: String },

    /// Generic driver-layer timeout.
    #[error("operation timed out after {elapsed_ms}ms")]
    OperationTimeout { elapsed_ms: u64 },
}

impl CacheError {
    pub fn key_invalid(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::CacheKeyInvalid {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            reason: reason.into(),
        }
    }

    pub fn serialization(reason: impl Into<String>) -> Self {
        Self::SerializationFailed {
            reason: reason.into(),
        }
    }

    pub fn loader(reason: impl Into<String>) -> Self {
        Self::LoaderFailed {
            reason: reason.into(),
        }
    }

    pub fn operation(reason: impl Into<String>) -> Self {
        Self::OperationFailed {
            reason: reason.into(),
        }
    }

    pub fn tag_invalidation(tag: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::TagInvalidationFailed {
            tag: tag.into(),
            reason: reason.into(),
        }
    }
}

pub type CacheResult<T> = Result<T, CacheError>;
