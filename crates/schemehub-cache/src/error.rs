//! Error types for the listing cache.

use schemehub_storage::StorageError;
use thiserror::Error;

/// Errors raised by the caching core.
///
/// Only [`CacheError::SourceUnavailable`] and [`CacheError::UnknownResource`]
/// ever reach a Read Path caller; the rest are absorbed between tiers.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    /// A distributed cache entry could not be decoded.
    #[error("Corrupt cache payload: {reason}")]
    CorruptPayload { reason: String },

    /// The distributed cache could not be reached.
    #[error("Distributed cache unavailable: {message}")]
    CacheUnavailable { message: String },

    /// The source store failed and no tier holds a value.
    #[error("Source store unavailable, retry later: {message}")]
    SourceUnavailable { message: String },

    /// The resource name is not a known listing.
    #[error("Unknown listing resource: {0}")]
    UnknownResource(String),

    /// A view could not be serialized or a source row did not fit its shape.
    #[error("Serialization error: {message}")]
    Serialization { message: String },
}

impl CacheError {
    #[must_use]
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptPayload {
            reason: reason.into(),
        }
    }

    #[must_use]
    pub fn cache_unavailable(message: impl Into<String>) -> Self {
        Self::CacheUnavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn source_unavailable(message: impl Into<String>) -> Self {
        Self::SourceUnavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    /// Whether the caller should retry the request later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::SourceUnavailable { .. } | Self::CacheUnavailable { .. }
        )
    }

    pub fn is_corrupt(&self) -> bool {
        matches!(self, Self::CorruptPayload { .. })
    }
}

impl From<StorageError> for CacheError {
    fn from(err: StorageError) -> Self {
        Self::source_unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization(err.to_string())
    }
}

impl From<schemehub_core::CoreError> for CacheError {
    fn from(err: schemehub_core::CoreError) -> Self {
        Self::serialization(err.to_string())
    }
}

/// Result type for cache operations.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use super::*;
    use schemehub_core::Collection;

    #[test]
    fn storage_errors_become_retryable() {
        let err: CacheError = StorageError::unavailable("connection refused").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection refused"));

        let err: CacheError = StorageError::not_found(Collection::States, "s1").into();
        assert!(matches!(err, CacheError::SourceUnavailable { .. }));
    }

    #[test]
    fn corrupt_and_unknown_are_not_retryable() {
        assert!(!CacheError::corrupt("bad checksum").is_retryable());
        assert!(CacheError::corrupt("bad checksum").is_corrupt());
        assert!(!CacheError::UnknownResource("x".into()).is_retryable());
    }
}
