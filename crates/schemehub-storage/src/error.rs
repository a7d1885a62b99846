//! Storage error types for the source store abstraction.

use schemehub_core::Collection;

/// Errors that can occur during source store operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum StorageError {
    /// The requested document was not found.
    #[error("Document not found: {collection}/{id}")]
    NotFound {
        /// The collection that was searched.
        collection: Collection,
        /// The ID of the document that was not found.
        id: String,
    },

    /// Attempted to insert a document whose id is already taken.
    #[error("Document already exists: {collection}/{id}")]
    AlreadyExists {
        /// The collection holding the document.
        collection: Collection,
        /// The conflicting ID.
        id: String,
    },

    /// The document is not a valid JSON object or carries an invalid id.
    #[error("Invalid document: {message}")]
    InvalidDocument {
        /// Description of why the document is invalid.
        message: String,
    },

    /// The query cannot be executed by this backend.
    #[error("Invalid query: {message}")]
    InvalidQuery {
        /// Description of the query problem.
        message: String,
    },

    /// The store cannot be reached.
    #[error("Source store unavailable: {message}")]
    Unavailable {
        /// Description of the connectivity problem.
        message: String,
    },

    /// An internal storage error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl StorageError {
    /// Creates a new `NotFound` error.
    #[must_use]
    pub fn not_found(collection: Collection, id: impl Into<String>) -> Self {
        Self::NotFound {
            collection,
            id: id.into(),
        }
    }

    /// Creates a new `AlreadyExists` error.
    #[must_use]
    pub fn already_exists(collection: Collection, id: impl Into<String>) -> Self {
        Self::AlreadyExists {
            collection,
            id: id.into(),
        }
    }

    /// Creates a new `InvalidDocument` error.
    #[must_use]
    pub fn invalid_document(message: impl Into<String>) -> Self {
        Self::InvalidDocument {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidQuery` error.
    #[must_use]
    pub fn invalid_query(message: impl Into<String>) -> Self {
        Self::InvalidQuery {
            message: message.into(),
        }
    }

    /// Creates a new `Unavailable` error.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if a later retry may succeed.
    #[must_use]
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        let err = StorageError::not_found(Collection::States, "s1");
        assert_eq!(err.to_string(), "Document not found: states/s1");

        let err = StorageError::already_exists(Collection::Schemes, "x");
        assert_eq!(err.to_string(), "Document already exists: schemes/x");

        let err = StorageError::unavailable("connection refused");
        assert_eq!(
            err.to_string(),
            "Source store unavailable: connection refused"
        );
    }

    #[test]
    fn test_is_unavailable() {
        assert!(StorageError::unavailable("down").is_unavailable());
        assert!(!StorageError::internal("bug").is_unavailable());
        assert!(!StorageError::invalid_query("bad").is_unavailable());
    }
}
