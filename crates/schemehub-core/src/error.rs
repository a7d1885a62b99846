use thiserror::Error;

/// Core error types for SchemeHub domain operations
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Invalid document ID: {0}")]
    InvalidId(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid listing row: {message}")]
    InvalidRow { message: String },
}

impl CoreError {
    /// Create a new UnknownCollection error
    pub fn unknown_collection(name: impl Into<String>) -> Self {
        Self::UnknownCollection(name.into())
    }

    /// Create a new InvalidId error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidId(id.into())
    }

    /// Create a new InvalidRow error
    pub fn invalid_row(message: impl Into<String>) -> Self {
        Self::InvalidRow {
            message: message.into(),
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;
