/*!
Error types for the Chronicle core engine.
*/

use thiserror::Error;

/// Result type used throughout the Chronicle core.
pub type Result<T> = std::result::Result<T, ChronicleError>;

/// Errors that can occur during snapshot operations.
#[derive(Error, Debug)]
pub enum ChronicleError {
    /// Object state could not be converted into a payload
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A referenced snapshot, label or subject does not exist
    #[error("Snapshot not found: {0}")]
    NotFound(String),

    /// A stored record is structurally unusable for the requested operation
    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    /// A consumer asked for an output form the engine does not implement
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Backend-specific storage failure
    #[error("Storage I/O error: {0}")]
    StorageIo(String),

    /// I/O errors during file operations
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Relational backend errors
    #[cfg(feature = "sqlite")]
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Integrity check failures
    #[error("Integrity check failed: expected hash {expected}, got {actual}")]
    IntegrityCheckFailed { expected: String, actual: String },

    /// Configuration validation errors
    #[error("Validation error: {0}")]
    Validation(String),
}

impl ChronicleError {
    /// Create a new serialization error
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a new not-found error
    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a new invalid snapshot error
    pub fn invalid_snapshot<S: Into<String>>(msg: S) -> Self {
        Self::InvalidSnapshot(msg.into())
    }

    /// Create a new unsupported format error
    pub fn unsupported_format<S: Into<String>>(msg: S) -> Self {
        Self::UnsupportedFormat(msg.into())
    }

    /// Create a new storage I/O error
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        Self::StorageIo(msg.into())
    }

    /// Create a new validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// True for every failure that originates in a storage backend.
    pub fn is_storage_io(&self) -> bool {
        match self {
            Self::StorageIo(_) | Self::Io(_) => true,
            #[cfg(feature = "sqlite")]
            Self::Sqlite(_) => true,
            _ => false,
        }
    }

    /// True if the error means "nothing by that name exists".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl From<csv::Error> for ChronicleError {
    fn from(err: csv::Error) -> Self {
        ChronicleError::Serialization(format!("CSV error: {err}"))
    }
}

impl From<askama::Error> for ChronicleError {
    fn from(err: askama::Error) -> Self {
        ChronicleError::Serialization(format!("Template error: {err}"))
    }
}
