//! Error types for the AnyApplication controller

use thiserror::Error;

/// Core error type for AnyApplication operations
#[derive(Error, Debug)]
pub enum AnyAppError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input or arguments
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Chart version or version range that cannot be parsed or resolved
    #[error("Invalid version: {0}")]
    InvalidVersion(String),

    /// Resource lookup failed
    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    /// Resource already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Optimistic concurrency failure on write
    #[error("Conflict on {name}: expected resource version {expected}, found {actual}")]
    Conflict {
        name: String,
        expected: u64,
        actual: u64,
    },

    /// Chart repository errors
    #[error("Chart error: {0}")]
    Chart(String),

    /// Cluster backend errors
    #[error("Cluster error: {0}")]
    Cluster(String),

    /// Chart rendering errors
    #[error("Render error: {0}")]
    Render(String),

    /// Synchronization errors
    #[error("Sync error: {0}")]
    Sync(String),

    /// Peer zone communication errors
    #[error("Peer error: {0}")]
    Peer(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Timeout errors
    #[error("Operation timed out: {0}")]
    Timeout(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl AnyAppError {
    /// Shorthand for a [`AnyAppError::NotFound`] error
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        AnyAppError::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Whether a retry of the same write could succeed
    pub fn is_conflict(&self) -> bool {
        matches!(self, AnyAppError::Conflict { .. })
    }
}

/// Result type alias for AnyApplication operations
pub type Result<T> = std::result::Result<T, AnyAppError>;

impl From<serde_json::Error> for AnyAppError {
    fn from(err: serde_json::Error) -> Self {
        AnyAppError::Serialization(err.to_string())
    }
}

impl From<serde_yaml::Error> for AnyAppError {
    fn from(err: serde_yaml::Error) -> Self {
        AnyAppError::Serialization(err.to_string())
    }
}
