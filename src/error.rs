//! Error types for the goal and finance trackers

use thiserror::Error;

/// Result type alias for tracker operations
pub type Result<T> = std::result::Result<T, TrackerError>;

#[derive(Error, Debug)]
pub enum TrackerError {

    // =============================
    // Boundary Errors
    // =============================

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown market category: {0}")]
    UnknownCategory(String),

    // =============================
    // Remote Errors
    // =============================

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("A chat request is already in flight")]
    ChatBusy,

    // =============================
    // Persistence Errors
    // =============================

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl TrackerError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, TrackerError::Cancelled)
    }
}
