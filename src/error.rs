//! Error types for double-submit prevention.

use thiserror::Error;

/// Result type for double-submit operations.
pub type Result<T> = std::result::Result<T, DoubleSubmitError>;

/// Double-submit specific errors.
#[derive(Error, Debug)]
pub enum DoubleSubmitError {
    #[error("Invalid double-submit configuration: {0}")]
    InvalidConfig(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Window not found: {0}")]
    WindowNotFound(String),
}

impl From<DoubleSubmitError> for armature_core::Error {
    fn from(err: DoubleSubmitError) -> Self {
        match err {
            DoubleSubmitError::SessionNotFound(_) | DoubleSubmitError::WindowNotFound(_) => {
                armature_core::Error::NotFound(err.to_string())
            }
            other => armature_core::Error::Internal(other.to_string()),
        }
    }
}
