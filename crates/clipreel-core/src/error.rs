//! Error types for clipreel.

use thiserror::Error;

/// Failure reported by an external frame resource handle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
    /// The handle's resources were already freed.
    #[error("frame handle already released")]
    AlreadyReleased,

    /// The device could not produce a copy of the handle.
    #[error("frame duplication failed: {0}")]
    DuplicateFailed(String),
}

/// Main error type for clipreel core operations.
#[derive(Error, Debug)]
pub enum ClipError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid buffer capacity: {0}")]
    InvalidCapacity(usize),

    #[error("Frame handle error: {0}")]
    Handle(#[from] HandleError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for clipreel core operations.
pub type Result<T> = std::result::Result<T, ClipError>;
