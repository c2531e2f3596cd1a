//! Error types for tessera

use thiserror::Error;

/// Core tessera errors
#[derive(Error, Debug)]
pub enum TesseraError {
    // Path errors
    #[error("Invalid object path: {0:?}")]
    InvalidPath(String),

    #[error("Can't set property on object at path {0}")]
    UnaddressableTarget(String),

    // Registration errors
    #[error("Slice {id:?} cannot claim path {path}: already owned by another slice")]
    DuplicateRegistration { id: String, path: String },

    // Store errors
    #[error("Reducers may not dispatch actions (got {0})")]
    ReentrantDispatch(String),

    #[error("No store attached: {0}")]
    NoStoreAttached(String),

    // Conversion errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Result type for tessera operations
pub type TesseraResult<T> = Result<T, TesseraError>;
