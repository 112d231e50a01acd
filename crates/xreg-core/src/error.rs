//! Error types for xreg core

use thiserror::Error;

use crate::filter::FilterError;
use crate::inline::InlineError;
use crate::lifecycle::LifecycleError;
use crate::limits::ValidationError;
use crate::object::TreeError;
use crate::path::PathError;

/// Result type alias using the core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid path: {0}")]
    Path(#[from] PathError),

    #[error("{0}")]
    Tree(#[from] TreeError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Epoch mismatch for {xid}: expected {expected}, found {actual}")]
    EpochConflict {
        xid: String,
        expected: u64,
        actual: u64,
    },

    #[error("{0}")]
    Lifecycle(#[from] LifecycleError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("Invalid inline: {0}")]
    Inline(#[from] InlineError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Self::Validation(e.to_string())
    }
}
