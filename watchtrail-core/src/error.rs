//! Error types for watchtrail-core

use thiserror::Error;

use crate::types::ValidationError;

/// Main error type for the watchtrail-core library
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Delivery to the ingest collector failed (network, non-2xx, timeout)
    #[error("delivery error: {0}")]
    Delivery(String),

    /// Installation identity could not be read or created
    #[error("identity error: {0}")]
    Identity(String),

    /// Event failed collector acceptance rules
    #[error("invalid event: {0}")]
    Validation(#[from] ValidationError),
}

/// Result type alias for watchtrail-core
pub type Result<T> = std::result::Result<T, Error>;
