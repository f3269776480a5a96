//! Common error types for the Skiff crates.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`SkiffError`].
pub type SkiffResult<T> = Result<T, SkiffError>;

/// Common errors across the Skiff crates.
#[derive(Error, Diagnostic, Debug)]
pub enum SkiffError {
    /// Invalid network ID format.
    #[error("Invalid network ID: {id}")]
    #[diagnostic(
        code(skiff::network::invalid_id),
        help("Network IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidNetworkId {
        /// The invalid network ID.
        id: String,
    },

    /// Invalid endpoint ID format.
    #[error("Invalid endpoint ID: {id}")]
    #[diagnostic(
        code(skiff::endpoint::invalid_id),
        help("Endpoint IDs must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidEndpointId {
        /// The invalid endpoint ID.
        id: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(skiff::io))]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    #[diagnostic(code(skiff::serialization))]
    Serialization(String),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(skiff::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl From<serde_json::Error> for SkiffError {
    fn from(err: serde_json::Error) -> Self {
        SkiffError::Serialization(err.to_string())
    }
}
