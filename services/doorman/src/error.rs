//! Server error types.

use doorman_config::ConfigError;
use thiserror::Error;

/// Errors returned to callers of the capacity service.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CapacityError {
    /// No configuration has been loaded yet.
    #[error("server is not configured yet")]
    NotConfigured,

    /// The server has shut down.
    #[error("server is closed")]
    Closed,

    /// The caller's deadline passed before every decision completed.
    #[error("deadline exceeded")]
    DeadlineExceeded,

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// The request is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A decision task failed unexpectedly.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CapacityError {
    /// Returns true if the same request may succeed when retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::NotConfigured | Self::DeadlineExceeded | Self::Cancelled
        )
    }
}

/// Errors that cause a configuration document to be rejected.
#[derive(Debug, Error)]
pub enum LoadConfigError {
    /// The document failed structural validation.
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    /// A template names an algorithm kind that is not registered.
    #[error("template '{glob}' uses unknown algorithm kind '{kind}'")]
    UnknownAlgorithm { glob: String, kind: String },

    /// The server has shut down.
    #[error("server is closed")]
    Closed,
}
