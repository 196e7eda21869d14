//! Error types for the core library.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::backoff::{Retryability, classify_status};

/// An error reported by the remote API or its transport.
///
/// Carries the HTTP-like status code when the remote produced one. Errors
/// without a status (connection resets, decoding failures) are never retried.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteError {
    status: Option<u16>,
    message: String,
}

impl RemoteError {
    /// Creates an error carrying a status code.
    #[must_use]
    pub fn with_status(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            message: message.into(),
        }
    }

    /// Creates an error without a status code.
    #[must_use]
    pub fn without_status(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
        }
    }

    /// Returns the status code, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        self.status
    }

    /// Returns the error message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for RemoteError {}

/// Errors that can occur in core operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Remote failure with a retryable status; surfaced once retries are exhausted.
    #[error("Transient remote error: {0}")]
    TransientRemote(RemoteError),

    /// Remote failure that is never retried.
    #[error("Remote error: {0}")]
    FatalRemote(RemoteError),

    /// Quota capacity could not be secured before the timeout.
    #[error("Quota wait timed out after {waited:?} (identity: {identity}, units: {units})")]
    QuotaTimeout {
        /// Identity whose quota was exhausted.
        identity: String,
        /// Units that were requested.
        units: u32,
        /// How long the caller waited.
        waited: Duration,
    },

    /// Identity or key cannot be mapped onto the cache directory.
    #[error("Invalid cache key: {0}")]
    InvalidKey(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Returns the remote status code carried by this error, if any.
    #[must_use]
    pub const fn status(&self) -> Option<u16> {
        match self {
            Self::TransientRemote(e) | Self::FatalRemote(e) => e.status(),
            _ => None,
        }
    }
}

impl From<RemoteError> for Error {
    fn from(error: RemoteError) -> Self {
        match classify_status(error.status()) {
            Retryability::Retryable => Self::TransientRemote(error),
            Retryability::Fatal => Self::FatalRemote(error),
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
