//! Error types for mail service operations.

use mailthrottle_core::RemoteError;
use thiserror::Error;

/// Errors returned by [`crate::MailService`] operations.
///
/// Batch operations only return an error for failures that happen before
/// any chunk runs. Once execution starts, failures are reported per item in
/// the [`mailthrottle_core::BatchResult`].
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Quota, retry, cache or remote failure.
    #[error(transparent)]
    Core(#[from] mailthrottle_core::Error),

    /// The request was rejected before reaching the transport.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<RemoteError> for ServiceError {
    fn from(error: RemoteError) -> Self {
        Self::Core(error.into())
    }
}

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, ServiceError>;
