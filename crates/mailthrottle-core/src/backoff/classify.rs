//! Error classification.

use crate::error::{Error, RemoteError};

/// HTTP statuses worth retrying: rate limiting and server-side faults.
pub const RETRYABLE_STATUS_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// Whether a failed attempt may be retried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Transient failure; retry after a delay.
    Retryable,
    /// Permanent failure; surface immediately.
    Fatal,
}

/// Errors that may carry a remote status code.
pub trait StatusCoded {
    /// Returns the HTTP-like status of the failure, if one exists.
    fn status_code(&self) -> Option<u16>;
}

impl StatusCoded for RemoteError {
    fn status_code(&self) -> Option<u16> {
        self.status()
    }
}

impl StatusCoded for Error {
    fn status_code(&self) -> Option<u16> {
        self.status()
    }
}

/// Classifies a status code (or its absence).
#[must_use]
pub fn classify_status(status: Option<u16>) -> Retryability {
    match status {
        Some(code) if RETRYABLE_STATUS_CODES.contains(&code) => Retryability::Retryable,
        _ => Retryability::Fatal,
    }
}

/// Classifies an error.
#[must_use]
pub fn classify<E: StatusCoded + ?Sized>(error: &E) -> Retryability {
    classify_status(error.status_code())
}
