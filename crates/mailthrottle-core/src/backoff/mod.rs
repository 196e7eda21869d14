//! Exponential backoff for transient remote failures.
//!
//! Two entry points share one classification and delay schedule:
//!
//! - [`run_with_retry`] / [`run_with_retry_notify`] wrap an async operation
//!   and drive it to success, a fatal error, or exhaustion.
//! - [`RetryOperation`] exposes the same logic step by step for call sites
//!   that interleave retries with other per-attempt work.
//!
//! Only statuses 429, 500, 502, 503 and 504 are retried. Everything else,
//! including errors that carry no status at all, is fatal.

mod classify;
mod policy;
mod retry;

pub use classify::{RETRYABLE_STATUS_CODES, Retryability, StatusCoded, classify, classify_status};
pub use policy::{RetryPolicy, delay_for};
pub use retry::{RetryDecision, RetryOperation, RetryState, run_with_retry, run_with_retry_notify};
