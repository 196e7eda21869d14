//! # mailthrottle-core
//!
//! Client-side plumbing for a quota-constrained email API.
//!
//! This crate provides:
//! - **Quota tracking** - per-identity rate and daily unit ledgers
//! - **Backoff** - retry classification and exponential delay schedules
//! - **Result cache** - file-backed, TTL-checked response cache
//! - **Batch orchestration** - chunked, quota-aware execution with partial results
//!
//! Nothing here talks to the network. A transport is supplied by the
//! caller; see the `mailthrottle-mail` crate for the mail service built on
//! top of these pieces.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod backoff;
pub mod batch;
pub mod cache;
pub mod clock;
mod error;
pub mod quota;

pub use backoff::{Retryability, RetryPolicy, classify, run_with_retry};
pub use batch::{BatchConfig, BatchOrchestrator, BatchResult, CostModel, SubOutcome, SubRequest};
pub use cache::{CacheConfig, InvalidationScope, Namespace, ResultCache};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{Error, RemoteError, Result};
pub use quota::{QuotaConfig, QuotaTracker, QuotaUnit};
