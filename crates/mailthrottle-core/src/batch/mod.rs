//! Quota-aware batch execution.
//!
//! [`BatchOrchestrator`] splits a list of [`SubRequest`]s into chunks no
//! larger than the remote API's group limit, charges each chunk against the
//! [`crate::quota::QuotaTracker`], and merges per-item outcomes into one
//! [`BatchResult`]. Failures stay local to the item or chunk they hit.

mod model;
mod orchestrator;

pub use model::{
    BatchConfig, BatchResult, CostModel, DEFAULT_INTER_CHUNK_DELAY, DEFAULT_QUOTA_TIMEOUT,
    ItemFailure, ItemSuccess, MAX_BATCH_SIZE, SubOutcome, SubRequest,
};
pub use orchestrator::BatchOrchestrator;
