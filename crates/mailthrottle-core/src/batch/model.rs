//! Batch data models.

use std::time::Duration;

use serde::Serialize;

use crate::backoff::RetryPolicy;
use crate::error::RemoteError;

/// Largest group of sub-requests the remote API accepts in one batch call.
pub const MAX_BATCH_SIZE: usize = 50;

/// Default pause between consecutive chunks.
pub const DEFAULT_INTER_CHUNK_DELAY: Duration = Duration::from_millis(500);

/// Default time one attempt may wait for quota.
pub const DEFAULT_QUOTA_TIMEOUT: Duration = Duration::from_secs(30);

/// One sub-request of a batch, tagged with the id its outcome is reported under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubRequest<R> {
    /// Caller-chosen correlation id, unique within one call.
    pub correlation_id: String,
    /// The request itself.
    pub request: R,
}

impl<R> SubRequest<R> {
    /// Creates a sub-request.
    #[must_use]
    pub fn new(correlation_id: impl Into<String>, request: R) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            request,
        }
    }
}

/// Outcome of one sub-request as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubOutcome<O> {
    /// Correlation id of the sub-request.
    pub correlation_id: String,
    /// Response or per-item error.
    pub result: Result<O, RemoteError>,
}

impl<O> SubOutcome<O> {
    /// Creates a successful outcome.
    #[must_use]
    pub fn ok(correlation_id: impl Into<String>, value: O) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            result: Ok(value),
        }
    }

    /// Creates a failed outcome.
    #[must_use]
    pub fn err(correlation_id: impl Into<String>, error: RemoteError) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            result: Err(error),
        }
    }
}

/// How much quota one chunk costs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CostModel {
    /// Each sub-request costs this many units.
    PerItem(u32),
    /// The whole chunk costs this many units, regardless of length.
    PerCall(u32),
}

impl CostModel {
    /// Returns the cost of a chunk of `len` sub-requests.
    #[must_use]
    pub fn units(self, len: usize) -> u32 {
        match self {
            Self::PerItem(units) => {
                units.saturating_mul(u32::try_from(len).unwrap_or(u32::MAX))
            }
            Self::PerCall(units) => units,
        }
    }
}

/// A successful item of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemSuccess<O> {
    /// Correlation id of the sub-request.
    pub correlation_id: String,
    /// Response value.
    pub value: O,
}

/// A failed item of a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemFailure {
    /// Correlation id of the sub-request.
    pub correlation_id: String,
    /// What went wrong.
    pub error: String,
}

/// Aggregated outcome of one logical batch call.
///
/// Accumulated across every chunk; counts only ever grow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BatchResult<O> {
    /// Items submitted.
    pub total: usize,
    /// Items that succeeded.
    pub succeeded: usize,
    /// Items that failed.
    pub failed: usize,
    /// Successful responses, in completion order.
    pub results: Vec<ItemSuccess<O>>,
    /// Failures, in completion order.
    pub errors: Vec<ItemFailure>,
}

impl<O> Default for BatchResult<O> {
    fn default() -> Self {
        Self {
            total: 0,
            succeeded: 0,
            failed: 0,
            results: Vec::new(),
            errors: Vec::new(),
        }
    }
}

impl<O> BatchResult<O> {
    /// Creates an empty result for `total` items.
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            total,
            ..Self::default()
        }
    }

    /// Records a successful item.
    pub fn record_success(&mut self, correlation_id: impl Into<String>, value: O) {
        self.succeeded += 1;
        self.results.push(ItemSuccess {
            correlation_id: correlation_id.into(),
            value,
        });
    }

    /// Records a failed item.
    pub fn record_failure(&mut self, correlation_id: impl Into<String>, error: impl Into<String>) {
        self.failed += 1;
        self.errors.push(ItemFailure {
            correlation_id: correlation_id.into(),
            error: error.into(),
        });
    }

    /// Returns the response for `correlation_id`, if it succeeded.
    #[must_use]
    pub fn get(&self, correlation_id: &str) -> Option<&O> {
        self.results
            .iter()
            .find(|item| item.correlation_id == correlation_id)
            .map(|item| &item.value)
    }

    /// Returns the failure message for `correlation_id`, if it failed.
    #[must_use]
    pub fn error_for(&self, correlation_id: &str) -> Option<&str> {
        self.errors
            .iter()
            .find(|item| item.correlation_id == correlation_id)
            .map(|item| item.error.as_str())
    }

    /// Fraction of items that succeeded, in `0.0..=1.0`. Zero for an empty batch.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn success_rate(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        self.succeeded as f64 / self.total as f64
    }

    /// Returns true if every item succeeded.
    #[must_use]
    pub const fn is_complete_success(&self) -> bool {
        self.failed == 0 && self.succeeded == self.total
    }
}

/// Orchestrator configuration.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Pause between consecutive chunks.
    pub inter_chunk_delay: Duration,
    /// Time each attempt may wait for quota.
    pub quota_timeout: Duration,
    /// Retry schedule for transient remote failures.
    pub retry: RetryPolicy,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            inter_chunk_delay: DEFAULT_INTER_CHUNK_DELAY,
            quota_timeout: DEFAULT_QUOTA_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }
}

impl BatchConfig {
    /// Sets the pause between chunks.
    #[must_use]
    pub const fn inter_chunk_delay(mut self, delay: Duration) -> Self {
        self.inter_chunk_delay = delay;
        self
    }

    /// Sets the per-attempt quota timeout.
    #[must_use]
    pub const fn quota_timeout(mut self, timeout: Duration) -> Self {
        self.quota_timeout = timeout;
        self
    }

    /// Sets the retry schedule.
    #[must_use]
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry = policy;
        self
    }
}
