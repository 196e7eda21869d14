//! Chunked batch execution.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::model::{BatchConfig, BatchResult, CostModel, MAX_BATCH_SIZE, SubOutcome, SubRequest};
use crate::backoff::{RetryOperation, StatusCoded};
use crate::quota::QuotaTracker;
use crate::{Error, RemoteError};

/// Runs grouped sub-requests under quota control.
///
/// Each chunk goes out as one transport call and has its outcomes merged
/// into a single [`BatchResult`]. Every attempt, retries included, waits
/// for its quota first and is charged once the remote has answered it. A
/// chunk that fails as a whole marks its own items failed; the remaining
/// chunks still run.
#[derive(Debug, Clone)]
pub struct BatchOrchestrator {
    quota: Arc<QuotaTracker>,
    config: BatchConfig,
}

/// Why a metered call gave up.
#[derive(Debug)]
enum Failure<E> {
    Quota(Error),
    Remote(E),
}

impl<E: fmt::Display> fmt::Display for Failure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quota(e) => e.fmt(f),
            Self::Remote(e) => e.fmt(f),
        }
    }
}

impl BatchOrchestrator {
    /// Creates an orchestrator with the default configuration.
    #[must_use]
    pub fn new(quota: Arc<QuotaTracker>) -> Self {
        Self::with_config(quota, BatchConfig::default())
    }

    /// Creates an orchestrator with a custom configuration.
    #[must_use]
    pub const fn with_config(quota: Arc<QuotaTracker>, config: BatchConfig) -> Self {
        Self { quota, config }
    }

    /// Returns the quota tracker chunks are charged against.
    #[must_use]
    pub const fn quota(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Returns the orchestrator configuration.
    #[must_use]
    pub const fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Runs one remote call costing `units` under quota control.
    ///
    /// Transient failures are retried per the configured policy. Each
    /// attempt waits for quota and is charged once the remote answered it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QuotaTimeout`] if an attempt cannot secure quota in
    /// time, or the classified remote error once no retry is left.
    pub async fn call<T, F, Fut>(&self, identity: &str, units: u32, operation: F) -> crate::Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, RemoteError>>,
    {
        self.metered(identity, units, operation)
            .await
            .map_err(|failure| match failure {
                Failure::Quota(error) => error,
                Failure::Remote(error) => error.into(),
            })
    }

    /// Runs `items` in chunks without progress reporting.
    ///
    /// See [`Self::execute_with_progress`].
    pub async fn execute<R, O, E, F, Fut>(
        &self,
        identity: &str,
        items: Vec<SubRequest<R>>,
        chunk_size: usize,
        cost: CostModel,
        perform: F,
    ) -> BatchResult<O>
    where
        R: Clone,
        F: FnMut(Vec<SubRequest<R>>) -> Fut,
        Fut: Future<Output = Result<Vec<SubOutcome<O>>, E>>,
        E: StatusCoded + fmt::Display,
    {
        self.execute_with_progress(identity, items, chunk_size, cost, perform, |_, _| {})
            .await
    }

    /// Runs `items` in chunks of at most `chunk_size`.
    ///
    /// The chunk size is clamped to `1..=50`. For per-item costs it is further
    /// reduced so one chunk never costs more than the per-second ceiling.
    ///
    /// Per chunk: wait for quota, call `perform`, charge the chunk's cost,
    /// and retry transient failures the same way. Then merge its outcomes,
    /// report `(processed, total)` to `on_progress` and pause before the
    /// next chunk. A chunk whose quota wait times out or whose `perform`
    /// fails for good is recorded as a failure of every item in it.
    /// Sub-requests the transport reports no outcome for count as failed.
    pub async fn execute_with_progress<R, O, E, F, Fut, P>(
        &self,
        identity: &str,
        items: Vec<SubRequest<R>>,
        chunk_size: usize,
        cost: CostModel,
        mut perform: F,
        mut on_progress: P,
    ) -> BatchResult<O>
    where
        R: Clone,
        F: FnMut(Vec<SubRequest<R>>) -> Fut,
        Fut: Future<Output = Result<Vec<SubOutcome<O>>, E>>,
        E: StatusCoded + fmt::Display,
        P: FnMut(usize, usize),
    {
        let total = items.len();
        let chunk_size = self.effective_chunk_size(chunk_size, cost);
        let chunk_count = total.div_ceil(chunk_size);
        let mut result = BatchResult::new(total);
        let mut processed = 0;

        info!(identity, total, chunk_size, chunk_count, "Starting batch");

        let mut remaining = items.into_iter().peekable();
        let mut index = 0;
        while remaining.peek().is_some() {
            let chunk: Vec<SubRequest<R>> = remaining.by_ref().take(chunk_size).collect();
            let ids: Vec<String> = chunk.iter().map(|s| s.correlation_id.clone()).collect();
            let units = cost.units(chunk.len());
            index += 1;

            debug!(identity, chunk = index, len = chunk.len(), units, "Dispatching chunk");

            match self
                .metered(identity, units, || perform(chunk.clone()))
                .await
            {
                Ok(outcomes) => merge_outcomes(&mut result, &ids, outcomes),
                Err(Failure::Quota(error)) => {
                    warn!(identity, chunk = index, %error, "Chunk skipped for quota");
                    fail_all(&mut result, &ids, &error.to_string());
                }
                Err(Failure::Remote(error)) => {
                    warn!(identity, chunk = index, %error, "Chunk failed");
                    fail_all(&mut result, &ids, &error.to_string());
                }
            }

            processed += ids.len();
            on_progress(processed, total);

            if remaining.peek().is_some() && !self.config.inter_chunk_delay.is_zero() {
                tokio::time::sleep(self.config.inter_chunk_delay).await;
            }
        }

        info!(
            identity,
            total,
            succeeded = result.succeeded,
            failed = result.failed,
            "Batch finished"
        );
        result
    }

    /// Drives `operation` through the retry policy, securing `units` of
    /// quota before every attempt.
    ///
    /// An attempt is charged when it succeeds or fails with a status, since
    /// either way the remote processed it. Failures without a status never
    /// reached the remote and cost nothing.
    async fn metered<T, E, F, Fut>(
        &self,
        identity: &str,
        units: u32,
        mut operation: F,
    ) -> Result<T, Failure<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: StatusCoded + fmt::Display,
    {
        let mut op = RetryOperation::new(&self.config.retry);
        loop {
            self.quota
                .await_quota(identity, units, self.config.quota_timeout)
                .await
                .map_err(Failure::Quota)?;

            match operation().await {
                Ok(value) => {
                    self.quota.record_usage(identity, units);
                    op.mark_success();
                    return Ok(value);
                }
                Err(error) => {
                    if error.status_code().is_some() {
                        self.quota.record_usage(identity, units);
                    }
                    op.handle_error(error).await.map_err(Failure::Remote)?;
                }
            }
        }
    }

    fn effective_chunk_size(&self, requested: usize, cost: CostModel) -> usize {
        let size = requested.clamp(1, MAX_BATCH_SIZE);
        match cost {
            CostModel::PerItem(units) if units > 0 => {
                let fits = self.quota.config().rate_limit / units;
                size.min(usize::try_from(fits).unwrap_or(usize::MAX).max(1))
            }
            _ => size,
        }
    }
}

fn merge_outcomes<O>(result: &mut BatchResult<O>, ids: &[String], outcomes: Vec<SubOutcome<O>>) {
    let mut pending: HashSet<&str> = ids.iter().map(String::as_str).collect();

    for outcome in outcomes {
        if !pending.remove(outcome.correlation_id.as_str()) {
            debug!(correlation_id = %outcome.correlation_id, "Ignoring unexpected outcome");
            continue;
        }
        match outcome.result {
            Ok(value) => result.record_success(outcome.correlation_id, value),
            Err(error) => result.record_failure(outcome.correlation_id, error.to_string()),
        }
    }

    for id in ids {
        if pending.contains(id.as_str()) {
            result.record_failure(id.as_str(), "no response for sub-request");
        }
    }
}

fn fail_all<O>(result: &mut BatchResult<O>, ids: &[String], error: &str) {
    for id in ids {
        result.record_failure(id.as_str(), error);
    }
}
