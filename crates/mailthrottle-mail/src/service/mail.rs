//! Quota-aware bulk mail operations.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use mailthrottle_core::batch::{
    BatchConfig, BatchOrchestrator, BatchResult, CostModel, MAX_BATCH_SIZE, SubOutcome, SubRequest,
};
use mailthrottle_core::{QuotaTracker, QuotaUnit, ResultCache, RetryPolicy};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::request::{ApiRequest, LABEL_INBOX, LABEL_UNREAD, MessageFormat};
use crate::transport::MailTransport;

/// Query used by [`MailService::mark_all_as_read`] when the caller has no filter.
pub const DEFAULT_UNREAD_QUERY: &str = "is:unread";

/// Default cap on messages touched by one bulk operation.
pub const DEFAULT_BULK_CAP: usize = 500;

/// Largest page requested from the listing endpoint.
pub const MAX_PAGE_SIZE: usize = 100;

type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// Mail operations for one identity over a [`MailTransport`].
///
/// Every transport attempt, retries included, waits for and is charged
/// against the shared [`QuotaTracker`]. Transient failures are retried.
/// With a cache attached, message reads are served from it when fresh and
/// mutations invalidate what they touch.
pub struct MailService<T> {
    transport: Arc<T>,
    identity: String,
    orchestrator: BatchOrchestrator,
    cache: Option<Arc<ResultCache>>,
    chunk_size: usize,
    progress: Option<ProgressFn>,
}

impl<T> fmt::Debug for MailService<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MailService")
            .field("identity", &self.identity)
            .field("orchestrator", &self.orchestrator)
            .field("cached", &self.cache.is_some())
            .field("chunk_size", &self.chunk_size)
            .finish_non_exhaustive()
    }
}

impl<T: MailTransport> MailService<T> {
    /// Creates a service for `identity`.
    #[must_use]
    pub fn new(transport: Arc<T>, quota: Arc<QuotaTracker>, identity: impl Into<String>) -> Self {
        Self {
            transport,
            identity: identity.into(),
            orchestrator: BatchOrchestrator::new(quota),
            cache: None,
            chunk_size: MAX_BATCH_SIZE,
            progress: None,
        }
    }

    /// Attaches a result cache.
    #[must_use]
    pub fn with_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the retry policy for transport calls.
    #[must_use]
    pub fn with_retry_policy(self, policy: RetryPolicy) -> Self {
        let config = self.orchestrator.config().clone().retry_policy(policy);
        self.with_batch_config(config)
    }

    /// Sets the batch configuration, retry policy included.
    #[must_use]
    pub fn with_batch_config(mut self, config: BatchConfig) -> Self {
        let quota = Arc::clone(self.orchestrator.quota());
        self.orchestrator = BatchOrchestrator::with_config(quota, config);
        self
    }

    /// Sets the number of sub-requests per chunk (capped at 50).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Registers a callback receiving `(processed, total)` after each chunk.
    #[must_use]
    pub fn with_progress<F>(mut self, callback: F) -> Self
    where
        F: Fn(usize, usize) + Send + Sync + 'static,
    {
        self.progress = Some(Arc::new(callback));
        self
    }

    /// Returns the identity this service acts for.
    #[must_use]
    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Returns the quota tracker.
    #[must_use]
    pub fn quota(&self) -> &QuotaTracker {
        self.orchestrator.quota()
    }

    /// Fetches one message.
    ///
    /// Served from the cache when a fresh entry exists for `format`.
    ///
    /// # Errors
    ///
    /// Returns an error if quota cannot be secured or the remote call fails.
    pub async fn get_message(&self, id: &str, format: MessageFormat) -> Result<Value> {
        if let Some(value) = self.cached_message(id, format).await {
            return Ok(value);
        }

        let request = ApiRequest::GetMessage {
            id: id.to_owned(),
            format,
        };
        let value = self.execute_single(request).await?;

        if format == MessageFormat::Full {
            self.store_message(id, &value).await;
        }
        Ok(value)
    }

    /// Fetches many messages.
    ///
    /// Fresh cache hits are returned without a remote call. Messages fetched
    /// in [`MessageFormat::Full`] are written back to the cache; other
    /// formats are never cached so they cannot shadow a full entry.
    ///
    /// Per-message failures are reported in the result.
    pub async fn batch_get_messages<S: AsRef<str>>(
        &self,
        ids: &[S],
        format: MessageFormat,
    ) -> BatchResult<Value> {
        let ids = unique_ids(ids);
        let total = ids.len();

        let mut hits = Vec::new();
        let mut misses = Vec::new();
        for id in ids {
            match self.cached_message(&id, format).await {
                Some(value) => hits.push((id, value)),
                None => misses.push(id),
            }
        }
        if !hits.is_empty() {
            debug!(
                identity = %self.identity,
                hits = hits.len(),
                misses = misses.len(),
                "Served messages from cache"
            );
        }

        let requests = misses
            .into_iter()
            .map(|id| {
                let request = ApiRequest::GetMessage {
                    id: id.clone(),
                    format,
                };
                SubRequest::new(id, request)
            })
            .collect();
        let fetched = self
            .dispatch(requests, QuotaUnit::MessagesGet.units(), hits.len())
            .await;
        if fetched.total == 0 && total > 0 {
            // Nothing went out, so no chunk reported progress.
            self.report(total, total);
        }

        if format == MessageFormat::Full {
            for item in &fetched.results {
                self.store_message(&item.correlation_id, &item.value).await;
            }
        }

        let mut result = BatchResult::new(total);
        for (id, value) in hits {
            result.record_success(id, value);
        }
        merge(&mut result, fetched);
        result
    }

    /// Fetches many threads.
    ///
    /// Per-thread failures are reported in the result.
    pub async fn batch_get_threads<S: AsRef<str>>(
        &self,
        ids: &[S],
        format: MessageFormat,
    ) -> BatchResult<Value> {
        let requests = unique_ids(ids)
            .into_iter()
            .map(|id| {
                let request = ApiRequest::GetThread {
                    id: id.clone(),
                    format,
                };
                SubRequest::new(id, request)
            })
            .collect();

        self.dispatch(requests, QuotaUnit::ThreadsGet.units(), 0)
            .await
    }

    /// Moves messages to the trash.
    ///
    /// Per-message failures are reported in the result.
    pub async fn batch_trash_messages<S: AsRef<str>>(&self, ids: &[S]) -> BatchResult<Value> {
        let ids = unique_ids(ids);
        let requests = ids
            .iter()
            .map(|id| SubRequest::new(id.clone(), ApiRequest::TrashMessage { id: id.clone() }))
            .collect();

        let result = self
            .dispatch(requests, QuotaUnit::MessagesTrash.units(), 0)
            .await;
        self.invalidate_touched(&ids).await;
        result
    }

    /// Permanently deletes messages.
    ///
    /// Per-message failures are reported in the result.
    pub async fn batch_delete_messages<S: AsRef<str>>(
        &self,
        ids: &[S],
    ) -> BatchResult<Value> {
        let ids = unique_ids(ids);
        let requests = ids
            .iter()
            .map(|id| SubRequest::new(id.clone(), ApiRequest::DeleteMessage { id: id.clone() }))
            .collect();

        let result = self
            .dispatch(requests, QuotaUnit::MessagesDelete.units(), 0)
            .await;
        self.invalidate_touched(&ids).await;
        result
    }

    /// Adds and removes labels on many messages.
    ///
    /// Each chunk is one `batchModify` call costing 50 units regardless of
    /// its length. The call either succeeds or fails for the whole chunk.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if both label lists are empty.
    pub async fn batch_modify_labels<S: AsRef<str>, L: AsRef<str>>(
        &self,
        ids: &[S],
        add_label_ids: &[L],
        remove_label_ids: &[L],
    ) -> Result<BatchResult<Value>> {
        if add_label_ids.is_empty() && remove_label_ids.is_empty() {
            return Err(ServiceError::InvalidRequest(
                "batch modify needs at least one label to add or remove".into(),
            ));
        }

        let add: Vec<String> = add_label_ids.iter().map(|l| l.as_ref().to_owned()).collect();
        let remove: Vec<String> = remove_label_ids
            .iter()
            .map(|l| l.as_ref().to_owned())
            .collect();
        let ids = unique_ids(ids);
        let items = ids.iter().map(|id| SubRequest::new(id.clone(), id.clone())).collect();

        let transport = &*self.transport;
        let identity = self.identity.as_str();
        let (add, remove) = (&add, &remove);

        let result = self
            .orchestrator
            .execute_with_progress(
                identity,
                items,
                self.chunk_size,
                CostModel::PerCall(QuotaUnit::MessagesBatchModify.units()),
                move |chunk: Vec<SubRequest<String>>| async move {
                    let chunk_ids: Vec<String> = chunk.into_iter().map(|s| s.request).collect();
                    let request = ApiRequest::BatchModify {
                        ids: chunk_ids.clone(),
                        add_label_ids: add.clone(),
                        remove_label_ids: remove.clone(),
                    };
                    let response = transport.execute(identity, request).await;

                    response.map(|_| {
                        chunk_ids
                            .into_iter()
                            .map(|id| {
                                let status = json!({"id": id, "status": "modified"});
                                SubOutcome::ok(id, status)
                            })
                            .collect::<Vec<_>>()
                    })
                },
                |done, total| self.report(done, total),
            )
            .await;

        self.invalidate_touched(&ids).await;
        Ok(result)
    }

    /// Resolves `query` to at most `cap` message ids.
    ///
    /// Follows the page-token chain until it ends or `cap` ids are
    /// collected, requesting `min(100, remaining)` ids per page. Listings
    /// feed bulk mutations, so they always come from the remote.
    ///
    /// # Errors
    ///
    /// Returns an error if quota cannot be secured for a page or a listing
    /// call fails.
    pub async fn resolve_ids(&self, query: &str, cap: usize) -> Result<Vec<String>> {
        let identity = self.identity.as_str();
        let units = QuotaUnit::MessagesList.units();
        let mut ids: Vec<String> = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < cap {
            let page_size = u32::try_from((cap - ids.len()).min(MAX_PAGE_SIZE)).unwrap_or(100);

            let token = page_token.as_deref();
            let page = self
                .orchestrator
                .call(identity, units, || {
                    self.transport.list_messages(identity, query, page_size, token)
                })
                .await?;

            ids.extend(page.ids);
            match page.next_page_token {
                Some(next) if !next.is_empty() => page_token = Some(next),
                _ => break,
            }
        }

        ids.truncate(cap);
        debug!(identity, query, resolved = ids.len(), "Resolved message ids");
        Ok(ids)
    }

    /// Marks every message matching `query` as read.
    ///
    /// # Errors
    ///
    /// Returns an error if id resolution fails before any chunk runs.
    pub async fn mark_all_as_read(&self, query: &str, cap: usize) -> Result<BatchResult<Value>> {
        let ids = self.resolve_ids(query, cap).await?;
        if ids.is_empty() {
            return Ok(BatchResult::default());
        }

        info!(identity = %self.identity, query, count = ids.len(), "Marking messages as read");
        self.batch_modify_labels(&ids, &[] as &[&str], &[LABEL_UNREAD])
            .await
    }

    /// Archives every inbox message matching `query`.
    ///
    /// # Errors
    ///
    /// Returns an error if id resolution fails before any chunk runs.
    pub async fn archive_all(&self, query: &str, cap: usize) -> Result<BatchResult<Value>> {
        let scoped = format!("in:inbox {query}");
        let ids = self.resolve_ids(scoped.trim(), cap).await?;
        if ids.is_empty() {
            return Ok(BatchResult::default());
        }

        info!(identity = %self.identity, query, count = ids.len(), "Archiving messages");
        self.batch_modify_labels(&ids, &[] as &[&str], &[LABEL_INBOX])
            .await
    }

    /// Runs per-item sub-requests through the orchestrator. `offset` items
    /// were already satisfied elsewhere and are added to progress reports.
    async fn dispatch(
        &self,
        requests: Vec<SubRequest<ApiRequest>>,
        units_per_item: u32,
        offset: usize,
    ) -> BatchResult<Value> {
        let transport = &*self.transport;
        let identity = self.identity.as_str();

        self.orchestrator
            .execute_with_progress(
                identity,
                requests,
                self.chunk_size,
                CostModel::PerItem(units_per_item),
                move |chunk| transport.execute_batch(identity, chunk),
                |done, total| self.report(offset + done, offset + total),
            )
            .await
    }

    async fn execute_single(&self, request: ApiRequest) -> Result<Value> {
        let identity = self.identity.as_str();
        let value = self
            .orchestrator
            .call(identity, request.units(), || {
                self.transport.execute(identity, request.clone())
            })
            .await?;

        Ok(value)
    }

    async fn cached_message(&self, id: &str, format: MessageFormat) -> Option<Value> {
        let cache = self.cache.as_ref()?;
        let view = format.cache_view()?;

        match cache.get_message(&self.identity, id, view).await {
            Ok(value) => value,
            Err(error) => {
                warn!(identity = %self.identity, id, %error, "Message cache read failed");
                None
            }
        }
    }

    async fn store_message(&self, id: &str, value: &Value) {
        let Some(cache) = &self.cache else {
            return;
        };
        if let Err(error) = cache.set_message(&self.identity, id, value).await {
            warn!(identity = %self.identity, id, %error, "Message cache write failed");
        }
    }

    /// Drops cached copies of mutated messages and every cached listing.
    async fn invalidate_touched(&self, ids: &[String]) {
        let Some(cache) = &self.cache else {
            return;
        };

        for id in ids {
            if let Err(error) = cache.invalidate_message(&self.identity, id).await {
                warn!(identity = %self.identity, id, %error, "Message cache invalidation failed");
            }
        }
        if let Err(error) = cache.invalidate_lists(&self.identity).await {
            warn!(identity = %self.identity, %error, "List cache invalidation failed");
        }
    }

    fn report(&self, done: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(done, total);
        }
    }
}

/// Deduplicates ids, keeping first-seen order. Correlation ids must be
/// unique within one batch.
fn unique_ids<S: AsRef<str>>(ids: &[S]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(AsRef::as_ref)
        .filter(|id| seen.insert(*id))
        .map(str::to_owned)
        .collect()
}

fn merge(into: &mut BatchResult<Value>, from: BatchResult<Value>) {
    for item in from.results {
        into.record_success(item.correlation_id, item.value);
    }
    for item in from.errors {
        into.record_failure(item.correlation_id, item.error);
    }
}
