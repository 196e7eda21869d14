//! Integration tests for `MailService` against an in-memory transport.

#![allow(clippy::unwrap_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use mailthrottle_core::batch::{BatchConfig, SubOutcome, SubRequest};
use mailthrottle_core::cache::{CacheConfig, MessageView};
use mailthrottle_core::{Error, QuotaConfig, QuotaTracker, RemoteError, ResultCache, RetryPolicy};
use mailthrottle_mail::{
    ApiRequest, ListPage, MailService, MailTransport, MessageFormat, ServiceError,
};
use serde_json::{Value, json};
use tempfile::TempDir;

const USER: &str = "work";

/// In-memory mailbox recording every call it receives.
#[derive(Default)]
struct MockTransport {
    messages: HashMap<String, Value>,
    listing: Vec<String>,
    batch_failures: Mutex<VecDeque<RemoteError>>,
    list_failure: Option<RemoteError>,
    batch_calls: Mutex<Vec<Vec<ApiRequest>>>,
    single_calls: Mutex<Vec<ApiRequest>>,
    list_calls: Mutex<Vec<(String, u32, Option<String>)>>,
}

impl MockTransport {
    fn with_messages(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            messages: ids
                .into_iter()
                .map(|id| (id.clone(), json!({"id": id, "snippet": format!("body of {id}")})))
                .collect(),
            ..Self::default()
        }
    }

    fn with_listing(ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            listing: ids.into_iter().collect(),
            ..Self::default()
        }
    }

    fn fail_next_batch(&self, error: RemoteError) {
        self.batch_failures.lock().unwrap().push_back(error);
    }

    fn batch_calls(&self) -> Vec<Vec<ApiRequest>> {
        self.batch_calls.lock().unwrap().clone()
    }

    fn single_calls(&self) -> Vec<ApiRequest> {
        self.single_calls.lock().unwrap().clone()
    }

    fn list_calls(&self) -> Vec<(String, u32, Option<String>)> {
        self.list_calls.lock().unwrap().clone()
    }

    fn answer(&self, request: &ApiRequest) -> Result<Value, RemoteError> {
        let not_found = |id: &str| RemoteError::with_status(404, format!("{id} not found"));
        match request {
            ApiRequest::GetMessage { id, format } => {
                let mut message = self.messages.get(id).cloned().ok_or_else(|| not_found(id))?;
                message["format"] = json!(format.as_str());
                Ok(message)
            }
            ApiRequest::GetThread { id, .. } => Ok(json!({"id": id, "messages": []})),
            ApiRequest::TrashMessage { id } | ApiRequest::DeleteMessage { id } => {
                if self.messages.contains_key(id) {
                    Ok(json!({"id": id}))
                } else {
                    Err(not_found(id))
                }
            }
            ApiRequest::BatchModify { .. } => Ok(Value::Null),
        }
    }
}

impl MailTransport for MockTransport {
    async fn execute_batch(
        &self,
        _identity: &str,
        requests: Vec<SubRequest<ApiRequest>>,
    ) -> Result<Vec<SubOutcome<Value>>, RemoteError> {
        self.batch_calls
            .lock()
            .unwrap()
            .push(requests.iter().map(|s| s.request.clone()).collect());

        if let Some(error) = self.batch_failures.lock().unwrap().pop_front() {
            return Err(error);
        }

        Ok(requests
            .into_iter()
            .map(|sub| SubOutcome {
                result: self.answer(&sub.request),
                correlation_id: sub.correlation_id,
            })
            .collect())
    }

    async fn execute(&self, _identity: &str, request: ApiRequest) -> Result<Value, RemoteError> {
        self.single_calls.lock().unwrap().push(request.clone());
        self.answer(&request)
    }

    async fn list_messages(
        &self,
        _identity: &str,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> Result<ListPage, RemoteError> {
        self.list_calls.lock().unwrap().push((
            query.to_owned(),
            max_results,
            page_token.map(str::to_owned),
        ));
        if let Some(error) = &self.list_failure {
            return Err(error.clone());
        }

        let start: usize = page_token.map_or(0, |t| t.parse().unwrap());
        let end = (start + max_results as usize).min(self.listing.len());
        Ok(ListPage {
            ids: self.listing[start..end].to_vec(),
            next_page_token: (end < self.listing.len()).then(|| end.to_string()),
        })
    }
}

fn ids(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

fn fast_quota() -> Arc<QuotaTracker> {
    Arc::new(QuotaTracker::new(QuotaConfig::default().rate_limit(100_000)))
}

fn service(transport: &Arc<MockTransport>) -> MailService<MockTransport> {
    MailService::new(Arc::clone(transport), fast_quota(), USER)
        .with_batch_config(BatchConfig::default().inter_chunk_delay(Duration::ZERO))
        .with_retry_policy(RetryPolicy::new().with_max_retries(2).with_jitter(false))
}

async fn open_cache(dir: &TempDir) -> Arc<ResultCache> {
    Arc::new(
        ResultCache::open(CacheConfig::with_dir(dir.path()))
            .await
            .unwrap(),
    )
}

#[tokio::test]
async fn test_batch_get_messages_chunks_and_reports_missing() {
    let transport = Arc::new(MockTransport::with_messages(ids("m", 119)));
    let service = service(&transport);

    let mut wanted = ids("m", 119);
    wanted.push("missing".into());
    let result = service.batch_get_messages(&wanted, MessageFormat::Metadata).await;

    let sizes: Vec<usize> = transport.batch_calls().iter().map(Vec::len).collect();
    assert_eq!(sizes, vec![50, 50, 20]);
    assert_eq!(result.total, 120);
    assert_eq!(result.succeeded, 119);
    assert_eq!(result.get("m7").unwrap()["format"], "metadata");
    assert_eq!(
        result.error_for("missing"),
        Some("HTTP 404: missing not found")
    );
}

#[tokio::test]
async fn test_duplicate_ids_sent_once() {
    let transport = Arc::new(MockTransport::with_messages(ids("m", 2)));
    let service = service(&transport);

    let result = service
        .batch_get_messages(&["m0", "m1", "m0"], MessageFormat::Minimal)
        .await;

    assert_eq!(result.total, 2);
    assert_eq!(transport.batch_calls()[0].len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_transient_batch_failure_is_retried() {
    let transport = Arc::new(MockTransport::with_messages(ids("m", 3)));
    transport.fail_next_batch(RemoteError::with_status(503, "unavailable"));
    let service = service(&transport);

    let result = service.batch_get_threads(&ids("m", 3), MessageFormat::Full).await;

    assert_eq!(transport.batch_calls().len(), 2);
    assert_eq!(result.succeeded, 3);
    // The rejected attempt reached the remote and is charged too.
    assert_eq!(service.quota().usage_snapshot(USER).daily_units, 60);
}

#[tokio::test(start_paused = true)]
async fn test_failed_single_attempts_are_charged() {
    let transport = Arc::new(MockTransport::default());
    let service = service(&transport);

    service
        .get_message("nope", MessageFormat::Full)
        .await
        .unwrap_err();

    assert_eq!(transport.single_calls().len(), 1);
    assert_eq!(service.quota().usage_snapshot(USER).daily_units, 5);
}

#[tokio::test(start_paused = true)]
async fn test_fatal_batch_failure_fails_chunk_items() {
    let transport = Arc::new(MockTransport::with_messages(ids("m", 3)));
    transport.fail_next_batch(RemoteError::with_status(401, "token expired"));
    let service = service(&transport);

    let result = service.batch_trash_messages(&ids("m", 3)).await;

    assert_eq!(transport.batch_calls().len(), 1);
    assert_eq!(result.failed, 3);
    assert_eq!(result.error_for("m2"), Some("HTTP 401: token expired"));
}

#[tokio::test]
async fn test_quota_charged_per_item() {
    let transport = Arc::new(MockTransport::with_messages(ids("m", 4)));
    let service = service(&transport);

    service.batch_delete_messages(&ids("m", 4)).await;

    assert_eq!(service.quota().usage_snapshot(USER).daily_units, 40);
}

#[tokio::test]
async fn test_cache_hits_skip_transport() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir).await;
    cache
        .set_message(USER, "m0", &json!({"id": "m0", "cached": true}))
        .await
        .unwrap();

    let transport = Arc::new(MockTransport::with_messages(ids("m", 3)));
    let service = service(&transport).with_cache(Arc::clone(&cache));

    let result = service.batch_get_messages(&ids("m", 3), MessageFormat::Full).await;

    assert_eq!(result.succeeded, 3);
    assert_eq!(result.get("m0").unwrap()["cached"], true);
    let requested: Vec<ApiRequest> = transport.batch_calls().concat();
    assert_eq!(requested.len(), 2);

    // Fetched full messages were written back.
    let cached: Option<Value> = cache.get_message(USER, "m2", MessageView::Full).await.unwrap();
    assert_eq!(cached.unwrap()["format"], "full");

    // A second read is served entirely from the cache.
    service.batch_get_messages(&ids("m", 3), MessageFormat::Full).await;
    assert_eq!(transport.batch_calls().len(), 1);
}

#[tokio::test]
async fn test_non_full_formats_not_written_to_cache() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir).await;
    let transport = Arc::new(MockTransport::with_messages(ids("m", 2)));
    let service = service(&transport).with_cache(Arc::clone(&cache));

    service.batch_get_messages(&ids("m", 2), MessageFormat::Metadata).await;
    service.batch_get_messages(&ids("m", 2), MessageFormat::Raw).await;

    assert_eq!(cache.stats(Some(USER)).await.unwrap().total_items, 0);
    assert_eq!(transport.batch_calls().len(), 2);
}

#[tokio::test]
async fn test_get_message_read_through() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir).await;
    let transport = Arc::new(MockTransport::with_messages(ids("m", 1)));
    let service = service(&transport).with_cache(cache);

    let first = service.get_message("m0", MessageFormat::Full).await.unwrap();
    let second = service.get_message("m0", MessageFormat::Metadata).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(transport.single_calls().len(), 1);
    assert_eq!(service.quota().usage_snapshot(USER).daily_units, 5);
}

#[tokio::test]
async fn test_get_message_not_found_is_fatal() {
    let transport = Arc::new(MockTransport::default());
    let service = service(&transport);

    let err = service
        .get_message("nope", MessageFormat::Full)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ServiceError::Core(Error::FatalRemote(ref remote)) if remote.status() == Some(404)
    ));
    assert_eq!(transport.single_calls().len(), 1);
}

#[tokio::test]
async fn test_modify_labels_one_call_per_chunk() {
    let transport = Arc::new(MockTransport::default());
    let service = service(&transport);

    let result = service
        .batch_modify_labels(&ids("m", 120), &["STARRED"], &["UNREAD"])
        .await
        .unwrap();

    let calls = transport.single_calls();
    assert_eq!(calls.len(), 3);
    match &calls[2] {
        ApiRequest::BatchModify {
            ids,
            add_label_ids,
            remove_label_ids,
        } => {
            assert_eq!(ids.len(), 20);
            assert_eq!(add_label_ids, &["STARRED"]);
            assert_eq!(remove_label_ids, &["UNREAD"]);
        }
        other => panic!("unexpected request: {other:?}"),
    }
    assert_eq!(result.succeeded, 120);
    assert_eq!(result.get("m5").unwrap()["status"], "modified");
    assert_eq!(service.quota().usage_snapshot(USER).daily_units, 150);
}

#[tokio::test]
async fn test_modify_labels_requires_labels() {
    let transport = Arc::new(MockTransport::default());
    let service = service(&transport);
    let none: [&str; 0] = [];

    let err = service
        .batch_modify_labels(&["m0"], &none, &none)
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::InvalidRequest(_)));
    assert!(transport.single_calls().is_empty());
}

#[tokio::test]
async fn test_mutations_invalidate_cache() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir).await;
    let none: [&str; 0] = [];
    cache.set_message(USER, "m0", &json!({"id": "m0"})).await.unwrap();
    cache.set_message(USER, "m1", &json!({"id": "m1"})).await.unwrap();
    cache
        .set_list(USER, "is:unread", &none, &[json!("m0")])
        .await
        .unwrap();

    let transport = Arc::new(MockTransport::with_messages(ids("m", 2)));
    let service = service(&transport).with_cache(Arc::clone(&cache));

    service.batch_trash_messages(&["m0"]).await;

    let m0: Option<Value> = cache.get_message(USER, "m0", MessageView::Full).await.unwrap();
    let m1: Option<Value> = cache.get_message(USER, "m1", MessageView::Full).await.unwrap();
    let list: Option<Vec<Value>> = cache.get_list(USER, "is:unread", &none).await.unwrap();
    assert!(m0.is_none());
    assert!(m1.is_some());
    assert!(list.is_none());
}

#[tokio::test]
async fn test_resolve_ids_follows_pages_up_to_cap() {
    let transport = Arc::new(MockTransport::with_listing(ids("m", 250)));
    let service = service(&transport);

    let resolved = service.resolve_ids("label:work", 230).await.unwrap();

    assert_eq!(resolved.len(), 230);
    assert_eq!(resolved[229], "m229");
    let calls = transport.list_calls();
    let sizes: Vec<u32> = calls.iter().map(|(_, size, _)| *size).collect();
    assert_eq!(sizes, vec![100, 100, 30]);
    assert_eq!(calls[1].2.as_deref(), Some("100"));
    assert_eq!(service.quota().usage_snapshot(USER).daily_units, 15);
}

#[tokio::test]
async fn test_resolve_ids_stops_when_pages_run_out() {
    let transport = Arc::new(MockTransport::with_listing(ids("m", 30)));
    let service = service(&transport);

    let resolved = service.resolve_ids("", 500).await.unwrap();

    assert_eq!(resolved.len(), 30);
    assert_eq!(transport.list_calls().len(), 1);
}

#[tokio::test]
async fn test_mark_all_as_read() {
    let transport = Arc::new(MockTransport::with_listing(ids("m", 3)));
    let service = service(&transport);

    let result = service
        .mark_all_as_read(mailthrottle_mail::DEFAULT_UNREAD_QUERY, 500)
        .await
        .unwrap();

    assert_eq!(transport.list_calls()[0].0, "is:unread");
    assert_eq!(result.succeeded, 3);
    match &transport.single_calls()[0] {
        ApiRequest::BatchModify {
            add_label_ids,
            remove_label_ids,
            ..
        } => {
            assert!(add_label_ids.is_empty());
            assert_eq!(remove_label_ids, &["UNREAD"]);
        }
        other => panic!("unexpected request: {other:?}"),
    }
}

#[tokio::test]
async fn test_archive_all_scopes_to_inbox() {
    let transport = Arc::new(MockTransport::with_listing(ids("m", 2)));
    let service = service(&transport);

    service.archive_all("from:news@example.com", 500).await.unwrap();
    service.archive_all("", 500).await.unwrap();

    let queries: Vec<String> = transport.list_calls().into_iter().map(|c| c.0).collect();
    assert_eq!(queries, vec!["in:inbox from:news@example.com", "in:inbox"]);
    match &transport.single_calls()[0] {
        ApiRequest::BatchModify {
            remove_label_ids, ..
        } => assert_eq!(remove_label_ids, &["INBOX"]),
        other => panic!("unexpected request: {other:?}"),
    }
}

#[tokio::test]
async fn test_bulk_operation_with_no_matches() {
    let transport = Arc::new(MockTransport::default());
    let service = service(&transport);

    let result = service.mark_all_as_read("is:unread", 500).await.unwrap();

    assert_eq!(result.total, 0);
    assert!(transport.single_calls().is_empty());
}

#[tokio::test]
async fn test_resolution_failure_propagates() {
    let transport = Arc::new(MockTransport {
        list_failure: Some(RemoteError::with_status(403, "insufficient scope")),
        ..MockTransport::default()
    });
    let service = service(&transport);

    let err = service.archive_all("", 500).await.unwrap_err();

    assert!(matches!(err, ServiceError::Core(Error::FatalRemote(_))));
    assert!(transport.single_calls().is_empty());
}

#[tokio::test]
async fn test_progress_includes_cache_hits() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir).await;
    cache.set_message(USER, "m0", &json!({"id": "m0"})).await.unwrap();

    let transport = Arc::new(MockTransport::with_messages(ids("m", 5)));
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let service = service(&transport)
        .with_cache(cache)
        .with_chunk_size(2)
        .with_progress(move |done, total| sink.lock().unwrap().push((done, total)));

    service.batch_get_messages(&ids("m", 5), MessageFormat::Full).await;

    assert_eq!(*progress.lock().unwrap(), vec![(3, 5), (5, 5)]);
}

#[tokio::test]
async fn test_progress_reported_when_fully_cached() {
    let dir = TempDir::new().unwrap();
    let cache = open_cache(&dir).await;
    for id in ["m0", "m1"] {
        cache.set_message(USER, id, &json!({"id": id})).await.unwrap();
    }

    let transport = Arc::new(MockTransport::with_messages(ids("m", 2)));
    let progress = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&progress);
    let service = service(&transport)
        .with_cache(cache)
        .with_progress(move |done, total| sink.lock().unwrap().push((done, total)));

    let result = service.batch_get_messages(&ids("m", 2), MessageFormat::Full).await;

    assert_eq!(result.succeeded, 2);
    assert!(transport.batch_calls().is_empty());
    assert_eq!(*progress.lock().unwrap(), vec![(2, 2)]);
}
