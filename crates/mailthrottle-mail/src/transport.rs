//! Transport boundary.
//!
//! The wire protocol, authentication and token refresh live behind
//! [`MailTransport`]. Implementations only move requests and responses;
//! quota, retries and caching are applied by [`crate::MailService`].

use std::future::Future;

use mailthrottle_core::RemoteError;
use mailthrottle_core::batch::{SubOutcome, SubRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::request::ApiRequest;

/// One page of a message listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListPage {
    /// Message ids on this page.
    pub ids: Vec<String>,
    /// Token for the next page, absent on the last one.
    pub next_page_token: Option<String>,
}

/// Executes remote API calls on behalf of an identity.
pub trait MailTransport: Send + Sync {
    /// Sends up to 50 sub-requests as one batch call.
    ///
    /// Returns one outcome per sub-request the remote answered. An `Err`
    /// means the batch call itself failed and no sub-request completed.
    fn execute_batch(
        &self,
        identity: &str,
        requests: Vec<SubRequest<ApiRequest>>,
    ) -> impl Future<Output = Result<Vec<SubOutcome<Value>>, RemoteError>> + Send;

    /// Sends a single request.
    fn execute(
        &self,
        identity: &str,
        request: ApiRequest,
    ) -> impl Future<Output = Result<Value, RemoteError>> + Send;

    /// Lists message ids matching `query`.
    fn list_messages(
        &self,
        identity: &str,
        query: &str,
        max_results: u32,
        page_token: Option<&str>,
    ) -> impl Future<Output = Result<ListPage, RemoteError>> + Send;
}
