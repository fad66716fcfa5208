//! REST requester.
//!
//! Every call to the GitLab REST API goes through [`Requester`]. A shared
//! semaphore caps in-flight calls across the whole export, and each call is
//! driven by the [`RetryPolicy`]. The permit is held across the full retry
//! cycle so throttled requests keep their slot.

use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;

use super::error::ApiError;
use crate::config::ConnectionInfo;
use crate::export::progress::ProgressCallback;
use crate::export::types::ExportOptions;
use crate::http::{
    HttpError, HttpHeaders, HttpMethod, HttpRequest, HttpResponse, HttpTransport, Params,
    build_url,
};
use crate::rate_limit::ApiRateLimiter;
use crate::retry::RetryPolicy;

/// Cursor of the next page. `None` once the last page was read.
pub type NextPage = Option<String>;

/// Response header carrying the next page number.
pub const NEXT_PAGE_HEADER: &str = "X-Next-Page";

/// Extract the next-page cursor from a response.
pub fn next_page(resp: &HttpResponse) -> NextPage {
    resp.header(NEXT_PAGE_HEADER)
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Decode a JSON body. Empty bodies (204) decode as `null`.
pub(crate) fn decode_body<T: DeserializeOwned>(resp: &HttpResponse) -> Result<T, ApiError> {
    let body = if resp.body.iter().all(u8::is_ascii_whitespace) {
        b"null".as_slice()
    } else {
        resp.body.as_slice()
    };
    Ok(serde_json::from_slice(body)?)
}

/// Concurrency-capped, retrying HTTP requester.
pub struct Requester {
    transport: Arc<dyn HttpTransport>,
    rest_root: String,
    headers: HttpHeaders,
    permits: Arc<Semaphore>,
    policy: RetryPolicy,
    limiter: Option<ApiRateLimiter>,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl std::fmt::Debug for Requester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Requester")
            .field("rest_root", &self.rest_root)
            .field("available_permits", &self.permits.available_permits())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl Requester {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        conn: &ConnectionInfo,
        options: &ExportOptions,
    ) -> Self {
        Self {
            transport,
            rest_root: conn.rest_root.clone(),
            headers: vec![
                ("Accept".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), conn.authorization.clone()),
            ],
            permits: Arc::new(Semaphore::new(options.concurrency.max(1))),
            policy: RetryPolicy::from_options(options),
            limiter: options.requests_per_second.map(ApiRateLimiter::new),
            on_progress: None,
        }
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Report retries and throttling through `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Option<Arc<ProgressCallback>>) -> Self {
        self.on_progress = callback;
        self
    }

    pub fn rest_root(&self) -> &str {
        &self.rest_root
    }

    /// Absolute URL for a REST path.
    pub fn url_for(&self, path: &str, params: &Params) -> Result<String, ApiError> {
        Ok(build_url(&self.rest_root, path, params)?)
    }

    /// GET a REST path and decode the body.
    pub async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &Params,
    ) -> Result<(T, NextPage), ApiError> {
        let url = self.url_for(path, params)?;
        let resp = self.send(HttpMethod::Get, path, url, Vec::new()).await?;
        Ok((decode_body(&resp)?, next_page(&resp)))
    }

    /// POST a JSON body to a REST path.
    pub async fn post<B, T>(&self, path: &str, params: &Params, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url_for(path, params)?;
        let resp = self
            .send(HttpMethod::Post, path, url, serde_json::to_vec(body)?)
            .await?;
        decode_body(&resp)
    }

    /// PUT a JSON body to a REST path.
    pub async fn put<B, T>(&self, path: &str, params: &Params, body: &B) -> Result<T, ApiError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.url_for(path, params)?;
        let resp = self
            .send(HttpMethod::Put, path, url, serde_json::to_vec(body)?)
            .await?;
        decode_body(&resp)
    }

    /// DELETE a REST path. The body is ignored.
    pub async fn delete(&self, path: &str, params: &Params) -> Result<(), ApiError> {
        let url = self.url_for(path, params)?;
        self.send(HttpMethod::Delete, path, url, Vec::new()).await?;
        Ok(())
    }

    /// Send one request to an absolute URL under the concurrency cap and retry policy.
    pub(crate) async fn send(
        &self,
        method: HttpMethod,
        endpoint: &str,
        url: String,
        body: Vec<u8>,
    ) -> Result<HttpResponse, ApiError> {
        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|_| HttpError::Transport("request semaphore closed".to_string()))?;

        tracing::debug!(method = method.as_str(), %url, "gitlab request");

        let mut headers = self.headers.clone();
        if !body.is_empty() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        let request = HttpRequest {
            method,
            url,
            headers,
            body,
        };

        self.policy
            .execute(
                endpoint,
                || {
                    let transport = Arc::clone(&self.transport);
                    let limiter = self.limiter.clone();
                    let request = request.clone();
                    async move {
                        if let Some(limiter) = limiter {
                            limiter.wait().await;
                        }
                        transport.send(request).await
                    }
                },
                self.on_progress.as_deref(),
            )
            .await
    }
}
