//! Request retry policy.
//!
//! One policy covers every REST and GraphQL call. Responses are sorted into
//! [`StatusClass`]es by a classifier function. Rate-limited responses sleep
//! for a fixed throttle window. Other transient failures back off
//! exponentially. Fail-fast responses are returned at once.

use std::future::Future;
use std::time::Duration;

use backon::{BackoffBuilder, ExponentialBuilder};

use crate::api::ApiError;
use crate::error::short_error_message;
use crate::export::progress::{ExportProgress, ProgressCallback, emit};
use crate::export::types::{
    ExportOptions, INITIAL_BACKOFF_MS, MAX_BACKOFF_MS, MAX_GENERAL_RETRIES, MAX_THROTTLED_RETRIES,
    THROTTLE_WAIT,
};
use crate::http::{HttpError, HttpResponse};

/// Configuration for the exponential part of a retry policy.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Minimum delay between retries.
    pub min_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Maximum number of retry attempts.
    pub max_retries: usize,
    /// Whether to add jitter to delays.
    pub with_jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            min_delay: Duration::from_millis(INITIAL_BACKOFF_MS),
            max_delay: Duration::from_millis(MAX_BACKOFF_MS),
            max_retries: MAX_GENERAL_RETRIES,
            with_jitter: true,
        }
    }
}

impl RetryConfig {
    /// Create a new retry configuration with custom values.
    #[must_use]
    pub fn new(min_delay: Duration, max_delay: Duration, max_retries: usize) -> Self {
        Self {
            min_delay,
            max_delay,
            max_retries,
            with_jitter: true,
        }
    }

    /// Set whether to use jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.with_jitter = jitter;
        self
    }

    /// Build an exponential backoff strategy from this configuration.
    #[must_use]
    pub fn into_backoff(self) -> ExponentialBuilder {
        let mut builder = ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_retries);

        if self.with_jitter {
            builder = builder.with_jitter();
        }

        builder
    }
}

/// How a response status should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Transient; retry with backoff.
    Retry,
    /// Throttled; sleep for the throttle window and retry.
    RateLimited,
    /// Retrying cannot help.
    FailFast,
}

/// Default GitLab status classification.
#[must_use]
pub fn classify_status(status: u16) -> StatusClass {
    match status {
        200 | 201 | 204 => StatusClass::Success,
        429 => StatusClass::RateLimited,
        403 => StatusClass::FailFast,
        _ => StatusClass::Retry,
    }
}

/// The retry policy shared by the REST and GraphQL requesters.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries for [`StatusClass::Retry`] responses and transport errors.
    pub max_retries: usize,
    /// Retries for [`StatusClass::RateLimited`] responses.
    pub max_throttled_retries: usize,
    /// Sleep after a rate-limited response.
    pub throttle_wait: Duration,
    /// Backoff between general retries.
    pub backoff: RetryConfig,
    /// Maps a status code to its class.
    pub classify: fn(u16) -> StatusClass,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_GENERAL_RETRIES,
            max_throttled_retries: MAX_THROTTLED_RETRIES,
            throttle_wait: THROTTLE_WAIT,
            backoff: RetryConfig::default(),
            classify: classify_status,
        }
    }
}

impl RetryPolicy {
    /// Policy carrying the retry tunables of an export run.
    #[must_use]
    pub fn from_options(options: &ExportOptions) -> Self {
        Self {
            max_retries: options.max_retries,
            max_throttled_retries: options.max_throttled_retries,
            throttle_wait: options.throttle_wait,
            backoff: RetryConfig {
                max_retries: options.max_retries,
                ..RetryConfig::default()
            },
            classify: classify_status,
        }
    }

    /// Run `send` until it yields a successful response or the policy gives up.
    ///
    /// `endpoint` is only used for logging and progress events.
    pub async fn execute<F, Fut>(
        &self,
        endpoint: &str,
        mut send: F,
        on_progress: Option<&ProgressCallback>,
    ) -> Result<HttpResponse, ApiError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<HttpResponse, HttpError>>,
    {
        let mut delays = self.backoff.clone().into_backoff().build();
        let mut retries = 0usize;
        let mut throttled = 0usize;

        loop {
            let err = match send().await {
                Ok(resp) => match (self.classify)(resp.status) {
                    StatusClass::Success => return Ok(resp),
                    StatusClass::FailFast => return Err(ApiError::from_response(&resp)),
                    StatusClass::RateLimited => {
                        if throttled >= self.max_throttled_retries {
                            return Err(ApiError::RateLimited {
                                attempts: throttled + 1,
                            });
                        }
                        throttled += 1;
                        tracing::warn!(
                            endpoint,
                            attempt = throttled,
                            wait = ?self.throttle_wait,
                            "api request throttled, sleeping before retry"
                        );
                        emit(
                            on_progress,
                            ExportProgress::RateLimitBackoff {
                                endpoint: endpoint.to_string(),
                                retry_after_ms: self.throttle_wait.as_millis() as u64,
                                attempt: throttled as u32,
                            },
                        );
                        tokio::time::sleep(self.throttle_wait).await;
                        continue;
                    }
                    StatusClass::Retry => ApiError::from_response(&resp),
                },
                Err(e) => ApiError::Http(e),
            };

            if err.is_permission_warning() {
                return Err(err);
            }
            if retries >= self.max_retries {
                return Err(ApiError::RetriesExhausted {
                    attempts: retries + 1,
                    last: Box::new(err),
                });
            }
            retries += 1;

            let delay = delays.next().unwrap_or(self.backoff.max_delay);
            tracing::warn!(
                endpoint,
                attempt = retries,
                delay = ?delay,
                "gitlab request failed, retrying: {}",
                short_error_message(&err)
            );
            emit(
                on_progress,
                ExportProgress::RequestRetry {
                    endpoint: endpoint.to_string(),
                    attempt: retries as u32,
                    error: short_error_message(&err),
                },
            );
            tokio::time::sleep(delay).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_retry_config_default() {
        let config = RetryConfig::default();

        assert_eq!(config.min_delay, Duration::from_millis(INITIAL_BACKOFF_MS));
        assert_eq!(config.max_delay, Duration::from_millis(MAX_BACKOFF_MS));
        assert_eq!(config.max_retries, MAX_GENERAL_RETRIES);
        assert!(config.with_jitter);
    }

    #[test]
    fn test_retry_config_custom() {
        let config = RetryConfig::new(Duration::from_secs(2), Duration::from_secs(30), 3)
            .with_jitter(false);

        assert_eq!(config.min_delay, Duration::from_secs(2));
        assert_eq!(config.max_delay, Duration::from_secs(30));
        assert_eq!(config.max_retries, 3);
        assert!(!config.with_jitter);
    }

    #[test]
    fn backoff_yields_max_retries_delays() {
        let delays: Vec<Duration> = RetryConfig::default()
            .with_jitter(false)
            .into_backoff()
            .build()
            .collect();
        assert_eq!(delays.len(), MAX_GENERAL_RETRIES);
        assert_eq!(delays[0], Duration::from_millis(INITIAL_BACKOFF_MS));
    }

    #[test]
    fn classify_status_matches_gitlab_semantics() {
        assert_eq!(classify_status(200), StatusClass::Success);
        assert_eq!(classify_status(201), StatusClass::Success);
        assert_eq!(classify_status(204), StatusClass::Success);
        assert_eq!(classify_status(429), StatusClass::RateLimited);
        assert_eq!(classify_status(403), StatusClass::FailFast);
        assert_eq!(classify_status(500), StatusClass::Retry);
        assert_eq!(classify_status(404), StatusClass::Retry);
        assert_eq!(classify_status(202), StatusClass::Retry);
    }

    fn scripted(
        statuses: &[u16],
    ) -> (
        Arc<AtomicU32>,
        impl FnMut() -> std::future::Ready<Result<HttpResponse, HttpError>>,
    ) {
        let calls = Arc::new(AtomicU32::new(0));
        let queue = Arc::new(Mutex::new(statuses.iter().copied().collect::<VecDeque<_>>()));
        let calls_capture = Arc::clone(&calls);
        let send = move || {
            calls_capture.fetch_add(1, Ordering::SeqCst);
            let status = queue.lock().unwrap().pop_front().unwrap_or(500);
            std::future::ready(Ok(HttpResponse {
                status,
                headers: Vec::new(),
                body: b"{}".to_vec(),
            }))
        };
        (calls, send)
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_requests_wait_and_then_succeed() {
        let (calls, send) = scripted(&[429, 429, 200]);
        let events: Arc<Mutex<Vec<ExportProgress>>> = Arc::new(Mutex::new(Vec::new()));
        let events_capture = Arc::clone(&events);
        let callback: ProgressCallback = Box::new(move |event| {
            events_capture.lock().unwrap().push(event);
        });

        let started = tokio::time::Instant::now();
        let resp = RetryPolicy::default()
            .execute("projects", send, Some(&callback))
            .await
            .unwrap();

        assert_eq!(resp.status, 200);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= THROTTLE_WAIT * 2);
        let events = events.lock().unwrap();
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ExportProgress::RateLimitBackoff { .. }))
                .count(),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn throttled_budget_is_bounded() {
        let (calls, send) = scripted(&[429, 429, 429, 429, 429]);
        let err = RetryPolicy::default()
            .execute("projects", send, None)
            .await
            .unwrap_err();

        assert!(err.is_rate_limited());
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn forbidden_fails_without_retry() {
        let (calls, send) = scripted(&[403, 200]);
        let err = RetryPolicy::default()
            .execute("user", send, None)
            .await
            .unwrap_err();

        assert!(err.is_fail_fast());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn general_failures_are_retried_then_exhausted() {
        let (calls, send) = scripted(&[500, 502, 503, 200]);
        let err = RetryPolicy::default()
            .execute("projects", send, None)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::RetriesExhausted { attempts: 3, .. }));
        assert!(err.to_string().contains("too many retries"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_errors_are_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let calls_capture = Arc::clone(&calls);
        let send = move || {
            let n = calls_capture.fetch_add(1, Ordering::SeqCst);
            std::future::ready(if n == 0 {
                Err(HttpError::Transport("connection reset".into()))
            } else {
                Ok(HttpResponse {
                    status: 204,
                    headers: Vec::new(),
                    body: Vec::new(),
                })
            })
        };

        let resp = RetryPolicy::default()
            .execute("hooks/1", send, None)
            .await
            .unwrap();
        assert_eq!(resp.status, 204);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn custom_classifier_is_honoured() {
        fn everything_fails_fast(_status: u16) -> StatusClass {
            StatusClass::FailFast
        }

        let (calls, send) = scripted(&[200]);
        let policy = RetryPolicy {
            classify: everything_fails_fast,
            ..RetryPolicy::default()
        };
        assert!(policy.execute("x", send, None).await.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn from_options_copies_tunables() {
        let options = ExportOptions {
            max_retries: 5,
            max_throttled_retries: 1,
            throttle_wait: Duration::from_secs(1),
            ..ExportOptions::default()
        };
        let policy = RetryPolicy::from_options(&options);
        assert_eq!(policy.max_retries, 5);
        assert_eq!(policy.backoff.max_retries, 5);
        assert_eq!(policy.max_throttled_retries, 1);
        assert_eq!(policy.throttle_wait, Duration::from_secs(1));
    }
}
