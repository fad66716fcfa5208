//! Progress reporting for exports.
//!
//! Events are turned into structured `tracing` records on stderr, leaving
//! stdout free for NDJSON output. Counters feed the summary printed at the end.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use gitlab_export::{ExportProgress, ProgressCallback};

/// Logging reporter using tracing for structured output.
#[derive(Debug, Default)]
pub struct LoggingReporter {
    pages: AtomicUsize,
    warnings: AtomicUsize,
    retries: AtomicUsize,
}

impl LoggingReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages.load(Ordering::Relaxed)
    }

    pub fn warnings(&self) -> usize {
        self.warnings.load(Ordering::Relaxed)
    }

    /// Rate-limit waits and transient retries so far.
    pub fn retries(&self) -> usize {
        self.retries.load(Ordering::Relaxed)
    }

    /// Wrap the reporter in a callback for the library.
    pub fn as_callback(self: &Arc<Self>) -> Arc<ProgressCallback> {
        let reporter = Arc::clone(self);
        Arc::new(Box::new(move |event| reporter.handle(event)))
    }

    pub fn handle(&self, event: ExportProgress) {
        match event {
            ExportProgress::ExportStarted {
                historical,
                integration_type,
            } => {
                tracing::info!(historical, integration_type = %integration_type, "Export started");
            }

            ExportProgress::NamespacesResolved { count } => {
                tracing::info!(count, "Resolved namespaces");
            }

            ExportProgress::ExportingNamespace { namespace } => {
                tracing::info!(namespace = %namespace, "Exporting namespace");
            }

            ExportProgress::ExportingRepo { repo } => {
                tracing::debug!(repo = %repo, "Exporting repository");
            }

            ExportProgress::RepoSkipped { repo, reason } => {
                tracing::info!(repo = %repo, reason = %reason, "Skipped repository");
            }

            ExportProgress::FetchedPage {
                entity,
                scope,
                page,
                count,
            } => {
                self.pages.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(entity = %entity, scope = %scope, page = %page, count, "Fetched page");
            }

            ExportProgress::FutureQueued {
                entity,
                scope,
                next_page,
            } => {
                tracing::debug!(entity = %entity, scope = %scope, next_page = %next_page, "Queued continuation");
            }

            ExportProgress::ContinuationsStarted { count } => {
                tracing::info!(count, "Processing continuations");
            }

            ExportProgress::Warning { message } => {
                self.warnings.fetch_add(1, Ordering::Relaxed);
                tracing::warn!("{message}");
            }

            ExportProgress::RateLimitBackoff {
                endpoint,
                retry_after_ms,
                attempt,
            } => {
                self.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(endpoint = %endpoint, retry_after_ms, attempt, "Rate limited, backing off");
            }

            ExportProgress::RequestRetry {
                endpoint,
                attempt,
                error,
            } => {
                self.retries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(endpoint = %endpoint, attempt, error = %error, "Retrying request");
            }

            ExportProgress::ExportComplete { written, warnings } => {
                tracing::info!(written, warnings, "Export complete");
            }

            _ => {
                tracing::trace!(?event, "Unhandled progress event");
            }
        }
    }
}
