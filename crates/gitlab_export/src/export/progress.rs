//! Progress reporting types for export operations.
//!
//! The library never prints. Callers that want visibility into a long export
//! pass a [`ProgressCallback`] and render the events however they like.

/// Progress events emitted during an export.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub enum ExportProgress {
    /// Export began.
    ExportStarted {
        /// Whether this is a full (non-incremental) export.
        historical: bool,
        /// `SOURCECODE` or `WORK`.
        integration_type: String,
    },

    /// Namespaces (groups and users) to export were resolved.
    NamespacesResolved {
        /// Number of namespaces.
        count: usize,
    },

    /// Starting to export one namespace.
    ExportingNamespace {
        /// Namespace full path.
        namespace: String,
    },

    /// Starting to export one repository or project.
    ExportingRepo {
        /// Repository full path.
        repo: String,
    },

    /// A repository was left out of the export.
    RepoSkipped {
        /// Repository full path.
        repo: String,
        /// Why it was skipped.
        reason: String,
    },

    /// Fetched one page of some entity.
    FetchedPage {
        /// Entity kind, e.g. "pull requests".
        entity: String,
        /// Repository or project the page belongs to.
        scope: String,
        /// Cursor used for this page.
        page: String,
        /// Number of records on the page.
        count: usize,
    },

    /// A continuation was recorded for a later pass.
    FutureQueued {
        /// Entity kind.
        entity: String,
        /// Repository or project.
        scope: String,
        /// Cursor the continuation will resume from.
        next_page: String,
    },

    /// Continuation passes started.
    ContinuationsStarted {
        /// Number of queued continuations.
        count: usize,
    },

    /// Non-fatal problem; the export carries on.
    Warning {
        /// Human-readable message.
        message: String,
    },

    /// Rate limited, sleeping before retrying.
    RateLimitBackoff {
        /// Request path.
        endpoint: String,
        /// How long we will wait in milliseconds.
        retry_after_ms: u64,
        /// Throttled attempt number (1-indexed).
        attempt: u32,
    },

    /// A request failed transiently and will be retried.
    RequestRetry {
        /// Request path.
        endpoint: String,
        /// Retry attempt number (1-indexed).
        attempt: u32,
        /// Short error message.
        error: String,
    },

    /// Export finished.
    ExportComplete {
        /// Records written to the pipe.
        written: usize,
        /// Non-fatal errors logged along the way.
        warnings: usize,
    },
}

/// Type alias for progress callback functions.
pub type ProgressCallback = Box<dyn Fn(ExportProgress) + Send + Sync>;

/// Emit a progress event if a callback is provided.
#[inline]
pub fn emit(on_progress: Option<&ProgressCallback>, event: ExportProgress) {
    if let Some(cb) = on_progress {
        cb(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn emit_calls_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let callback: ProgressCallback = Box::new(move |_event| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        emit(Some(&callback), ExportProgress::ContinuationsStarted { count: 2 });
        emit(
            Some(&callback),
            ExportProgress::Warning {
                message: "skipped".into(),
            },
        );

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn emit_without_callback_is_a_no_op() {
        emit(None, ExportProgress::NamespacesResolved { count: 1 });
    }
}
