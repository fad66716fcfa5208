//! Export orchestration.
//!
//! An export runs in four phases:
//!
//! 1. Merge request pages left over by a failed previous run are resumed.
//! 2. The [`pipeline`] walks namespaces and repos. For each repo it writes the
//!    repo or project and the first page of its merge requests or issues;
//!    longer streams are queued as continuations.
//! 3. After a pipe flush the continuations fetch the remaining pages. Any
//!    error here aborts the export; a failed merge request stream is saved so
//!    the next run resumes it.
//! 4. WORK exports assemble boards and sprints from the work manager, then
//!    checkpoints are written.
//!
//! # Modules
//!
//! - [`types`] - Tunables, constants and result types
//! - [`progress`] - Progress events
//! - [`checkpoint`] - State kept between runs
//! - [`rules`] - Repo include/exclude rules
//! - [`pipeline`] - Namespace, repo and consumer stages
//! - [`source_code`] - SOURCECODE entities
//! - [`work`] - WORK entities

pub mod checkpoint;
pub mod context;
pub mod pipeline;
pub mod progress;
pub mod rules;
pub mod source_code;
pub mod types;
pub mod work;

use std::sync::Arc;

use tracing::Instrument;
use uuid::Uuid;

pub use checkpoint::{ProcessedRepos, RemainingPrPages, RemainingPrPagesStore};
pub use context::{Continuation, ExportContext, ExportContextParts, NamespaceTarget, RepoTarget};
pub use progress::{ExportProgress, ProgressCallback};
pub use rules::{RepoRules, SkipReason};
pub use types::{ExportOptions, ExportResult, IntegrationType};

use crate::api::GitLabClient;
use crate::config::IntegrationConfig;
use crate::convert::Tenant;
use crate::error::Result;
use crate::sdk::{Pipe, State};
use crate::work_manager::WorkManager;

/// Runs SOURCECODE or WORK exports for one integration instance.
pub struct Exporter {
    client: GitLabClient,
    tenant: Tenant,
    config: IntegrationConfig,
    options: ExportOptions,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl Exporter {
    pub fn new(
        client: GitLabClient,
        tenant: Tenant,
        config: IntegrationConfig,
        options: ExportOptions,
    ) -> Self {
        Self {
            client,
            tenant,
            config,
            options,
            on_progress: None,
        }
    }

    pub fn with_progress(mut self, callback: Option<Arc<ProgressCallback>>) -> Self {
        self.on_progress = callback;
        self
    }

    fn accounts(&self) -> Option<Vec<String>> {
        self.config.accounts.as_ref().map(|accounts| {
            accounts
                .iter()
                .flat_map(|(key, account)| [key.clone(), account.id.clone()])
                .collect()
        })
    }

    /// Export everything changed since the last successful export.
    pub async fn export(&self, pipe: Arc<dyn Pipe>, state: Arc<dyn State>) -> Result<ExportResult> {
        let export_id = Uuid::new_v4();
        let span = tracing::info_span!(
            "export",
            id = %export_id,
            integration_type = self.config.integration_type.as_str()
        );
        self.run(pipe, state).instrument(span).await
    }

    async fn run(&self, pipe: Arc<dyn Pipe>, state: Arc<dyn State>) -> Result<ExportResult> {
        let since = checkpoint::load_last_export_date(state.as_ref(), self.options.historical).await?;
        let integration_type = self.config.integration_type;
        tracing::info!(
            historical = since.is_none(),
            since = ?since,
            "starting export"
        );
        progress::emit(
            self.on_progress.as_deref(),
            ExportProgress::ExportStarted {
                historical: since.is_none(),
                integration_type: integration_type.as_str().to_string(),
            },
        );

        let work_manager = Arc::new(WorkManager::new());
        if integration_type == IntegrationType::Work && since.is_some() {
            // Incremental runs only see changed issues; boards need the rest.
            work_manager.restore(state.as_ref()).await?;
        }

        let ctx = Arc::new(ExportContext::new(ExportContextParts {
            client: self.client.clone(),
            tenant: self.tenant.clone(),
            pipe: Arc::clone(&pipe),
            state: Arc::clone(&state),
            rules: RepoRules::new(
                self.config.inclusions.clone(),
                self.config.exclusions.clone(),
            ),
            accounts: self.accounts(),
            integration_type,
            since,
            per_page: self.options.per_page,
            concurrency: self.options.concurrency,
            on_progress: self.on_progress.clone(),
            work_manager: Arc::clone(&work_manager),
        }));

        let store = RemainingPrPagesStore::new(state.as_ref());
        if integration_type == IntegrationType::SourceCode {
            source_code::resume_remaining_pages(&ctx, &store).await?;
            if !ctx.client.is_cloud() {
                source_code::export_users(&ctx).await?;
            }
        }

        pipeline::run(Arc::clone(&ctx)).await?;
        pipe.flush().await?;

        let continuations = ctx.take_continuations();
        if !continuations.is_empty() {
            tracing::info!(count = continuations.len(), "running continuations");
            ctx.emit(ExportProgress::ContinuationsStarted {
                count: continuations.len(),
            });
        }
        let updated_after = ctx.updated_after();
        for continuation in continuations {
            match continuation {
                Continuation::PullRequests { repo, next_page } => {
                    source_code::continue_pull_requests(
                        &ctx,
                        &store,
                        &repo,
                        &next_page,
                        updated_after.as_deref(),
                    )
                    .await?
                }
                Continuation::Issues { project, next_page } => {
                    work::continue_issues(&ctx, &project, &next_page).await?
                }
            }
        }

        if integration_type == IntegrationType::Work {
            work::export_agile(&ctx).await?;
            work_manager.persist(state.as_ref()).await?;
        }

        // A namespace that failed to list may still hold live repos.
        let deactivate_missing = since.is_none() && ctx.is_complete();
        if since.is_none() && !deactivate_missing {
            tracing::warn!("some namespaces failed to list, not deactivating missing repos");
        }
        let deactivated = ctx
            .processed
            .persist(state.as_ref(), pipe.as_ref(), deactivate_missing)
            .await?;
        if deactivated > 0 {
            tracing::info!(count = deactivated, "deactivated repos no longer visible");
        }
        checkpoint::save_last_export_date(state.as_ref(), ctx.started).await?;
        pipe.flush().await?;

        let result = ExportResult {
            namespaces: ctx.namespaces().len(),
            repos: ctx.exported().len(),
            skipped: ctx.skipped(),
            written: ctx.written(),
            errors: ctx.warnings(),
        };
        tracing::info!(
            namespaces = result.namespaces,
            repos = result.repos,
            skipped = result.skipped,
            written = result.written,
            errors = result.errors.len(),
            "export complete"
        );
        ctx.emit(ExportProgress::ExportComplete {
            written: result.written,
            warnings: result.errors.len(),
        });
        Ok(result)
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::api::Requester;
    use crate::api::types::Project;
    use crate::config::ConnectionInfo;
    use crate::http::MockTransport;
    use crate::sdk::{MemoryPipe, MemoryState};
    use chrono::{DateTime, Utc};
    use serde_json::json;

    pub fn client(mock: &MockTransport) -> GitLabClient {
        let conn = ConnectionInfo::new("https://gitlab.com", "bearer tok").unwrap();
        let requester = Requester::new(Arc::new(mock.clone()), &conn, &ExportOptions::default());
        GitLabClient::new(Arc::new(requester), &conn)
    }

    pub fn context_with(
        mock: &MockTransport,
        state: MemoryState,
        configure: impl FnOnce(&mut ExportContextParts),
    ) -> (ExportContext, Arc<MemoryPipe>) {
        let pipe = Arc::new(MemoryPipe::new());
        let mut parts = ExportContextParts {
            client: client(mock),
            tenant: Tenant::new("cust", Some("inst".into())),
            pipe: pipe.clone(),
            state: Arc::new(state),
            rules: RepoRules::default(),
            accounts: None,
            integration_type: IntegrationType::SourceCode,
            since: None,
            per_page: 100,
            concurrency: 1,
            on_progress: None,
            work_manager: Arc::new(WorkManager::new()),
        };
        configure(&mut parts);
        (ExportContext::new(parts), pipe)
    }

    pub fn context(
        mock: &MockTransport,
        state: MemoryState,
        since: Option<DateTime<Utc>>,
    ) -> (ExportContext, Arc<MemoryPipe>) {
        context_with(mock, state, |parts| parts.since = since)
    }

    pub fn project_json(id: i64, name: &str) -> Project {
        serde_json::from_value(json!({
            "id": id, "name": name, "path_with_namespace": format!("acme/{name}"),
            "web_url": format!("https://gitlab.com/acme/{name}"),
            "created_at": "2024-01-01T00:00:00Z", "last_activity_at": "2024-02-01T00:00:00Z",
            "namespace": { "id": 9, "full_path": "acme", "kind": "group" }
        }))
        .unwrap()
    }

    pub fn target(project: Project) -> RepoTarget {
        RepoTarget {
            namespace: Arc::new(NamespaceTarget {
                id: "9".into(),
                full_path: "acme".into(),
                is_group: true,
            }),
            project,
        }
    }
}
