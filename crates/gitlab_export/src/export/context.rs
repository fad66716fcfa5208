//! Shared state of one export run.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::checkpoint::ProcessedRepos;
use super::progress::{ExportProgress, ProgressCallback, emit};
use super::rules::RepoRules;
use super::types::{GITLAB_DATE_TIME_FORMAT, IntegrationType};
use crate::api::{ApiError, GitLabClient, Page, PageInfo, paginate};
use crate::api::types::{Namespace, Project, User};
use crate::changelog::Usernames;
use crate::convert::Tenant;
use crate::error::Result;
use crate::http::Params;
use crate::sdk::{Entity, Pipe, State};
use crate::work_manager::WorkManager;

/// A namespace whose projects are exported.
#[derive(Debug, Clone)]
pub struct NamespaceTarget {
    pub id: String,
    pub full_path: String,
    pub is_group: bool,
}

impl From<&Namespace> for NamespaceTarget {
    fn from(ns: &Namespace) -> Self {
        Self {
            id: ns.id.to_string(),
            full_path: ns.full_path.clone(),
            is_group: ns.is_group(),
        }
    }
}

/// A project that passed the repo rules.
#[derive(Debug, Clone)]
pub struct RepoTarget {
    pub namespace: Arc<NamespaceTarget>,
    pub project: Project,
}

impl RepoTarget {
    pub fn ref_id(&self) -> String {
        self.project.id.to_string()
    }

    pub fn full_name(&self) -> &str {
        &self.project.path_with_namespace
    }
}

/// Remaining pages of an entity stream, fetched after the first pass.
#[derive(Debug, Clone)]
pub enum Continuation {
    PullRequests {
        repo: RepoTarget,
        next_page: String,
    },
    Issues {
        project: RepoTarget,
        next_page: String,
    },
}

/// Everything an export stage needs, shared behind an `Arc`.
pub struct ExportContext {
    pub client: GitLabClient,
    pub tenant: Tenant,
    pub pipe: Arc<dyn Pipe>,
    pub state: Arc<dyn State>,
    pub rules: RepoRules,
    /// Configured account IDs or paths. `None` exports every namespace.
    pub accounts: Option<Vec<String>>,
    pub integration_type: IntegrationType,
    /// Last export date. `None` for a historical export.
    pub since: Option<DateTime<Utc>>,
    pub started: DateTime<Utc>,
    pub per_page: u32,
    pub concurrency: usize,
    pub on_progress: Option<Arc<ProgressCallback>>,
    pub work_manager: Arc<WorkManager>,
    pub processed: ProcessedRepos,
    continuations: Mutex<Vec<Continuation>>,
    namespaces: Mutex<Vec<Arc<NamespaceTarget>>>,
    exported: Mutex<Vec<RepoTarget>>,
    written: AtomicUsize,
    skipped: AtomicUsize,
    warnings: Mutex<Vec<String>>,
    incomplete: AtomicBool,
    cancelled: AtomicBool,
    usernames: Mutex<Usernames>,
}

pub struct ExportContextParts {
    pub client: GitLabClient,
    pub tenant: Tenant,
    pub pipe: Arc<dyn Pipe>,
    pub state: Arc<dyn State>,
    pub rules: RepoRules,
    pub accounts: Option<Vec<String>>,
    pub integration_type: IntegrationType,
    pub since: Option<DateTime<Utc>>,
    pub per_page: u32,
    pub concurrency: usize,
    pub on_progress: Option<Arc<ProgressCallback>>,
    pub work_manager: Arc<WorkManager>,
}

impl ExportContext {
    pub fn new(parts: ExportContextParts) -> Self {
        Self {
            client: parts.client,
            tenant: parts.tenant,
            pipe: parts.pipe,
            state: parts.state,
            rules: parts.rules,
            accounts: parts.accounts,
            integration_type: parts.integration_type,
            since: parts.since,
            started: Utc::now(),
            per_page: parts.per_page,
            concurrency: parts.concurrency.max(1),
            on_progress: parts.on_progress,
            work_manager: parts.work_manager,
            processed: ProcessedRepos::new(),
            continuations: Mutex::new(Vec::new()),
            namespaces: Mutex::new(Vec::new()),
            exported: Mutex::new(Vec::new()),
            written: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            warnings: Mutex::new(Vec::new()),
            incomplete: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            usernames: Mutex::new(Usernames::new()),
        }
    }

    pub fn customer_id(&self) -> &str {
        &self.tenant.customer_id
    }

    pub fn progress(&self) -> Option<&ProgressCallback> {
        self.on_progress.as_deref()
    }

    pub fn emit(&self, event: ExportProgress) {
        emit(self.progress(), event);
    }

    pub async fn write(&self, entity: impl Into<Entity>) -> Result<()> {
        self.pipe.write(entity.into()).await?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Log a problem that does not stop the export.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("{message}");
        self.emit(ExportProgress::Warning {
            message: message.clone(),
        });
        self.warnings.lock().push(message);
    }

    pub fn skip(&self, repo: &str, reason: impl Into<String>) {
        self.skipped.fetch_add(1, Ordering::Relaxed);
        self.emit(ExportProgress::RepoSkipped {
            repo: repo.to_string(),
            reason: reason.into(),
        });
    }

    /// `updated_after` bound for incremental list calls.
    pub fn updated_after(&self) -> Option<String> {
        self.since
            .map(|since| since.format(GITLAB_DATE_TIME_FORMAT).to_string())
    }

    /// Base parameters of an incremental list call.
    pub fn incremental_params(&self) -> Params {
        let mut params = Params::new();
        params.insert("per_page".into(), self.per_page.to_string());
        if let Some(after) = self.updated_after() {
            params.insert("updated_after".into(), after);
        }
        params
    }

    pub fn queue(&self, continuation: Continuation) {
        let (entity, scope, next_page) = match &continuation {
            Continuation::PullRequests { repo, next_page } => {
                ("pull requests", repo.full_name(), next_page)
            }
            Continuation::Issues { project, next_page } => {
                ("issues", project.full_name(), next_page)
            }
        };
        self.emit(ExportProgress::FutureQueued {
            entity: entity.to_string(),
            scope: scope.to_string(),
            next_page: next_page.clone(),
        });
        self.continuations.lock().push(continuation);
    }

    pub fn take_continuations(&self) -> Vec<Continuation> {
        std::mem::take(&mut *self.continuations.lock())
    }

    pub fn record_namespace(&self, namespace: Arc<NamespaceTarget>) {
        self.namespaces.lock().push(namespace);
    }

    pub fn namespaces(&self) -> Vec<Arc<NamespaceTarget>> {
        self.namespaces.lock().clone()
    }

    pub fn record_exported(&self, target: RepoTarget) {
        self.exported.lock().push(target);
    }

    pub fn exported(&self) -> Vec<RepoTarget> {
        self.exported.lock().clone()
    }

    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    pub fn skipped(&self) -> usize {
        self.skipped.load(Ordering::Relaxed)
    }

    pub fn warnings(&self) -> Vec<String> {
        self.warnings.lock().clone()
    }

    /// Record that a namespace listing failed, so the run did not see every
    /// repo it should have.
    pub fn mark_incomplete(&self) {
        self.incomplete.store(true, Ordering::Relaxed);
    }

    pub fn is_complete(&self) -> bool {
        !self.incomplete.load(Ordering::Relaxed)
    }

    /// Ask every pipeline stage to stop at its next checkpoint.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }

    /// Remember usernames for resolving `@mentions` in issue notes.
    pub fn record_usernames(&self, users: &[User]) {
        let mut usernames = self.usernames.lock();
        for user in users.iter().filter(|u| !u.username.is_empty()) {
            usernames.insert(user.username.clone(), user.id.to_string());
        }
    }

    pub fn usernames(&self) -> Usernames {
        self.usernames.lock().clone()
    }
}

/// Fetch every page of a list endpoint into memory.
pub async fn fetch_all<T, F, Fut>(per_page: u32, mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(Params) -> Fut,
    Fut: Future<Output = std::result::Result<Page<T>, ApiError>>,
{
    let collected = Mutex::new(Vec::new());
    paginate(per_page, |params| {
        let page = fetch(params);
        let collected = &collected;
        async move {
            let (items, next) = page.await?;
            let count = items.len();
            collected.lock().extend(items);
            Ok(PageInfo::new(next, count))
        }
    })
    .await?;
    Ok(collected.into_inner())
}
