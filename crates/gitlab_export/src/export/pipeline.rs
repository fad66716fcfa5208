//! Three-stage export pipeline.
//!
//! ```text
//! namespace producer -> ns channel -> repo producer -> repo channel -> repo consumers
//! ```
//!
//! Every stage runs in one [`JoinSet`]. A failing stage reports on an error
//! channel with one slot per task, so no send ever blocks, and cancels the
//! context so the other stages stop before their next namespace or repo.
//! When a stage stops its channel closes and the stages downstream drain and
//! finish. After every task has joined, the first reported error is returned
//! and the rest are logged.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinSet;

use super::context::{ExportContext, NamespaceTarget, RepoTarget};
use super::progress::ExportProgress;
use super::source_code;
use super::types::{IntegrationType, PIPELINE_CHANNEL_CAPACITY};
use super::work;
use crate::api::types::{Namespace, Project};
use crate::api::{Page, PageInfo, paginate, paginate_newer_than};
use crate::error::{ExportError, Result};

/// Top-level namespaces to export, restricted to the configured accounts.
pub async fn resolve_namespaces(ctx: &ExportContext) -> Result<Vec<Namespace>> {
    let collected = Mutex::new(Vec::new());
    paginate(ctx.per_page, |params| {
        let collected = &collected;
        async move {
            let (namespaces, next) = ctx.client.namespaces(&params).await?;
            let count = namespaces.len();
            collected.lock().extend(namespaces);
            Ok(PageInfo::new(next, count))
        }
    })
    .await?;

    let accounts = ctx.accounts.as_deref();
    Ok(collected
        .into_inner()
        .into_iter()
        .filter(|ns| {
            if !ns.is_top_level() {
                tracing::debug!(namespace = %ns.full_path, "skipping subgroup");
                return false;
            }
            accounts.is_none_or(|accounts| {
                accounts
                    .iter()
                    .any(|a| *a == ns.id.to_string() || *a == ns.full_path)
            })
        })
        .collect())
}

async fn namespace_producer(
    ctx: Arc<ExportContext>,
    tx: mpsc::Sender<Arc<NamespaceTarget>>,
) -> Result<()> {
    let namespaces = resolve_namespaces(&ctx).await?;
    ctx.emit(ExportProgress::NamespacesResolved {
        count: namespaces.len(),
    });
    for ns in &namespaces {
        if ctx.is_cancelled() {
            tracing::debug!("export cancelled, not sending more namespaces");
            break;
        }
        if tx.send(Arc::new(NamespaceTarget::from(ns))).await.is_err() {
            tracing::debug!("namespace channel closed, stopping");
            break;
        }
    }
    Ok(())
}

/// One page of a namespace's projects, forwarding the ones that pass the rules.
async fn forward_projects(
    ctx: &ExportContext,
    namespace: &Arc<NamespaceTarget>,
    page: Page<Project>,
    stop: Option<DateTime<Utc>>,
    tx: &mpsc::Sender<RepoTarget>,
    closed: &AtomicBool,
) -> PageInfo {
    let (projects, next) = page;
    let count = projects.len();
    for project in projects {
        if ctx.is_cancelled() {
            return PageInfo::stop(count);
        }
        if let Some(stop) = stop
            && project.last_activity_at < stop
        {
            tracing::debug!(namespace = %namespace.full_path, "reached projects older than the last export");
            return PageInfo::stop(count);
        }
        if let Some(reason) = ctx.rules.include(&namespace.id, &project) {
            ctx.skip(&project.path_with_namespace, reason.as_str());
            continue;
        }
        let target = RepoTarget {
            namespace: Arc::clone(namespace),
            project,
        };
        if tx.send(target).await.is_err() {
            closed.store(true, Ordering::Relaxed);
            return PageInfo::stop(count);
        }
    }
    PageInfo::new(next, count)
}

async fn repo_producer(
    ctx: Arc<ExportContext>,
    mut rx: mpsc::Receiver<Arc<NamespaceTarget>>,
    tx: mpsc::Sender<RepoTarget>,
) -> Result<()> {
    let closed = AtomicBool::new(false);
    while let Some(namespace) = rx.recv().await {
        if ctx.is_cancelled() {
            tracing::debug!("export cancelled, not listing more namespaces");
            return Ok(());
        }
        ctx.record_namespace(Arc::clone(&namespace));
        ctx.emit(ExportProgress::ExportingNamespace {
            namespace: namespace.full_path.clone(),
        });
        tracing::info!(namespace = %namespace.full_path, "exporting namespace");

        let listed = paginate_newer_than(ctx.since, |params, stop| {
            let (ctx, namespace, tx, closed) = (&ctx, &namespace, &tx, &closed);
            async move {
                let page = if namespace.is_group {
                    ctx.client.group_projects(&namespace.id, &params).await?
                } else {
                    ctx.client.user_projects(&namespace.full_path, &params).await?
                };
                Ok(forward_projects(ctx, namespace, page, stop, tx, closed).await)
            }
        })
        .await;

        if closed.load(Ordering::Relaxed) {
            tracing::debug!("repo channel closed, stopping");
            return Ok(());
        }
        if let Err(e) = listed {
            if is_fatal(&e) {
                return Err(e);
            }
            ctx.mark_incomplete();
            ctx.warn(format!(
                "error exporting namespace {}: {e}",
                namespace.full_path
            ));
        }
    }
    Ok(())
}

/// Errors that end the export instead of skipping one repo or namespace.
pub(crate) fn is_fatal(e: &ExportError) -> bool {
    matches!(
        e,
        ExportError::Pipe(_) | ExportError::State(_) | ExportError::Internal { .. }
    )
}

async fn repo_consumer(
    ctx: Arc<ExportContext>,
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<RepoTarget>>>,
) -> Result<()> {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(target) = next else {
            return Ok(());
        };
        if ctx.is_cancelled() {
            tracing::debug!(repo = %target.full_name(), "export cancelled, dropping repo");
            return Ok(());
        }
        ctx.emit(ExportProgress::ExportingRepo {
            repo: target.full_name().to_string(),
        });
        tracing::info!(repo = %target.full_name(), "exporting repo");

        let exported = match ctx.integration_type {
            IntegrationType::SourceCode => source_code::export_repo(&ctx, &target).await,
            IntegrationType::Work => work::export_project(&ctx, &target).await,
        };
        if let Err(e) = exported {
            if is_fatal(&e) {
                return Err(e);
            }
            ctx.warn(format!("error exporting repo {}: {e}", target.full_name()));
        }
    }
}

/// Run the pipeline to completion.
pub async fn run(ctx: Arc<ExportContext>) -> Result<()> {
    let (ns_tx, ns_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
    let (repo_tx, repo_rx) = mpsc::channel(PIPELINE_CHANNEL_CAPACITY);
    let repo_rx = Arc::new(tokio::sync::Mutex::new(repo_rx));

    let consumers = ctx.concurrency;
    let tasks_count = 2 + consumers;
    let (err_tx, mut err_rx) = mpsc::channel::<ExportError>(tasks_count);

    let mut tasks = JoinSet::new();
    let spawn_stage = |tasks: &mut JoinSet<()>,
                       stage: std::pin::Pin<Box<dyn Future<Output = Result<()>> + Send>>| {
        let err_tx = err_tx.clone();
        let ctx = Arc::clone(&ctx);
        tasks.spawn(async move {
            if let Err(e) = stage.await {
                ctx.cancel();
                // One slot per task; this never waits.
                let _ = err_tx.send(e).await;
            }
        });
    };

    spawn_stage(
        &mut tasks,
        Box::pin(namespace_producer(Arc::clone(&ctx), ns_tx)),
    );
    spawn_stage(
        &mut tasks,
        Box::pin(repo_producer(Arc::clone(&ctx), ns_rx, repo_tx)),
    );
    for _ in 0..consumers {
        spawn_stage(
            &mut tasks,
            Box::pin(repo_consumer(Arc::clone(&ctx), Arc::clone(&repo_rx))),
        );
    }
    drop(err_tx);
    // Only consumers hold the receiver, so a producer's send fails once they
    // have all stopped.
    drop(repo_rx);

    let mut first: Option<ExportError> = None;
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            first.get_or_insert(ExportError::internal(format!(
                "export task failed: {e}"
            )));
        }
    }
    while let Ok(e) = err_rx.try_recv() {
        match first {
            None => first = Some(e),
            Some(_) => tracing::error!(error = %e, "additional export stage error"),
        }
    }
    match first {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
