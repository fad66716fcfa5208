//! SOURCECODE export: repos, merge requests and their commits, reviews and
//! comments, and users.

use std::sync::Arc;

use futures::stream::{self, StreamExt, TryStreamExt};

use super::checkpoint::{RemainingPrPages, RemainingPrPagesStore};
use super::context::{Continuation, ExportContext, NamespaceTarget, RepoTarget, fetch_all};
use super::pipeline::is_fatal;
use super::progress::ExportProgress;
use crate::api::types::MergeRequest;
use crate::api::{GitLabClient, PageInfo, paginate, paginate_start_at};
use crate::convert::{self, Tenant};
use crate::error::Result;
use crate::http::Params;
use crate::sdk::{RepoAffiliation, SourceCodePullRequest, SourceCodePullRequestCommit};

/// Every user of a self-managed server.
pub async fn export_users(ctx: &ExportContext) -> Result<()> {
    paginate(ctx.per_page, |params| async move {
        let (users, next) = ctx.client.users(&params).await?;
        for user in &users {
            ctx.write(convert::source_code_user(&ctx.tenant, user, true))
                .await?;
        }
        Ok(PageInfo::new(next, users.len()))
    })
    .await?;
    Ok(())
}

async fn export_repo_users(ctx: &ExportContext, target: &RepoTarget) -> Result<()> {
    let ref_id = target.ref_id();
    let users = fetch_all(ctx.per_page, |params| {
        let ref_id = ref_id.clone();
        async move { ctx.client.project_users(&ref_id, &params).await }
    })
    .await?;
    for user in &users {
        ctx.write(convert::source_code_user(&ctx.tenant, user, true))
            .await?;
    }
    Ok(())
}

/// Write one repo and the first page of its merge requests. Further pages
/// are queued as a continuation.
pub async fn export_repo(ctx: &ExportContext, target: &RepoTarget) -> Result<()> {
    let ref_id = target.ref_id();
    let affiliation = if target.namespace.is_group {
        RepoAffiliation::Organization
    } else {
        RepoAffiliation::User
    };
    let mut repo = convert::repo(&ctx.tenant, &target.project, String::new(), affiliation);
    // A listed repo is live even if the rest of its export fails.
    ctx.processed.add(&repo);

    repo.language = match ctx.client.project_language(&ref_id).await {
        Ok(language) => language,
        Err(e) if e.is_permission_warning() => {
            ctx.warn(format!(
                "no permission to read languages of {}: {e}",
                target.full_name()
            ));
            String::new()
        }
        Err(e) => return Err(e.into()),
    };
    ctx.processed.add(&repo);
    ctx.write(repo).await?;
    ctx.record_exported(target.clone());

    let mut params = ctx.incremental_params();
    params.insert("page".into(), "1".into());
    let info = export_pull_request_page(ctx, target, params).await?;
    if let Some(next_page) = info.next_page {
        ctx.queue(Continuation::PullRequests {
            repo: target.clone(),
            next_page,
        });
    }

    if ctx.client.is_cloud() {
        export_repo_users(ctx, target).await?;
    }
    Ok(())
}

/// Fetch one page of merge requests and export each with its details.
pub async fn export_pull_request_page(
    ctx: &ExportContext,
    target: &RepoTarget,
    params: Params,
) -> Result<PageInfo> {
    let ref_id = target.ref_id();
    let page = params.get("page").cloned().unwrap_or_default();
    let (merge_requests, next) = ctx.client.merge_requests(&ref_id, &params).await?;
    tracing::debug!(repo = %target.full_name(), page = %page, count = merge_requests.len(), "merge requests");
    ctx.emit(ExportProgress::FetchedPage {
        entity: "pull requests".into(),
        scope: target.full_name().to_string(),
        page,
        count: merge_requests.len(),
    });

    // Collected first so the stream holds concrete futures rather than a
    // borrowing closure, which keeps the page future Send for the pipeline.
    let exports: Vec<_> = merge_requests
        .iter()
        .map(|mr| export_merge_request(ctx, target, mr))
        .collect();
    stream::iter(exports)
        .buffer_unordered(ctx.concurrency)
        .try_collect::<Vec<()>>()
        .await?;

    Ok(PageInfo::new(next, merge_requests.len()))
}

/// Where a merge request lives.
#[derive(Debug, Clone, Copy)]
pub struct PullRequestRef<'a> {
    /// GitLab project ID.
    pub repo_ref: &'a str,
    /// Project path with namespace.
    pub repo_name: &'a str,
    pub iid: i64,
}

/// Commits of a merge request, oldest first. Fills in the branch and commit
/// lists of `pr`.
pub async fn pull_request_commits(
    client: &GitLabClient,
    tenant: &Tenant,
    per_page: u32,
    at: PullRequestRef<'_>,
    pr: &mut SourceCodePullRequest,
) -> Result<Vec<SourceCodePullRequestCommit>> {
    let raw_commits = fetch_all(per_page, |params| async move {
        client
            .merge_request_commits(at.repo_ref, at.iid, &params)
            .await
    })
    .await?;
    // GitLab lists the newest commit first.
    let mut commits: Vec<_> = raw_commits
        .iter()
        .rev()
        .map(|c| convert::pull_request_commit(tenant, client.base_url(), at.repo_name, &*pr, c))
        .collect();
    convert::attach_commits(pr, &mut commits);
    Ok(commits)
}

/// Export a merge request together with its commits, approvals and notes.
pub async fn export_merge_request(
    ctx: &ExportContext,
    target: &RepoTarget,
    mr: &MergeRequest,
) -> Result<()> {
    let repo_ref = target.ref_id();
    let mut pr = convert::pull_request(&ctx.tenant, &repo_ref, mr);

    let commits = pull_request_commits(
        &ctx.client,
        &ctx.tenant,
        ctx.per_page,
        PullRequestRef {
            repo_ref: &repo_ref,
            repo_name: target.full_name(),
            iid: mr.iid,
        },
        &mut pr,
    )
    .await?;
    for commit in commits {
        ctx.write(commit).await?;
    }

    match ctx.client.merge_request_approvals(&repo_ref, mr.iid).await {
        Ok(approvals) => {
            for review in convert::reviews(&ctx.tenant, &pr, &approvals) {
                ctx.write(review).await?;
            }
        }
        Err(e) if e.is_permission_warning() => {
            tracing::warn!(pr = %pr.identifier, error = %e, "no permission to read approvals");
        }
        Err(e) => return Err(e.into()),
    }

    let notes = fetch_all(ctx.per_page, |params| {
        let repo_ref = repo_ref.clone();
        async move {
            ctx.client
                .merge_request_notes(&repo_ref, mr.iid, &params)
                .await
        }
    })
    .await?;
    for note in notes.iter().filter(|n| !n.system) {
        ctx.write(convert::pull_request_comment(
            &ctx.tenant,
            &pr,
            &mr.web_url,
            note,
        ))
        .await?;
    }

    ctx.write(pr).await
}

/// Fetch the remaining merge request pages of one repo.
///
/// On failure the page that failed is saved under `remaining_pr_pages` so the
/// next export resumes there; on success the saved entry is dropped.
pub async fn continue_pull_requests(
    ctx: &ExportContext,
    store: &RemainingPrPagesStore<'_>,
    target: &RepoTarget,
    next_page: &str,
    updated_after: Option<&str>,
) -> Result<()> {
    let ref_id = target.ref_id();
    let current = parking_lot::Mutex::new(next_page.to_string());

    let outcome = paginate_start_at(Some(next_page), |mut params| {
        let current = &current;
        async move {
            if let Some(page) = params.get("page") {
                *current.lock() = page.clone();
            }
            params.insert("per_page".into(), ctx.per_page.to_string());
            if let Some(after) = updated_after {
                params.insert("updated_after".into(), after.to_string());
            }
            export_pull_request_page(ctx, target, params).await
        }
    })
    .await;

    match outcome {
        Ok(_) => store.remove(&ref_id).await,
        Err(e) => {
            let page = current.into_inner();
            tracing::error!(repo = %target.full_name(), page = %page, error = %e, "merge request pages failed");
            store
                .append(
                    &ref_id,
                    RemainingPrPages {
                        repo_full_name: target.full_name().to_string(),
                        project_id: target.project.id,
                        last_updated_at: updated_after.unwrap_or_default().to_string(),
                        page,
                    },
                )
                .await?;
            Err(e)
        }
    }
}

/// Resume merge request pages a previous export did not finish.
///
/// A saved entry that fails again is logged and kept for the next run,
/// unless the project is gone or hidden from this token, in which case the
/// entry is dropped. Only fatal errors stop the export.
pub async fn resume_remaining_pages(
    ctx: &ExportContext,
    store: &RemainingPrPagesStore<'_>,
) -> Result<()> {
    let remaining = store.load().await?;
    for (ref_id, entry) in remaining {
        tracing::info!(repo = %entry.repo_full_name, page = %entry.page, "resuming remaining merge request pages");
        let project = match ctx.client.project(&ref_id).await {
            Ok(project) => project,
            Err(e) if e.is_inaccessible() => {
                ctx.warn(format!(
                    "dropping remaining merge request pages of {}: {e}",
                    entry.repo_full_name
                ));
                store.remove(&ref_id).await?;
                continue;
            }
            Err(e) => {
                ctx.warn(format!(
                    "error resuming merge request pages of {}: {e}",
                    entry.repo_full_name
                ));
                continue;
            }
        };
        let namespace = Arc::new(NamespaceTarget {
            id: project
                .namespace
                .as_ref()
                .map(|ns| ns.id.to_string())
                .unwrap_or_default(),
            full_path: project.namespace_path().to_string(),
            is_group: project
                .namespace
                .as_ref()
                .is_some_and(|ns| ns.kind == "group"),
        });
        let target = RepoTarget { namespace, project };
        let updated_after = Some(entry.last_updated_at.as_str()).filter(|s| !s.is_empty());
        if let Err(e) = continue_pull_requests(ctx, store, &target, &entry.page, updated_after).await {
            if is_fatal(&e) {
                return Err(e);
            }
            ctx.warn(format!(
                "error resuming merge request pages of {}: {e}",
                entry.repo_full_name
            ));
            if e.is_inaccessible() {
                store.remove(&ref_id).await?;
            }
        }
    }
    Ok(())
}
