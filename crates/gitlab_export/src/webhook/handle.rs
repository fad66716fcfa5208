//! Records written for each webhook event.

use std::sync::atomic::{AtomicUsize, Ordering};

use super::{
    HookIssue, HookMergeRequest, HookProject, IssueHook, MergeRequestHook, NoteHook, WebhookEvent,
};
use crate::api::GitLabClient;
use crate::api::types::{
    Issue, IssueLabel, IterationRef, Label, MergeRequest, Note, References, User, UserId,
};
use crate::convert::{self, Tenant};
use crate::error::Result;
use crate::export::source_code::{PullRequestRef, pull_request_commits};
use crate::sdk::{Entity, Pipe, ReviewState, SourceCodePullRequest, State, ids};
use crate::work_manager::WorkManager;

/// What a webhook handler needs from the runtime.
pub struct WebhookContext<'a> {
    client: &'a GitLabClient,
    tenant: &'a Tenant,
    pipe: &'a dyn Pipe,
    state: &'a dyn State,
    per_page: u32,
    written: AtomicUsize,
}

impl<'a> WebhookContext<'a> {
    pub fn new(
        client: &'a GitLabClient,
        tenant: &'a Tenant,
        pipe: &'a dyn Pipe,
        state: &'a dyn State,
        per_page: u32,
    ) -> Self {
        Self {
            client,
            tenant,
            pipe,
            state,
            per_page,
            written: AtomicUsize::new(0),
        }
    }

    /// Records written so far.
    pub fn written(&self) -> usize {
        self.written.load(Ordering::Relaxed)
    }

    async fn write(&self, entity: impl Into<Entity>) -> Result<()> {
        self.pipe.write(entity.into()).await?;
        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Write the records a delivery implies. Returns how many were written.
pub async fn handle(ctx: &WebhookContext<'_>, event: &WebhookEvent) -> Result<usize> {
    tracing::debug!(event = event.name(), "handling webhook");
    match event {
        WebhookEvent::MergeRequest(hook) => merge_request_hook(ctx, hook).await?,
        WebhookEvent::Note(hook) => note_hook(ctx, hook).await?,
        WebhookEvent::Issue(hook) => issue_hook(ctx, hook).await?,
        WebhookEvent::Push(push) => {
            tracing::debug!(git_ref = %push.git_ref, commits = push.total_commits_count, "push acknowledged");
        }
        WebhookEvent::System(system) => {
            tracing::debug!(event_name = %system.event_name, "system hook acknowledged");
        }
        WebhookEvent::Unknown(name) => {
            tracing::warn!(event = %name, "ignoring unsupported webhook event");
        }
    }
    ctx.pipe.flush().await?;
    Ok(ctx.written())
}

/// The API shape of a webhook merge request, so the export conversion applies.
fn merge_request(project: &HookProject, attrs: &HookMergeRequest) -> MergeRequest {
    let user = |id: i64| User {
        id,
        ..User::default()
    };
    let finished = |state: &str| (attrs.state == state).then_some(attrs.updated_at);
    MergeRequest {
        id: attrs.id,
        iid: attrs.iid,
        project_id: project.id,
        title: attrs.title.clone(),
        description: attrs.description.clone(),
        state: attrs.state.clone(),
        created_at: attrs.created_at,
        updated_at: attrs.updated_at,
        closed_at: finished("closed"),
        merged_at: finished("merged"),
        source_branch: attrs.source_branch.clone(),
        work_in_progress: attrs.work_in_progress,
        merge_commit_sha: attrs.merge_commit_sha.clone(),
        web_url: attrs.url.clone(),
        author: attrs.author_id.map(user),
        closed_by: None,
        merged_by: None,
        references: References {
            full: format!("{}!{}", project.path_with_namespace, attrs.iid),
            ..References::default()
        },
    }
}

async fn merge_request_hook(ctx: &WebhookContext<'_>, hook: &MergeRequestHook) -> Result<()> {
    let repo_ref = hook.project.id.to_string();
    let attrs = &hook.object_attributes;
    let mut pr = convert::pull_request(ctx.tenant, &repo_ref, &merge_request(&hook.project, attrs));

    match hook.action() {
        action @ ("approved" | "unapproved") => {
            let state = if action == "approved" {
                ReviewState::Approved
            } else {
                ReviewState::Dismissed
            };
            match hook.user.id {
                Some(user_id) => {
                    ctx.write(convert::approval_review(
                        ctx.tenant,
                        &pr,
                        user_id,
                        state,
                        attrs.updated_at,
                    ))
                    .await?
                }
                None => {
                    tracing::warn!(pr = %pr.identifier, user = %hook.user.username, "approval hook without a user id");
                }
            }
        }
        "open" | "reopen" => write_commits(ctx, hook, &repo_ref, &mut pr).await?,
        _ if hook.is_push_update() => write_commits(ctx, hook, &repo_ref, &mut pr).await?,
        _ => {}
    }

    ctx.write(pr).await
}

async fn write_commits(
    ctx: &WebhookContext<'_>,
    hook: &MergeRequestHook,
    repo_ref: &str,
    pr: &mut SourceCodePullRequest,
) -> Result<()> {
    let commits = pull_request_commits(
        ctx.client,
        ctx.tenant,
        ctx.per_page,
        PullRequestRef {
            repo_ref,
            repo_name: &hook.project.path_with_namespace,
            iid: hook.object_attributes.iid,
        },
        pr,
    )
    .await?;
    tracing::debug!(pr = %pr.identifier, commits = commits.len(), "writing merge request commits");
    for commit in commits {
        ctx.write(commit).await?;
    }
    Ok(())
}

async fn note_hook(ctx: &WebhookContext<'_>, hook: &NoteHook) -> Result<()> {
    let attrs = &hook.object_attributes;
    if attrs.system {
        tracing::debug!(note = attrs.id, "skipping system note");
        return Ok(());
    }
    let Some(mr) = &hook.merge_request else {
        tracing::debug!(note = attrs.id, noteable = %attrs.noteable_type, "note is not on a merge request");
        return Ok(());
    };

    let repo_ref = hook.project.id.to_string();
    let pr = convert::pull_request(ctx.tenant, &repo_ref, &merge_request(&hook.project, mr));
    let note = Note {
        id: attrs.id,
        body: attrs.note.clone(),
        author: UserId { id: attrs.author_id },
        created_at: attrs.created_at,
        updated_at: attrs.updated_at,
        system: false,
    };
    if attrs.note_type.as_deref() == Some("DiffNote") {
        ctx.write(convert::note_review(ctx.tenant, &pr, &attrs.url, &note))
            .await
    } else {
        ctx.write(convert::pull_request_comment(ctx.tenant, &pr, &attrs.url, &note))
            .await
    }
}

/// The API shape of a webhook issue.
fn issue(hook: &IssueHook) -> Issue {
    let attrs: &HookIssue = &hook.object_attributes;
    let user = |id: i64| User {
        id,
        ..User::default()
    };
    Issue {
        id: attrs.id,
        iid: attrs.iid,
        project_id: hook.project.id,
        title: attrs.title.clone(),
        description: attrs.description.clone(),
        state: attrs.state.clone(),
        created_at: attrs.created_at,
        updated_at: attrs.updated_at,
        labels: hook
            .labels
            .iter()
            .map(|l| {
                IssueLabel::Detailed(Label {
                    id: l.id,
                    name: l.title.clone(),
                })
            })
            .collect(),
        milestone: None,
        author: attrs.author_id.map(user),
        assignee: attrs.assignee_ids.first().copied().map(user),
        web_url: attrs.url.clone(),
        references: References {
            full: format!("{}#{}", hook.project.path_with_namespace, attrs.iid),
            ..References::default()
        },
        epic: None,
        weight: attrs.weight,
        iteration: attrs.iteration_id.map(|id| IterationRef { id }),
    }
}

async fn issue_hook(ctx: &WebhookContext<'_>, hook: &IssueHook) -> Result<()> {
    let work_manager = WorkManager::new();
    work_manager.restore(ctx.state).await?;

    let project_ref = hook.project.id.to_string();
    let (mut item, mut entry) = convert::work_issue(ctx.tenant, &project_ref, &issue(hook));
    // Hooks carry only the milestone ID.
    if let Some(milestone) = hook.object_attributes.milestone_id {
        item.sprint_ids = vec![ids::sprint_id(&ctx.tenant.customer_id, &milestone.to_string())];
        entry.milestone_ref_id = Some(milestone);
    }
    // Older servers omit the iteration; keep the one the last export saw.
    if entry.iteration_ref_id.is_none() {
        entry.iteration_ref_id = work_manager.issue_iteration(&project_ref, &entry.issue_id);
    }
    work_manager.add_issue(entry);
    ctx.write(item).await?;
    work_manager.persist(ctx.state).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::client;
    use crate::http::{HttpMethod, MockTransport};
    use crate::sdk::{MemoryPipe, MemoryState};
    use crate::webhook::{EVENT_HEADER, WebhookRequest};
    use crate::work_manager::WORK_MANAGER_STATE_KEY;
    use serde_json::{Value, json};

    const COMMITS: &str =
        "https://gitlab.com/api/v4/projects/7/merge_requests/3/commits?page=1&per_page=100";

    fn tenant() -> Tenant {
        Tenant::new("cust", Some("inst".into()))
    }

    fn event(name: &str, body: Value) -> WebhookEvent {
        WebhookEvent::decode(&WebhookRequest::new(
            vec![(EVENT_HEADER.to_string(), name.to_string())],
            body.to_string(),
        ))
        .unwrap()
    }

    fn mr_attributes(action: &str) -> Value {
        json!({
            "id": 300, "iid": 3, "title": "Fix", "state": "opened", "source_branch": "fix",
            "url": "https://gitlab.com/acme/api/-/merge_requests/3", "author_id": 4,
            "created_at": "2024-01-01 00:00:00 UTC", "updated_at": "2024-01-05 10:00:00 UTC",
            "action": action
        })
    }

    fn mr_hook(action: &str, changes: Value) -> WebhookEvent {
        event(
            "Merge Request Hook",
            json!({
                "object_kind": "merge_request",
                "object_attributes": mr_attributes(action),
                "project": { "id": 7, "name": "api", "path_with_namespace": "acme/api" },
                "user": { "id": 21, "name": "Ann", "username": "ann" },
                "changes": changes
            }),
        )
    }

    async fn run(mock: &MockTransport, state: &MemoryState, event: &WebhookEvent) -> (usize, MemoryPipe) {
        let client = client(mock);
        let tenant = tenant();
        let pipe = MemoryPipe::new();
        let ctx = WebhookContext::new(&client, &tenant, &pipe, state, 100);
        let written = handle(&ctx, event).await.unwrap();
        (written, pipe)
    }

    #[tokio::test]
    async fn approval_writes_review_for_hook_user() {
        let mock = MockTransport::new();
        let (written, pipe) = run(&mock, &MemoryState::new(), &mr_hook("approved", json!({}))).await;

        assert_eq!(written, 2);
        let reviews = pipe.of_model("sourcecode.PullRequestReview");
        let Entity::PullRequestReview(review) = &reviews[0] else {
            panic!("expected a review");
        };
        assert_eq!(review.state, ReviewState::Approved);
        assert_eq!(review.user_ref_id, "21");
        assert_eq!(review.ref_id, "300-21");

        let prs = pipe.of_model("sourcecode.PullRequest");
        let Entity::PullRequest(pr) = &prs[0] else {
            panic!("expected a pull request");
        };
        assert_eq!(pr.identifier, "acme/api!3");
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn unapproval_dismisses_review() {
        let mock = MockTransport::new();
        let (_, pipe) = run(&mock, &MemoryState::new(), &mr_hook("unapproved", json!({}))).await;
        let reviews = pipe.of_model("sourcecode.PullRequestReview");
        assert!(matches!(
            &reviews[0],
            Entity::PullRequestReview(r) if r.state == ReviewState::Dismissed
        ));
    }

    #[tokio::test]
    async fn push_update_fetches_commits() {
        let mock = MockTransport::new();
        mock.push_json(
            HttpMethod::Get,
            COMMITS,
            200,
            json!([
                { "id": "new", "message": "b", "created_at": "2024-01-05T00:00:00Z" },
                { "id": "old", "message": "a", "created_at": "2024-01-04T00:00:00Z" }
            ]),
            None,
        );
        let hook = mr_hook("update", json!({ "updated_at": { "previous": "x", "current": "y" } }));
        let (written, pipe) = run(&mock, &MemoryState::new(), &hook).await;

        assert_eq!(written, 3);
        assert_eq!(pipe.of_model("sourcecode.PullRequestCommit").len(), 2);
        let prs = pipe.of_model("sourcecode.PullRequest");
        assert!(matches!(
            &prs[0],
            Entity::PullRequest(pr) if pr.commit_shas == vec!["old", "new"]
        ));
    }

    #[tokio::test]
    async fn other_updates_write_only_the_pull_request() {
        let mock = MockTransport::new();
        let hook = mr_hook("update", json!({ "title": { "previous": "a", "current": "b" } }));
        let (written, _) = run(&mock, &MemoryState::new(), &hook).await;
        assert_eq!(written, 1);
        assert_eq!(mock.count(HttpMethod::Get, COMMITS), 0);
    }

    fn note_hook(note_type: Option<&str>, system: bool) -> WebhookEvent {
        event(
            "Note Hook",
            json!({
                "object_attributes": {
                    "id": 900, "note": "looks good", "type": note_type, "noteable_type": "MergeRequest",
                    "url": "https://gitlab.com/acme/api/-/merge_requests/3#note_900", "author_id": 21,
                    "system": system,
                    "created_at": "2024-01-05 10:00:00 UTC", "updated_at": "2024-01-05 10:00:00 UTC"
                },
                "project": { "id": 7, "path_with_namespace": "acme/api" },
                "merge_request": mr_attributes("")
            }),
        )
    }

    #[tokio::test]
    async fn diff_notes_are_reviews_and_plain_notes_comments() {
        let mock = MockTransport::new();
        let state = MemoryState::new();

        let (_, pipe) = run(&mock, &state, &note_hook(Some("DiffNote"), false)).await;
        let reviews = pipe.of_model("sourcecode.PullRequestReview");
        assert!(matches!(
            &reviews[0],
            Entity::PullRequestReview(r) if r.state == ReviewState::Commented && r.ref_id == "900"
        ));

        let (_, pipe) = run(&mock, &state, &note_hook(None, false)).await;
        let comments = pipe.of_model("sourcecode.PullRequestComment");
        assert!(matches!(
            &comments[0],
            Entity::PullRequestComment(c) if c.body == "looks good" && c.user_ref_id == "21"
        ));

        let (written, _) = run(&mock, &state, &note_hook(None, true)).await;
        assert_eq!(written, 0);
    }

    #[tokio::test]
    async fn issue_hook_registers_issue_with_work_manager() {
        let mock = MockTransport::new();
        let state = MemoryState::new();
        let hook = event(
            "Issue Hook",
            json!({
                "object_attributes": {
                    "id": 55, "iid": 4, "title": "Broken", "state": "opened",
                    "url": "https://gitlab.com/acme/api/-/issues/4", "author_id": 9,
                    "assignee_ids": [4], "milestone_id": 12,
                    "created_at": "2024-01-01 00:00:00 UTC", "updated_at": "2024-01-02 00:00:00 UTC"
                },
                "project": { "id": 7, "path_with_namespace": "acme/api" },
                "labels": [{ "id": 1, "title": "incident" }]
            }),
        );
        let (written, pipe) = run(&mock, &state, &hook).await;

        assert_eq!(written, 1);
        let issues = pipe.of_model("work.Issue");
        let Entity::Issue(issue) = &issues[0] else {
            panic!("expected an issue");
        };
        assert_eq!(issue.identifier, "acme/api#4");
        assert_eq!(issue.issue_type, convert::INCIDENT_ISSUE_TYPE);
        assert_eq!(issue.sprint_ids, vec![ids::sprint_id("cust", "12")]);

        assert!(state.keys().contains(&WORK_MANAGER_STATE_KEY.to_string()));
        let restored = WorkManager::new();
        restored.restore(&state).await.unwrap();
        let info = restored.get_issue_iid(&ids::issue_id("cust", "55")).unwrap();
        assert_eq!(info.iid, "4");
        assert_eq!(info.project_ref_id, "7");
    }

    fn iteration_sprint(work_manager: &WorkManager, ref_id: &str) -> crate::sdk::AgileSprint {
        let mut sprint = crate::sdk::AgileSprint {
            ref_id: ref_id.to_string(),
            ..Default::default()
        };
        work_manager.set_sprint_columns_issues_project_ids("cust", &mut sprint);
        sprint
    }

    fn issue_hook_event(extra: Value) -> WebhookEvent {
        let mut attributes = json!({
            "id": 55, "iid": 4, "title": "Broken", "state": "opened",
            "url": "https://gitlab.com/acme/api/-/issues/4", "author_id": 9,
            "created_at": "2024-01-01 00:00:00 UTC", "updated_at": "2024-01-03 00:00:00 UTC"
        });
        if let (Some(base), Some(extra)) = (attributes.as_object_mut(), extra.as_object()) {
            base.extend(extra.clone());
        }
        event(
            "Issue Hook",
            json!({
                "object_attributes": attributes,
                "project": { "id": 7, "path_with_namespace": "acme/api" }
            }),
        )
    }

    #[tokio::test]
    async fn issue_hook_keeps_the_issue_in_its_iteration() {
        let mock = MockTransport::new();
        let state = MemoryState::new();
        let exported = WorkManager::new();
        exported.add_issue(crate::work_manager::IssueEntry {
            issue_id: ids::issue_id("cust", "55"),
            iid: "4".into(),
            project_ref_id: "7".into(),
            open: true,
            iteration_ref_id: Some("44".into()),
            ..Default::default()
        });
        exported.persist(&state).await.unwrap();

        // No iteration_id in the payload.
        run(&mock, &state, &issue_hook_event(json!({ "state": "closed" }))).await;

        let restored = WorkManager::new();
        restored.restore(&state).await.unwrap();
        let sprint = iteration_sprint(&restored, "44");
        assert_eq!(sprint.issue_ids, vec![ids::issue_id("cust", "55")]);
        assert_eq!(sprint.columns[2].issue_ids, vec![ids::issue_id("cust", "55")]);
    }

    #[tokio::test]
    async fn issue_hook_moves_the_issue_to_its_new_iteration() {
        let mock = MockTransport::new();
        let state = MemoryState::new();

        run(&mock, &state, &issue_hook_event(json!({ "iteration_id": 45 }))).await;

        let restored = WorkManager::new();
        restored.restore(&state).await.unwrap();
        assert_eq!(
            iteration_sprint(&restored, "45").issue_ids,
            vec![ids::issue_id("cust", "55")]
        );
        assert!(iteration_sprint(&restored, "44").issue_ids.is_empty());
    }

    #[tokio::test]
    async fn push_and_system_hooks_write_nothing() {
        let mock = MockTransport::new();
        let state = MemoryState::new();
        let (written, pipe) = run(&mock, &state, &event("Push Hook", json!({ "ref": "main" }))).await;
        assert_eq!(written, 0);
        assert_eq!(pipe.flush_count(), 1);

        let system = event("System Hook", json!({ "event_name": "project_update" }));
        let (written, _) = run(&mock, &state, &system).await;
        assert_eq!(written, 0);
    }
}
