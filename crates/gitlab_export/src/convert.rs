//! Model conversion from GitLab API types to exported models.

use chrono::{DateTime, NaiveDate, Utc};
use pulldown_cmark::{Options, Parser, html};

use crate::api::extract_graphql_id;
use crate::api::types::{
    Approvals, GroupEpic, Issue, Iteration, MergeRequest, MergeRequestCommit, Milestone, Namespace,
    Note, Project, User,
};
use crate::error::{ExportError, Result};
use crate::export::types::GITLAB_DATE_FORMAT;
use crate::sdk::ids::{self, REF_TYPE};
use crate::sdk::{
    AgileSprint, DateModel, IssueMutationField, IssueTransition, MutationFieldType,
    PullRequestStatus, RepoAffiliation, RepoVisibility, ReviewState, SourceCodePullRequest,
    SourceCodePullRequestComment, SourceCodePullRequestCommit, SourceCodePullRequestReview,
    SourceCodeRepo, SourceCodeUser, SprintStatus, UserType, WorkIssue, WorkProject,
    WorkProjectCapability, WorkUser,
};
use crate::work_manager::IssueEntry;

pub const OPENED_STATE: &str = "Opened";
pub const CLOSED_STATE: &str = "Closed";

pub const BUG_ISSUE_TYPE: &str = "Bug";
pub const INCIDENT_ISSUE_TYPE: &str = "Incident";
pub const ENHANCEMENT_ISSUE_TYPE: &str = "Enhancement";
pub const MILESTONE_ISSUE_TYPE: &str = "Milestone";
pub const EPIC_ISSUE_TYPE: &str = "Epic";

/// Who the exported records belong to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tenant {
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
}

impl Tenant {
    pub fn new(customer_id: impl Into<String>, integration_instance_id: Option<String>) -> Self {
        Self {
            customer_id: customer_id.into(),
            integration_instance_id,
        }
    }
}

/// Status name for a GitLab issue or milestone state.
pub fn issue_status(state: &str) -> &'static str {
    match state {
        "closed" => CLOSED_STATE,
        _ => OPENED_STATE,
    }
}

/// The one transition available from a status: open items can be closed
/// and closed items reopened.
pub fn issue_transitions(status: &str) -> Vec<IssueTransition> {
    let target = if status == CLOSED_STATE {
        OPENED_STATE
    } else {
        CLOSED_STATE
    };
    vec![IssueTransition {
        ref_id: target.to_string(),
        name: target.to_string(),
    }]
}

/// Whether a GitLab state is open. Issues and epics say `opened`, milestones
/// and iterations say `active`.
pub fn is_open_state(state: &str) -> bool {
    matches!(state, "opened" | "active")
}

/// Issue type derived from labels. Defaults to Bug.
pub fn issue_type_from_labels<S: AsRef<str>>(labels: &[S]) -> &'static str {
    for label in labels {
        match label.as_ref() {
            "incident" => return INCIDENT_ISSUE_TYPE,
            "enhancement" => return ENHANCEMENT_ISSUE_TYPE,
            _ => {}
        }
    }
    BUG_ISSUE_TYPE
}

/// Render markdown as HTML.
pub fn markdown_to_html(input: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut out = String::new();
    html::push_html(&mut out, Parser::new_ext(input, options));
    out
}

/// Pull request description as the host renders it.
pub fn pull_request_description(markdown: &str) -> String {
    format!(
        r#"<div class="source-gitlab">{}</div>"#,
        markdown_to_html(markdown)
    )
}

/// Parse a `YYYY-MM-DD` date as midnight UTC.
pub fn parse_gitlab_date(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    NaiveDate::parse_from_str(value, GITLAB_DATE_FORMAT)
        .map(|d| d.and_hms_opt(0, 0, 0).unwrap_or_default().and_utc())
}

/// Parse an optional date. Empty means unset; anything else must parse.
fn optional_date(
    value: Option<&str>,
) -> std::result::Result<Option<DateTime<Utc>>, chrono::ParseError> {
    match value.filter(|v| !v.is_empty()) {
        Some(v) => parse_gitlab_date(v).map(Some),
        None => Ok(None),
    }
}

/// Absolute avatar URL. GitLab returns relative paths for uploaded avatars.
pub fn absolute_avatar_url(base_url: &str, avatar: Option<&str>) -> Option<String> {
    let avatar = avatar.filter(|a| !a.is_empty())?;
    if avatar.starts_with("https") || avatar.starts_with("http://") {
        Some(avatar.to_string())
    } else {
        Some(format!("{base_url}{avatar}"))
    }
}

/// Display name of a namespace for account listings.
pub fn namespace_account_name(ns: &Namespace) -> &str {
    if ns.name.is_empty() { &ns.path } else { &ns.name }
}

pub fn repo(
    tenant: &Tenant,
    project: &Project,
    language: String,
    affiliation: RepoAffiliation,
) -> SourceCodeRepo {
    let ref_id = project.id.to_string();
    let affiliation = if project.forked_from_project.is_some() {
        RepoAffiliation::Thirdparty
    } else {
        affiliation
    };
    SourceCodeRepo {
        id: ids::repo_id(&tenant.customer_id, &ref_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: tenant.customer_id.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        name: project.path_with_namespace.clone(),
        url: project.web_url.clone(),
        default_branch: project.default_branch.clone().unwrap_or_default(),
        description: project.description.clone().unwrap_or_default(),
        language,
        visibility: if project.visibility == "private" {
            RepoVisibility::Private
        } else {
            RepoVisibility::Public
        },
        affiliation,
        active: true,
        updated_at: project.last_activity_at.timestamp_millis(),
    }
}

pub fn work_project(tenant: &Tenant, project: &Project) -> WorkProject {
    let ref_id = project.id.to_string();
    WorkProject {
        id: ids::project_id(&tenant.customer_id, &ref_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: tenant.customer_id.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        name: project.name.clone(),
        identifier: project.path_with_namespace.clone(),
        description: project.description.clone().unwrap_or_default(),
        url: project.web_url.clone(),
        active: true,
        updated_at: project.last_activity_at.timestamp_millis(),
    }
}

fn mutation_fields() -> Vec<IssueMutationField> {
    vec![
        IssueMutationField {
            ref_id: "title".into(),
            name: "Title".into(),
            description: Some("summary is a brief one line summary of the issue".into()),
            field_type: MutationFieldType::String,
            always_available: true,
            always_required: true,
            ..Default::default()
        },
        IssueMutationField {
            ref_id: "description".into(),
            name: "Description".into(),
            description: Some("description is a detailed description of the issue".into()),
            field_type: MutationFieldType::Textbox,
            always_available: true,
            ..Default::default()
        },
        IssueMutationField {
            ref_id: "issueType".into(),
            name: "Issue Type".into(),
            description: Some("the type of issue".into()),
            field_type: MutationFieldType::WorkIssueType,
            always_available: true,
            always_required: true,
            immutable: true,
            ..Default::default()
        },
    ]
}

pub fn project_capability(tenant: &Tenant, project: &Project) -> WorkProjectCapability {
    let ref_id = project.id.to_string();
    WorkProjectCapability {
        id: ids::project_capability_id(&tenant.customer_id, &ref_id),
        project_id: ids::project_id(&tenant.customer_id, &ref_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: tenant.customer_id.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        updated_at: project.last_activity_at.timestamp_millis(),
        change_logs: true,
        epics: true,
        kanban_boards: true,
        linked_issues: true,
        parents: true,
        sprints: true,
        issue_mutation_fields: mutation_fields(),
        ..Default::default()
    }
}

pub fn source_code_user(tenant: &Tenant, user: &User, member: bool) -> SourceCodeUser {
    let ref_id = user.id.to_string();
    SourceCodeUser {
        id: ids::user_id(&tenant.customer_id, &ref_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: tenant.customer_id.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        name: user.name.clone(),
        username: Some(user.username.clone()).filter(|u| !u.is_empty()),
        email: user.email.clone().filter(|e| !e.is_empty()),
        avatar_url: user.avatar_url.clone(),
        url: user.web_url.clone(),
        member,
        user_type: if user.name.contains("Bot") {
            UserType::Bot
        } else {
            UserType::Human
        },
    }
}

pub fn work_user(tenant: &Tenant, user: &User, member: bool) -> WorkUser {
    let ref_id = user.id.to_string();
    WorkUser {
        id: ids::work_user_id(&tenant.customer_id, &ref_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: tenant.customer_id.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        name: user.name.clone(),
        username: user.username.clone(),
        avatar_url: user.avatar_url.clone(),
        url: user.web_url.clone(),
        member,
    }
}

/// Convert a merge request. The branch ID and commit lists are filled in once
/// the commits are known.
pub fn pull_request(tenant: &Tenant, repo_ref_id: &str, mr: &MergeRequest) -> SourceCodePullRequest {
    let customer = &tenant.customer_id;
    let repo_id = ids::repo_id(customer, repo_ref_id);
    let ref_id = mr.id.to_string();
    let user_ref = |u: &Option<User>| u.as_ref().map(|u| u.id.to_string()).unwrap_or_default();

    let mut pr = SourceCodePullRequest {
        id: ids::pull_request_id(customer, &ref_id, &repo_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        branch_name: mr.source_branch.clone(),
        title: mr.title.clone(),
        description: pull_request_description(mr.description.as_deref().unwrap_or_default()),
        url: mr.web_url.clone(),
        identifier: mr.references.full.clone(),
        draft: mr.work_in_progress,
        created_date: DateModel::from_optional(Some(mr.created_at)),
        updated_date: DateModel::from_optional(Some(mr.updated_at)),
        created_by_ref_id: user_ref(&mr.author),
        active: true,
        repo_id,
        ..Default::default()
    };

    match mr.state.as_str() {
        "opened" => pr.status = PullRequestStatus::Open,
        "closed" => {
            pr.status = PullRequestStatus::Closed;
            pr.closed_date = DateModel::from_optional(mr.closed_at);
            pr.closed_by_ref_id = user_ref(&mr.closed_by);
        }
        "locked" => pr.status = PullRequestStatus::Locked,
        "merged" => {
            pr.status = PullRequestStatus::Merged;
            let sha = mr.merge_commit_sha.clone().unwrap_or_default();
            if !sha.is_empty() {
                pr.merge_commit_id = ids::commit_id(customer, &sha, &pr.repo_id);
            }
            pr.merge_sha = sha;
            pr.merged_date = DateModel::from_optional(mr.merged_at);
            pr.merged_by_ref_id = user_ref(&mr.merged_by);
        }
        other => {
            tracing::warn!(state = other, ref_id = %pr.ref_id, "PR has an unknown state");
        }
    }
    pr
}

/// Attach commits (oldest first) and derive the branch ID from the first one.
pub fn attach_commits(pr: &mut SourceCodePullRequest, commits: &mut [SourceCodePullRequestCommit]) {
    let first_commit_id = commits
        .first()
        .map(|c| ids::commit_id(&pr.customer_id, &c.sha, &pr.repo_id))
        .unwrap_or_default();
    pr.branch_id = ids::branch_id(&pr.customer_id, &pr.repo_id, &pr.branch_name, &first_commit_id);
    pr.commit_shas = commits.iter().map(|c| c.sha.clone()).collect();
    pr.commit_ids = commits
        .iter()
        .map(|c| ids::commit_id(&pr.customer_id, &c.sha, &pr.repo_id))
        .collect();
    for commit in commits {
        commit.branch_id = pr.branch_id.clone();
    }
}

pub fn pull_request_commit(
    tenant: &Tenant,
    base_url: &str,
    repo_name: &str,
    pr: &SourceCodePullRequest,
    commit: &MergeRequestCommit,
) -> SourceCodePullRequestCommit {
    let customer = &tenant.customer_id;
    SourceCodePullRequestCommit {
        id: ids::pull_request_commit_id(customer, &commit.id, &pr.repo_id),
        ref_id: commit.id.clone(),
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        repo_id: pr.repo_id.clone(),
        pull_request_id: pr.id.clone(),
        branch_id: pr.branch_id.clone(),
        sha: commit.id.clone(),
        message: commit.message.clone(),
        url: format!("{base_url}/{repo_name}/commit/{}", commit.id),
        created_date: DateModel::from_optional(Some(commit.created_at)),
        author_ref_id: ids::commit_email_id(customer, &commit.author_email),
        committer_ref_id: ids::commit_email_id(customer, &commit.committer_email),
    }
}

/// One review per approver and per suggested approver.
pub fn reviews(
    tenant: &Tenant,
    pr: &SourceCodePullRequest,
    approvals: &Approvals,
) -> Vec<SourceCodePullRequestReview> {
    let customer = &tenant.customer_id;
    let created = DateModel::from_optional(approvals.created_at.or(approvals.updated_at));
    let review = |user_id: i64, state: ReviewState| {
        let ref_id = format!("{}-{user_id}", approvals.id);
        SourceCodePullRequestReview {
            id: ids::pull_request_review_id(customer, &ref_id, &pr.repo_id),
            ref_id,
            ref_type: REF_TYPE.to_string(),
            customer_id: customer.clone(),
            integration_instance_id: tenant.integration_instance_id.clone(),
            repo_id: pr.repo_id.clone(),
            pull_request_id: pr.id.clone(),
            state,
            created_date: created.clone(),
            user_ref_id: user_id.to_string(),
            url: pr.url.clone(),
        }
    };

    approvals
        .approved_by
        .iter()
        .map(|a| review(a.user.id, ReviewState::Approved))
        .chain(
            approvals
                .suggested_approvers
                .iter()
                .map(|u| review(u.id, ReviewState::Pending)),
        )
        .collect()
}

pub fn pull_request_comment(
    tenant: &Tenant,
    pr: &SourceCodePullRequest,
    url: &str,
    note: &Note,
) -> SourceCodePullRequestComment {
    let customer = &tenant.customer_id;
    let ref_id = note.id.to_string();
    SourceCodePullRequestComment {
        id: ids::pull_request_comment_id(customer, &ref_id, &pr.repo_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        repo_id: pr.repo_id.clone(),
        pull_request_id: pr.id.clone(),
        body: note.body.clone(),
        url: url.to_string(),
        created_date: DateModel::from_optional(Some(note.created_at)),
        updated_date: DateModel::from_optional(Some(note.updated_at)),
        user_ref_id: note.author.id.to_string(),
    }
}

/// Review recorded when a user approves or revokes an approval. Shares its ref
/// ID with the approval exported from the approvals endpoint.
pub fn approval_review(
    tenant: &Tenant,
    pr: &SourceCodePullRequest,
    user_id: i64,
    state: ReviewState,
    at: DateTime<Utc>,
) -> SourceCodePullRequestReview {
    let customer = &tenant.customer_id;
    let ref_id = format!("{}-{user_id}", pr.ref_id);
    SourceCodePullRequestReview {
        id: ids::pull_request_review_id(customer, &ref_id, &pr.repo_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        repo_id: pr.repo_id.clone(),
        pull_request_id: pr.id.clone(),
        state,
        created_date: DateModel::from_optional(Some(at)),
        user_ref_id: user_id.to_string(),
        url: pr.url.clone(),
    }
}

/// A diff note as a COMMENTED review.
pub fn note_review(
    tenant: &Tenant,
    pr: &SourceCodePullRequest,
    url: &str,
    note: &Note,
) -> SourceCodePullRequestReview {
    let customer = &tenant.customer_id;
    let ref_id = note.id.to_string();
    SourceCodePullRequestReview {
        id: ids::pull_request_review_id(customer, &ref_id, &pr.repo_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        repo_id: pr.repo_id.clone(),
        pull_request_id: pr.id.clone(),
        state: ReviewState::Commented,
        created_date: DateModel::from_optional(Some(note.created_at)),
        user_ref_id: note.author.id.to_string(),
        url: url.to_string(),
    }
}

/// Convert an issue and build its work manager entry.
pub fn work_issue(tenant: &Tenant, project_ref_id: &str, issue: &Issue) -> (WorkIssue, IssueEntry) {
    let customer = &tenant.customer_id;
    let ref_id = issue.id.to_string();
    let issue_id = ids::issue_id(customer, &ref_id);
    let tags: Vec<String> = issue.labels.iter().map(|l| l.name().to_string()).collect();
    let status = issue_status(&issue.state);
    let issue_type = issue_type_from_labels(&tags);
    let author = issue
        .author
        .as_ref()
        .map(|a| a.id.to_string())
        .unwrap_or_default();

    let mut item = WorkIssue {
        id: issue_id.clone(),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        identifier: issue.references.full.clone(),
        title: issue.title.clone(),
        description: issue.description.clone().unwrap_or_default(),
        url: issue.web_url.clone(),
        status: status.to_string(),
        status_id: ids::issue_status_id(customer, status),
        issue_type: issue_type.to_string(),
        type_id: ids::issue_type_id(customer, issue_type),
        tags,
        project_ids: vec![ids::project_id(customer, project_ref_id)],
        assignee_ref_id: issue
            .assignee
            .as_ref()
            .map(|a| a.id.to_string())
            .unwrap_or_default(),
        reporter_ref_id: author.clone(),
        creator_ref_id: author,
        story_points: issue.weight.map(|w| w as f64),
        created_date: DateModel::from_optional(Some(issue.created_at)),
        updated_date: DateModel::from_optional(Some(issue.updated_at)),
        transitions: issue_transitions(status),
        active: true,
        ..Default::default()
    };

    if let Some(epic) = &issue.epic {
        let epic_id = ids::issue_id(customer, &epic.id.to_string());
        item.epic_id = Some(epic_id.clone());
        item.parent_id = Some(epic_id);
    }

    if let Some(milestone) = &issue.milestone {
        item.sprint_ids = vec![ids::sprint_id(customer, &milestone.id.to_string())];
        item.planned_end_date = milestone
            .due_date
            .as_deref()
            .and_then(|d| parse_gitlab_date(d).ok())
            .and_then(|d| DateModel::from_optional(Some(d)));
        item.planned_start_date = milestone
            .start_date
            .as_deref()
            .and_then(|d| parse_gitlab_date(d).ok())
            .and_then(|d| DateModel::from_optional(Some(d)));
    }

    let entry = IssueEntry {
        issue_id,
        iid: issue.iid.to_string(),
        project_ref_id: project_ref_id.to_string(),
        open: is_open_state(&issue.state),
        label_ids: issue.labels.iter().filter_map(|l| l.id()).collect(),
        milestone_ref_id: issue.milestone.as_ref().map(|m| m.id),
        iteration_ref_id: issue.iteration.as_ref().map(|i| i.id.to_string()),
        assignee_id: issue.assignee.as_ref().map(|a| a.id),
        weight: issue.weight,
    };
    (item, entry)
}

/// A milestone as a work issue of type Milestone.
pub fn milestone_issue(
    tenant: &Tenant,
    milestone: &Milestone,
    project_ids: Vec<String>,
) -> Result<WorkIssue> {
    let customer = &tenant.customer_id;
    let ref_id = milestone.id.to_string();
    let status = issue_status(&milestone.state);
    let due = optional_date(milestone.due_date.as_deref()).map_err(|e| {
        ExportError::invalid_data(format!(
            "milestone {} has an invalid due date {:?}: {e}",
            milestone.id, milestone.due_date
        ))
    })?;
    Ok(WorkIssue {
        id: ids::issue_id(customer, &ref_id),
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        identifier: format!("{}#{}", milestone.title, milestone.id),
        title: milestone.title.clone(),
        description: milestone.description.clone().unwrap_or_default(),
        url: milestone.web_url.clone(),
        status: status.to_string(),
        status_id: ids::issue_status_id(customer, status),
        issue_type: MILESTONE_ISSUE_TYPE.to_string(),
        type_id: ids::issue_type_id(customer, MILESTONE_ISSUE_TYPE),
        project_ids,
        created_date: DateModel::from_optional(Some(milestone.created_at)),
        updated_date: DateModel::from_optional(Some(milestone.updated_at)),
        planned_end_date: DateModel::from_optional(due),
        transitions: issue_transitions(status),
        active: true,
        ref_id,
        ..Default::default()
    })
}

/// A group epic as a work issue of type Epic, shared by every project of
/// the group.
pub fn epic_issue(tenant: &Tenant, epic: &GroupEpic, project_ids: Vec<String>) -> Result<WorkIssue> {
    let customer = &tenant.customer_id;
    let ref_id = epic.id.to_string();
    let status = issue_status(&epic.state);
    let date = |value: &Option<String>, what: &str| {
        optional_date(value.as_deref()).map_err(|e| {
            ExportError::invalid_data(format!(
                "epic {} has an invalid {what} {value:?}: {e}",
                epic.id
            ))
        })
    };
    let start = date(&epic.start_date_from_inherited_source, "start date")?;
    let due = date(&epic.due_date_from_inherited_source, "due date")?;
    let author = epic
        .author
        .as_ref()
        .map(|a| a.id.to_string())
        .unwrap_or_default();
    let parent = epic
        .parent_id
        .map(|parent| ids::issue_id(customer, &parent.to_string()));

    Ok(WorkIssue {
        id: ids::issue_id(customer, &ref_id),
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        identifier: epic.references.full.clone(),
        title: epic.title.clone(),
        description: epic.description.clone().unwrap_or_default(),
        url: epic.web_url.clone(),
        status: status.to_string(),
        status_id: ids::issue_status_id(customer, status),
        issue_type: EPIC_ISSUE_TYPE.to_string(),
        type_id: ids::issue_type_id(customer, EPIC_ISSUE_TYPE),
        tags: epic.labels.clone(),
        project_ids,
        reporter_ref_id: author.clone(),
        creator_ref_id: author,
        epic_id: parent.clone(),
        parent_id: parent,
        created_date: DateModel::from_optional(Some(epic.created_at)),
        updated_date: DateModel::from_optional(Some(epic.updated_at)),
        planned_start_date: DateModel::from_optional(start),
        planned_end_date: DateModel::from_optional(due),
        transitions: issue_transitions(status),
        active: true,
        ref_id,
        ..Default::default()
    })
}

struct SprintSource<'a> {
    ref_id: String,
    name: &'a str,
    goal: Option<&'a str>,
    state: &'a str,
    url: &'a str,
    start: Option<&'a str>,
    due: Option<&'a str>,
    updated_at: DateTime<Utc>,
}

fn sprint(tenant: &Tenant, source: SprintSource<'_>, now: DateTime<Utc>) -> Option<AgileSprint> {
    let start = match optional_date(source.start) {
        Ok(start) => start,
        Err(e) => {
            tracing::warn!(sprint = %source.ref_id, start_date = ?source.start, error = %e, "could not figure out start date, skipping sprint");
            return None;
        }
    };
    let due = match optional_date(source.due) {
        Ok(due) => due,
        Err(e) => {
            tracing::warn!(sprint = %source.ref_id, due_date = ?source.due, error = %e, "could not figure out due date, skipping sprint");
            return None;
        }
    };

    let (status, completed) = if source.state == "closed" {
        (SprintStatus::Closed, DateModel::from_optional(Some(source.updated_at)))
    } else if start.is_some_and(|s| s > now) {
        (SprintStatus::Future, None)
    } else {
        (SprintStatus::Active, None)
    };

    Some(AgileSprint {
        id: ids::sprint_id(&tenant.customer_id, &source.ref_id),
        ref_type: REF_TYPE.to_string(),
        customer_id: tenant.customer_id.clone(),
        integration_instance_id: tenant.integration_instance_id.clone(),
        name: source.name.to_string(),
        goal: source.goal.unwrap_or_default().to_string(),
        status,
        url: source.url.to_string(),
        started_date: DateModel::from_optional(start),
        ended_date: DateModel::from_optional(due),
        completed_date: completed,
        active: true,
        updated_at: source.updated_at.timestamp_millis(),
        ref_id: source.ref_id,
        ..Default::default()
    })
}

/// A milestone as a sprint. `None` when its dates cannot be parsed.
pub fn milestone_sprint(
    tenant: &Tenant,
    milestone: &Milestone,
    now: DateTime<Utc>,
) -> Option<AgileSprint> {
    sprint(
        tenant,
        SprintSource {
            ref_id: milestone.id.to_string(),
            name: &milestone.title,
            goal: milestone.description.as_deref(),
            state: &milestone.state,
            url: &milestone.web_url,
            start: milestone.start_date.as_deref(),
            due: milestone.due_date.as_deref(),
            updated_at: milestone.updated_at,
        },
        now,
    )
}

/// An iteration as a sprint. `None` when its dates cannot be parsed.
pub fn iteration_sprint(
    tenant: &Tenant,
    iteration: &Iteration,
    now: DateTime<Utc>,
) -> Option<AgileSprint> {
    sprint(
        tenant,
        SprintSource {
            ref_id: extract_graphql_id(&iteration.id).to_string(),
            name: &iteration.title,
            goal: iteration.description.as_deref(),
            state: &iteration.state,
            url: &iteration.web_url,
            start: iteration.start_date.as_deref(),
            due: iteration.due_date.as_deref(),
            updated_at: iteration.updated_at,
        },
        now,
    )
}
