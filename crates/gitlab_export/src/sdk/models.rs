//! Normalized output models written to the pipe.
//!
//! Field names follow the host runtime's schema. Every model carries the
//! customer ID, the GitLab ref ID and the ref type so the host can address it
//! without knowing anything about GitLab.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A point in time as the host expects it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateModel {
    /// Milliseconds since the Unix epoch.
    pub epoch: i64,
    pub rfc3339: String,
    /// Offset from UTC in minutes.
    pub offset: i32,
}

impl DateModel {
    pub fn from_datetime(ts: DateTime<Utc>) -> Self {
        Self {
            epoch: ts.timestamp_millis(),
            rfc3339: ts.to_rfc3339(),
            offset: 0,
        }
    }

    /// `None` for absent or zero timestamps.
    pub fn from_optional(ts: Option<DateTime<Utc>>) -> Option<Self> {
        ts.filter(|t| t.timestamp() != 0).map(Self::from_datetime)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepoVisibility {
    #[default]
    Private,
    Public,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepoAffiliation {
    #[default]
    Organization,
    User,
    Thirdparty,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCodeRepo {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    /// Full path with namespace, e.g. `group/project`.
    pub name: String,
    pub url: String,
    pub default_branch: String,
    pub description: String,
    pub language: String,
    pub visibility: RepoVisibility,
    pub affiliation: RepoAffiliation,
    pub active: bool,
    /// Last activity, epoch milliseconds.
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserType {
    #[default]
    Human,
    Bot,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCodeUser {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub name: String,
    pub username: Option<String>,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub url: Option<String>,
    pub member: bool,
    #[serde(rename = "type")]
    pub user_type: UserType,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PullRequestStatus {
    #[default]
    Open,
    Closed,
    Merged,
    Locked,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCodePullRequest {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub repo_id: String,
    pub branch_name: String,
    pub branch_id: String,
    pub title: String,
    pub description: String,
    pub url: String,
    /// Display reference such as `group/project!12`.
    pub identifier: String,
    pub status: PullRequestStatus,
    pub draft: bool,
    pub created_date: Option<DateModel>,
    pub updated_date: Option<DateModel>,
    pub merged_date: Option<DateModel>,
    pub closed_date: Option<DateModel>,
    pub merge_sha: String,
    pub merge_commit_id: String,
    pub created_by_ref_id: String,
    pub closed_by_ref_id: String,
    pub merged_by_ref_id: String,
    pub commit_shas: Vec<String>,
    pub commit_ids: Vec<String>,
    pub active: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCodePullRequestCommit {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub repo_id: String,
    pub pull_request_id: String,
    pub branch_id: String,
    pub sha: String,
    pub message: String,
    pub url: String,
    pub created_date: Option<DateModel>,
    pub author_ref_id: String,
    pub committer_ref_id: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReviewState {
    #[default]
    Pending,
    Approved,
    Dismissed,
    Commented,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCodePullRequestReview {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub repo_id: String,
    pub pull_request_id: String,
    pub state: ReviewState,
    pub created_date: Option<DateModel>,
    pub user_ref_id: String,
    pub url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SourceCodePullRequestComment {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub repo_id: String,
    pub pull_request_id: String,
    pub body: String,
    pub url: String,
    pub created_date: Option<DateModel>,
    pub updated_date: Option<DateModel>,
    pub user_ref_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkProject {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub name: String,
    pub identifier: String,
    pub description: String,
    pub url: String,
    pub active: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MutationFieldType {
    #[default]
    String,
    Textbox,
    WorkIssueType,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IssueMutationField {
    pub ref_id: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub field_type: MutationFieldType,
    pub always_available: bool,
    pub always_required: bool,
    pub immutable: bool,
    pub available_for_types: Vec<String>,
    pub required_by_types: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkProjectCapability {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub project_id: String,
    pub updated_at: i64,
    pub attachments: bool,
    pub change_logs: bool,
    pub due_dates: bool,
    pub epics: bool,
    pub in_progress_states: bool,
    pub kanban_boards: bool,
    pub linked_issues: bool,
    pub parents: bool,
    pub priorities: bool,
    pub resolutions: bool,
    pub sprints: bool,
    pub story_points: bool,
    pub issue_mutation_fields: Vec<IssueMutationField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkUser {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub name: String,
    pub username: String,
    pub avatar_url: Option<String>,
    pub url: Option<String>,
    pub member: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueTransition {
    pub ref_id: String,
    pub name: String,
}

/// Issue field a changelog entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueChangeLogField {
    Status,
    AssigneeRefId,
    DueDate,
    EpicId,
    Title,
}

/// One change to an issue, from its state events or system notes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IssueChangeLog {
    pub ref_id: String,
    pub field: IssueChangeLogField,
    pub from: String,
    pub from_string: String,
    pub to: String,
    pub to_string: String,
    pub user_id: String,
    pub created_date: Option<DateModel>,
    /// Position in the issue's history, oldest first.
    pub ordinal: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueLinkType {
    #[default]
    Relates,
    Blocks,
}

/// An issue this one links to.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkedIssue {
    /// GitLab issue link ID.
    pub ref_id: String,
    pub issue_id: String,
    pub issue_ref_id: String,
    pub issue_identifier: String,
    pub link_type: IssueLinkType,
    /// The link points from the other issue to this one, as in "is blocked by".
    pub reverse_direction: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkIssue {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub identifier: String,
    pub title: String,
    pub description: String,
    pub url: String,
    pub status: String,
    pub status_id: String,
    #[serde(rename = "type")]
    pub issue_type: String,
    pub type_id: String,
    pub tags: Vec<String>,
    pub project_ids: Vec<String>,
    pub assignee_ref_id: String,
    pub reporter_ref_id: String,
    pub creator_ref_id: String,
    pub epic_id: Option<String>,
    pub parent_id: Option<String>,
    pub sprint_ids: Vec<String>,
    pub story_points: Option<f64>,
    pub created_date: Option<DateModel>,
    pub updated_date: Option<DateModel>,
    pub planned_start_date: Option<DateModel>,
    pub planned_end_date: Option<DateModel>,
    pub transitions: Vec<IssueTransition>,
    pub change_log: Vec<IssueChangeLog>,
    pub linked_issues: Vec<LinkedIssue>,
    pub active: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SprintStatus {
    #[default]
    Active,
    Future,
    Closed,
}

/// A named column holding issue IDs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueColumn {
    pub name: String,
    pub issue_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgileSprint {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub name: String,
    pub goal: String,
    pub status: SprintStatus,
    pub url: String,
    pub started_date: Option<DateModel>,
    pub ended_date: Option<DateModel>,
    pub completed_date: Option<DateModel>,
    pub columns: Vec<IssueColumn>,
    pub issue_ids: Vec<String>,
    pub project_ids: Vec<String>,
    pub board_ids: Vec<String>,
    pub active: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BoardType {
    #[default]
    Scrum,
    Kanban,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgileBoard {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub board_type: BoardType,
    pub columns: Vec<String>,
    pub backlog_issue_ids: Vec<String>,
    pub project_ids: Vec<String>,
    pub url: String,
    pub active: bool,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgileKanban {
    pub id: String,
    pub ref_id: String,
    pub ref_type: String,
    pub customer_id: String,
    pub integration_instance_id: Option<String>,
    pub name: String,
    pub board_id: String,
    pub columns: Vec<IssueColumn>,
    pub issue_ids: Vec<String>,
    pub project_ids: Vec<String>,
    pub url: String,
    pub active: bool,
    pub updated_at: i64,
}

/// Everything that can be written to a [`Pipe`](super::Pipe).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model")]
pub enum Entity {
    #[serde(rename = "sourcecode.Repo")]
    Repo(SourceCodeRepo),
    #[serde(rename = "sourcecode.User")]
    User(SourceCodeUser),
    #[serde(rename = "sourcecode.PullRequest")]
    PullRequest(SourceCodePullRequest),
    #[serde(rename = "sourcecode.PullRequestCommit")]
    PullRequestCommit(SourceCodePullRequestCommit),
    #[serde(rename = "sourcecode.PullRequestReview")]
    PullRequestReview(SourceCodePullRequestReview),
    #[serde(rename = "sourcecode.PullRequestComment")]
    PullRequestComment(SourceCodePullRequestComment),
    #[serde(rename = "work.Project")]
    Project(WorkProject),
    #[serde(rename = "work.ProjectCapability")]
    ProjectCapability(WorkProjectCapability),
    #[serde(rename = "work.User")]
    WorkUser(WorkUser),
    #[serde(rename = "work.Issue")]
    Issue(WorkIssue),
    #[serde(rename = "agile.Sprint")]
    Sprint(AgileSprint),
    #[serde(rename = "agile.Board")]
    Board(AgileBoard),
    #[serde(rename = "agile.Kanban")]
    Kanban(AgileKanban),
}

impl Entity {
    /// The host model name, as written in the `model` tag.
    pub fn model_name(&self) -> &'static str {
        match self {
            Entity::Repo(_) => "sourcecode.Repo",
            Entity::User(_) => "sourcecode.User",
            Entity::PullRequest(_) => "sourcecode.PullRequest",
            Entity::PullRequestCommit(_) => "sourcecode.PullRequestCommit",
            Entity::PullRequestReview(_) => "sourcecode.PullRequestReview",
            Entity::PullRequestComment(_) => "sourcecode.PullRequestComment",
            Entity::Project(_) => "work.Project",
            Entity::ProjectCapability(_) => "work.ProjectCapability",
            Entity::WorkUser(_) => "work.User",
            Entity::Issue(_) => "work.Issue",
            Entity::Sprint(_) => "agile.Sprint",
            Entity::Board(_) => "agile.Board",
            Entity::Kanban(_) => "agile.Kanban",
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Entity::Repo(m) => &m.id,
            Entity::User(m) => &m.id,
            Entity::PullRequest(m) => &m.id,
            Entity::PullRequestCommit(m) => &m.id,
            Entity::PullRequestReview(m) => &m.id,
            Entity::PullRequestComment(m) => &m.id,
            Entity::Project(m) => &m.id,
            Entity::ProjectCapability(m) => &m.id,
            Entity::WorkUser(m) => &m.id,
            Entity::Issue(m) => &m.id,
            Entity::Sprint(m) => &m.id,
            Entity::Board(m) => &m.id,
            Entity::Kanban(m) => &m.id,
        }
    }
}

macro_rules! impl_into_entity {
    ($($model:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$model> for Entity {
                fn from(model: $model) -> Self {
                    Entity::$variant(model)
                }
            }
        )*
    };
}

impl_into_entity! {
    SourceCodeRepo => Repo,
    SourceCodeUser => User,
    SourceCodePullRequest => PullRequest,
    SourceCodePullRequestCommit => PullRequestCommit,
    SourceCodePullRequestReview => PullRequestReview,
    SourceCodePullRequestComment => PullRequestComment,
    WorkProject => Project,
    WorkProjectCapability => ProjectCapability,
    WorkUser => WorkUser,
    WorkIssue => Issue,
    AgileSprint => Sprint,
    AgileBoard => Board,
    AgileKanban => Kanban,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn date_model_skips_zero_and_missing_times() {
        assert!(DateModel::from_optional(None).is_none());
        let zero = Utc.timestamp_opt(0, 0).unwrap();
        assert!(DateModel::from_optional(Some(zero)).is_none());

        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let date = DateModel::from_optional(Some(ts)).unwrap();
        assert_eq!(date.epoch, ts.timestamp_millis());
        assert_eq!(date.rfc3339, "2024-03-01T12:00:00+00:00");
        assert_eq!(date.offset, 0);
    }

    #[test]
    fn entity_serializes_with_model_tag() {
        let repo = SourceCodeRepo {
            id: "abc".into(),
            name: "group/project".into(),
            active: true,
            ..Default::default()
        };
        let entity: Entity = repo.into();
        let json = serde_json::to_value(&entity).unwrap();
        assert_eq!(json["model"], "sourcecode.Repo");
        assert_eq!(json["name"], "group/project");
        assert_eq!(json["visibility"], "PRIVATE");

        let back: Entity = serde_json::from_value(json).unwrap();
        assert_eq!(back, entity);
        assert_eq!(back.model_name(), "sourcecode.Repo");
        assert_eq!(back.id(), "abc");
    }

    #[test]
    fn renamed_type_fields_serialize_as_type() {
        let issue = WorkIssue {
            issue_type: "Bug".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(Entity::from(issue)).unwrap();
        assert_eq!(json["type"], "Bug");
        assert_eq!(json["model"], "work.Issue");
    }
}
