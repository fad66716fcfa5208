//! GitLab API data types.
//!
//! Only the fields the export reads are modelled. Fields GitLab omits or
//! nulls depending on tier, permissions or server version are `Option` or
//! carry a serde default.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// `true` when the field is present in the payload, whatever its value.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    serde::de::IgnoredAny::deserialize(deserializer).map(|_| true)
}

/// A top-level namespace (group or user).
#[derive(Debug, Clone, Deserialize)]
pub struct Namespace {
    pub id: i64,
    pub name: String,
    pub path: String,
    pub full_path: String,
    /// Non-zero for subgroups.
    #[serde(default)]
    pub parent_id: Option<i64>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    /// `group` or `user`.
    pub kind: String,
    /// Only returned on tiers that report member counts.
    #[serde(default, rename = "members_count_with_descendants", deserialize_with = "present")]
    pub valid_tier: bool,
}

impl Namespace {
    pub fn is_group(&self) -> bool {
        self.kind == "group"
    }

    /// Subgroups are exported through their top-level group.
    pub fn is_top_level(&self) -> bool {
        self.parent_id.unwrap_or(0) == 0
    }
}

/// The authenticated user.
#[derive(Debug, Clone, Deserialize)]
pub struct LoginUser {
    pub id: i64,
    pub name: String,
    pub username: String,
    #[serde(default)]
    pub is_admin: bool,
}

/// Group member access levels.
pub mod access_level {
    pub const MAINTAINER: i64 = 40;
    pub const OWNER: i64 = 50;
}

/// A group or project member.
#[derive(Debug, Clone, Deserialize)]
pub struct Member {
    pub id: i64,
    pub username: String,
    #[serde(default)]
    pub access_level: i64,
}

/// A user as embedded in issues, merge requests and user lists.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct User {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Reference strings such as `group/project#12`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct References {
    #[serde(default)]
    pub short: String,
    #[serde(default)]
    pub relative: String,
    #[serde(default)]
    pub full: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProjectNamespace {
    pub id: i64,
    pub full_path: String,
    #[serde(default)]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForkedFrom {
    pub id: i64,
}

/// A project, exported as a repo or a work project.
#[derive(Debug, Clone, Deserialize)]
pub struct Project {
    pub id: i64,
    pub name: String,
    pub path_with_namespace: String,
    #[serde(default)]
    pub description: Option<String>,
    pub web_url: String,
    #[serde(default)]
    pub archived: bool,
    #[serde(default)]
    pub default_branch: Option<String>,
    #[serde(default)]
    pub visibility: String,
    #[serde(default)]
    pub forked_from_project: Option<ForkedFrom>,
    pub created_at: DateTime<Utc>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(default)]
    pub namespace: Option<ProjectNamespace>,
}

impl Project {
    /// Path of the owning namespace, derived from the project path when the
    /// namespace block is missing.
    pub fn namespace_path(&self) -> &str {
        match &self.namespace {
            Some(ns) => &ns.full_path,
            None => self
                .path_with_namespace
                .rsplit_once('/')
                .map_or("", |(ns, _)| ns),
        }
    }
}

/// A group with its projects, used to count a group's projects.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupDetail {
    pub id: i64,
    #[serde(default)]
    pub projects: Vec<serde_json::Value>,
}

/// Server version.
#[derive(Debug, Clone, Deserialize)]
pub struct Version {
    pub version: String,
    #[serde(default)]
    pub revision: String,
}

/// A merge request.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequest {
    pub id: i64,
    pub iid: i64,
    #[serde(default)]
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub closed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub work_in_progress: bool,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    pub web_url: String,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub closed_by: Option<User>,
    #[serde(default)]
    pub merged_by: Option<User>,
    #[serde(default)]
    pub references: References,
}

/// A commit listed on a merge request.
#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestCommit {
    pub id: String,
    #[serde(default)]
    pub message: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub committer_email: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UserId {
    pub id: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovedBy {
    pub user: UserId,
}

/// Approval state of a merge request.
#[derive(Debug, Clone, Deserialize)]
pub struct Approvals {
    pub id: i64,
    #[serde(default)]
    pub approved_by: Vec<ApprovedBy>,
    #[serde(default)]
    pub suggested_approvers: Vec<UserId>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

/// A merge request or issue note.
#[derive(Debug, Clone, Deserialize)]
pub struct Note {
    pub id: i64,
    #[serde(default)]
    pub body: String,
    pub author: UserId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub system: bool,
}

/// A label with its ID.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Label {
    pub id: i64,
    pub name: String,
}

/// Issue labels come back as objects with `with_labels_details=true` and as
/// plain names otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum IssueLabel {
    Detailed(Label),
    Name(String),
}

impl IssueLabel {
    pub fn name(&self) -> &str {
        match self {
            IssueLabel::Detailed(label) => &label.name,
            IssueLabel::Name(name) => name,
        }
    }

    pub fn id(&self) -> Option<i64> {
        match self {
            IssueLabel::Detailed(label) => Some(label.id),
            IssueLabel::Name(_) => None,
        }
    }
}

/// A project or group milestone.
#[derive(Debug, Clone, Deserialize)]
pub struct Milestone {
    pub id: i64,
    #[serde(default)]
    pub iid: i64,
    #[serde(default)]
    pub project_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub due_date: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Epic {
    pub id: i64,
}

/// A group epic as listed by `groups/{id}/epics`.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupEpic {
    pub id: i64,
    #[serde(default)]
    pub iid: i64,
    #[serde(default)]
    pub group_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub author: Option<UserId>,
    /// `YYYY-MM-DD`, fixed or inherited from the epic's issues.
    #[serde(default)]
    pub start_date_from_inherited_source: Option<String>,
    /// `YYYY-MM-DD`, fixed or inherited from the epic's issues.
    #[serde(default)]
    pub due_date_from_inherited_source: Option<String>,
    pub state: String,
    #[serde(default)]
    pub web_url: String,
    #[serde(default)]
    pub references: References,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub parent_id: Option<i64>,
}

/// An open or close event from `resource_state_events`.
#[derive(Debug, Clone, Deserialize)]
pub struct StateEvent {
    pub id: i64,
    #[serde(default)]
    pub user: Option<UserId>,
    pub created_at: DateTime<Utc>,
    /// `closed`, `reopened` or, for merge requests, `merged`.
    pub state: String,
}

/// An issue linked to another, from `issues/{iid}/links`.
#[derive(Debug, Clone, Deserialize)]
pub struct IssueLink {
    /// ID of the linked issue.
    pub id: i64,
    pub issue_link_id: i64,
    pub link_type: String,
    #[serde(default)]
    pub references: References,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IterationRef {
    pub id: i64,
}

/// An issue.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub id: i64,
    pub iid: i64,
    pub project_id: i64,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub labels: Vec<IssueLabel>,
    #[serde(default)]
    pub milestone: Option<Milestone>,
    #[serde(default)]
    pub author: Option<User>,
    #[serde(default)]
    pub assignee: Option<User>,
    pub web_url: String,
    #[serde(default)]
    pub references: References,
    #[serde(default)]
    pub epic: Option<Epic>,
    #[serde(default)]
    pub weight: Option<i64>,
    #[serde(default)]
    pub iteration: Option<IterationRef>,
}

/// Body of `POST groups/{id}/epics`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EpicCreate {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub start_date_is_fixed: bool,
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date_fixed: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub due_date_is_fixed: bool,
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date_fixed: Option<String>,
}

/// Body of `POST projects/{id}/milestones`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MilestoneCreate {
    pub title: String,
    pub description: String,
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
}

/// Body of `POST projects/{id}/issues`.
#[derive(Debug, Clone, Serialize)]
pub struct IssueCreate {
    pub title: String,
    pub description: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BoardList {
    #[serde(default)]
    pub label: Option<Label>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BoardMilestone {
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

/// An issue board.
#[derive(Debug, Clone, Deserialize)]
pub struct Board {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub lists: Vec<BoardList>,
    #[serde(default)]
    pub milestone: Option<BoardMilestone>,
    #[serde(default)]
    pub labels: Vec<Label>,
    #[serde(default)]
    pub assignee: Option<User>,
    #[serde(default)]
    pub weight: Option<i64>,
}

impl Board {
    /// Labels of the board's named lists, in board order.
    pub fn list_labels(&self) -> impl Iterator<Item = &Label> {
        self.lists.iter().filter_map(|l| l.label.as_ref())
    }
}

/// A group iteration as returned by GraphQL.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Iteration {
    /// Global ID, e.g. `gid://gitlab/Iteration/7`.
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub due_date: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub state: String,
    #[serde(default)]
    pub web_url: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GraphqlPageInfo {
    #[serde(default)]
    pub end_cursor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IterationEdge {
    pub node: Iteration,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IterationConnection {
    pub page_info: GraphqlPageInfo,
    #[serde(default)]
    pub edges: Vec<IterationEdge>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IterationGroup {
    pub iterations: IterationConnection,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct IterationsData {
    pub group: Option<IterationGroup>,
}

/// A registered webhook (system, group or project).
#[derive(Debug, Clone, Deserialize)]
pub struct Hook {
    pub id: i64,
    pub url: String,
}
