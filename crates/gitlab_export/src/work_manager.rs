//! Board and sprint membership index.
//!
//! While a work export scans a project's issues it records each issue's
//! classifying attributes here. Boards and sprints are then assembled from
//! set-membership queries against the index instead of one API call per
//! column. Between webhook invocations the index travels through [`State`]
//! as a [`WorkManagerSnapshot`].

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::sdk::ids;
use crate::sdk::{AgileSprint, IssueColumn, State, StateError, get_json, set_json};

/// State key holding the persisted snapshot.
pub const WORK_MANAGER_STATE_KEY: &str = "work_manager";

/// Sprint column of open issues without an assignee.
pub const OPEN_ISSUES_COLUMN: &str = "Open Issues";
/// Sprint column of open issues with an assignee.
pub const SCHEDULED_ISSUES_COLUMN: &str = "Scheduled Issues";
/// Sprint column of closed issues.
pub const CLOSED_ISSUES_COLUMN: &str = "Closed Issues";

/// Classifying attributes of one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueDetail {
    pub open: bool,
    pub label_ids: BTreeSet<i64>,
    pub assignee_id: Option<i64>,
    pub milestone_ref_id: Option<i64>,
    pub iteration_ref_id: Option<String>,
    pub weight: Option<i64>,
}

/// Where an issue lives, for mutations addressed by issue ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStateInfo {
    pub iid: String,
    pub project_ref_id: String,
}

/// Paths of a project and its group.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectStateInfo {
    pub project_path: String,
    pub group_path: String,
}

/// One issue as registered during a scan.
#[derive(Debug, Clone, Default)]
pub struct IssueEntry {
    /// Exported issue ID.
    pub issue_id: String,
    pub iid: String,
    /// GitLab project ID.
    pub project_ref_id: String,
    pub open: bool,
    pub label_ids: Vec<i64>,
    pub milestone_ref_id: Option<i64>,
    pub iteration_ref_id: Option<String>,
    pub assignee_id: Option<i64>,
    pub weight: Option<i64>,
}

/// A board column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoardColumn {
    /// Synthetic first column: open issues on no named list.
    Open,
    /// Synthetic last column: closed issues on no named list.
    Closed,
    /// A named list, by label ID.
    Label(i64),
}

/// Filters of one board column.
#[derive(Debug, Clone, Copy)]
pub struct ColumnQuery<'a> {
    /// GitLab project IDs whose issues the board shows.
    pub project_ref_ids: &'a [String],
    /// Board milestone. `None` matches any milestone.
    pub milestone_ref_id: Option<i64>,
    /// Labels every issue on the board carries.
    pub board_label_ids: &'a [i64],
    /// Labels of the board's named lists.
    pub list_label_ids: &'a [i64],
    pub column: BoardColumn,
    pub assignee_id: Option<i64>,
    pub weight: Option<i64>,
}

impl ColumnQuery<'_> {
    fn matches(&self, issue: &IssueDetail) -> bool {
        if let Some(milestone) = self.milestone_ref_id
            && issue.milestone_ref_id != Some(milestone)
        {
            return false;
        }
        if !self
            .board_label_ids
            .iter()
            .all(|id| issue.label_ids.contains(id))
        {
            return false;
        }
        if let Some(assignee) = self.assignee_id
            && issue.assignee_id != Some(assignee)
        {
            return false;
        }
        if let Some(weight) = self.weight
            && issue.weight != Some(weight)
        {
            return false;
        }
        match self.column {
            BoardColumn::Label(id) => issue.label_ids.contains(&id),
            BoardColumn::Open | BoardColumn::Closed => {
                let on_named_list = self
                    .list_label_ids
                    .iter()
                    .any(|id| issue.label_ids.contains(id));
                !on_named_list && issue.open == (self.column == BoardColumn::Open)
            }
        }
    }
}

/// Serializable form of a [`WorkManager`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkManagerSnapshot {
    /// GitLab project ID to issue ID to attributes.
    pub projects: BTreeMap<String, BTreeMap<String, IssueDetail>>,
    /// Issue ID to IID and project.
    pub issues: BTreeMap<String, IssueStateInfo>,
    /// GitLab project ID to paths.
    pub project_details: BTreeMap<String, ProjectStateInfo>,
}

impl WorkManagerSnapshot {
    fn merge(&mut self, other: WorkManagerSnapshot) {
        for (project, issues) in other.projects {
            self.projects.entry(project).or_default().extend(issues);
        }
        self.issues.extend(other.issues);
        self.project_details.extend(other.project_details);
    }
}

/// Membership index shared by the tasks of one export or webhook call.
#[derive(Debug, Default)]
pub struct WorkManager {
    inner: RwLock<WorkManagerSnapshot>,
}

impl WorkManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: WorkManagerSnapshot) -> Self {
        Self {
            inner: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> WorkManagerSnapshot {
        self.inner.read().clone()
    }

    /// Record an issue. A later entry for the same issue replaces the earlier one.
    pub fn add_issue(&self, entry: IssueEntry) {
        tracing::debug!(
            project = %entry.project_ref_id,
            issue = %entry.issue_id,
            "indexing issue"
        );
        let detail = IssueDetail {
            open: entry.open,
            label_ids: entry.label_ids.into_iter().collect(),
            assignee_id: entry.assignee_id,
            milestone_ref_id: entry.milestone_ref_id,
            iteration_ref_id: entry.iteration_ref_id,
            weight: entry.weight,
        };
        let mut inner = self.inner.write();
        inner.issues.insert(
            entry.issue_id.clone(),
            IssueStateInfo {
                iid: entry.iid,
                project_ref_id: entry.project_ref_id.clone(),
            },
        );
        inner
            .projects
            .entry(entry.project_ref_id)
            .or_default()
            .insert(entry.issue_id, detail);
    }

    /// IDs of the issues in one board column, ordered by issue ID.
    pub fn get_board_column_issues(&self, query: &ColumnQuery<'_>) -> Vec<String> {
        let inner = self.inner.read();
        let mut matched = Vec::new();
        for project in query.project_ref_ids {
            let Some(issues) = inner.projects.get(project) else {
                tracing::debug!(project = %project, "no issues indexed for project");
                continue;
            };
            matched.extend(
                issues
                    .iter()
                    .filter(|(_, detail)| query.matches(detail))
                    .map(|(id, _)| id.clone()),
            );
        }
        matched
    }

    /// Fill a sprint's columns, issue IDs and project IDs from the issues
    /// assigned to the iteration `sprint.ref_id`.
    pub fn set_sprint_columns_issues_project_ids(&self, customer_id: &str, sprint: &mut AgileSprint) {
        let inner = self.inner.read();
        let mut open = Vec::new();
        let mut scheduled = Vec::new();
        let mut closed = Vec::new();
        let mut projects = BTreeSet::new();

        for (project, issues) in &inner.projects {
            for (issue_id, detail) in issues {
                if detail.iteration_ref_id.as_deref() != Some(sprint.ref_id.as_str()) {
                    continue;
                }
                projects.insert(ids::project_id(customer_id, project));
                let bucket = match (detail.open, detail.assignee_id) {
                    (true, None) => &mut open,
                    (true, Some(_)) => &mut scheduled,
                    (false, _) => &mut closed,
                };
                bucket.push(issue_id.clone());
            }
        }

        sprint.issue_ids = open
            .iter()
            .chain(&scheduled)
            .chain(&closed)
            .cloned()
            .collect();
        sprint.columns = vec![
            IssueColumn {
                name: OPEN_ISSUES_COLUMN.to_string(),
                issue_ids: open,
            },
            IssueColumn {
                name: SCHEDULED_ISSUES_COLUMN.to_string(),
                issue_ids: scheduled,
            },
            IssueColumn {
                name: CLOSED_ISSUES_COLUMN.to_string(),
                issue_ids: closed,
            },
        ];
        sprint.project_ids = projects.into_iter().collect();
    }

    /// Iteration an indexed issue belongs to.
    pub fn issue_iteration(&self, project_ref_id: &str, issue_id: &str) -> Option<String> {
        self.inner
            .read()
            .projects
            .get(project_ref_id)?
            .get(issue_id)?
            .iteration_ref_id
            .clone()
    }

    /// IID and project of an exported issue.
    pub fn get_issue_iid(&self, issue_id: &str) -> Option<IssueStateInfo> {
        self.inner.read().issues.get(issue_id).cloned()
    }

    pub fn add_project_details(&self, project_ref_id: impl Into<String>, info: ProjectStateInfo) {
        self.inner
            .write()
            .project_details
            .insert(project_ref_id.into(), info);
    }

    pub fn project_path(&self, project_ref_id: &str) -> Option<ProjectStateInfo> {
        self.inner
            .read()
            .project_details
            .get(project_ref_id)
            .cloned()
    }

    /// Write the snapshot under [`WORK_MANAGER_STATE_KEY`].
    pub async fn persist(&self, state: &dyn State) -> Result<(), StateError> {
        let snapshot = self.snapshot();
        tracing::debug!(
            projects = snapshot.projects.len(),
            issues = snapshot.issues.len(),
            "persisting work manager"
        );
        set_json(state, WORK_MANAGER_STATE_KEY, &snapshot).await
    }

    /// Merge the stored snapshot into this index. A missing key is not an error.
    pub async fn restore(&self, state: &dyn State) -> Result<(), StateError> {
        if let Some(stored) = get_json::<WorkManagerSnapshot>(state, WORK_MANAGER_STATE_KEY).await? {
            self.inner.write().merge(stored);
        }
        Ok(())
    }

    /// Remove the stored snapshot.
    pub async fn delete(state: &dyn State) -> Result<(), StateError> {
        state.delete(WORK_MANAGER_STATE_KEY).await
    }
}
