//! GitLab API client.
//!
//! Thin typed wrappers over the REST and GraphQL endpoints the export uses.
//! List endpoints return one page plus the next-page cursor; callers drive
//! them with the functions in [`super::paginate`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::{Value, json};

use super::error::ApiError;
use super::graphql::GraphqlRequester;
use super::requester::{NextPage, Requester};
use super::types::{
    Approvals, Board, EpicCreate, GroupDetail, GroupEpic, Hook, Issue, IssueCreate, IssueLink,
    Iteration, IterationsData, LoginUser, Member, MergeRequest, MergeRequestCommit, Milestone,
    MilestoneCreate, Namespace, Note, Project, StateEvent, User, Version,
};
use crate::config::ConnectionInfo;
use crate::http::Params;

/// One page of a list endpoint.
pub type Page<T> = (Vec<T>, NextPage);

const ITERATIONS_QUERY: &str = r#"query {
  group(fullPath:"{path}"){
    iterations(first:100,after:"{cursor}"){
      pageInfo{ endCursor }
      edges{
        node{ id title description startDate dueDate createdAt state updatedAt webUrl webPath }
      }
    }
  }
}"#;

/// Where a webhook is registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookScope {
    /// Instance-wide system hook. Requires an admin on a self-managed server.
    System,
    /// Group hook, by group ID.
    Group(String),
    /// Project hook, by project ID.
    Project(String),
}

impl HookScope {
    fn path(&self) -> String {
        match self {
            HookScope::System => "hooks".to_string(),
            HookScope::Group(id) => format!("groups/{id}/hooks"),
            HookScope::Project(id) => format!("projects/{id}/hooks"),
        }
    }

    /// Event flags enabled for hooks in this scope.
    pub fn events(&self) -> &'static [&'static str] {
        match self {
            HookScope::System => &["repository_update_events"],
            HookScope::Group(_) | HookScope::Project(_) => {
                &["merge_requests_events", "note_events", "issues_events"]
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookScope::System => "system",
            HookScope::Group(_) => "org",
            HookScope::Project(_) => "repo",
        }
    }
}

/// Typed access to the GitLab REST and GraphQL APIs of one server.
#[derive(Debug, Clone)]
pub struct GitLabClient {
    requester: Arc<Requester>,
    graphql: GraphqlRequester,
    base_url: String,
    is_cloud: bool,
}

impl GitLabClient {
    pub fn new(requester: Arc<Requester>, conn: &ConnectionInfo) -> Self {
        let graphql = GraphqlRequester::new(Arc::clone(&requester), conn.graphql_url.clone());
        Self {
            requester,
            graphql,
            base_url: conn.base_url.clone(),
            is_cloud: conn.is_cloud,
        }
    }

    /// Server root, e.g. `https://gitlab.com`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn is_cloud(&self) -> bool {
        self.is_cloud
    }

    async fn list<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        params: &Params,
    ) -> Result<Page<T>, ApiError> {
        let (items, next): (Option<Vec<T>>, NextPage) = self.requester.get(path, params).await?;
        Ok((items.unwrap_or_default(), next))
    }

    pub async fn version(&self) -> Result<Version, ApiError> {
        Ok(self.requester.get("version", &Params::new()).await?.0)
    }

    pub async fn login_user(&self) -> Result<LoginUser, ApiError> {
        Ok(self.requester.get("user", &Params::new()).await?.0)
    }

    /// Top-level namespaces visible to the authenticated user.
    pub async fn namespaces(&self, params: &Params) -> Result<Page<Namespace>, ApiError> {
        let mut params = params.clone();
        params.insert("top_level_only".into(), "true".into());
        self.list("namespaces", &params).await
    }

    /// A group with its projects listed.
    pub async fn group_detail(&self, group_id: &str) -> Result<GroupDetail, ApiError> {
        let mut params = Params::new();
        params.insert("with_projects".into(), "true".into());
        Ok(self
            .requester
            .get(&format!("groups/{group_id}"), &params)
            .await?
            .0)
    }

    /// Membership of `user_id` in a group, including inherited membership.
    pub async fn group_member(&self, group_id: &str, user_id: i64) -> Result<Member, ApiError> {
        Ok(self
            .requester
            .get(
                &format!("groups/{group_id}/members/all/{user_id}"),
                &Params::new(),
            )
            .await?
            .0)
    }

    /// Projects of a group and its subgroups, excluding shared projects.
    pub async fn group_projects(
        &self,
        group_id: &str,
        params: &Params,
    ) -> Result<Page<Project>, ApiError> {
        let mut params = params.clone();
        params.insert("with_shared".into(), "no".into());
        params.insert("include_subgroups".into(), "true".into());
        self.list(&format!("groups/{group_id}/projects"), &params)
            .await
    }

    pub async fn user_projects(
        &self,
        user_id: &str,
        params: &Params,
    ) -> Result<Page<Project>, ApiError> {
        self.list(&format!("users/{user_id}/projects"), params).await
    }

    pub async fn project(&self, project_id: &str) -> Result<Project, ApiError> {
        Ok(self
            .requester
            .get(&format!("projects/{project_id}"), &Params::new())
            .await?
            .0)
    }

    /// The language with the largest share, or an empty string.
    pub async fn project_language(&self, project_id: &str) -> Result<String, ApiError> {
        let (languages, _): (Option<BTreeMap<String, f64>>, NextPage) = self
            .requester
            .get(&format!("projects/{project_id}/languages"), &Params::new())
            .await?;
        Ok(languages
            .unwrap_or_default()
            .into_iter()
            .fold(None::<(String, f64)>, |best, (name, share)| match best {
                Some((_, top)) if top >= share => best,
                _ => Some((name, share)),
            })
            .map(|(name, _)| name)
            .unwrap_or_default())
    }

    pub async fn merge_requests(
        &self,
        project_id: &str,
        params: &Params,
    ) -> Result<Page<MergeRequest>, ApiError> {
        let mut params = params.clone();
        params.insert("scope".into(), "all".into());
        params.insert("state".into(), "all".into());
        self.list(&format!("projects/{project_id}/merge_requests"), &params)
            .await
    }

    pub async fn merge_request(
        &self,
        project_id: &str,
        iid: i64,
    ) -> Result<MergeRequest, ApiError> {
        Ok(self
            .requester
            .get(
                &format!("projects/{project_id}/merge_requests/{iid}"),
                &Params::new(),
            )
            .await?
            .0)
    }

    pub async fn merge_request_commits(
        &self,
        project_id: &str,
        iid: i64,
        params: &Params,
    ) -> Result<Page<MergeRequestCommit>, ApiError> {
        self.list(
            &format!("projects/{project_id}/merge_requests/{iid}/commits"),
            params,
        )
        .await
    }

    pub async fn merge_request_approvals(
        &self,
        project_id: &str,
        iid: i64,
    ) -> Result<Approvals, ApiError> {
        Ok(self
            .requester
            .get(
                &format!("projects/{project_id}/merge_requests/{iid}/approvals"),
                &Params::new(),
            )
            .await?
            .0)
    }

    pub async fn merge_request_notes(
        &self,
        project_id: &str,
        iid: i64,
        params: &Params,
    ) -> Result<Page<Note>, ApiError> {
        self.list(
            &format!("projects/{project_id}/merge_requests/{iid}/notes"),
            params,
        )
        .await
    }

    /// Members of a project, including inherited members.
    pub async fn project_users(
        &self,
        project_id: &str,
        params: &Params,
    ) -> Result<Page<User>, ApiError> {
        self.list(&format!("projects/{project_id}/users"), params)
            .await
    }

    /// Every user on the server. Self-managed only.
    pub async fn users(&self, params: &Params) -> Result<Page<User>, ApiError> {
        self.list("users", params).await
    }

    pub async fn issues(&self, project_id: &str, params: &Params) -> Result<Page<Issue>, ApiError> {
        let mut params = params.clone();
        params.insert("scope".into(), "all".into());
        params.insert("with_labels_details".into(), "true".into());
        self.list(&format!("projects/{project_id}/issues"), &params)
            .await
    }

    /// Notes of an issue, system notes included.
    pub async fn issue_notes(
        &self,
        project_id: &str,
        iid: i64,
        params: &Params,
    ) -> Result<Page<Note>, ApiError> {
        self.list(&format!("projects/{project_id}/issues/{iid}/notes"), params)
            .await
    }

    pub async fn issue_state_events(
        &self,
        project_id: &str,
        iid: i64,
        params: &Params,
    ) -> Result<Page<StateEvent>, ApiError> {
        self.list(
            &format!("projects/{project_id}/issues/{iid}/resource_state_events"),
            params,
        )
        .await
    }

    /// Issues linked to an issue. The endpoint is not paginated.
    pub async fn issue_links(&self, project_id: &str, iid: i64) -> Result<Vec<IssueLink>, ApiError> {
        let (links, _): (Option<Vec<IssueLink>>, NextPage) = self
            .requester
            .get(
                &format!("projects/{project_id}/issues/{iid}/links"),
                &Params::new(),
            )
            .await?;
        Ok(links.unwrap_or_default())
    }

    /// Epics of a group. Needs a tier with epics.
    pub async fn group_epics(
        &self,
        group_id: &str,
        params: &Params,
    ) -> Result<Page<GroupEpic>, ApiError> {
        self.list(&format!("groups/{group_id}/epics"), params).await
    }

    pub async fn project_milestones(
        &self,
        project_id: &str,
        params: &Params,
    ) -> Result<Page<Milestone>, ApiError> {
        self.list(&format!("projects/{project_id}/milestones"), params)
            .await
    }

    pub async fn group_milestones(
        &self,
        group_id: &str,
        params: &Params,
    ) -> Result<Page<Milestone>, ApiError> {
        self.list(&format!("groups/{group_id}/milestones"), params)
            .await
    }

    pub async fn project_boards(
        &self,
        project_id: &str,
        params: &Params,
    ) -> Result<Page<Board>, ApiError> {
        self.list(&format!("projects/{project_id}/boards"), params)
            .await
    }

    pub async fn group_boards(
        &self,
        group_id: &str,
        params: &Params,
    ) -> Result<Page<Board>, ApiError> {
        self.list(&format!("groups/{group_id}/boards"), params).await
    }

    /// All iterations of a group, following GraphQL cursors until a page
    /// comes back empty. Groups on a tier without iterations yield nothing.
    pub async fn iterations(&self, group_full_path: &str) -> Result<Vec<Iteration>, ApiError> {
        let mut all = Vec::new();
        let mut cursor = String::new();
        loop {
            tracing::debug!(group = group_full_path, page = %cursor, "group iterations");
            let query = ITERATIONS_QUERY
                .replace("{path}", group_full_path)
                .replace("{cursor}", &cursor);
            let data: IterationsData = match self.graphql.query(&query, None).await {
                Ok(data) => data,
                Err(e) if e.is_permission_warning() => {
                    tracing::warn!(
                        group = group_full_path,
                        "no permissions to get iterations on this group"
                    );
                    return Ok(all);
                }
                Err(e) => return Err(e),
            };
            let Some(group) = data.group else {
                return Ok(all);
            };
            if group.iterations.edges.is_empty() {
                return Ok(all);
            }
            all.extend(group.iterations.edges.into_iter().map(|e| e.node));
            match group.iterations.page_info.end_cursor {
                Some(next) if !next.is_empty() => cursor = next,
                _ => return Ok(all),
            }
        }
    }

    pub async fn create_issue(
        &self,
        project_id: &str,
        issue: &IssueCreate,
    ) -> Result<Issue, ApiError> {
        self.requester
            .post(&format!("projects/{project_id}/issues"), &Params::new(), issue)
            .await
    }

    pub async fn create_epic(&self, group_id: &str, epic: &EpicCreate) -> Result<GroupEpic, ApiError> {
        self.requester
            .post(&format!("groups/{group_id}/epics"), &Params::new(), epic)
            .await
    }

    pub async fn create_milestone(
        &self,
        project_id: &str,
        milestone: &MilestoneCreate,
    ) -> Result<Milestone, ApiError> {
        self.requester
            .post(&format!("projects/{project_id}/milestones"), &Params::new(), milestone)
            .await
    }

    /// Update an issue. Changes travel as query parameters.
    pub async fn update_issue(
        &self,
        project_id: &str,
        iid: &str,
        params: &Params,
    ) -> Result<Issue, ApiError> {
        self.requester
            .put(
                &format!("projects/{project_id}/issues/{iid}"),
                params,
                &json!({}),
            )
            .await
    }

    pub async fn hooks(&self, scope: &HookScope, params: &Params) -> Result<Page<Hook>, ApiError> {
        self.list(&scope.path(), params).await
    }

    /// Register a hook delivering this scope's events to `url`.
    pub async fn create_hook(&self, scope: &HookScope, url: &str) -> Result<Hook, ApiError> {
        let mut body = json!({ "url": url, "enable_ssl_verification": true });
        for event in scope.events() {
            body[*event] = Value::Bool(true);
        }
        self.requester
            .post(&scope.path(), &Params::new(), &body)
            .await
    }

    pub async fn delete_hook(&self, scope: &HookScope, hook_id: i64) -> Result<(), ApiError> {
        self.requester
            .delete(&format!("{}/{hook_id}", scope.path()), &Params::new())
            .await
    }
}
