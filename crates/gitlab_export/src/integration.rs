//! Integration lifecycle.
//!
//! [`GitLabIntegration`] is what a host runtime drives. Each call receives the
//! [`Instance`] it acts for, builds a client from the instance configuration
//! and returns once its records are written. The integration itself only
//! remembers the runtime settings handed to [`GitLabIntegration::start`].

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::api::types::{EpicCreate, IssueCreate, MilestoneCreate, Namespace};
use crate::api::{GitLabClient, Requester};
use crate::config::{Account, AccountType, IntegrationConfig};
use crate::convert::{
    self, ENHANCEMENT_ISSUE_TYPE, EPIC_ISSUE_TYPE, INCIDENT_ISSUE_TYPE, MILESTONE_ISSUE_TYPE,
    Tenant,
};
use crate::error::{ExportError, Result};
use crate::export::checkpoint::{LAST_EXPORT_DATE_KEY, REMAINING_PR_PAGES_KEY};
use crate::export::context::fetch_all;
use crate::export::types::REQUEST_TIMEOUT;
use crate::export::{ExportOptions, ExportResult, Exporter, ProcessedRepos, ProgressCallback};
use crate::http::reqwest_transport::ReqwestTransport;
use crate::http::{HttpTransport, Params};
use crate::sdk::{Pipe, State, WorkIssue, ids};
use crate::webhook::{self, HookTarget, RegistrationReport, WebhookContext, WebhookEvent, WebhookRequest};
use crate::work_manager::WorkManager;

/// Validation action listing the namespaces the token can export.
pub const FETCH_ACCOUNTS: &str = "FETCH_ACCOUNTS";
/// Validation action checking that the server answers.
pub const VALIDATE_URL: &str = "VALIDATE_URL";
/// Mutation action creating an issue.
pub const ISSUE_CREATE: &str = "ISSUE_CREATE";
/// Mutation action updating an issue.
pub const ISSUE_UPDATE: &str = "ISSUE_UPDATE";

/// Settings the host runtime supplies once at start-up.
#[derive(Debug, Clone, Default)]
pub struct RuntimeConfig {
    pub options: ExportOptions,
    /// Host URL webhook deliveries are posted to. Required by `enroll`.
    pub webhook_url: Option<String>,
}

/// The integration instance a call acts for.
#[derive(Debug, Clone)]
pub struct Instance {
    pub tenant: Tenant,
    pub config: IntegrationConfig,
}

impl Instance {
    pub fn new(tenant: Tenant, config: IntegrationConfig) -> Self {
        Self { tenant, config }
    }

    fn instance_id(&self) -> Result<&str> {
        self.tenant
            .integration_instance_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| ExportError::config("integration instance id is required for webhooks"))
    }
}

/// Result of a validation action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Validation {
    Accounts(Vec<Account>),
    Server { version: String, revision: String },
}

/// Payload of [`ISSUE_CREATE`].
#[derive(Debug, Clone, Deserialize)]
pub struct IssueCreateMutation {
    pub project_ref_id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    /// `Bug`, `Incident`, `Enhancement`, `Epic` or `Milestone`. Defaults to
    /// `Bug`.
    #[serde(default, rename = "type")]
    pub issue_type: Option<String>,
    /// Group an epic is created in. Defaults to the project's group.
    #[serde(default)]
    pub group_ref_id: Option<String>,
    /// `YYYY-MM-DD`, for epics and milestones.
    #[serde(default)]
    pub start_date: Option<String>,
    /// `YYYY-MM-DD`, for epics and milestones.
    #[serde(default)]
    pub due_date: Option<String>,
}

impl IssueCreateMutation {
    fn is_type(&self, name: &str) -> bool {
        self.issue_type
            .as_deref()
            .is_some_and(|t| t.eq_ignore_ascii_case(name))
    }

    /// Start and due dates, checked before anything is created.
    fn dates(&self) -> Result<(Option<String>, Option<String>)> {
        let check = |value: &Option<String>, what: &str| match value.as_deref() {
            None | Some("") => Ok(None),
            Some(date) => convert::parse_gitlab_date(date)
                .map(|_| Some(date.to_string()))
                .map_err(|e| ExportError::invalid_data(format!("invalid {what} {date:?}: {e}"))),
        };
        Ok((
            check(&self.start_date, "start date")?,
            check(&self.due_date, "due date")?,
        ))
    }
}

/// Payload of [`ISSUE_UPDATE`].
#[derive(Debug, Clone, Deserialize)]
pub struct IssueUpdateMutation {
    /// GitLab issue ID.
    pub ref_id: String,
    #[serde(default)]
    pub set: IssueUpdateSet,
    #[serde(default)]
    pub unset: IssueUpdateUnset,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueUpdateSet {
    pub title: Option<String>,
    pub epic_ref_id: Option<String>,
    pub assignee_ref_id: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct IssueUpdateUnset {
    #[serde(default)]
    pub epic: bool,
    #[serde(default)]
    pub assignee: bool,
}

impl IssueUpdateMutation {
    /// Query parameters of the update. Empty when nothing changes.
    fn params(&self) -> Params {
        let mut params = Params::new();
        if let Some(title) = &self.set.title {
            params.insert("title".into(), title.clone());
        }
        match (&self.set.epic_ref_id, self.unset.epic) {
            (Some(epic), _) => {
                params.insert("epic_id".into(), epic.clone());
            }
            (None, true) => {
                params.insert("epic_id".into(), "0".into());
            }
            (None, false) => {}
        }
        match (&self.set.assignee_ref_id, self.unset.assignee) {
            (Some(assignee), _) => {
                params.insert("assignee_ids".into(), assignee.clone());
            }
            (None, true) => {
                params.insert("assignee_ids".into(), String::new());
            }
            (None, false) => {}
        }
        params
    }
}

/// What a mutation touched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MutationResponse {
    pub ref_id: String,
    pub entity_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Outcome of [`GitLabIntegration::dismiss`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DismissReport {
    /// Repos and projects written again as inactive.
    pub deactivated: usize,
    pub hooks_removed: usize,
}

fn parse_payload<T: serde::de::DeserializeOwned>(action: &str, payload: &serde_json::Value) -> Result<T> {
    T::deserialize(payload)
        .map_err(|e| ExportError::invalid_data(format!("invalid {action} payload: {e}")))
}

/// Label that makes GitLab report the requested type back.
fn issue_type_label(issue_type: Option<&str>) -> Result<Option<String>> {
    match issue_type {
        None => Ok(None),
        Some(t) if t.eq_ignore_ascii_case(convert::BUG_ISSUE_TYPE) => Ok(None),
        Some(t)
            if t.eq_ignore_ascii_case(INCIDENT_ISSUE_TYPE)
                || t.eq_ignore_ascii_case(ENHANCEMENT_ISSUE_TYPE) =>
        {
            Ok(Some(t.to_ascii_lowercase()))
        }
        Some(other) => Err(ExportError::invalid_data(format!(
            "issue type not supported: {other}"
        ))),
    }
}

async fn write_created(item: WorkIssue, pipe: &dyn Pipe) -> Result<MutationResponse> {
    let response = MutationResponse {
        ref_id: item.ref_id.clone(),
        entity_id: item.id.clone(),
        url: Some(item.url.clone()),
    };
    pipe.write(item.into()).await?;
    pipe.flush().await?;
    Ok(response)
}

/// A GitLab connector driven by a host runtime.
pub struct GitLabIntegration {
    transport: Arc<dyn HttpTransport>,
    runtime: RuntimeConfig,
    on_progress: Option<Arc<ProgressCallback>>,
}

impl GitLabIntegration {
    pub fn new(transport: Arc<dyn HttpTransport>) -> Self {
        Self {
            transport,
            runtime: RuntimeConfig::default(),
            on_progress: None,
        }
    }

    /// An integration talking to GitLab over reqwest.
    pub fn with_reqwest() -> Result<Self> {
        let transport = ReqwestTransport::with_timeout(REQUEST_TIMEOUT)
            .map_err(|e| ExportError::config(format!("error creating http client: {e}")))?;
        Ok(Self::new(Arc::new(transport)))
    }

    /// Report export progress through `callback`.
    #[must_use]
    pub fn with_progress(mut self, callback: Option<Arc<ProgressCallback>>) -> Self {
        self.on_progress = callback;
        self
    }

    /// Record the runtime settings used by every later call.
    pub fn start(&mut self, runtime: RuntimeConfig) {
        tracing::info!(
            concurrency = runtime.options.concurrency,
            webhooks = runtime.webhook_url.is_some(),
            "starting"
        );
        self.runtime = runtime;
    }

    pub fn runtime(&self) -> &RuntimeConfig {
        &self.runtime
    }

    fn client(&self, config: &IntegrationConfig) -> Result<GitLabClient> {
        let conn = config.connection()?;
        let requester = Requester::new(Arc::clone(&self.transport), &conn, &self.runtime.options)
            .with_progress(self.on_progress.clone());
        Ok(GitLabClient::new(Arc::new(requester), &conn))
    }

    fn hook_target<'a>(&'a self, instance: &'a Instance) -> Result<HookTarget<'a>> {
        Ok(HookTarget {
            callback_base: self.runtime.webhook_url.as_deref().unwrap_or_default(),
            instance_id: instance.instance_id()?,
            per_page: self.runtime.options.per_page,
        })
    }

    async fn namespaces(&self, client: &GitLabClient) -> Result<Vec<Namespace>> {
        let namespaces = fetch_all(self.runtime.options.per_page, |params| async move {
            client.namespaces(&params).await
        })
        .await?;
        Ok(namespaces.into_iter().filter(Namespace::is_top_level).collect())
    }

    /// Export everything changed since the previous export.
    pub async fn export(
        &self,
        instance: &Instance,
        pipe: Arc<dyn Pipe>,
        state: Arc<dyn State>,
    ) -> Result<ExportResult> {
        let client = self.client(&instance.config)?;
        Exporter::new(
            client,
            instance.tenant.clone(),
            instance.config.clone(),
            self.runtime.options.clone(),
        )
        .with_progress(self.on_progress.clone())
        .export(pipe, state)
        .await
    }

    /// Decode a delivery and write what it implies. Returns the records written.
    pub async fn webhook(
        &self,
        instance: &Instance,
        request: &WebhookRequest,
        pipe: &dyn Pipe,
        state: &dyn State,
    ) -> Result<usize> {
        let event = WebhookEvent::decode(request)?;
        let client = self.client(&instance.config)?;
        let ctx = WebhookContext::new(
            &client,
            &instance.tenant,
            pipe,
            state,
            self.runtime.options.per_page,
        );
        let written = webhook::handle(&ctx, &event).await?;
        tracing::info!(event = event.name(), written, "webhook processed");
        Ok(written)
    }

    /// Apply a change requested by the host.
    pub async fn mutation(
        &self,
        instance: &Instance,
        action: &str,
        payload: &serde_json::Value,
        pipe: &dyn Pipe,
        state: &dyn State,
    ) -> Result<MutationResponse> {
        match action {
            ISSUE_CREATE => {
                let mutation = parse_payload(action, payload)?;
                self.create_issue(instance, &mutation, pipe).await
            }
            ISSUE_UPDATE => {
                let mutation = parse_payload(action, payload)?;
                self.update_issue(instance, &mutation, state).await
            }
            other => Err(ExportError::UnknownAction(other.to_string())),
        }
    }

    async fn create_issue(
        &self,
        instance: &Instance,
        mutation: &IssueCreateMutation,
        pipe: &dyn Pipe,
    ) -> Result<MutationResponse> {
        let client = self.client(&instance.config)?;
        if mutation.is_type(EPIC_ISSUE_TYPE) {
            return self.create_epic(&client, instance, mutation, pipe).await;
        }
        if mutation.is_type(MILESTONE_ISSUE_TYPE) {
            return self.create_milestone(&client, instance, mutation, pipe).await;
        }
        let body = IssueCreate {
            title: mutation.title.clone(),
            description: mutation.description.clone(),
            labels: issue_type_label(mutation.issue_type.as_deref())?
                .into_iter()
                .collect(),
        };
        tracing::debug!(project = %mutation.project_ref_id, "creating issue");
        let created = client.create_issue(&mutation.project_ref_id, &body).await?;

        let (item, _) = convert::work_issue(&instance.tenant, &mutation.project_ref_id, &created);
        write_created(item, pipe).await
    }

    /// Epics live in groups. Without an explicit group the project's own
    /// group is used, and a project owned by a user cannot have epics.
    async fn create_epic(
        &self,
        client: &GitLabClient,
        instance: &Instance,
        mutation: &IssueCreateMutation,
        pipe: &dyn Pipe,
    ) -> Result<MutationResponse> {
        let (start, due) = mutation.dates()?;
        let group_ref_id = match &mutation.group_ref_id {
            Some(group) => group.clone(),
            None => {
                let project = client.project(&mutation.project_ref_id).await?;
                match project.namespace {
                    Some(ns) if ns.kind == "group" => ns.id.to_string(),
                    _ => {
                        return Err(ExportError::invalid_data(format!(
                            "project {} is not in a group, epics need one",
                            mutation.project_ref_id
                        )));
                    }
                }
            }
        };
        let body = EpicCreate {
            title: mutation.title.clone(),
            description: mutation.description.clone(),
            start_date_is_fixed: start.is_some(),
            start_date_fixed: start,
            due_date_is_fixed: due.is_some(),
            due_date_fixed: due,
        };
        tracing::debug!(group = %group_ref_id, "creating epic");
        let created = client.create_epic(&group_ref_id, &body).await?;

        let project_ids = vec![ids::project_id(
            &instance.tenant.customer_id,
            &mutation.project_ref_id,
        )];
        let item = convert::epic_issue(&instance.tenant, &created, project_ids)?;
        write_created(item, pipe).await
    }

    async fn create_milestone(
        &self,
        client: &GitLabClient,
        instance: &Instance,
        mutation: &IssueCreateMutation,
        pipe: &dyn Pipe,
    ) -> Result<MutationResponse> {
        let (start_date, due_date) = mutation.dates()?;
        let body = MilestoneCreate {
            title: mutation.title.clone(),
            description: mutation.description.clone(),
            start_date,
            due_date,
        };
        tracing::debug!(project = %mutation.project_ref_id, "creating milestone");
        let created = client
            .create_milestone(&mutation.project_ref_id, &body)
            .await?;

        let project_ids = vec![ids::project_id(
            &instance.tenant.customer_id,
            &mutation.project_ref_id,
        )];
        let item = convert::milestone_issue(&instance.tenant, &created, project_ids)?;
        write_created(item, pipe).await
    }

    async fn update_issue(
        &self,
        instance: &Instance,
        mutation: &IssueUpdateMutation,
        state: &dyn State,
    ) -> Result<MutationResponse> {
        let entity_id = ids::issue_id(&instance.tenant.customer_id, &mutation.ref_id);
        let response = MutationResponse {
            ref_id: mutation.ref_id.clone(),
            entity_id: entity_id.clone(),
            url: None,
        };
        let params = mutation.params();
        if params.is_empty() {
            tracing::debug!(issue = %mutation.ref_id, "issue update changes nothing");
            return Ok(response);
        }

        let work_manager = WorkManager::new();
        work_manager.restore(state).await?;
        let location = work_manager.get_issue_iid(&entity_id).ok_or_else(|| {
            ExportError::invalid_data(format!("issue {} has not been exported", mutation.ref_id))
        })?;

        let client = self.client(&instance.config)?;
        tracing::debug!(issue = %mutation.ref_id, iid = %location.iid, "updating issue");
        client
            .update_issue(&location.project_ref_id, &location.iid, &params)
            .await?;
        Ok(response)
    }

    /// Check the configuration against the server.
    pub async fn validate(&self, instance: &Instance, action: &str) -> Result<Validation> {
        match action {
            FETCH_ACCOUNTS => {
                let client = self.client(&instance.config)?;
                let mut accounts = Vec::new();
                for namespace in self.namespaces(&client).await? {
                    let id = namespace.id.to_string();
                    let (account_type, total_count) = if namespace.is_group() {
                        let detail = client.group_detail(&id).await?;
                        (AccountType::Org, detail.projects.len())
                    } else {
                        (AccountType::User, 0)
                    };
                    tracing::debug!(namespace = %namespace.full_path, total_count, "validated account");
                    accounts.push(Account {
                        name: Some(convert::namespace_account_name(&namespace).to_string()),
                        avatar_url: convert::absolute_avatar_url(
                            client.base_url(),
                            namespace.avatar_url.as_deref(),
                        ),
                        total_count: Some(total_count),
                        ..Account::new(id, account_type)
                    });
                }
                Ok(Validation::Accounts(accounts))
            }
            VALIDATE_URL => {
                let client = self.client(&instance.config)?;
                let version = client.version().await?;
                tracing::info!(version = %version.version, "gitlab server reachable");
                Ok(Validation::Server {
                    version: version.version,
                    revision: version.revision,
                })
            }
            other => Err(ExportError::UnknownAction(other.to_string())),
        }
    }

    /// Install webhooks for the instance.
    pub async fn enroll(&self, instance: &Instance) -> Result<RegistrationReport> {
        if self.runtime.webhook_url.is_none() {
            return Err(ExportError::config("webhook url is required to enroll"));
        }
        let client = self.client(&instance.config)?;
        let target = self.hook_target(instance)?;
        webhook::register(&client, target).await
    }

    /// Tear an instance down: deactivate what it exported, remove its
    /// webhooks and forget its checkpoints.
    pub async fn dismiss(
        &self,
        instance: &Instance,
        pipe: &dyn Pipe,
        state: &dyn State,
    ) -> Result<DismissReport> {
        let started = std::time::Instant::now();
        tracing::info!("dismiss started");

        let deactivated = ProcessedRepos::deactivate_all(state, pipe).await?;
        let client = self.client(&instance.config)?;
        let hooks_removed = webhook::unregister(&client, self.hook_target(instance)?).await?;

        state.delete(LAST_EXPORT_DATE_KEY).await?;
        state.delete(REMAINING_PR_PAGES_KEY).await?;
        WorkManager::delete(state).await?;
        pipe.flush().await?;

        tracing::info!(
            deactivated,
            hooks_removed,
            duration = ?started.elapsed(),
            "dismiss completed"
        );
        Ok(DismissReport {
            deactivated,
            hooks_removed,
        })
    }

    /// Fill in the accounts of a configuration that names none.
    pub async fn auto_configure(&self, instance: &Instance) -> Result<IntegrationConfig> {
        let mut config = instance.config.clone();
        if config.accounts.as_ref().is_some_and(|a| !a.is_empty()) {
            return Ok(config);
        }
        let client = self.client(&config)?;
        let accounts: BTreeMap<String, Account> = self
            .namespaces(&client)
            .await?
            .into_iter()
            .map(|namespace| {
                let account_type = if namespace.is_group() {
                    AccountType::Org
                } else {
                    AccountType::User
                };
                let id = namespace.id.to_string();
                (id.clone(), Account::new(id, account_type))
            })
            .collect();
        tracing::info!(accounts = accounts.len(), "auto-configured accounts");
        config.accounts = Some(accounts);
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Auth;
    use crate::convert::CLOSED_STATE;
    use crate::export::checkpoint::REPOS_PROJECTS_PROCESSED_KEY;
    use crate::http::{HttpMethod, MockTransport};
    use crate::sdk::{Entity, MemoryPipe, MemoryState, SourceCodeRepo, StateExt};
    use crate::work_manager::IssueEntry;
    use serde_json::json;

    const ROOT: &str = "https://gitlab.com/api/v4/";

    fn integration(mock: &MockTransport) -> GitLabIntegration {
        let mut integration = GitLabIntegration::new(Arc::new(mock.clone()));
        integration.start(RuntimeConfig {
            options: ExportOptions::default(),
            webhook_url: Some("https://events.example.com/hook".into()),
        });
        integration
    }

    fn instance() -> Instance {
        Instance::new(
            Tenant::new("cust", Some("inst-1".into())),
            IntegrationConfig {
                auth: Some(Auth::ApiKey {
                    apikey: "tok".into(),
                    url: None,
                }),
                ..IntegrationConfig::default()
            },
        )
    }

    fn namespaces(mock: &MockTransport, items: serde_json::Value) {
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}namespaces?page=1&per_page=100&top_level_only=true"),
            200,
            items,
            None,
        );
    }

    fn issue_json(id: i64, iid: i64, labels: &[&str]) -> serde_json::Value {
        json!({
            "id": id, "iid": iid, "project_id": 7, "title": "Broken build",
            "state": "opened", "labels": labels,
            "created_at": "2024-03-01T10:00:00Z", "updated_at": "2024-03-01T10:00:00Z",
            "web_url": format!("https://gitlab.com/acme/api/-/issues/{iid}"),
            "references": { "full": format!("acme/api#{iid}") }
        })
    }

    #[tokio::test]
    async fn fetch_accounts_counts_group_projects() {
        let mock = MockTransport::new();
        namespaces(
            &mock,
            json!([
                { "id": 9, "name": "Acme", "path": "acme", "full_path": "acme", "kind": "group",
                  "avatar_url": "/uploads/acme.png" },
                { "id": 12, "name": "ann", "path": "ann", "full_path": "ann", "kind": "user" },
                { "id": 13, "name": "sub", "path": "sub", "full_path": "acme/sub", "kind": "group",
                  "parent_id": 9 }
            ]),
        );
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9?with_projects=true"),
            200,
            json!({ "id": 9, "projects": [{ "id": 1 }, { "id": 2 }] }),
            None,
        );

        let Validation::Accounts(accounts) = integration(&mock)
            .validate(&instance(), FETCH_ACCOUNTS)
            .await
            .unwrap()
        else {
            panic!("expected accounts");
        };

        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].id, "9");
        assert_eq!(accounts[0].account_type, AccountType::Org);
        assert_eq!(accounts[0].total_count, Some(2));
        assert_eq!(
            accounts[0].avatar_url.as_deref(),
            Some("https://gitlab.com/uploads/acme.png")
        );
        assert_eq!(accounts[1].account_type, AccountType::User);
        assert_eq!(accounts[1].total_count, Some(0));
    }

    #[tokio::test]
    async fn validate_url_reads_version() {
        let mock = MockTransport::new();
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}version"),
            200,
            json!({ "version": "16.9.1", "revision": "abc" }),
            None,
        );

        let result = integration(&mock)
            .validate(&instance(), VALIDATE_URL)
            .await
            .unwrap();
        assert_eq!(
            result,
            Validation::Server {
                version: "16.9.1".into(),
                revision: "abc".into()
            }
        );
        assert_eq!(
            serde_json::to_value(&result).unwrap(),
            json!({ "server": { "version": "16.9.1", "revision": "abc" } })
        );
    }

    #[tokio::test]
    async fn unknown_actions_are_rejected() {
        let mock = MockTransport::new();
        let integration = integration(&mock);
        let err = integration.validate(&instance(), "PING").await.unwrap_err();
        assert!(matches!(err, ExportError::UnknownAction(ref a) if a == "PING"));

        let err = integration
            .mutation(
                &instance(),
                "ISSUE_DELETE",
                &json!({}),
                &MemoryPipe::new(),
                &MemoryState::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::UnknownAction(_)));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn issue_create_labels_type_and_writes_issue() {
        let mock = MockTransport::new();
        mock.push_json(
            HttpMethod::Post,
            format!("{ROOT}projects/7/issues"),
            201,
            issue_json(500, 4, &["incident"]),
            None,
        );
        let pipe = MemoryPipe::new();

        let response = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_CREATE,
                &json!({ "project_ref_id": "7", "title": "Broken build", "type": "Incident" }),
                &pipe,
                &MemoryState::new(),
            )
            .await
            .unwrap();

        let sent: serde_json::Value =
            serde_json::from_slice(&mock.requests()[0].body).unwrap();
        assert_eq!(sent["labels"], json!(["incident"]));
        assert_eq!(response.ref_id, "500");
        assert_eq!(response.entity_id, ids::issue_id("cust", "500"));
        assert_eq!(
            response.url.as_deref(),
            Some("https://gitlab.com/acme/api/-/issues/4")
        );

        let written = pipe.written();
        let [Entity::Issue(issue)] = written.as_slice() else {
            panic!("expected one issue, got {written:?}");
        };
        assert_eq!(issue.issue_type, INCIDENT_ISSUE_TYPE);
        assert_eq!(issue.transitions[0].name, CLOSED_STATE);
    }

    #[tokio::test]
    async fn issue_create_rejects_unsupported_type() {
        let mock = MockTransport::new();
        let err = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_CREATE,
                &json!({ "project_ref_id": "7", "title": "Q3", "type": "Story" }),
                &MemoryPipe::new(),
                &MemoryState::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidData { .. }));
        assert!(mock.requests().is_empty());
    }

    fn project_in(kind: &str) -> serde_json::Value {
        json!({
            "id": 7, "name": "api", "path_with_namespace": "acme/api",
            "web_url": "https://gitlab.com/acme/api",
            "created_at": "2024-01-01T00:00:00Z", "last_activity_at": "2024-02-01T00:00:00Z",
            "namespace": { "id": 9, "full_path": "acme", "kind": kind }
        })
    }

    #[tokio::test]
    async fn epic_create_posts_to_the_project_group() {
        let mock = MockTransport::new();
        mock.push_json(HttpMethod::Get, format!("{ROOT}projects/7"), 200, project_in("group"), None);
        mock.push_json(
            HttpMethod::Post,
            format!("{ROOT}groups/9/epics"),
            201,
            json!({
                "id": 31, "iid": 3, "group_id": 9, "title": "Q3", "state": "opened",
                "due_date_from_inherited_source": "2024-09-30",
                "web_url": "https://gitlab.com/groups/acme/-/epics/3",
                "references": { "full": "acme&3" },
                "created_at": "2024-07-01T00:00:00Z", "updated_at": "2024-07-01T00:00:00Z"
            }),
            None,
        );
        let pipe = MemoryPipe::new();

        let response = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_CREATE,
                &json!({ "project_ref_id": "7", "title": "Q3", "type": "epic", "due_date": "2024-09-30" }),
                &pipe,
                &MemoryState::new(),
            )
            .await
            .unwrap();

        let sent: serde_json::Value = serde_json::from_slice(&mock.requests()[1].body).unwrap();
        assert_eq!(
            sent,
            json!({ "title": "Q3", "description": "", "due_date_is_fixed": true, "due_date_fixed": "2024-09-30" })
        );
        assert_eq!(response.entity_id, ids::issue_id("cust", "31"));
        let written = pipe.written();
        let [Entity::Issue(epic)] = written.as_slice() else {
            panic!("expected one epic, got {written:?}");
        };
        assert_eq!(epic.issue_type, EPIC_ISSUE_TYPE);
        assert_eq!(epic.project_ids, vec![ids::project_id("cust", "7")]);
        assert_eq!(epic.transitions[0].name, CLOSED_STATE);
    }

    #[tokio::test]
    async fn epic_create_needs_a_group() {
        let mock = MockTransport::new();
        mock.push_json(HttpMethod::Get, format!("{ROOT}projects/7"), 200, project_in("user"), None);

        let err = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_CREATE,
                &json!({ "project_ref_id": "7", "title": "Q3", "type": "Epic" }),
                &MemoryPipe::new(),
                &MemoryState::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::InvalidData { .. }));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn milestone_create_writes_a_milestone_issue() {
        let mock = MockTransport::new();
        mock.push_json(
            HttpMethod::Post,
            format!("{ROOT}projects/7/milestones"),
            201,
            json!({
                "id": 44, "title": "Sprint 9", "state": "active",
                "start_date": "2024-07-01", "due_date": "2024-07-14",
                "created_at": "2024-06-30T00:00:00Z", "updated_at": "2024-06-30T00:00:00Z",
                "web_url": "https://gitlab.com/acme/api/-/milestones/9"
            }),
            None,
        );
        let pipe = MemoryPipe::new();

        let response = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_CREATE,
                &json!({
                    "project_ref_id": "7", "title": "Sprint 9", "type": "Milestone",
                    "start_date": "2024-07-01", "due_date": "2024-07-14"
                }),
                &pipe,
                &MemoryState::new(),
            )
            .await
            .unwrap();

        let sent: serde_json::Value = serde_json::from_slice(&mock.requests()[0].body).unwrap();
        assert_eq!(sent["start_date"], "2024-07-01");
        assert_eq!(response.ref_id, "44");
        let written = pipe.written();
        let [Entity::Issue(milestone)] = written.as_slice() else {
            panic!("expected one milestone, got {written:?}");
        };
        assert_eq!(milestone.issue_type, MILESTONE_ISSUE_TYPE);
        assert_eq!(milestone.transitions[0].name, CLOSED_STATE);
    }

    #[tokio::test]
    async fn milestone_create_rejects_bad_dates() {
        let mock = MockTransport::new();
        let err = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_CREATE,
                &json!({ "project_ref_id": "7", "title": "S", "type": "Milestone", "due_date": "soon" }),
                &MemoryPipe::new(),
                &MemoryState::new(),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ExportError::InvalidData { .. }));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn issue_update_resolves_iid_from_work_manager() {
        let mock = MockTransport::new();
        let state = MemoryState::new();
        let work_manager = WorkManager::new();
        work_manager.add_issue(IssueEntry {
            issue_id: ids::issue_id("cust", "500"),
            iid: "4".into(),
            project_ref_id: "7".into(),
            open: true,
            ..IssueEntry::default()
        });
        work_manager.persist(&state).await.unwrap();
        mock.push_json(
            HttpMethod::Put,
            format!("{ROOT}projects/7/issues/4?assignee_ids=&epic_id=0&title=Renamed"),
            200,
            issue_json(500, 4, &[]),
            None,
        );

        let response = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_UPDATE,
                &json!({
                    "ref_id": "500",
                    "set": { "title": "Renamed" },
                    "unset": { "epic": true, "assignee": true }
                }),
                &MemoryPipe::new(),
                &state,
            )
            .await
            .unwrap();

        assert_eq!(response.entity_id, ids::issue_id("cust", "500"));
        assert_eq!(mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn issue_update_without_changes_sends_nothing() {
        let mock = MockTransport::new();
        let response = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_UPDATE,
                &json!({ "ref_id": "500" }),
                &MemoryPipe::new(),
                &MemoryState::new(),
            )
            .await
            .unwrap();
        assert_eq!(response.ref_id, "500");
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn issue_update_of_unknown_issue_fails() {
        let mock = MockTransport::new();
        let err = integration(&mock)
            .mutation(
                &instance(),
                ISSUE_UPDATE,
                &json!({ "ref_id": "500", "set": { "assignee_ref_id": "12" } }),
                &MemoryPipe::new(),
                &MemoryState::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ExportError::InvalidData { .. }));
    }

    #[tokio::test]
    async fn dismiss_deactivates_and_forgets_checkpoints() {
        let mock = MockTransport::new();
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}user"),
            200,
            json!({ "id": 5, "name": "Ann", "username": "ann", "is_admin": false }),
            None,
        );
        namespaces(&mock, json!([]));

        let state = MemoryState::new();
        let mut processed = BTreeMap::new();
        processed.insert(
            "70".to_string(),
            SourceCodeRepo {
                id: ids::repo_id("cust", "70"),
                ref_id: "70".into(),
                customer_id: "cust".into(),
                name: "acme/api".into(),
                active: true,
                ..Default::default()
            },
        );
        state
            .set_json(REPOS_PROJECTS_PROCESSED_KEY, &processed)
            .await
            .unwrap();
        state
            .set(LAST_EXPORT_DATE_KEY, "\"2024-01-01T00:00:00Z\"".into())
            .await
            .unwrap();
        state.set(REMAINING_PR_PAGES_KEY, "{}".into()).await.unwrap();
        WorkManager::new().persist(&state).await.unwrap();
        let pipe = MemoryPipe::new();

        let report = integration(&mock)
            .dismiss(&instance(), &pipe, &state)
            .await
            .unwrap();

        assert_eq!(report.hooks_removed, 0);
        assert_eq!(report.deactivated, 1);
        assert!(pipe.written().iter().all(|e| match e {
            Entity::Repo(repo) => !repo.active,
            Entity::Project(project) => !project.active,
            _ => false,
        }));
        assert!(state.keys().is_empty());
    }

    #[tokio::test]
    async fn enroll_requires_a_webhook_url() {
        let mock = MockTransport::new();
        let integration = GitLabIntegration::new(Arc::new(mock.clone()));
        let err = integration.enroll(&instance()).await.unwrap_err();
        assert!(matches!(err, ExportError::Config { .. }));
        assert!(mock.requests().is_empty());
    }

    #[tokio::test]
    async fn auto_configure_adds_namespaces_only_when_unset() {
        let mock = MockTransport::new();
        namespaces(
            &mock,
            json!([
                { "id": 9, "name": "Acme", "path": "acme", "full_path": "acme", "kind": "group" },
                { "id": 12, "name": "ann", "path": "ann", "full_path": "ann", "kind": "user" }
            ]),
        );
        let integration = integration(&mock);

        let config = integration.auto_configure(&instance()).await.unwrap();
        let accounts = config.accounts.as_ref().unwrap();
        assert_eq!(accounts["9"].account_type, AccountType::Org);
        assert_eq!(accounts["12"].account_type, AccountType::User);

        let configured = Instance::new(instance().tenant, config.clone());
        assert_eq!(integration.auto_configure(&configured).await.unwrap(), config);
        assert_eq!(mock.requests().len(), 1);
    }
}
