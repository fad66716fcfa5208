//! Installing and removing the connector's webhooks.
//!
//! Hooks go at the widest scope the token allows: a system hook on a
//! self-managed server when the user is an admin, a group hook for groups the
//! user owns, and project hooks for the projects of every other namespace.
//! A hook belongs to an integration instance when its URL contains the
//! instance ID. Hooks from an older [`HOOK_VERSION`] are replaced.

use std::fmt;

use crate::api::types::{LoginUser, Namespace, Project, access_level};
use crate::api::{GitLabClient, HookScope};
use crate::error::{ExportError, Result};
use crate::export::context::fetch_all;

/// Bumped when the subscribed events change, so installed hooks are replaced.
pub const HOOK_VERSION: &str = "1";

/// Callback URL for one scope: the host's base URL plus the instance ID, the
/// scope and the hook version as query parameters.
pub fn callback_url(base: &str, scope: &HookScope, instance_id: &str) -> Result<String> {
    let mut url = url::Url::parse(base)
        .map_err(|e| ExportError::config(format!("invalid webhook url {base}: {e}")))?;
    url.query_pairs_mut()
        .append_pair("integration_instance_id", instance_id)
        .append_pair("scope", scope.as_str())
        .append_pair("version", HOOK_VERSION);
    Ok(url.to_string())
}

fn is_current(hook_url: &str) -> bool {
    url::Url::parse(hook_url).is_ok_and(|url| {
        url.query_pairs()
            .any(|(k, v)| k == "version" && v == HOOK_VERSION)
    })
}

struct ScopeLabel<'a>(&'a HookScope);

impl fmt::Display for ScopeLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            HookScope::System => f.write_str("system"),
            HookScope::Group(id) => write!(f, "group {id}"),
            HookScope::Project(id) => write!(f, "project {id}"),
        }
    }
}

/// Outcome of [`register`], by scope label such as `group 9`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationReport {
    pub created: Vec<String>,
    pub reused: Vec<String>,
    pub failed: Vec<String>,
}

enum Installed {
    Created,
    Reused,
}

/// Where to register and for whom.
#[derive(Debug, Clone, Copy)]
pub struct HookTarget<'a> {
    /// Host URL deliveries are posted to.
    pub callback_base: &'a str,
    pub instance_id: &'a str,
    pub per_page: u32,
}

async fn ensure_hook(
    client: &GitLabClient,
    scope: &HookScope,
    target: HookTarget<'_>,
) -> Result<Installed> {
    let hooks = fetch_all(target.per_page, |params| async move {
        client.hooks(scope, &params).await
    })
    .await?;
    for hook in hooks.iter().filter(|h| h.url.contains(target.instance_id)) {
        if is_current(&hook.url) {
            tracing::debug!(scope = %ScopeLabel(scope), hook = hook.id, "webhook already installed");
            return Ok(Installed::Reused);
        }
        tracing::info!(scope = %ScopeLabel(scope), hook = hook.id, "replacing outdated webhook");
        client.delete_hook(scope, hook.id).await?;
    }
    let url = callback_url(target.callback_base, scope, target.instance_id)?;
    let hook = client.create_hook(scope, &url).await?;
    tracing::info!(scope = %ScopeLabel(scope), hook = hook.id, "webhook created");
    Ok(Installed::Created)
}

async fn top_level_namespaces(client: &GitLabClient, per_page: u32) -> Result<Vec<Namespace>> {
    let namespaces = fetch_all(per_page, |params| async move {
        client.namespaces(&params).await
    })
    .await?;
    Ok(namespaces.into_iter().filter(Namespace::is_top_level).collect())
}

async fn namespace_projects(
    client: &GitLabClient,
    namespace: &Namespace,
    per_page: u32,
) -> Result<Vec<Project>> {
    let id = namespace.id.to_string();
    let id = id.as_str();
    let projects = fetch_all(per_page, |params| async move {
        if namespace.is_group() {
            client.group_projects(id, &params).await
        } else {
            client.user_projects(&namespace.full_path, &params).await
        }
    })
    .await?;
    Ok(projects.into_iter().filter(|p| !p.archived).collect())
}

/// Whether group hooks can be installed, logging why not.
async fn can_hook_group(client: &GitLabClient, user: &LoginUser, group: &Namespace) -> bool {
    if !group.valid_tier {
        tracing::info!(group = %group.full_path, "group hooks are not available on this tier, using project hooks");
        return false;
    }
    match client.group_member(&group.id.to_string(), user.id).await {
        Ok(member) if member.access_level >= access_level::OWNER => true,
        Ok(member) => {
            tracing::warn!(
                group = %group.full_path,
                user = %user.username,
                access_level = member.access_level,
                "owner access is needed for group hooks, using project hooks"
            );
            false
        }
        Err(e) => {
            tracing::warn!(group = %group.full_path, error = %e, "could not read group access level, using project hooks");
            false
        }
    }
}

/// Install hooks for every namespace the token can see.
///
/// A failing system hook aborts registration. Group failures fall back to
/// project hooks and project failures are reported without aborting.
pub async fn register(client: &GitLabClient, target: HookTarget<'_>) -> Result<RegistrationReport> {
    let user = client.login_user().await?;
    let mut report = RegistrationReport::default();
    let mut record = |scope: &HookScope, installed: Installed| {
        let label = ScopeLabel(scope).to_string();
        match installed {
            Installed::Created => report.created.push(label),
            Installed::Reused => report.reused.push(label),
        }
    };

    if !client.is_cloud() && user.is_admin {
        let installed = ensure_hook(client, &HookScope::System, target).await?;
        record(&HookScope::System, installed);
    }

    let mut fallback = Vec::new();
    for namespace in top_level_namespaces(client, target.per_page).await? {
        if !namespace.is_group() || !can_hook_group(client, &user, &namespace).await {
            fallback.push(namespace);
            continue;
        }
        let scope = HookScope::Group(namespace.id.to_string());
        match ensure_hook(client, &scope, target).await {
            Ok(installed) => record(&scope, installed),
            Err(e) => {
                tracing::warn!(group = %namespace.full_path, error = %e, "could not create group webhook, using project hooks");
                fallback.push(namespace);
            }
        }
    }

    let mut failed = Vec::new();
    for namespace in &fallback {
        for project in namespace_projects(client, namespace, target.per_page).await? {
            let scope = HookScope::Project(project.id.to_string());
            match ensure_hook(client, &scope, target).await {
                Ok(installed) => record(&scope, installed),
                Err(e) => {
                    tracing::warn!(project = %project.path_with_namespace, error = %e, "could not create project webhook");
                    failed.push(ScopeLabel(&scope).to_string());
                }
            }
        }
    }
    report.failed = failed;

    tracing::info!(
        created = report.created.len(),
        reused = report.reused.len(),
        failed = report.failed.len(),
        "webhook registration finished"
    );
    Ok(report)
}

async fn remove_hooks(client: &GitLabClient, scope: &HookScope, target: HookTarget<'_>) -> Result<usize> {
    let hooks = fetch_all(target.per_page, |params| async move {
        client.hooks(scope, &params).await
    })
    .await?;
    let mut removed = 0;
    for hook in hooks.iter().filter(|h| h.url.contains(target.instance_id)) {
        client.delete_hook(scope, hook.id).await?;
        removed += 1;
    }
    Ok(removed)
}

/// Remove this instance's hooks from every scope. Failures are logged and do
/// not stop the sweep. Returns how many hooks were removed.
pub async fn unregister(client: &GitLabClient, target: HookTarget<'_>) -> Result<usize> {
    let user = client.login_user().await?;
    let mut scopes = Vec::new();
    if !client.is_cloud() && user.is_admin {
        scopes.push(HookScope::System);
    }
    for namespace in top_level_namespaces(client, target.per_page).await? {
        if namespace.is_group() {
            scopes.push(HookScope::Group(namespace.id.to_string()));
        }
        match namespace_projects(client, &namespace, target.per_page).await {
            Ok(projects) => scopes.extend(
                projects
                    .iter()
                    .map(|p| HookScope::Project(p.id.to_string())),
            ),
            Err(e) => {
                tracing::warn!(namespace = %namespace.full_path, error = %e, "could not list projects to unregister webhooks");
            }
        }
    }

    let mut removed = 0;
    for scope in &scopes {
        match remove_hooks(client, scope, target).await {
            Ok(count) => removed += count,
            Err(e) => {
                tracing::warn!(scope = %ScopeLabel(scope), error = %e, "could not unregister webhook");
            }
        }
    }
    tracing::info!(removed, "webhooks unregistered");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::client;
    use crate::http::{HttpMethod, HttpResponse, MockTransport};
    use serde_json::json;

    const ROOT: &str = "https://gitlab.com/api/v4/";

    fn target() -> HookTarget<'static> {
        HookTarget {
            callback_base: "https://events.example.com/hook",
            instance_id: "inst-1",
            per_page: 100,
        }
    }

    fn login(mock: &MockTransport) {
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}user"),
            200,
            json!({ "id": 5, "name": "Ann", "username": "ann", "is_admin": false }),
            None,
        );
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

    fn group(id: i64, path: &str) -> serde_json::Value {
        json!({
            "id": id, "name": path, "path": path, "full_path": path, "kind": "group",
            "members_count_with_descendants": 3
        })
    }

    fn hooks(mock: &MockTransport, scope_path: &str, items: serde_json::Value) {
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}{scope_path}/hooks?page=1&per_page=100"),
            200,
            items,
            None,
        );
    }

    fn no_content() -> HttpResponse {
        HttpResponse {
            status: 204,
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    #[test]
    fn callback_url_carries_instance_scope_and_version() {
        let url = callback_url("https://events.example.com/hook", &HookScope::Group("9".into()), "inst-1")
            .unwrap();
        assert_eq!(
            url,
            "https://events.example.com/hook?integration_instance_id=inst-1&scope=org&version=1"
        );
        assert!(is_current(&url));
        assert!(!is_current("https://events.example.com/hook?integration_instance_id=inst-1"));
    }

    #[tokio::test]
    async fn owned_group_reuses_current_hook() {
        let mock = MockTransport::new();
        login(&mock);
        namespaces(&mock, json!([group(9, "acme")]));
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9/members/all/5"),
            200,
            json!({ "id": 5, "username": "ann", "access_level": 50 }),
            None,
        );
        let existing = callback_url(target().callback_base, &HookScope::Group("9".into()), "inst-1").unwrap();
        hooks(&mock, "groups/9", json!([{ "id": 3, "url": existing }]));

        let report = register(&client(&mock), target()).await.unwrap();

        assert_eq!(report.reused, vec!["group 9"]);
        assert!(report.created.is_empty());
        assert_eq!(mock.count(HttpMethod::Post, &format!("{ROOT}groups/9/hooks")), 0);
    }

    #[tokio::test]
    async fn outdated_hook_is_replaced() {
        let mock = MockTransport::new();
        login(&mock);
        namespaces(&mock, json!([group(9, "acme")]));
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9/members/all/5"),
            200,
            json!({ "id": 5, "username": "ann", "access_level": 50 }),
            None,
        );
        hooks(
            &mock,
            "groups/9",
            json!([{ "id": 3, "url": "https://events.example.com/hook?integration_instance_id=inst-1&version=0" }]),
        );
        mock.push_response(HttpMethod::Delete, format!("{ROOT}groups/9/hooks/3"), no_content());
        mock.push_json(
            HttpMethod::Post,
            format!("{ROOT}groups/9/hooks"),
            201,
            json!({ "id": 4, "url": "new" }),
            None,
        );

        let report = register(&client(&mock), target()).await.unwrap();

        assert_eq!(report.created, vec!["group 9"]);
        assert_eq!(mock.count(HttpMethod::Delete, &format!("{ROOT}groups/9/hooks/3")), 1);
        let created = mock
            .requests()
            .into_iter()
            .find(|r| r.method == HttpMethod::Post)
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&created.body).unwrap();
        assert_eq!(body["merge_requests_events"], true);
        assert!(body["url"].as_str().unwrap().contains("version=1"));
    }

    #[tokio::test]
    async fn non_owner_falls_back_to_project_hooks() {
        let mock = MockTransport::new();
        login(&mock);
        namespaces(&mock, json!([group(9, "acme")]));
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9/members/all/5"),
            200,
            json!({ "id": 5, "username": "ann", "access_level": 30 }),
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9/projects?include_subgroups=true&page=1&per_page=100&with_shared=no"),
            200,
            json!([
                { "id": 7, "name": "api", "path_with_namespace": "acme/api", "web_url": "w",
                  "created_at": "2024-01-01T00:00:00Z", "last_activity_at": "2024-01-01T00:00:00Z" },
                { "id": 8, "name": "web", "path_with_namespace": "acme/web", "web_url": "w",
                  "created_at": "2024-01-01T00:00:00Z", "last_activity_at": "2024-01-01T00:00:00Z" }
            ]),
            None,
        );
        hooks(&mock, "projects/7", json!([]));
        mock.push_json(
            HttpMethod::Post,
            format!("{ROOT}projects/7/hooks"),
            201,
            json!({ "id": 11, "url": "new" }),
            None,
        );
        hooks(&mock, "projects/8", json!([]));
        mock.push_json(
            HttpMethod::Post,
            format!("{ROOT}projects/8/hooks"),
            403,
            json!({ "message": "403 Forbidden" }),
            None,
        );

        let report = register(&client(&mock), target()).await.unwrap();

        assert_eq!(report.created, vec!["project 7"]);
        assert_eq!(report.failed, vec!["project 8"]);
    }

    #[tokio::test]
    async fn unregister_continues_past_failures() {
        let mock = MockTransport::new();
        login(&mock);
        namespaces(&mock, json!([group(9, "acme")]));
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9/projects?include_subgroups=true&page=1&per_page=100&with_shared=no"),
            200,
            json!([
                { "id": 7, "name": "api", "path_with_namespace": "acme/api", "web_url": "w",
                  "created_at": "2024-01-01T00:00:00Z", "last_activity_at": "2024-01-01T00:00:00Z" }
            ]),
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            format!("{ROOT}groups/9/hooks?page=1&per_page=100"),
            403,
            json!({ "message": "403 Forbidden" }),
            None,
        );
        hooks(
            &mock,
            "projects/7",
            json!([
                { "id": 12, "url": "https://events.example.com/hook?integration_instance_id=inst-1&version=1" },
                { "id": 13, "url": "https://ci.example.com/other" }
            ]),
        );
        mock.push_response(HttpMethod::Delete, format!("{ROOT}projects/7/hooks/12"), no_content());

        let removed = unregister(&client(&mock), target()).await.unwrap();

        assert_eq!(removed, 1);
        assert_eq!(mock.count(HttpMethod::Delete, &format!("{ROOT}projects/7/hooks/13")), 0);
    }
}
