//! WORK export: projects, capabilities, users, issues, sprints and boards.
//!
//! Issues go through the first-page/continuation scheme like merge requests.
//! Boards and sprints are assembled last, once every issue is in the work
//! manager, so their columns see the whole index.

use std::collections::BTreeMap;

use chrono::Utc;
use futures::stream::{self, StreamExt, TryStreamExt};

use super::checkpoint::{PROJECT_CAPABILITY_TTL, project_capability_key};
use super::context::{Continuation, ExportContext, NamespaceTarget, RepoTarget, fetch_all};
use super::progress::ExportProgress;
use crate::api::types::{Board, Issue, Milestone};
use crate::api::{PageInfo, paginate_start_at};
use crate::changelog::{self, Usernames};
use crate::convert;
use crate::error::{ExportError, Result};
use crate::http::Params;
use crate::sdk::ids::{self, REF_TYPE};
use crate::sdk::{AgileBoard, AgileKanban, BoardType, IssueColumn, RepoAffiliation};
use crate::work_manager::{BoardColumn, ColumnQuery, ProjectStateInfo};

const OPEN_COLUMN: &str = "Open";
const CLOSED_COLUMN: &str = "Closed";

/// Write one project with its capability and users, and the first page of
/// its issues. Further issue pages are queued as a continuation.
pub async fn export_project(ctx: &ExportContext, target: &RepoTarget) -> Result<()> {
    let ref_id = target.ref_id();
    let affiliation = if target.namespace.is_group {
        RepoAffiliation::Organization
    } else {
        RepoAffiliation::User
    };
    ctx.processed.add(&convert::repo(
        &ctx.tenant,
        &target.project,
        String::new(),
        affiliation,
    ));
    ctx.write(convert::work_project(&ctx.tenant, &target.project))
        .await?;
    ctx.record_exported(target.clone());
    ctx.work_manager.add_project_details(
        ref_id.clone(),
        ProjectStateInfo {
            project_path: target.full_name().to_string(),
            group_path: target.namespace.full_path.clone(),
        },
    );

    export_capability(ctx, target).await?;

    let users = fetch_all(ctx.per_page, |params| {
        let ref_id = ref_id.clone();
        async move { ctx.client.project_users(&ref_id, &params).await }
    })
    .await?;
    for user in &users {
        ctx.write(convert::work_user(&ctx.tenant, user, true)).await?;
    }
    ctx.record_usernames(&users);

    let mut params = ctx.incremental_params();
    params.insert("page".into(), "1".into());
    let info = export_issue_page(ctx, target, params).await?;
    if let Some(next_page) = info.next_page {
        ctx.queue(Continuation::Issues {
            project: target.clone(),
            next_page,
        });
    }
    Ok(())
}

async fn export_capability(ctx: &ExportContext, target: &RepoTarget) -> Result<()> {
    let key = project_capability_key(&target.ref_id());
    if ctx.state.exists(&key).await? {
        tracing::debug!(project = %target.full_name(), "project capability already exported");
        return Ok(());
    }
    ctx.write(convert::project_capability(&ctx.tenant, &target.project))
        .await?;
    ctx.state
        .set_with_expires(&key, "true".to_string(), PROJECT_CAPABILITY_TTL)
        .await?;
    Ok(())
}

/// Fetch one page of issues, write them and index them in the work manager.
pub async fn export_issue_page(
    ctx: &ExportContext,
    target: &RepoTarget,
    params: Params,
) -> Result<PageInfo> {
    let ref_id = target.ref_id();
    let page = params.get("page").cloned().unwrap_or_default();
    let (issues, next) = ctx.client.issues(&ref_id, &params).await?;
    tracing::debug!(project = %target.full_name(), page = %page, count = issues.len(), "issues");
    ctx.emit(ExportProgress::FetchedPage {
        entity: "issues".into(),
        scope: target.full_name().to_string(),
        page,
        count: issues.len(),
    });

    let usernames = ctx.usernames();
    let exports: Vec<_> = issues
        .iter()
        .map(|issue| export_issue(ctx, target, issue, &usernames))
        .collect();
    stream::iter(exports)
        .buffer_unordered(ctx.concurrency)
        .try_collect::<Vec<()>>()
        .await?;
    Ok(PageInfo::new(next, issues.len()))
}

/// Write one issue with its changelog and links, and index it.
async fn export_issue(
    ctx: &ExportContext,
    target: &RepoTarget,
    issue: &Issue,
    usernames: &Usernames,
) -> Result<()> {
    let ref_id = target.ref_id();
    let iid = issue.iid;
    let scope = format!("{}#{iid}", target.full_name());
    let (mut item, entry) = convert::work_issue(&ctx.tenant, &ref_id, issue);

    let events = fetch_all(ctx.per_page, |params| {
        let ref_id = ref_id.clone();
        async move { ctx.client.issue_state_events(&ref_id, iid, &params).await }
    })
    .await;
    let events = skip_inaccessible(ctx, events, "state events", &scope)?;
    let notes = fetch_all(ctx.per_page, |params| {
        let ref_id = ref_id.clone();
        async move { ctx.client.issue_notes(&ref_id, iid, &params).await }
    })
    .await;
    let notes = skip_inaccessible(ctx, notes, "notes", &scope)?;
    let links = ctx
        .client
        .issue_links(&ref_id, iid)
        .await
        .map_err(ExportError::from);
    let links = skip_inaccessible(ctx, links, "links", &scope)?;

    item.change_log = changelog::issue_changelog(&events, &notes, usernames);
    item.linked_issues = links
        .iter()
        .filter_map(|link| changelog::linked_issue(&ctx.tenant, iid, link))
        .collect();
    ctx.work_manager.add_issue(entry);
    ctx.write(item).await
}

/// Issue history is optional: a missing or hidden endpoint leaves it empty.
fn skip_inaccessible<T>(
    ctx: &ExportContext,
    result: Result<Vec<T>>,
    what: &str,
    scope: &str,
) -> Result<Vec<T>> {
    match result {
        Err(e) if e.is_inaccessible() => {
            ctx.warn(format!("skipping {what} of {scope}: {e}"));
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Fetch the remaining issue pages of one project.
pub async fn continue_issues(
    ctx: &ExportContext,
    target: &RepoTarget,
    next_page: &str,
) -> Result<()> {
    paginate_start_at(Some(next_page), |mut params| async move {
        params.extend(ctx.incremental_params());
        export_issue_page(ctx, target, params).await
    })
    .await?;
    Ok(())
}

/// Boards and sprints of every exported project and group.
pub async fn export_agile(ctx: &ExportContext) -> Result<()> {
    let projects = ctx.exported();

    for target in &projects {
        let ref_id = target.ref_id();
        let project_ref_ids = vec![ref_id.clone()];
        let scope = Scope {
            kind: "projects",
            path: target.full_name(),
            project_ref_ids: &project_ref_ids,
        };

        let boards = skip_permission_issue(
            ctx,
            fetch_all(ctx.per_page, |params| {
                let ref_id = ref_id.clone();
                async move { ctx.client.project_boards(&ref_id, &params).await }
            })
            .await,
            target.full_name(),
        )?;
        let sprint_boards = export_boards(ctx, &scope, &boards).await?;

        let milestones = skip_permission_issue(
            ctx,
            fetch_all(ctx.per_page, |params| {
                let ref_id = ref_id.clone();
                async move { ctx.client.project_milestones(&ref_id, &params).await }
            })
            .await,
            target.full_name(),
        )?;
        export_milestones(ctx, &scope, &milestones, &sprint_boards).await?;
    }

    for namespace in ctx.namespaces().iter().filter(|ns| ns.is_group) {
        export_group_agile(ctx, namespace, &projects).await?;
    }
    Ok(())
}

async fn export_group_agile(
    ctx: &ExportContext,
    namespace: &NamespaceTarget,
    projects: &[RepoTarget],
) -> Result<()> {
    let project_ref_ids: Vec<String> = projects
        .iter()
        .filter(|p| p.namespace.id == namespace.id)
        .map(RepoTarget::ref_id)
        .collect();
    let scope = Scope {
        kind: "groups",
        path: &namespace.full_path,
        project_ref_ids: &project_ref_ids,
    };

    let boards = skip_permission_issue(
        ctx,
        fetch_all(ctx.per_page, |params| async move {
            ctx.client.group_boards(&namespace.id, &params).await
        })
        .await,
        &namespace.full_path,
    )?;
    let sprint_boards = export_boards(ctx, &scope, &boards).await?;

    let milestones = skip_permission_issue(
        ctx,
        fetch_all(ctx.per_page, |params| async move {
            ctx.client.group_milestones(&namespace.id, &params).await
        })
        .await,
        &namespace.full_path,
    )?;
    export_milestones(ctx, &scope, &milestones, &sprint_boards).await?;
    export_epics(ctx, namespace, &scope).await?;

    let now = Utc::now();
    for iteration in ctx.client.iterations(&namespace.full_path).await? {
        let Some(mut sprint) = convert::iteration_sprint(&ctx.tenant, &iteration, now) else {
            continue;
        };
        ctx.work_manager
            .set_sprint_columns_issues_project_ids(ctx.customer_id(), &mut sprint);
        ctx.write(sprint).await?;
    }
    Ok(())
}

/// Write the epics of a group as work issues. Groups on a tier without
/// epics answer 403 and are skipped.
async fn export_epics(
    ctx: &ExportContext,
    namespace: &NamespaceTarget,
    scope: &Scope<'_>,
) -> Result<()> {
    let epics = fetch_all(ctx.per_page, |mut params| async move {
        params.extend(ctx.incremental_params());
        ctx.client.group_epics(&namespace.id, &params).await
    })
    .await;
    let epics = match epics {
        Err(e) if e.is_inaccessible() => {
            ctx.warn(format!(
                "epics are not available for {}, it needs a valid tier: {e}",
                namespace.full_path
            ));
            return Ok(());
        }
        other => other?,
    };
    tracing::debug!(group = %namespace.full_path, count = epics.len(), "epics");

    let project_ids = scope.project_ids(ctx.customer_id());
    for epic in &epics {
        match convert::epic_issue(&ctx.tenant, epic, project_ids.clone()) {
            Ok(issue) => ctx.write(issue).await?,
            Err(e) => ctx.warn(format!("skipping epic {}: {e}", epic.title)),
        }
    }
    Ok(())
}

fn skip_permission_issue<T>(ctx: &ExportContext, result: Result<Vec<T>>, scope: &str) -> Result<Vec<T>> {
    match result {
        Err(e) if e.is_permission_warning() => {
            ctx.warn(format!("skipping agile data of {scope}: {e}"));
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Where a set of boards or milestones lives.
struct Scope<'a> {
    /// `projects` or `groups`, as in GitLab web URLs.
    kind: &'static str,
    path: &'a str,
    project_ref_ids: &'a [String],
}

impl Scope<'_> {
    fn project_ids(&self, customer_id: &str) -> Vec<String> {
        self.project_ref_ids
            .iter()
            .map(|ref_id| ids::project_id(customer_id, ref_id))
            .collect()
    }
}

/// Write the boards of one scope. Returns the board IDs of each milestone
/// that has a scrum board.
async fn export_boards(
    ctx: &ExportContext,
    scope: &Scope<'_>,
    boards: &[Board],
) -> Result<BTreeMap<i64, Vec<String>>> {
    let mut sprint_boards: BTreeMap<i64, Vec<String>> = BTreeMap::new();
    for board in boards {
        tracing::info!(board = %board.name, scope = %scope.path, "exporting board");
        let (agile_board, kanban) = convert_board(ctx, scope, board);
        if let Some(milestone) = &board.milestone {
            sprint_boards
                .entry(milestone.id)
                .or_default()
                .push(agile_board.id.clone());
        }
        if let Some(kanban) = kanban {
            ctx.write(kanban).await?;
        }
        ctx.write(agile_board).await?;
    }
    Ok(sprint_boards)
}

/// A board as an [`AgileBoard`], plus an [`AgileKanban`] with its issue
/// columns when the board has no milestone.
fn convert_board(
    ctx: &ExportContext,
    scope: &Scope<'_>,
    board: &Board,
) -> (AgileBoard, Option<AgileKanban>) {
    let customer = ctx.customer_id();
    let ref_id = board.id.to_string();
    let url = format!(
        "{}/{}/{}/-/boards/{}",
        ctx.client.base_url(),
        scope.kind,
        scope.path,
        board.id
    );
    let project_ids = scope.project_ids(customer);
    let now = Utc::now().timestamp_millis();

    let mut columns: Vec<(String, BoardColumn)> =
        vec![(OPEN_COLUMN.to_string(), BoardColumn::Open)];
    columns.extend(
        board
            .list_labels()
            .map(|label| (label.name.clone(), BoardColumn::Label(label.id))),
    );
    columns.push((CLOSED_COLUMN.to_string(), BoardColumn::Closed));

    let agile_board = AgileBoard {
        id: ids::board_id(customer, &ref_id),
        ref_id: ref_id.clone(),
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.to_string(),
        integration_instance_id: ctx.tenant.integration_instance_id.clone(),
        name: board.name.clone(),
        board_type: if board.milestone.is_some() {
            BoardType::Scrum
        } else {
            BoardType::Kanban
        },
        columns: columns.iter().map(|(name, _)| name.clone()).collect(),
        backlog_issue_ids: Vec::new(),
        project_ids: project_ids.clone(),
        url: url.clone(),
        active: true,
        updated_at: now,
    };
    if board.milestone.is_some() {
        return (agile_board, None);
    }

    let board_label_ids: Vec<i64> = board.labels.iter().map(|l| l.id).collect();
    let list_label_ids: Vec<i64> = board.list_labels().map(|l| l.id).collect();
    let kanban_columns: Vec<IssueColumn> = columns
        .into_iter()
        .map(|(name, column)| IssueColumn {
            name,
            issue_ids: ctx.work_manager.get_board_column_issues(&ColumnQuery {
                project_ref_ids: scope.project_ref_ids,
                milestone_ref_id: None,
                board_label_ids: &board_label_ids,
                list_label_ids: &list_label_ids,
                column,
                assignee_id: board.assignee.as_ref().map(|a| a.id),
                weight: board.weight,
            }),
        })
        .collect();

    let kanban = AgileKanban {
        id: ids::kanban_id(customer, &ref_id),
        ref_id,
        ref_type: REF_TYPE.to_string(),
        customer_id: customer.to_string(),
        integration_instance_id: ctx.tenant.integration_instance_id.clone(),
        name: board.name.clone(),
        board_id: agile_board.id.clone(),
        issue_ids: kanban_columns
            .iter()
            .flat_map(|c| c.issue_ids.iter().cloned())
            .collect(),
        columns: kanban_columns,
        project_ids,
        url,
        active: true,
        updated_at: now,
    };
    (agile_board, Some(kanban))
}

/// Write each milestone as a sprint and as a work issue.
async fn export_milestones(
    ctx: &ExportContext,
    scope: &Scope<'_>,
    milestones: &[Milestone],
    sprint_boards: &BTreeMap<i64, Vec<String>>,
) -> Result<()> {
    let now = Utc::now();
    let project_ids = scope.project_ids(ctx.customer_id());
    for milestone in milestones {
        if let Some(mut sprint) = convert::milestone_sprint(&ctx.tenant, milestone, now) {
            sprint.project_ids = project_ids.clone();
            sprint.board_ids = sprint_boards.get(&milestone.id).cloned().unwrap_or_default();
            ctx.write(sprint).await?;
        }
        match convert::milestone_issue(&ctx.tenant, milestone, project_ids.clone()) {
            Ok(issue) => ctx.write(issue).await?,
            Err(e) => ctx.warn(format!("skipping milestone {}: {e}", milestone.title)),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::test_support::{context, project_json, target};
    use crate::http::{HttpMethod, MockTransport};
    use crate::sdk::{Entity, MemoryState, State};
    use serde_json::json;

    const ROOT: &str = "https://gitlab.com/api/v4/";

    fn issue(iid: i64, state: &str, labels: serde_json::Value) -> serde_json::Value {
        json!({
            "id": 1000 + iid, "iid": iid, "project_id": 7, "title": format!("Issue {iid}"),
            "state": state, "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z",
            "labels": labels, "author": { "id": 1 },
            "web_url": format!("https://gitlab.com/acme/api/-/issues/{iid}"),
            "references": { "full": format!("acme/api#{iid}") }
        })
    }

    fn mock_project(mock: &MockTransport, issues: serde_json::Value, next: Option<&str>) {
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}projects/7/users?page=1&per_page=100"),
            200,
            json!([{ "id": 2, "name": "Dev", "username": "dev" }]),
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            &format!(
                "{ROOT}projects/7/issues?page=1&per_page=100&scope=all&with_labels_details=true"
            ),
            200,
            issues,
            next,
        );
    }

    fn mock_history(
        mock: &MockTransport,
        iid: i64,
        events: serde_json::Value,
        notes: serde_json::Value,
        links: serde_json::Value,
    ) {
        let issue = format!("{ROOT}projects/7/issues/{iid}");
        mock.push_json(
            HttpMethod::Get,
            &format!("{issue}/resource_state_events?page=1&per_page=100"),
            200,
            events,
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            &format!("{issue}/notes?page=1&per_page=100"),
            200,
            notes,
            None,
        );
        mock.push_json(HttpMethod::Get, &format!("{issue}/links"), 200, links, None);
    }

    fn mock_no_history(mock: &MockTransport, iid: i64) {
        mock_history(mock, iid, json!([]), json!([]), json!([]));
    }

    #[tokio::test]
    async fn project_export_indexes_issues_and_writes_capability_once() {
        let mock = MockTransport::new();
        mock_project(
            &mock,
            json!([issue(1, "opened", json!([{ "id": 10, "name": "doing" }]))]),
            Some("2"),
        );
        mock_no_history(&mock, 1);
        mock_project(&mock, json!([]), None);
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);
        let project = target(project_json(7, "api"));

        export_project(&ctx, &project).await.unwrap();
        export_project(&ctx, &project).await.unwrap();

        match pipe.of_model("work.ProjectCapability").as_slice() {
            [Entity::ProjectCapability(c)] => {
                assert!(c.change_logs && c.linked_issues && c.epics && c.parents);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(pipe.of_model("work.Project").len(), 2);
        assert_eq!(pipe.of_model("work.User").len(), 2);
        assert!(ctx.state.exists("project_capability_7").await.unwrap());

        let issue_id = ids::issue_id("cust", "1001");
        let info = ctx.work_manager.get_issue_iid(&issue_id).unwrap();
        assert_eq!(info.iid, "1");
        assert_eq!(info.project_ref_id, "7");
        assert!(matches!(
            ctx.take_continuations().as_slice(),
            [Continuation::Issues { next_page, .. }] if next_page == "2"
        ));
    }

    #[tokio::test]
    async fn kanban_columns_place_each_issue_once() {
        let mock = MockTransport::new();
        mock_project(
            &mock,
            json!([
                issue(1, "opened", json!([{ "id": 10, "name": "doing" }])),
                issue(2, "opened", json!([])),
                issue(3, "closed", json!([]))
            ]),
            None,
        );
        for iid in 1..=3 {
            mock_no_history(&mock, iid);
        }
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}projects/7/boards?page=1&per_page=100"),
            200,
            json!([{ "id": 5, "name": "Dev", "lists": [{ "label": { "id": 10, "name": "doing" } }] }]),
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}projects/7/milestones?page=1&per_page=100"),
            200,
            json!([]),
            None,
        );
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);
        export_project(&ctx, &target(project_json(7, "api")))
            .await
            .unwrap();

        export_agile(&ctx).await.unwrap();

        let kanban = match pipe.of_model("agile.Kanban").as_slice() {
            [Entity::Kanban(k)] => k.clone(),
            other => panic!("unexpected {other:?}"),
        };
        let columns: Vec<(&str, Vec<String>)> = kanban
            .columns
            .iter()
            .map(|c| (c.name.as_str(), c.issue_ids.clone()))
            .collect();
        assert_eq!(
            columns,
            vec![
                ("Open", vec![ids::issue_id("cust", "1002")]),
                ("doing", vec![ids::issue_id("cust", "1001")]),
                ("Closed", vec![ids::issue_id("cust", "1003")]),
            ]
        );
        assert_eq!(kanban.url, "https://gitlab.com/projects/acme/api/-/boards/5");

        match pipe.of_model("agile.Board").as_slice() {
            [Entity::Board(b)] => {
                assert_eq!(b.board_type, BoardType::Kanban);
                assert_eq!(b.columns, vec!["Open", "doing", "Closed"]);
                assert_eq!(kanban.board_id, b.id);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn issues_carry_changelog_and_supported_links() {
        let mock = MockTransport::new();
        mock_project(&mock, json!([issue(1, "closed", json!([]))]), None);
        mock_history(
            &mock,
            1,
            json!([{
                "id": 70, "user": { "id": 2 }, "state": "closed",
                "created_at": "2024-01-03T00:00:00Z"
            }]),
            json!([
                {
                    "id": 80, "body": "assigned to @dev", "author": { "id": 1 }, "system": true,
                    "created_at": "2024-01-02T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z"
                },
                {
                    "id": 81, "body": "looks good", "author": { "id": 1 }, "system": false,
                    "created_at": "2024-01-02T01:00:00Z", "updated_at": "2024-01-02T01:00:00Z"
                }
            ]),
            json!([
                { "id": 1002, "issue_link_id": 55, "link_type": "is_blocked_by",
                  "references": { "full": "acme/api#2" } },
                { "id": 1003, "issue_link_id": 56, "link_type": "duplicates",
                  "references": { "full": "acme/api#3" } }
            ]),
        );
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);

        export_project(&ctx, &target(project_json(7, "api")))
            .await
            .unwrap();

        let item = match pipe.of_model("work.Issue").as_slice() {
            [Entity::Issue(i)] => i.clone(),
            other => panic!("unexpected {other:?}"),
        };
        let log: Vec<(&str, &str, i64)> = item
            .change_log
            .iter()
            .map(|c| (c.ref_id.as_str(), c.to.as_str(), c.ordinal))
            .collect();
        assert_eq!(log, vec![("80", "2", 1), ("70", "Closed", 2)]);
        assert_eq!(item.transitions[0].name, "Opened");

        match item.linked_issues.as_slice() {
            [link] => {
                assert_eq!(link.issue_id, ids::issue_id("cust", "1002"));
                assert!(link.reverse_direction);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn hidden_issue_history_is_skipped_with_a_warning() {
        let mock = MockTransport::new();
        mock_project(&mock, json!([issue(1, "opened", json!([]))]), None);
        let history = format!("{ROOT}projects/7/issues/1");
        mock.push_json(
            HttpMethod::Get,
            &format!("{history}/resource_state_events?page=1&per_page=100"),
            403,
            json!({ "message": "403 Forbidden" }),
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            &format!("{history}/notes?page=1&per_page=100"),
            200,
            json!([]),
            None,
        );
        mock.push_json(HttpMethod::Get, &format!("{history}/links"), 200, json!([]), None);
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);

        export_project(&ctx, &target(project_json(7, "api")))
            .await
            .unwrap();

        assert_eq!(pipe.of_model("work.Issue").len(), 1);
        assert!(ctx.warnings().iter().any(|w| w.contains("state events of acme/api#1")));
    }

    #[tokio::test]
    async fn group_epics_are_issues_of_the_group_projects() {
        let mock = MockTransport::new();
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);
        let project = target(project_json(7, "api"));
        let scope_ids = vec![project.ref_id()];
        let scope = Scope {
            kind: "groups",
            path: "acme",
            project_ref_ids: &scope_ids,
        };
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}groups/9/epics?page=1&per_page=100"),
            200,
            json!([{
                "id": 30, "iid": 1, "group_id": 9, "title": "Launch", "state": "opened",
                "web_url": "https://gitlab.com/groups/acme/-/epics/1",
                "references": { "full": "acme&1" },
                "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z"
            }]),
            None,
        );

        export_epics(&ctx, &project.namespace, &scope).await.unwrap();

        match pipe.of_model("work.Issue").as_slice() {
            [Entity::Issue(i)] => {
                assert_eq!(i.issue_type, "Epic");
                assert_eq!(i.identifier, "acme&1");
                assert_eq!(i.project_ids, vec![ids::project_id("cust", "7")]);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn groups_without_epics_are_skipped() {
        let mock = MockTransport::new();
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);
        let project = target(project_json(7, "api"));
        let scope = Scope {
            kind: "groups",
            path: "acme",
            project_ref_ids: &[],
        };
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}groups/9/epics?page=1&per_page=100"),
            403,
            json!({ "message": "403 Forbidden" }),
            None,
        );

        export_epics(&ctx, &project.namespace, &scope).await.unwrap();

        assert!(pipe.of_model("work.Issue").is_empty());
        assert!(ctx.warnings()[0].starts_with("epics are not available for acme"));
    }

    #[tokio::test]
    async fn milestone_boards_are_scrum_and_linked_to_the_sprint() {
        let mock = MockTransport::new();
        mock_project(&mock, json!([]), None);
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}projects/7/boards?page=1&per_page=100"),
            200,
            json!([{ "id": 6, "name": "Sprint", "milestone": { "id": 40, "title": "M1" } }]),
            None,
        );
        mock.push_json(
            HttpMethod::Get,
            &format!("{ROOT}projects/7/milestones?page=1&per_page=100"),
            200,
            json!([{
                "id": 40, "title": "M1", "state": "active",
                "created_at": "2024-01-01T00:00:00Z", "updated_at": "2024-01-02T00:00:00Z",
                "start_date": "2024-01-01", "due_date": "2024-01-14",
                "web_url": "https://gitlab.com/acme/api/-/milestones/1"
            }]),
            None,
        );
        let (ctx, pipe) = context(&mock, MemoryState::new(), None);
        export_project(&ctx, &target(project_json(7, "api")))
            .await
            .unwrap();

        export_agile(&ctx).await.unwrap();

        assert!(pipe.of_model("agile.Kanban").is_empty());
        let board_id = match pipe.of_model("agile.Board").as_slice() {
            [Entity::Board(b)] => {
                assert_eq!(b.board_type, BoardType::Scrum);
                b.id.clone()
            }
            other => panic!("unexpected {other:?}"),
        };
        match pipe.of_model("agile.Sprint").as_slice() {
            [Entity::Sprint(s)] => {
                assert_eq!(s.board_ids, vec![board_id]);
                assert_eq!(s.project_ids, vec![ids::project_id("cust", "7")]);
            }
            other => panic!("unexpected {other:?}"),
        }
        let milestone_issues: Vec<_> = pipe
            .of_model("work.Issue")
            .into_iter()
            .filter(|e| matches!(e, Entity::Issue(i) if i.issue_type == "Milestone"))
            .collect();
        assert_eq!(milestone_issues.len(), 1);
    }
}
