//! Export checkpoints kept in the host state store.
//!
//! Three records survive between runs:
//!
//! - `last_export_date`: start time of the previous successful export.
//! - `remaining_pr_pages`: merge request pages a failed continuation pass did
//!   not reach, resumed first by the next export.
//! - `repos_projects_processed`: every repo exported so far, so repos that
//!   disappear can be written once more as inactive.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::error::{ExportError, Result};
use crate::sdk::ids::{self, REF_TYPE};
use crate::sdk::{Entity, Pipe, SourceCodeRepo, State, WorkProject, get_json, set_json};

pub const LAST_EXPORT_DATE_KEY: &str = "last_export_date";
pub const REMAINING_PR_PAGES_KEY: &str = "remaining_pr_pages";
pub const REPOS_PROJECTS_PROCESSED_KEY: &str = "repos_projects_processed";

/// How long a written project capability suppresses rewriting it.
pub const PROJECT_CAPABILITY_TTL: Duration = Duration::from_secs(30 * 24 * 60 * 60);

pub fn project_capability_key(project_ref_id: &str) -> String {
    format!("project_capability_{project_ref_id}")
}

/// Where the previous export stopped. `None` means export everything.
///
/// A historical export ignores the stored date. An absent date also forces a
/// historical export; a date that does not parse aborts the run.
pub async fn load_last_export_date(
    state: &dyn State,
    historical: bool,
) -> Result<Option<DateTime<Utc>>> {
    if historical {
        return Ok(None);
    }
    let Some(raw) = state.get(LAST_EXPORT_DATE_KEY).await? else {
        return Ok(None);
    };
    // Stored either as a bare RFC3339 string or as its JSON encoding.
    let value = serde_json::from_str::<String>(&raw).unwrap_or(raw);
    DateTime::parse_from_rfc3339(&value)
        .map(|d| Some(d.with_timezone(&Utc)))
        .map_err(|source| ExportError::InvalidLastExportDate { value, source })
}

pub async fn save_last_export_date(state: &dyn State, started: DateTime<Utc>) -> Result<()> {
    set_json(state, LAST_EXPORT_DATE_KEY, &started.to_rfc3339()).await?;
    Ok(())
}

/// Merge request pages still to be fetched for one repo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemainingPrPages {
    pub repo_full_name: String,
    pub project_id: i64,
    /// `updated_after` bound the pages were listed with. Empty when historical.
    #[serde(default)]
    pub last_updated_at: String,
    /// Page to resume from.
    pub page: String,
}

/// Serialized read-modify-write access to `remaining_pr_pages`.
pub struct RemainingPrPagesStore<'a> {
    state: &'a dyn State,
    lock: Mutex<()>,
}

impl<'a> RemainingPrPagesStore<'a> {
    pub fn new(state: &'a dyn State) -> Self {
        Self {
            state,
            lock: Mutex::new(()),
        }
    }

    /// Stored entries keyed by repo ref ID.
    pub async fn load(&self) -> Result<BTreeMap<String, RemainingPrPages>> {
        Ok(get_json(self.state, REMAINING_PR_PAGES_KEY)
            .await?
            .unwrap_or_default())
    }

    /// Record where a failed pass for `repo_ref_id` has to resume.
    pub async fn append(&self, repo_ref_id: &str, entry: RemainingPrPages) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut all = self.load().await?;
        tracing::debug!(repo = %entry.repo_full_name, page = %entry.page, "saving remaining merge request pages");
        all.insert(repo_ref_id.to_string(), entry);
        set_json(self.state, REMAINING_PR_PAGES_KEY, &all).await?;
        Ok(())
    }

    /// Forget the entry of a repo whose pages were all fetched.
    pub async fn remove(&self, repo_ref_id: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut all = self.load().await?;
        if all.remove(repo_ref_id).is_some() {
            set_json(self.state, REMAINING_PR_PAGES_KEY, &all).await?;
        }
        Ok(())
    }
}

fn project_from_repo(repo: &SourceCodeRepo) -> WorkProject {
    WorkProject {
        id: ids::project_id(&repo.customer_id, &repo.ref_id),
        ref_id: repo.ref_id.clone(),
        ref_type: REF_TYPE.to_string(),
        customer_id: repo.customer_id.clone(),
        integration_instance_id: repo.integration_instance_id.clone(),
        name: repo.name.clone(),
        identifier: repo.name.clone(),
        description: repo.description.clone(),
        url: repo.url.clone(),
        active: repo.active,
        updated_at: repo.updated_at,
    }
}

async fn deactivate(pipe: &dyn Pipe, mut repo: SourceCodeRepo) -> Result<()> {
    repo.active = false;
    repo.updated_at = Utc::now().timestamp_millis();
    let project = project_from_repo(&repo);
    tracing::info!(repo = %repo.name, "deactivating repo");
    pipe.write(Entity::Repo(repo)).await?;
    pipe.write(Entity::Project(project)).await?;
    Ok(())
}

/// Repos seen by this run, reconciled with `repos_projects_processed`.
#[derive(Default)]
pub struct ProcessedRepos {
    current: parking_lot::Mutex<BTreeMap<String, SourceCodeRepo>>,
}

impl ProcessedRepos {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, repo: &SourceCodeRepo) {
        self.current.lock().insert(repo.ref_id.clone(), repo.clone());
    }

    pub fn len(&self) -> usize {
        self.current.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Merge this run's repos into state.
    ///
    /// With `deactivate_missing`, stored repos this run did not see are
    /// written as inactive and dropped. Incremental runs only see recently
    /// active repos, so they merge without deactivating. Returns the number
    /// deactivated.
    pub async fn persist(
        &self,
        state: &dyn State,
        pipe: &dyn Pipe,
        deactivate_missing: bool,
    ) -> Result<usize> {
        let current = self.current.lock().clone();
        let mut stored: BTreeMap<String, SourceCodeRepo> =
            get_json(state, REPOS_PROJECTS_PROCESSED_KEY)
                .await?
                .unwrap_or_default();

        let mut deactivated = 0;
        if deactivate_missing {
            let missing: Vec<String> = stored
                .keys()
                .filter(|ref_id| !current.contains_key(*ref_id))
                .cloned()
                .collect();
            for ref_id in missing {
                if let Some(repo) = stored.remove(&ref_id) {
                    deactivate(pipe, repo).await?;
                    deactivated += 1;
                }
            }
        }
        stored.extend(current);
        set_json(state, REPOS_PROJECTS_PROCESSED_KEY, &stored).await?;
        Ok(deactivated)
    }

    /// Deactivate every stored repo and drop the key.
    pub async fn deactivate_all(state: &dyn State, pipe: &dyn Pipe) -> Result<usize> {
        let stored: BTreeMap<String, SourceCodeRepo> =
            get_json(state, REPOS_PROJECTS_PROCESSED_KEY)
                .await?
                .unwrap_or_default();
        let count = stored.len();
        for repo in stored.into_values() {
            deactivate(pipe, repo).await?;
        }
        state.delete(REPOS_PROJECTS_PROCESSED_KEY).await?;
        Ok(count)
    }
}
