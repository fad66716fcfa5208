//! Repo include/exclude rules.
//!
//! Rules map a namespace (by ID or full path) to a comma-separated list of
//! repo names. A repo matches when its name or full path is listed, or when
//! the list is `*`.

use std::collections::BTreeMap;

use crate::api::types::Project;

/// Why a repo is left out of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Excluded,
    NotIncluded,
    Archived,
}

impl SkipReason {
    pub fn as_str(self) -> &'static str {
        match self {
            SkipReason::Excluded => "matched exclusion rule",
            SkipReason::NotIncluded => "did not match inclusion rule",
            SkipReason::Archived => "archived",
        }
    }
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Default)]
pub struct RepoRules {
    inclusions: Option<BTreeMap<String, String>>,
    exclusions: Option<BTreeMap<String, String>>,
}

fn matches(rules: &BTreeMap<String, String>, namespace_keys: &[&str], project: &Project) -> bool {
    namespace_keys
        .iter()
        .filter_map(|key| rules.get(*key))
        .flat_map(|list| list.split(','))
        .map(str::trim)
        .any(|entry| {
            entry == "*" || entry == project.name || entry == project.path_with_namespace
        })
}

impl RepoRules {
    pub fn new(
        inclusions: Option<BTreeMap<String, String>>,
        exclusions: Option<BTreeMap<String, String>>,
    ) -> Self {
        Self {
            inclusions: inclusions.filter(|m| !m.is_empty()),
            exclusions: exclusions.filter(|m| !m.is_empty()),
        }
    }

    /// `Ok(())` when the project belongs in the export.
    pub fn check(&self, namespace_id: &str, project: &Project) -> Result<(), SkipReason> {
        let keys = [namespace_id, project.namespace_path()];
        if let Some(exclusions) = &self.exclusions
            && matches(exclusions, &keys, project)
        {
            return Err(SkipReason::Excluded);
        }
        if let Some(inclusions) = &self.inclusions
            && !matches(inclusions, &keys, project)
        {
            return Err(SkipReason::NotIncluded);
        }
        if project.archived {
            return Err(SkipReason::Archived);
        }
        Ok(())
    }

    /// Like [`check`](Self::check), logging skipped repos.
    pub fn include(&self, namespace_id: &str, project: &Project) -> Option<SkipReason> {
        let reason = self.check(namespace_id, project).err()?;
        tracing::info!(repo = %project.path_with_namespace, reason = %reason, "skipping repo");
        Some(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn project(name: &str, archived: bool) -> Project {
        serde_json::from_value(json!({
            "id": 1, "name": name, "path_with_namespace": format!("acme/{name}"),
            "web_url": "https://gitlab.com/acme", "archived": archived,
            "created_at": "2024-01-01T00:00:00Z", "last_activity_at": "2024-01-01T00:00:00Z",
            "namespace": { "id": 9, "full_path": "acme", "kind": "group" }
        }))
        .unwrap()
    }

    fn rules(pairs: &[(&str, &str)]) -> Option<BTreeMap<String, String>> {
        Some(
            pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }

    #[test]
    fn no_rules_keeps_active_repos() {
        let rules = RepoRules::default();
        assert_eq!(rules.check("9", &project("api", false)), Ok(()));
        assert_eq!(
            rules.check("9", &project("api", true)),
            Err(SkipReason::Archived)
        );
    }

    #[test]
    fn exclusions_match_by_name_or_full_path() {
        let rules = RepoRules::new(None, rules(&[("acme", "web, acme/api")]));
        assert_eq!(
            rules.check("9", &project("api", false)),
            Err(SkipReason::Excluded)
        );
        assert_eq!(
            rules.check("9", &project("web", false)),
            Err(SkipReason::Excluded)
        );
        assert_eq!(rules.check("9", &project("docs", false)), Ok(()));
    }

    #[test]
    fn star_excludes_the_whole_namespace() {
        let rules = RepoRules::new(None, rules(&[("9", "*")]));
        assert_eq!(
            rules.check("9", &project("anything", false)),
            Err(SkipReason::Excluded)
        );
        assert_eq!(rules.check("10", &project("anything", false)), Ok(()));
    }

    #[test]
    fn inclusions_keep_only_listed_repos() {
        let rules = RepoRules::new(rules(&[("acme", "api")]), None);
        assert_eq!(rules.check("9", &project("api", false)), Ok(()));
        assert_eq!(
            rules.check("9", &project("web", false)),
            Err(SkipReason::NotIncluded)
        );
    }

    #[test]
    fn exclusion_wins_over_inclusion() {
        let rules = RepoRules::new(rules(&[("acme", "api")]), rules(&[("acme", "api")]));
        assert_eq!(
            rules.check("9", &project("api", false)),
            Err(SkipReason::Excluded)
        );
    }
}
