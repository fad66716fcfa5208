//! Configuration file support for gitlab-export.
//!
//! Configuration is loaded with the following precedence (highest to lowest):
//! 1. CLI flags
//! 2. Environment variables (prefixed with `GITLAB_EXPORT_`, e.g., `GITLAB_EXPORT_GITLAB_TOKEN`)
//! 3. Local config file (./gitlab-export.toml)
//! 4. XDG config file (~/.config/gitlab-export/config.toml)
//! 5. Built-in defaults
//!
//! State is kept per integration instance under the XDG state directory
//! (`~/.local/state/gitlab-export` on Linux) unless `state.dir` is set.
//!
//! Example config file:
//! ```toml
//! [gitlab]
//! url = "https://gitlab.example.com"  # optional, defaults to gitlab.com
//! token = "glpat-..."                 # or use GITLAB_EXPORT_GITLAB_TOKEN
//! auth = "apikey"                     # or "oauth2"
//!
//! [instance]
//! customer = "acme"
//! id = "local"
//! kind = "SOURCECODE"                 # or "WORK"
//! accounts = ["9", "12"]
//!
//! [instance.exclusions]
//! acme = "legacy,sandbox"
//!
//! [export]
//! concurrency = 10
//! rps = 5                             # optional proactive rate limit
//!
//! [webhook]
//! url = "https://events.example.com/gitlab"
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use config::{Config as ConfigBuilder, Environment, File, FileFormat};
use directories::ProjectDirs;
use gitlab_export::{
    Account, AccountType, Auth, ExportOptions, IntegrationConfig, IntegrationType, Tenant,
};
use serde::Deserialize;

const APP_NAME: &str = "gitlab-export";

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub gitlab: GitLabConfig,
    pub instance: InstanceConfig,
    pub export: ExportConfig,
    pub webhook: WebhookConfig,
    pub state: StateConfig,
}

/// GitLab server and credentials.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct GitLabConfig {
    /// Server URL. Defaults to GitLab.com.
    pub url: Option<String>,
    /// Personal access token or OAuth2 access token.
    pub token: Option<String>,
    /// How `token` is sent: `apikey` or `oauth2`.
    pub auth: String,
}

impl Default for GitLabConfig {
    fn default() -> Self {
        Self {
            url: None,
            token: None,
            auth: "apikey".to_string(),
        }
    }
}

/// The integration instance this CLI plays.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    pub customer: String,
    pub id: String,
    /// `SOURCECODE` or `WORK`.
    pub kind: String,
    /// Namespace IDs to export. Empty exports every visible namespace.
    pub accounts: Vec<String>,
    pub inclusions: BTreeMap<String, String>,
    pub exclusions: BTreeMap<String, String>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            customer: "local".to_string(),
            id: "local".to_string(),
            kind: IntegrationType::SourceCode.as_str().to_string(),
            accounts: Vec::new(),
            inclusions: BTreeMap::new(),
            exclusions: BTreeMap::new(),
        }
    }
}

/// Default export tunables.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    pub concurrency: usize,
    pub per_page: u32,
    /// Proactive requests-per-second limit.
    pub rps: Option<u32>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        let options = ExportOptions::default();
        Self {
            concurrency: options.concurrency,
            per_page: options.per_page,
            rps: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Where GitLab should deliver webhooks.
    pub url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding one state file per instance.
    pub dir: Option<PathBuf>,
    /// Explicit state file; overrides `dir`.
    pub file: Option<PathBuf>,
}

/// A configuration that cannot drive the connector.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no GitLab token configured (set gitlab.token or GITLAB_EXPORT_GITLAB_TOKEN)")]
    MissingToken,

    #[error("unknown auth kind {0:?}, expected apikey or oauth2")]
    UnknownAuth(String),

    #[error("unknown integration type {0:?}, expected SOURCECODE or WORK")]
    UnknownKind(String),

    #[error("could not determine a state directory")]
    NoStateDir,
}

impl Config {
    /// Load configuration using the config crate's layered approach.
    ///
    /// Sources are loaded in order (later sources override earlier):
    /// 1. Built-in defaults
    /// 2. XDG config file (~/.config/gitlab-export/config.toml)
    /// 3. Local config file (./gitlab-export.toml)
    /// 4. Environment variables with GITLAB_EXPORT_ prefix
    pub fn load() -> Self {
        let mut builder = ConfigBuilder::builder();

        if let Some(path) = Self::default_config_path()
            && path.exists()
        {
            tracing::debug!(path = %path.display(), "loading config");
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }

        let local_config = PathBuf::from(format!("{APP_NAME}.toml"));
        if local_config.exists() {
            tracing::debug!("loading config from ./{APP_NAME}.toml");
            builder = builder.add_source(
                File::from(local_config)
                    .format(FileFormat::Toml)
                    .required(false),
            );
        }

        // e.g., GITLAB_EXPORT_GITLAB_TOKEN -> gitlab.token
        builder = builder.add_source(
            Environment::with_prefix("GITLAB_EXPORT")
                .separator("_")
                .try_parsing(true),
        );

        match builder.build() {
            Ok(settings) => match settings.try_deserialize::<Config>() {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to deserialize config");
                    Config::default()
                }
            },
            Err(e) => {
                tracing::warn!(error = %e, "failed to build config");
                Config::default()
            }
        }
    }

    pub fn integration_type(&self) -> Result<IntegrationType, ConfigError> {
        self.instance
            .kind
            .parse()
            .map_err(|_| ConfigError::UnknownKind(self.instance.kind.clone()))
    }

    /// Connector configuration for this instance.
    pub fn integration_config(&self) -> Result<IntegrationConfig, ConfigError> {
        let token = self
            .gitlab
            .token
            .clone()
            .filter(|t| !t.is_empty())
            .ok_or(ConfigError::MissingToken)?;
        let auth = match self.gitlab.auth.to_ascii_lowercase().as_str() {
            "apikey" => Auth::ApiKey {
                apikey: token,
                url: None,
            },
            "oauth2" => Auth::OAuth2 {
                access_token: token,
                refresh_token: None,
                url: None,
            },
            other => return Err(ConfigError::UnknownAuth(other.to_string())),
        };
        // Account kinds are only known to the server; groups are the common case
        // and the exporter matches accounts by ID either way.
        let accounts = (!self.instance.accounts.is_empty()).then(|| {
            self.instance
                .accounts
                .iter()
                .map(|id| (id.clone(), Account::new(id.clone(), AccountType::Org)))
                .collect()
        });
        let non_empty = |map: &BTreeMap<String, String>| (!map.is_empty()).then(|| map.clone());

        Ok(IntegrationConfig {
            url: self.gitlab.url.clone(),
            auth: Some(auth),
            accounts,
            inclusions: non_empty(&self.instance.inclusions),
            exclusions: non_empty(&self.instance.exclusions),
            integration_type: self.integration_type()?,
        })
    }

    pub fn tenant(&self) -> Tenant {
        Tenant::new(
            self.instance.customer.clone(),
            Some(self.instance.id.clone()),
        )
    }

    /// Export options with CLI overrides applied.
    pub fn export_options(&self, historical: bool, concurrency: Option<usize>) -> ExportOptions {
        ExportOptions {
            historical,
            concurrency: concurrency.unwrap_or(self.export.concurrency).max(1),
            per_page: self.export.per_page,
            requests_per_second: self.export.rps,
            ..ExportOptions::default()
        }
    }

    /// State file of the configured instance.
    pub fn state_path(&self) -> Result<PathBuf, ConfigError> {
        if let Some(file) = &self.state.file {
            return Ok(file.clone());
        }
        let dir = match &self.state.dir {
            Some(dir) => dir.clone(),
            None => Self::default_state_dir().ok_or(ConfigError::NoStateDir)?,
        };
        Ok(dir.join(format!("{}.json", self.instance.id)))
    }

    pub fn default_config_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// On Linux, this is `$XDG_STATE_HOME/gitlab-export` or `~/.local/state/gitlab-export`.
    /// On macOS/Windows, falls back to the data directory.
    pub fn default_state_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", APP_NAME).map(|dirs| {
            dirs.state_dir()
                .map(|p| p.to_path_buf())
                .unwrap_or_else(|| dirs.data_dir().to_path_buf())
        })
    }
}
