//! Per-instance integration configuration.
//!
//! The host supplies one [`IntegrationConfig`] per integration instance. It
//! names the GitLab server, the credentials, the accounts to export and the
//! include/exclude rules. [`IntegrationConfig::connection`] resolves it into
//! the URLs and `Authorization` header every request uses.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::error::{ExportError, Result};
use crate::export::types::IntegrationType;

/// GitLab.com, used when no URL is configured.
pub const GITLAB_CLOUD_URL: &str = "https://gitlab.com";

const GITLAB_CLOUD_HOST: &str = "gitlab.com";

/// Credentials. Exactly one kind is configured per instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Auth {
    #[serde(rename = "apikey")]
    ApiKey {
        apikey: String,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename = "oauth2")]
    OAuth2 {
        access_token: String,
        #[serde(default)]
        refresh_token: Option<String>,
        #[serde(default)]
        url: Option<String>,
    },
    #[serde(rename = "basic")]
    Basic {
        username: String,
        password: String,
        #[serde(default)]
        url: Option<String>,
    },
}

impl Auth {
    /// Value of the `Authorization` header.
    pub fn header_value(&self) -> String {
        match self {
            Auth::ApiKey { apikey, .. } => format!("bearer {apikey}"),
            Auth::OAuth2 { access_token, .. } => format!("bearer {access_token}"),
            Auth::Basic {
                username, password, ..
            } => format!("Basic {}", STANDARD.encode(format!("{username}:{password}"))),
        }
    }

    /// Server URL carried by the credentials, if any.
    pub fn url(&self) -> Option<&str> {
        let url = match self {
            Auth::ApiKey { url, .. } | Auth::OAuth2 { url, .. } | Auth::Basic { url, .. } => url,
        };
        url.as_deref().filter(|u| !u.is_empty())
    }

    fn kind(&self) -> &'static str {
        match self {
            Auth::ApiKey { .. } => "apikey",
            Auth::OAuth2 { .. } => "oauth2",
            Auth::Basic { .. } => "basic",
        }
    }
}

/// Kind of a configured account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    /// A GitLab group.
    Org,
    /// A GitLab user namespace.
    User,
}

/// An account (namespace) selected for export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: String,
    #[serde(rename = "type")]
    pub account_type: AccountType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_count: Option<usize>,
}

impl Account {
    pub fn new(id: impl Into<String>, account_type: AccountType) -> Self {
        Self {
            id: id.into(),
            account_type,
            name: None,
            avatar_url: None,
            total_count: None,
        }
    }
}

/// Configuration of one integration instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationConfig {
    /// Server URL. Defaults to GitLab.com. A URL on the credentials wins.
    pub url: Option<String>,
    /// Credentials.
    pub auth: Option<Auth>,
    /// Accounts to export, keyed by namespace ID. `None` exports everything visible.
    pub accounts: Option<BTreeMap<String, Account>>,
    /// Namespace path to comma-separated repo names to keep.
    pub inclusions: Option<BTreeMap<String, String>>,
    /// Namespace path to comma-separated repo names to skip, or `*`.
    pub exclusions: Option<BTreeMap<String, String>>,
    /// Which entities the instance exports.
    pub integration_type: IntegrationType,
}

impl IntegrationConfig {
    /// Resolve URLs and credentials.
    pub fn connection(&self) -> Result<ConnectionInfo> {
        let auth = self.auth.as_ref().ok_or_else(|| {
            ExportError::config("supported authorization not provided. support for: apikey, oauth2, basic")
        })?;
        let url = auth
            .url()
            .or(self.url.as_deref().filter(|u| !u.is_empty()))
            .unwrap_or(GITLAB_CLOUD_URL);
        tracing::debug!(kind = auth.kind(), url, "resolved gitlab authorization");
        ConnectionInfo::new(url, auth.header_value())
    }
}

/// Resolved endpoints and credentials for one GitLab server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Server root without a trailing slash, e.g. `https://gitlab.com`.
    pub base_url: String,
    /// REST root with a trailing slash, e.g. `https://gitlab.com/api/v4/`.
    pub rest_root: String,
    /// GraphQL endpoint, e.g. `https://gitlab.com/api/graphql/`.
    pub graphql_url: String,
    /// Value of the `Authorization` header.
    pub authorization: String,
    /// Whether this is GitLab.com rather than a self-managed server.
    pub is_cloud: bool,
}

impl ConnectionInfo {
    pub fn new(url: &str, authorization: impl Into<String>) -> Result<Self> {
        let trimmed = url.trim().trim_end_matches('/');
        let base = trimmed
            .strip_suffix("/api/v4")
            .unwrap_or(trimmed)
            .trim_end_matches('/');
        let parsed = url::Url::parse(base)
            .map_err(|e| ExportError::config(format!("invalid gitlab url {url}: {e}")))?;
        let is_cloud = parsed.host_str() == Some(GITLAB_CLOUD_HOST);

        Ok(Self {
            base_url: base.to_string(),
            rest_root: format!("{base}/api/v4/"),
            graphql_url: format!("{base}/api/graphql/"),
            authorization: authorization.into(),
            is_cloud,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with(auth: Auth) -> IntegrationConfig {
        IntegrationConfig {
            auth: Some(auth),
            ..IntegrationConfig::default()
        }
    }

    #[test]
    fn apikey_defaults_to_gitlab_cloud() {
        let conn = config_with(Auth::ApiKey {
            apikey: "tok".into(),
            url: None,
        })
        .connection()
        .unwrap();

        assert_eq!(conn.base_url, "https://gitlab.com");
        assert_eq!(conn.rest_root, "https://gitlab.com/api/v4/");
        assert_eq!(conn.graphql_url, "https://gitlab.com/api/graphql/");
        assert_eq!(conn.authorization, "bearer tok");
        assert!(conn.is_cloud);
    }

    #[test]
    fn auth_url_overrides_and_strips_api_suffix() {
        let mut config = config_with(Auth::OAuth2 {
            access_token: "abc".into(),
            refresh_token: None,
            url: Some("https://git.example.com/api/v4/".into()),
        });
        config.url = Some("https://ignored.example.com".into());

        let conn = config.connection().unwrap();
        assert_eq!(conn.base_url, "https://git.example.com");
        assert_eq!(conn.rest_root, "https://git.example.com/api/v4/");
        assert_eq!(conn.authorization, "bearer abc");
        assert!(!conn.is_cloud);
    }

    #[test]
    fn basic_auth_is_base64_encoded() {
        let auth = Auth::Basic {
            username: "user".into(),
            password: "pass".into(),
            url: None,
        };
        assert_eq!(auth.header_value(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn missing_auth_is_a_config_error() {
        let err = IntegrationConfig::default().connection().unwrap_err();
        assert!(matches!(err, ExportError::Config { .. }));
    }

    #[test]
    fn decodes_host_json() {
        let config: IntegrationConfig = serde_json::from_value(serde_json::json!({
            "auth": { "apikey": { "apikey": "tok", "url": "https://git.example.com" } },
            "accounts": { "42": { "id": "42", "type": "org" } },
            "exclusions": { "acme": "legacy,old" },
            "integration_type": "WORK"
        }))
        .unwrap();

        assert_eq!(config.integration_type, IntegrationType::Work);
        let accounts = config.accounts.as_ref().unwrap();
        assert_eq!(accounts["42"].account_type, AccountType::Org);
        assert_eq!(config.exclusions.as_ref().unwrap()["acme"], "legacy,old");
        assert_eq!(
            config.connection().unwrap().base_url,
            "https://git.example.com"
        );
    }

    #[test]
    fn invalid_url_is_rejected() {
        let err = ConnectionInfo::new("not a url", "bearer x").unwrap_err();
        assert!(err.to_string().contains("invalid gitlab url"));
    }
}
