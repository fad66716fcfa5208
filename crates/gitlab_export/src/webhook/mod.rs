//! GitLab webhook deliveries.
//!
//! GitLab names the event of a delivery in the `X-Gitlab-Event` header and
//! sends a JSON body whose shape depends on it. [`WebhookEvent::decode`] turns
//! a [`WebhookRequest`] into a typed event, [`handle`] writes the records it
//! implies and [`registration`] installs and removes the hooks themselves.

pub mod handle;
pub mod registration;

use std::collections::BTreeMap;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer};

pub use handle::{WebhookContext, handle};
pub use registration::{
    HOOK_VERSION, HookTarget, RegistrationReport, callback_url, register, unregister,
};

use crate::error::{ExportError, Result};
use crate::export::types::WEBHOOK_DATE_TIME_FORMAT;
use crate::http::{HttpHeaders, header_get};

/// Header naming the event of a delivery.
pub const EVENT_HEADER: &str = "X-Gitlab-Event";

/// A delivery as the host received it.
#[derive(Debug, Clone, Default)]
pub struct WebhookRequest {
    pub headers: HttpHeaders,
    pub body: Vec<u8>,
}

impl WebhookRequest {
    pub fn new(headers: HttpHeaders, body: impl Into<Vec<u8>>) -> Self {
        Self {
            headers,
            body: body.into(),
        }
    }

    /// Value of the event header. Header names match case-insensitively.
    pub fn event_name(&self) -> Option<&str> {
        header_get(&self.headers, EVENT_HEADER)
    }
}

/// Parse a webhook timestamp. GitLab sends `2021-01-20 15:04:05 UTC` in most
/// hooks and RFC 3339 in some.
pub fn parse_webhook_time(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Some(ts.with_timezone(&Utc));
    }
    let (local, zone) = value.rsplit_once(' ')?;
    if zone.eq_ignore_ascii_case("UTC") || zone == "Z" {
        return NaiveDateTime::parse_from_str(local, WEBHOOK_DATE_TIME_FORMAT)
            .ok()
            .map(|naive| naive.and_utc());
    }
    DateTime::parse_from_str(value, &format!("{WEBHOOK_DATE_TIME_FORMAT} %z"))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

fn webhook_time<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<DateTime<Utc>, D::Error> {
    let raw = String::deserialize(deserializer)?;
    parse_webhook_time(&raw)
        .ok_or_else(|| serde::de::Error::custom(format!("invalid webhook time {raw:?}")))
}

/// The project a delivery is about.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookProject {
    pub id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub path_with_namespace: String,
    #[serde(default)]
    pub web_url: String,
}

/// The user who triggered a delivery.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HookUser {
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookLabel {
    pub id: i64,
    #[serde(default)]
    pub title: String,
}

/// A merge request as webhooks describe it.
#[derive(Debug, Clone, Deserialize)]
pub struct HookMergeRequest {
    pub id: i64,
    pub iid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub source_branch: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub author_id: Option<i64>,
    #[serde(default)]
    pub merge_commit_sha: Option<String>,
    #[serde(default)]
    pub work_in_progress: bool,
    #[serde(deserialize_with = "webhook_time")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "webhook_time")]
    pub updated_at: DateTime<Utc>,
    /// `open`, `update`, `approved`, `unapproved`, `merge`, `close`, ...
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookNote {
    pub id: i64,
    #[serde(default)]
    pub note: String,
    /// `DiffNote`, `DiscussionNote` or absent for a plain note.
    #[serde(default, rename = "type")]
    pub note_type: Option<String>,
    #[serde(default)]
    pub noteable_type: String,
    #[serde(default)]
    pub url: String,
    pub author_id: i64,
    #[serde(default)]
    pub system: bool,
    #[serde(deserialize_with = "webhook_time")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "webhook_time")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HookIssue {
    pub id: i64,
    pub iid: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub author_id: Option<i64>,
    #[serde(default)]
    pub assignee_ids: Vec<i64>,
    #[serde(default)]
    pub milestone_id: Option<i64>,
    #[serde(default)]
    pub iteration_id: Option<i64>,
    #[serde(default)]
    pub weight: Option<i64>,
    #[serde(deserialize_with = "webhook_time")]
    pub created_at: DateTime<Utc>,
    #[serde(deserialize_with = "webhook_time")]
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MergeRequestHook {
    pub object_attributes: HookMergeRequest,
    pub project: HookProject,
    #[serde(default)]
    pub user: HookUser,
    /// Changed attributes, keyed by name.
    #[serde(default)]
    pub changes: BTreeMap<String, serde_json::Value>,
}

impl MergeRequestHook {
    pub fn action(&self) -> &str {
        self.object_attributes.action.as_deref().unwrap_or_default()
    }

    /// An update that only touched `updated_at`, which GitLab sends when new
    /// commits are pushed to the source branch.
    pub fn is_push_update(&self) -> bool {
        self.action() == "update" && self.changes.len() == 1 && self.changes.contains_key("updated_at")
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NoteHook {
    pub object_attributes: HookNote,
    pub project: HookProject,
    #[serde(default)]
    pub user: HookUser,
    /// Present when the note is on a merge request.
    #[serde(default)]
    pub merge_request: Option<HookMergeRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IssueHook {
    pub object_attributes: HookIssue,
    pub project: HookProject,
    #[serde(default)]
    pub user: HookUser,
    #[serde(default)]
    pub labels: Vec<HookLabel>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PushHook {
    #[serde(default, rename = "ref")]
    pub git_ref: String,
    #[serde(default)]
    pub project: Option<HookProject>,
    #[serde(default)]
    pub total_commits_count: i64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SystemHook {
    #[serde(default)]
    pub event_name: String,
}

/// A decoded delivery.
#[derive(Debug, Clone)]
pub enum WebhookEvent {
    Issue(Box<IssueHook>),
    MergeRequest(Box<MergeRequestHook>),
    Push(PushHook),
    Note(Box<NoteHook>),
    System(SystemHook),
    /// Any other event name, or none.
    Unknown(String),
}

fn payload<T: DeserializeOwned>(event: &str, body: &[u8]) -> Result<T> {
    serde_json::from_slice(body)
        .map_err(|e| ExportError::invalid_data(format!("invalid {event} payload: {e}")))
}

impl WebhookEvent {
    pub fn decode(request: &WebhookRequest) -> Result<Self> {
        let Some(name) = request.event_name() else {
            return Ok(Self::Unknown(String::new()));
        };
        let body = &request.body;
        Ok(match name {
            "Issue Hook" | "Confidential Issue Hook" => Self::Issue(Box::new(payload(name, body)?)),
            "Merge Request Hook" => Self::MergeRequest(Box::new(payload(name, body)?)),
            "Push Hook" | "Tag Push Hook" => Self::Push(payload(name, body)?),
            "Note Hook" | "Confidential Note Hook" => Self::Note(Box::new(payload(name, body)?)),
            "System Hook" => Self::System(payload(name, body)?),
            other => Self::Unknown(other.to_string()),
        })
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Issue(_) => "issue",
            Self::MergeRequest(_) => "merge_request",
            Self::Push(_) => "push",
            Self::Note(_) => "note",
            Self::System(_) => "system",
            Self::Unknown(name) => name,
        }
    }
}
