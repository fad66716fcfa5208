//! Export tunables and constants.

use std::time::Duration;

/// Maximum number of in-flight HTTP calls across the whole export.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Largest page size the GitLab API honours.
pub const MAX_FETCHED_ENTITIES_COUNT: u32 = 100;

/// Retries for non-2xx responses other than 429 and 403.
pub const MAX_GENERAL_RETRIES: usize = 2;

/// Retries after a 429 response.
pub const MAX_THROTTLED_RETRIES: usize = 3;

/// Sleep after a 429. GitLab.com allows 600 calls per minute per user.
pub const THROTTLE_WAIT: Duration = Duration::from_secs(3 * 60);

/// Initial backoff delay in milliseconds for general retries.
pub const INITIAL_BACKOFF_MS: u64 = 1_000;

/// Maximum backoff delay in milliseconds for general retries.
pub const MAX_BACKOFF_MS: u64 = 60_000;

/// Per-request HTTP timeout.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the channels between pipeline stages.
pub const PIPELINE_CHANNEL_CAPACITY: usize = 16;

/// Date-time layout GitLab expects in `updated_after` style parameters.
pub const GITLAB_DATE_TIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

/// Layout of GitLab `created_at` values without fractional seconds.
pub const GITLAB_CREATED_AT_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Layout of milestone and iteration start/due dates.
pub const GITLAB_DATE_FORMAT: &str = "%Y-%m-%d";

/// Layout of timestamps in webhook payloads, e.g. `2021-01-20 15:04:05 UTC`,
/// without the trailing zone.
pub const WEBHOOK_DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Which side of the product an integration instance feeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub enum IntegrationType {
    #[default]
    #[serde(rename = "SOURCECODE")]
    SourceCode,
    #[serde(rename = "WORK")]
    Work,
}

impl IntegrationType {
    pub fn as_str(self) -> &'static str {
        match self {
            IntegrationType::SourceCode => "SOURCECODE",
            IntegrationType::Work => "WORK",
        }
    }
}

impl std::str::FromStr for IntegrationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "SOURCECODE" => Ok(Self::SourceCode),
            "WORK" => Ok(Self::Work),
            other => Err(other.to_string()),
        }
    }
}

/// Options for one export run.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Ignore the stored last export date and fetch everything.
    pub historical: bool,
    /// Maximum concurrent API requests.
    pub concurrency: usize,
    /// Page size for list endpoints.
    pub per_page: u32,
    /// Retries for transient failures.
    pub max_retries: usize,
    /// Retries after rate limiting.
    pub max_throttled_retries: usize,
    /// Sleep after a 429 response.
    pub throttle_wait: Duration,
    /// Proactive client-side limit in requests per second. `None` disables it.
    pub requests_per_second: Option<u32>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            historical: false,
            concurrency: DEFAULT_CONCURRENCY,
            per_page: MAX_FETCHED_ENTITIES_COUNT,
            max_retries: MAX_GENERAL_RETRIES,
            max_throttled_retries: MAX_THROTTLED_RETRIES,
            throttle_wait: THROTTLE_WAIT,
            requests_per_second: None,
        }
    }
}

/// Summary of a finished export.
#[derive(Debug, Default, Clone)]
pub struct ExportResult {
    /// Namespaces visited.
    pub namespaces: usize,
    /// Repositories or projects exported.
    pub repos: usize,
    /// Repositories skipped by rules or because they are archived.
    pub skipped: usize,
    /// Records written to the pipe.
    pub written: usize,
    /// Errors that were logged and did not abort the export.
    pub errors: Vec<String>,
}
