pub(crate) mod export;
pub(crate) mod lifecycle;
pub(crate) mod meta;
pub(crate) mod webhook;

use std::path::Path;
use std::sync::Arc;

use gitlab_export::{ExportOptions, GitLabIntegration, Instance, RuntimeConfig};

use crate::config::Config;
use crate::host::{FileState, NdjsonPipe};
use crate::progress::LoggingReporter;

pub(crate) type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// A started integration plus the instance it acts for.
pub(crate) struct Session {
    pub integration: GitLabIntegration,
    pub instance: Instance,
}

impl Session {
    pub fn start(
        config: &Config,
        options: ExportOptions,
        reporter: Option<&Arc<LoggingReporter>>,
    ) -> CommandResult<Self> {
        let instance = Instance::new(config.tenant(), config.integration_config()?);
        let mut integration =
            GitLabIntegration::with_reqwest()?.with_progress(reporter.map(LoggingReporter::as_callback));
        integration.start(RuntimeConfig {
            options,
            webhook_url: config.webhook.url.clone(),
        });
        Ok(Self {
            integration,
            instance,
        })
    }
}

pub(crate) fn open_state(config: &Config) -> CommandResult<FileState> {
    let path = config.state_path()?;
    let state = FileState::open(&path)
        .map_err(|e| format!("failed to open state {}: {e}", path.display()))?;
    Ok(state)
}

/// NDJSON output: the given file, or stdout for `None` and `-`.
pub(crate) fn open_pipe(output: Option<&Path>) -> CommandResult<NdjsonPipe> {
    match output {
        Some(path) if path != Path::new("-") => Ok(NdjsonPipe::append(path)
            .map_err(|e| format!("failed to open output {}: {e}", path.display()))?),
        _ => Ok(NdjsonPipe::stdout()),
    }
}

/// Print JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) -> CommandResult {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
