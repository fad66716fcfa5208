//! Validate, enroll, dismiss and the other one-shot integration actions.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use gitlab_export::Pipe;
use gitlab_export::integration::{FETCH_ACCOUNTS, ISSUE_CREATE, ISSUE_UPDATE, VALIDATE_URL};

use super::{CommandResult, Session, open_pipe, open_state, print_json};
use crate::config::Config;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum ValidateAction {
    /// List the namespaces the token can see
    Accounts,
    /// Check the server URL and report its version
    Url,
}

impl ValidateAction {
    fn action(self) -> &'static str {
        match self {
            Self::Accounts => FETCH_ACCOUNTS,
            Self::Url => VALIDATE_URL,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub(crate) enum MutationAction {
    /// Create an issue
    CreateIssue,
    /// Update an exported issue
    UpdateIssue,
}

impl MutationAction {
    fn action(self) -> &'static str {
        match self {
            Self::CreateIssue => ISSUE_CREATE,
            Self::UpdateIssue => ISSUE_UPDATE,
        }
    }
}

fn session(config: &Config) -> CommandResult<Session> {
    Session::start(config, config.export_options(false, None), None)
}

pub(crate) async fn handle_validate(config: &Config, action: ValidateAction) -> CommandResult {
    let session = session(config)?;
    let validation = session
        .integration
        .validate(&session.instance, action.action())
        .await?;
    print_json(&validation)
}

pub(crate) async fn handle_enroll(config: &Config) -> CommandResult {
    let session = session(config)?;
    let report = session.integration.enroll(&session.instance).await?;

    for scope in &report.created {
        println!("created  {scope}");
    }
    for scope in &report.reused {
        println!("reused   {scope}");
    }
    for scope in &report.failed {
        eprintln!("failed   {scope}");
    }
    if !report.failed.is_empty() {
        return Err(format!("{} webhook(s) could not be installed", report.failed.len()).into());
    }
    Ok(())
}

pub(crate) async fn handle_dismiss(config: &Config, output: Option<PathBuf>) -> CommandResult {
    let session = session(config)?;
    let state = open_state(config)?;
    let pipe = open_pipe(output.as_deref())?;

    let report = session
        .integration
        .dismiss(&session.instance, &pipe, &state)
        .await;
    pipe.close().await?;
    let report = report?;

    eprintln!(
        "Deactivated {} repos, removed {} webhooks",
        report.deactivated, report.hooks_removed
    );
    Ok(())
}

pub(crate) async fn handle_auto_configure(config: &Config) -> CommandResult {
    let session = session(config)?;
    let configured = session.integration.auto_configure(&session.instance).await?;
    print_json(&configured.accounts.unwrap_or_default())
}

pub(crate) async fn handle_mutate(
    config: &Config,
    action: MutationAction,
    payload: &Path,
    output: Option<PathBuf>,
) -> CommandResult {
    let payload: serde_json::Value = serde_json::from_slice(&super::webhook::read_input(payload)?)?;
    let session = session(config)?;
    let state = open_state(config)?;
    let pipe = open_pipe(output.as_deref())?;

    let response = session
        .integration
        .mutation(&session.instance, action.action(), &payload, &pipe, &state)
        .await;
    pipe.close().await?;
    // stdout may carry the written records
    eprintln!("{}", serde_json::to_string_pretty(&response?)?);
    Ok(())
}
