//! gitlab-export - command-line runtime for the GitLab export connector.

mod commands;
mod config;
mod host;
mod progress;
mod shutdown;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::export::ExportArgs;
use crate::commands::lifecycle::{MutationAction, ValidateAction};
use crate::commands::webhook::WebhookArgs;

#[derive(Parser)]
#[command(name = "gitlab-export")]
#[command(version)]
#[command(about = "Export GitLab data as normalized NDJSON records")]
#[command(
    long_about = "gitlab-export runs the GitLab connector outside a host runtime. It exports \
repositories, merge requests, issues and boards as NDJSON, keeps checkpoints in a local \
state file so later runs are incremental, and can install webhooks and replay their deliveries."
)]
#[command(after_long_help = r#"EXAMPLES
    First full export of every visible namespace:
        $ gitlab-export export --historical -o records.ndjson

    Incremental export of issues and boards:
        $ GITLAB_EXPORT_INSTANCE_KIND=WORK gitlab-export export

    Replay a saved webhook delivery:
        $ gitlab-export webhook --event "Merge Request Hook" --body delivery.json

    Generate shell completions:
        $ gitlab-export completions bash > ~/.local/share/bash-completion/completions/gitlab-export

CONFIGURATION
    gitlab-export reads configuration from:
      1. ~/.config/gitlab-export/config.toml (or $XDG_CONFIG_HOME/gitlab-export/config.toml)
      2. ./gitlab-export.toml
      3. Environment variables (GITLAB_EXPORT_* prefix, e.g., GITLAB_EXPORT_GITLAB_TOKEN)
      4. .env file in current directory

ENVIRONMENT VARIABLES
    GITLAB_EXPORT_GITLAB_TOKEN    GitLab personal access token
    GITLAB_EXPORT_GITLAB_URL      GitLab server URL (default: https://gitlab.com)
    GITLAB_EXPORT_INSTANCE_KIND   SOURCECODE or WORK
    RUST_LOG                      Log filter (default: gitlab_export=info,gitlab_export_cli=info)
"#)]
struct Cli {
    /// State file (default: per-instance file in the state directory)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Export everything changed since the last run
    Export {
        /// Ignore checkpoints and export everything
        #[arg(long)]
        historical: bool,

        /// Maximum concurrent repository exports (default from config or 10)
        #[arg(short = 'c', long)]
        concurrency: Option<usize>,

        /// NDJSON output file, `-` for stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Check credentials and server
    Validate {
        #[arg(value_enum)]
        action: ValidateAction,
    },
    /// Install webhooks pointing at the configured webhook URL
    Enroll,
    /// Deactivate exported repos, remove webhooks and clear state
    Dismiss {
        /// NDJSON output file, `-` for stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Print the namespaces an instance without accounts would export
    AutoConfigure,
    /// Process one webhook delivery
    Webhook {
        /// Delivery body, `-` for stdin
        #[arg(short = 'b', long)]
        body: PathBuf,

        /// Event name, as sent in X-Gitlab-Event
        #[arg(short = 'e', long)]
        event: Option<String>,

        /// Extra request header as "Name: value"
        #[arg(short = 'H', long = "header")]
        headers: Vec<String>,

        /// NDJSON output file, `-` for stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Create or update an issue
    Mutate {
        #[arg(value_enum)]
        action: MutationAction,

        /// JSON payload file, `-` for stdin
        #[arg(short = 'p', long)]
        payload: PathBuf,

        /// NDJSON output file, `-` for stdout
        #[arg(short = 'o', long)]
        output: Option<PathBuf>,
    },
    /// Generate shell completion scripts
    Completions {
        /// Shell to generate completions for
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenvy::dotenv().ok();

    // stdout carries NDJSON, so logs always go to stderr.
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::new("gitlab_export=info,gitlab_export_cli=info"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Commands::Completions { shell } = &cli.command {
        return commands::meta::handle_completions(*shell);
    }

    // Load configuration (config file -> env vars -> defaults), then CLI flags.
    let mut config = config::Config::load();
    if let Some(state) = cli.state {
        config.state.file = Some(state);
    }

    match cli.command {
        Commands::Export {
            historical,
            concurrency,
            output,
        } => {
            commands::export::handle_export(
                &config,
                ExportArgs {
                    historical,
                    concurrency,
                    output,
                },
            )
            .await?;
        }
        Commands::Validate { action } => {
            commands::lifecycle::handle_validate(&config, action).await?;
        }
        Commands::Enroll => {
            commands::lifecycle::handle_enroll(&config).await?;
        }
        Commands::Dismiss { output } => {
            commands::lifecycle::handle_dismiss(&config, output).await?;
        }
        Commands::AutoConfigure => {
            commands::lifecycle::handle_auto_configure(&config).await?;
        }
        Commands::Webhook {
            body,
            event,
            headers,
            output,
        } => {
            commands::webhook::handle_webhook(
                &config,
                WebhookArgs {
                    body,
                    event,
                    headers,
                    output,
                },
            )
            .await?;
        }
        Commands::Mutate {
            action,
            payload,
            output,
        } => {
            commands::lifecycle::handle_mutate(&config, action, &payload, output).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}
