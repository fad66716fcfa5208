use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use console::{Term, style};
use gitlab_export::{ExportResult, Pipe, State};

use super::{CommandResult, Session, open_pipe, open_state};
use crate::config::Config;
use crate::progress::LoggingReporter;
use crate::shutdown;

pub(crate) struct ExportArgs {
    pub historical: bool,
    pub concurrency: Option<usize>,
    pub output: Option<PathBuf>,
}

pub(crate) async fn handle_export(config: &Config, args: ExportArgs) -> CommandResult {
    let reporter = Arc::new(LoggingReporter::new());
    let session = Session::start(
        config,
        config.export_options(args.historical, args.concurrency),
        Some(&reporter),
    )?;
    let state: Arc<dyn State> = Arc::new(open_state(config)?);
    let pipe = Arc::new(open_pipe(args.output.as_deref())?);

    let started = Instant::now();
    let outcome = shutdown::until_interrupted(session.integration.export(
        &session.instance,
        Arc::clone(&pipe) as Arc<dyn Pipe>,
        state,
    ))
    .await;

    pipe.close().await?;
    let Some(result) = outcome else {
        return Err("export interrupted; completed pages are saved and will resume".into());
    };
    let result = result?;

    print_summary(&result, &reporter, started.elapsed());
    Ok(())
}

fn print_summary(result: &ExportResult, reporter: &LoggingReporter, elapsed: std::time::Duration) {
    if !Term::stderr().is_term() {
        tracing::info!(
            namespaces = result.namespaces,
            repos = result.repos,
            skipped = result.skipped,
            written = result.written,
            pages = reporter.pages(),
            retries = reporter.retries(),
            errors = result.errors.len(),
            duration = ?elapsed,
            "Export summary"
        );
        return;
    }

    eprintln!(
        "{} {} records from {} repos in {} namespaces ({:.1}s)",
        style("Exported").green().bold(),
        result.written,
        result.repos,
        result.namespaces,
        elapsed.as_secs_f64()
    );
    if result.skipped > 0 {
        eprintln!("  {} repos skipped", result.skipped);
    }
    if reporter.retries() > 0 {
        eprintln!("  {} requests retried", reporter.retries());
    }
    if !result.errors.is_empty() {
        eprintln!("{}", style(format!("{} errors:", result.errors.len())).yellow());
        for error in &result.errors {
            eprintln!("  - {error}");
        }
    }
}
