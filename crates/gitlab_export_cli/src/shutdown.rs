use std::future::Future;

use console::Term;

/// Run `task` until it finishes or Ctrl+C is pressed.
///
/// Returns `None` when interrupted. The task future is dropped at that point;
/// checkpoints it already saved stay in the state file, so the next export
/// resumes from them. A second Ctrl+C quits immediately.
pub(crate) async fn until_interrupted<F: Future>(task: F) -> Option<F::Output> {
    tokio::pin!(task);
    tokio::select! {
        output = &mut task => Some(output),
        signal = tokio::signal::ctrl_c() => {
            if let Err(e) = signal {
                tracing::warn!(error = %e, "failed to listen for Ctrl+C");
                return Some(task.await);
            }
            if Term::stderr().is_term() {
                eprintln!("\n\nShutdown requested, stopping export...");
                eprintln!("Press Ctrl+C again to force quit.");
            } else {
                tracing::warn!("Shutdown requested, stopping export");
            }
            tokio::spawn(async {
                if tokio::signal::ctrl_c().await.is_ok() {
                    std::process::exit(130);
                }
            });
            None
        }
    }
}
