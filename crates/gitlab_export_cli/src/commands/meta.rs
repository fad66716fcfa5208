use std::io::Write;

use clap::CommandFactory;

use super::CommandResult;
use crate::Cli;

const BIN_NAME: &str = "gitlab-export";

fn completion_script(shell: clap_complete::Shell) -> Vec<u8> {
    let mut cmd = Cli::command();
    let mut out = Vec::new();
    clap_complete::generate(shell, &mut cmd, BIN_NAME, &mut out);
    out
}

pub(crate) fn handle_completions(shell: clap_complete::Shell) -> CommandResult {
    std::io::stdout().write_all(&completion_script(shell))?;
    Ok(())
}
