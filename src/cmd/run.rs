//! `storyloop run`: the story loop.

use anyhow::Result;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use super::super::Cli;

pub async fn cmd_run(cli: &Cli, project_dir: PathBuf) -> Result<ExitCode> {
    use storyloop::config::Config;
    use storyloop::gates::CommandGate;
    use storyloop::orchestrator::{ClaudeRunner, Orchestrator, RunLock};
    use storyloop::tracker::{Committer, GitCommitter, NoCommit};
    use storyloop::ui::LoopUI;

    let config = Config::new(project_dir, cli.verbose)?;
    config.ensure_directories()?;
    let _lock = RunLock::acquire(&config.lock_file)?;

    let ui = Arc::new(LoopUI::new(cli.verbose));
    let session = ClaudeRunner::new(&config).with_ui(ui.clone());
    let gate = CommandGate::from_config(&config);
    let committer: Box<dyn Committer> = if config.commits_enabled() {
        Box::new(GitCommitter::from_config(&config))
    } else {
        Box::new(NoCommit)
    };

    let mut orchestrator =
        Orchestrator::new(config, Box::new(session), Box::new(gate), committer).with_ui(ui);
    let outcome = orchestrator.run().await;

    Ok(match outcome.exit_code() {
        0 => ExitCode::SUCCESS,
        code => ExitCode::from(u8::try_from(code).unwrap_or(1)),
    })
}
