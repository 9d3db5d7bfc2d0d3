use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

mod cmd;

#[derive(Parser)]
#[command(name = "storyloop")]
#[command(
    version,
    about = "Acceptance-test-driven work-queue executor: user stories in, verified commits out"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Process queued work items until the queue is empty or a story blocks
    Run,
    /// Show the execution position and the queue
    Status,
    /// Schema-check every queued work item
    Validate,
    /// Delete the execution state and session transcripts
    Reset {
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    storyloop::logging::init(cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    match cli.command.as_ref().unwrap_or(&Commands::Run) {
        Commands::Run => cmd::cmd_run(&cli, project_dir).await,
        Commands::Status => cmd::cmd_status(&project_dir),
        Commands::Validate => cmd::cmd_validate(&project_dir),
        Commands::Reset { force } => cmd::cmd_reset(&project_dir, &cli, *force),
    }
}
