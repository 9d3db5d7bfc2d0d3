//! Status, validate and reset commands.

use anyhow::Result;
use console::style;
use std::path::Path;
use std::process::ExitCode;

use super::super::Cli;

pub fn cmd_status(project_dir: &Path) -> Result<ExitCode> {
    use storyloop::audit::HistoryRecorder;
    use storyloop::config::Config;
    use storyloop::orchestrator::StateStore;
    use storyloop::prd::PrdQueue;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let queue = PrdQueue::new(&config.prds_dir);
    let store = StateStore::new(&config.state_file);

    println!();
    println!("Storyloop Status");
    println!("================");
    println!();

    let queued = queue.list()?;
    if queued.is_empty() {
        println!("Queue:     empty");
    } else {
        println!("Queue:     {} work item(s)", queued.len());
        for name in &queued {
            println!("           - {}", name);
        }
    }

    match store.load()? {
        None => println!("State:     none (no run yet)"),
        Some(state) => {
            println!(
                "Work item: {}",
                state.current_prd.as_deref().unwrap_or("-")
            );
            println!(
                "Story:     {}",
                state.current_story.as_deref().unwrap_or("-")
            );
            println!(
                "Progress:  {} completed, {} remaining",
                state.completed_stories.len(),
                state.remaining_stories.len()
            );
            println!("Sessions:  {}", state.session_count);
            if let Some(updated) = state.last_updated {
                println!("Updated:   {}", updated.format("%Y-%m-%d %H:%M:%S UTC"));
            }
            if let Some(story) = &state.current_story {
                let next = if !config.test_file_for(story).exists() {
                    "test generation"
                } else if state.tests_verified_failing.as_deref() == Some(story.as_str()) {
                    "implementation"
                } else {
                    "verify tests fail"
                };
                println!("Next:      {}", style(next).cyan());
            }
        }
    }

    let history = HistoryRecorder::new(&config.history_file);
    println!("History:   {} entries", history.count_entries()?);
    println!();
    Ok(ExitCode::SUCCESS)
}

pub fn cmd_validate(project_dir: &Path) -> Result<ExitCode> {
    use storyloop::config::Config;
    use storyloop::prd::PrdQueue;

    let config = Config::new(project_dir.to_path_buf(), false)?;
    let queue = PrdQueue::new(&config.prds_dir);
    let names = queue.list()?;

    if names.is_empty() {
        println!("No work items queued in {}", config.relative(&config.prds_dir).display());
        return Ok(ExitCode::SUCCESS);
    }

    let mut failures = 0;
    for name in &names {
        match queue.load(name) {
            Ok(item) => println!(
                "  {} {} ({} stories)",
                style("ok").green(),
                name,
                item.user_stories.len()
            ),
            Err(e) => {
                failures += 1;
                println!("  {} {}", style("invalid").red().bold(), e);
            }
        }
    }

    println!();
    if failures > 0 {
        println!("{} of {} work item(s) invalid", failures, names.len());
        Ok(ExitCode::FAILURE)
    } else {
        println!("All {} work item(s) valid", names.len());
        Ok(ExitCode::SUCCESS)
    }
}

pub fn cmd_reset(project_dir: &Path, cli: &Cli, force: bool) -> Result<ExitCode> {
    use dialoguer::Confirm;
    use storyloop::config::Config;
    use storyloop::orchestrator::StateStore;

    let config = Config::new(project_dir.to_path_buf(), cli.verbose)?;

    if !force {
        let confirm = Confirm::new()
            .with_prompt("This will reset the execution state. Are you sure?")
            .default(false)
            .interact()
            .unwrap_or(false);

        if !confirm {
            println!("Reset cancelled");
            return Ok(ExitCode::SUCCESS);
        }
    }

    StateStore::new(&config.state_file).reset()?;
    if config.log_dir.exists() {
        std::fs::remove_dir_all(&config.log_dir).ok();
    }

    println!("Reset complete");
    Ok(ExitCode::SUCCESS)
}
