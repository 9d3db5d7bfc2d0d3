use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::sync::Mutex;
use std::time::Duration;

use crate::errors::Block;
use crate::gates::GateReport;
use crate::orchestrator::machine::LoopPhase;
use crate::ui::icons::{BLOCKER, CHECK, COMMIT, CROSS, QUEUE, SPARKLE, TEST};

/// Terminal UI for the story loop, rendered via `indicatif`.
///
/// Two bars are stacked vertically:
/// - Story bar, tracking completed stories of the current work item
/// - Phase spinner, showing the running phase of the current story
pub struct LoopUI {
    multi: MultiProgress,
    story_bar: ProgressBar,
    phase_bar: ProgressBar,
    verbose: bool,
    current_story: Mutex<String>,
}

impl LoopUI {
    pub fn new(verbose: bool) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), verbose)
    }

    /// A UI that draws no bars. Printed lines go straight to stderr.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, verbose: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let story_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("█▓▒░");
        let story_bar = multi.add(ProgressBar::new(0));
        story_bar.set_style(story_style);
        story_bar.set_prefix("Stories");

        let phase_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg} {elapsed:.dim}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let phase_bar = multi.add(ProgressBar::new_spinner());
        phase_bar.set_style(phase_style);
        phase_bar.set_prefix("  Phase");

        Self {
            multi,
            story_bar,
            phase_bar,
            verbose,
            current_story: Mutex::new(String::new()),
        }
    }

    /// Print a line above the bars. Without a terminal the bars are hidden
    /// and the line goes to stderr.
    pub fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.is_hidden() || self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn start_work_item(&self, prd: &str, total: usize, completed: usize) {
        self.story_bar.set_length(total as u64);
        self.story_bar.set_position(completed as u64);
        self.story_bar.set_message(prd.to_string());
        self.print_line(format!(
            "{}Work item {} ({}/{} stories complete)",
            QUEUE,
            style(prd).bold(),
            completed,
            total
        ));
    }

    pub fn start_story(&self, story_id: &str, title: &str, session: u64) {
        if let Ok(mut current) = self.current_story.lock() {
            *current = story_id.to_string();
        }
        self.print_line(format!(
            "\n{} {} {}",
            style(story_id).yellow().bold(),
            title,
            style(format!("(session {})", session)).dim()
        ));
    }

    /// Show the phase about to run and start the spinner.
    pub fn phase(&self, phase: LoopPhase) {
        let story = self
            .current_story
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default();
        self.phase_bar.reset_elapsed();
        self.phase_bar
            .set_message(format!("{} {}", style(&story).cyan(), phase.describe()));
        self.phase_bar.enable_steady_tick(Duration::from_millis(100));
        if self.verbose {
            self.print_line(format!("    {} {}", style("→").dim(), style(phase).dim()));
        }
    }

    pub fn gate_result(&self, report: &GateReport, expected_pass: bool) {
        let icon = if report.is_passed() { CHECK } else { CROSS };
        let label = if report.is_passed() { "passed" } else { "failed" };
        let note = if report.is_passed() == expected_pass {
            style("(expected)").dim()
        } else {
            style("(unexpected)").red()
        };
        self.print_line(format!(
            "    {}{}Tests {}: {} {}",
            TEST, icon, label, report.summary, note
        ));
    }

    pub fn story_complete(&self, story_id: &str, commit: Option<&str>) {
        self.story_bar.inc(1);
        self.phase_bar.set_message(String::new());
        let commit = commit
            .map(|c| format!(" {}{}", COMMIT, style(c).dim()))
            .unwrap_or_default();
        self.print_line(format!(
            "  {}{} complete{}",
            CHECK,
            style(story_id).green().bold(),
            commit
        ));
    }

    pub fn work_item_archived(&self, prd: &str) {
        self.print_line(format!("{}{} archived", SPARKLE, style(prd).bold()));
    }

    /// One-line classification, then the full diagnostic body.
    pub fn blocked(&self, block: &Block) {
        self.phase_bar.finish_and_clear();
        self.print_line(format!(
            "\n{}{}",
            BLOCKER,
            style(format!("BLOCKED: {}", block.headline())).red().bold()
        ));
        if let Some(story) = &block.story_id {
            self.print_line(format!(
                "    story {} in {} during {}",
                story,
                block.prd.as_deref().unwrap_or("-"),
                block.phase
            ));
        }
        if let Some(diagnostic) = &block.diagnostic {
            self.print_line(format!("{}", style("--- diagnostic output ---").dim()));
            self.print_line(diagnostic.trim_end());
            self.print_line(format!("{}", style("--- end diagnostic output ---").dim()));
        }
    }

    pub fn queue_exhausted(&self, completed: usize) {
        self.phase_bar.finish_and_clear();
        self.story_bar.finish();
        self.print_line(format!(
            "\n{}Queue exhausted ({} stories completed this run)",
            SPARKLE, completed
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::LoopError;
    use std::path::PathBuf;

    #[test]
    fn test_hidden_ui_accepts_all_calls() {
        let ui = LoopUI::hidden();
        ui.start_work_item("001.json", 2, 0);
        ui.start_story("US-001", "Implement health check", 1);
        ui.phase(LoopPhase::AwaitingTestGeneration);
        ui.gate_result(&GateReport::failed("1 failed"), false);
        ui.story_complete("US-001", Some("abc1234"));
        ui.work_item_archived("001.json");
        let block = Block::new(
            LoopError::ImplementationFailure {
                test_file: PathBuf::from("tests/test_US-002.py"),
            },
            LoopPhase::VerifyingTestsPass,
        )
        .at(Some("001.json"), Some("US-002"))
        .with_diagnostic("E   assert 500 == 200");
        ui.blocked(&block);
        ui.queue_exhausted(1);
        assert_eq!(ui.story_bar.position(), 1);
    }
}
