//! Integration tests for the storyloop binary.
//!
//! Sessions and test runners are stood in for by `sh -c` scripts configured
//! through `.storyloop/storyloop.toml`.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a storyloop Command
fn storyloop() -> Command {
    let mut cmd = cargo_bin_cmd!("storyloop");
    cmd.env_remove("CLAUDE_CMD");
    cmd
}

const HEALTH_PRD: &str = r#"{
    "type": "feature",
    "name": "Health endpoint",
    "userStories": [{
        "id": "US-001",
        "title": "Implement health check",
        "acceptanceCriteria": ["GET /health returns 200"],
        "priority": 1
    }]
}"#;

/// Session stand-in: writes the test file in test-generation mode and a
/// marker file in implementation mode.
const FAKE_SESSION: &str = r#"
prompt=$(cat)
case "$prompt" in
  *"Test Generation mode"*)
    mkdir -p tests
    echo "def test_health(): assert False" > tests/test_US-001.py
    echo "TESTS_GENERATED: US-001"
    ;;
  *)
    touch implemented
    echo "STORY_DONE: US-001"
    ;;
esac
"#;

/// Test runner stand-in: fails until the session has "implemented" the story.
const FAKE_RUNNER: &str = r#"
if [ -f implemented ]; then
  echo "1 passed in 0.01s"
else
  echo "1 failed in 0.01s"
  exit 1
fi
"#;

fn create_temp_project() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("prds")).unwrap();
    dir
}

fn write_prd(dir: &TempDir, name: &str, json: &str) {
    fs::write(dir.path().join("prds").join(name), json).unwrap();
}

fn write_config(dir: &TempDir, session: &str, runner: &str) {
    let config = format!(
        r#"[session]
command = "sh"
args = ["-c", '''{session}''']
timeout_secs = 30
stream_output = false

[verify]
command = "sh"
args = ["-c", '''{runner}''']
timeout_secs = 30

[commit]
enabled = false
"#
    );
    fs::create_dir_all(dir.path().join(".storyloop")).unwrap();
    fs::write(dir.path().join(".storyloop/storyloop.toml"), config).unwrap();
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_storyloop_help() {
        storyloop()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("run"))
            .stdout(predicate::str::contains("validate"));
    }

    #[test]
    fn test_storyloop_version() {
        storyloop()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("storyloop"));
    }

    #[test]
    fn test_unknown_subcommand_fails() {
        storyloop().arg("frobnicate").assert().failure();
    }

    #[test]
    fn test_project_dir_flag() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);

        storyloop()
            .arg("--project-dir")
            .arg(dir.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("001-health.json"));
    }
}

// =============================================================================
// Validate
// =============================================================================

mod validate {
    use super::*;

    #[test]
    fn test_validate_accepts_good_work_items() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);

        storyloop()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("All 1 work item(s) valid"));
    }

    #[test]
    fn test_validate_reports_every_bad_work_item() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);
        write_prd(&dir, "002-broken.json", "{ not json");
        write_prd(
            &dir,
            "003-bad-id.json",
            &HEALTH_PRD.replace("US-001", "STORY1"),
        );

        storyloop()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .failure()
            .stdout(predicate::str::contains("002-broken.json"))
            .stdout(predicate::str::contains("STORY1"))
            .stdout(predicate::str::contains("2 of 3 work item(s) invalid"));
    }

    #[test]
    fn test_validate_empty_queue() {
        let dir = create_temp_project();

        storyloop()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .success()
            .stdout(predicate::str::contains("No work items queued"));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let dir = create_temp_project();
        fs::create_dir_all(dir.path().join(".storyloop")).unwrap();
        fs::write(
            dir.path().join(".storyloop/storyloop.toml"),
            "[paths]\ntest_file = \"tests/test_story.py\"\n",
        )
        .unwrap();

        storyloop()
            .current_dir(dir.path())
            .arg("validate")
            .assert()
            .failure()
            .stderr(predicate::str::contains("story_id"));
    }
}

// =============================================================================
// Status and reset
// =============================================================================

mod status_and_reset {
    use super::*;

    #[test]
    fn test_status_without_state() {
        let dir = create_temp_project();

        storyloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Queue:     empty"))
            .stdout(predicate::str::contains("State:     none"))
            .stdout(predicate::str::contains("History:   0 entries"));
    }

    #[test]
    fn test_status_shows_position() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);
        fs::write(
            dir.path().join("state.json"),
            r#"{
  "current_prd": "001-health.json",
  "current_story": "US-001",
  "completed_stories": [],
  "remaining_stories": ["US-001"],
  "session_count": 3
}"#,
        )
        .unwrap();

        storyloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("Story:     US-001"))
            .stdout(predicate::str::contains("Sessions:  3"))
            .stdout(predicate::str::contains("test generation"));
    }

    #[test]
    fn test_reset_force_removes_state() {
        let dir = create_temp_project();
        fs::write(dir.path().join("state.json"), "{}").unwrap();
        fs::create_dir_all(dir.path().join(".storyloop/logs")).unwrap();

        storyloop()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success()
            .stdout(predicate::str::contains("Reset complete"));

        assert!(!dir.path().join("state.json").exists());
        assert!(!dir.path().join(".storyloop/logs").exists());
    }

    #[test]
    fn test_reset_force_without_state_is_ok() {
        let dir = create_temp_project();

        storyloop()
            .current_dir(dir.path())
            .args(["reset", "--force"])
            .assert()
            .success();
    }
}

// =============================================================================
// Run
// =============================================================================

mod run {
    use super::*;

    #[test]
    fn test_run_on_empty_queue_exits_zero() {
        let dir = create_temp_project();

        storyloop()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stderr(predicate::str::contains("Queue exhausted"));
    }

    #[test]
    fn test_run_is_the_default_command() {
        let dir = create_temp_project();

        storyloop()
            .current_dir(dir.path())
            .assert()
            .success()
            .stderr(predicate::str::contains("Queue exhausted"));
    }

    #[test]
    fn test_run_completes_story_end_to_end() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);
        write_config(&dir, FAKE_SESSION, FAKE_RUNNER);

        storyloop()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success()
            .stderr(predicate::str::contains("US-001"))
            .stderr(predicate::str::contains("Queue exhausted (1 stories completed"));

        let state = fs::read_to_string(dir.path().join("state.json")).unwrap();
        let state: serde_json::Value = serde_json::from_str(&state).unwrap();
        assert_eq!(state["completed_stories"], serde_json::json!(["US-001"]));
        assert_eq!(state["session_count"], 1);
        assert!(state["current_prd"].is_null());

        assert!(dir.path().join("tests/test_US-001.py").exists());
        assert!(!dir.path().join("prds/001-health.json").exists());
        assert!(dir.path().join("prds/archive/001-health.json").exists());

        let history = fs::read_to_string(dir.path().join("history.md")).unwrap();
        assert!(history.contains("Story US-001 Complete"));
        assert!(history.contains("1 passed"));

        let logs = dir.path().join(".storyloop/logs");
        assert!(
            logs.join("session-1-US-001-test-generation-prompt.md")
                .exists()
        );
        assert!(logs.join("session-1-US-001-implementation-output.log").exists());
    }

    #[test]
    fn test_run_blocks_when_tests_pass_before_implementation() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);
        write_config(&dir, FAKE_SESSION, "echo '1 passed in 0.01s'");

        storyloop()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("PrematureSuccess"))
            .stderr(predicate::str::contains("tests passing before implementation"));

        assert!(!dir.path().join("implemented").exists());
        assert!(dir.path().join("prds/001-health.json").exists());
        let history = fs::read_to_string(dir.path().join("history.md")).unwrap();
        assert!(history.contains("BLOCKED"));
    }

    #[test]
    fn test_run_blocks_on_missing_marker_and_resumes() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);
        let forgetful = FAKE_SESSION.replace("echo \"STORY_DONE: US-001\"", "echo done");
        write_config(&dir, &forgetful, FAKE_RUNNER);

        storyloop()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("SignalNotFound"));

        storyloop()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("implementation"));

        // Second run goes straight to implementation.
        write_config(&dir, FAKE_SESSION, FAKE_RUNNER);
        storyloop()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .success();

        let logs = dir.path().join(".storyloop/logs");
        assert!(!logs.join("session-2-US-001-test-generation-prompt.md").exists());
        assert!(logs.join("session-2-US-001-implementation-prompt.md").exists());
    }

    #[test]
    fn test_run_refuses_malformed_work_item() {
        let dir = create_temp_project();
        write_prd(&dir, "001-broken.json", r#"{"type": "feature", "name": "x", "userStories": []}"#);
        write_config(&dir, FAKE_SESSION, FAKE_RUNNER);

        storyloop()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("MalformedWorkItem"));

        assert!(!dir.path().join(".storyloop/logs/session-1-US-001-test-generation-prompt.md").exists());
    }

    #[test]
    fn test_run_reports_missing_session_program() {
        let dir = create_temp_project();
        write_prd(&dir, "001-health.json", HEALTH_PRD);
        write_config(&dir, FAKE_SESSION, FAKE_RUNNER);

        storyloop()
            .current_dir(dir.path())
            .env("CLAUDE_CMD", "storyloop-no-such-program")
            .arg("run")
            .assert()
            .code(1)
            .stderr(predicate::str::contains("ExternalProcessFailure"));
    }
}
