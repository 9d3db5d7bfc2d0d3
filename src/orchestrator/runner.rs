use async_trait::async_trait;
use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::context::SessionKind;
use crate::errors::ExternalError;
use crate::ui::LoopUI;

/// Input to one generation session.
#[derive(Debug, Clone)]
pub struct SessionRequest {
    pub kind: SessionKind,
    pub story_id: String,
    /// Value of the session counter for this story.
    pub session: u64,
    pub prompt: String,
}

/// Captured result of a session that ran to exit.
#[derive(Debug, Clone, Default)]
pub struct SessionOutput {
    /// Stdout followed by stderr.
    pub text: String,
    pub exit_code: Option<i32>,
    pub duration: Duration,
    pub transcript: Option<PathBuf>,
}

impl SessionOutput {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            exit_code: Some(0),
            ..Default::default()
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// The generation capability: prompt in, text out, with file-system side
/// effects left to the session.
#[async_trait]
pub trait SessionRunner: Send + Sync {
    async fn invoke(&self, request: &SessionRequest) -> Result<SessionOutput, ExternalError>;
}

/// Runs the configured session command, prompt on stdin.
pub struct ClaudeRunner {
    program: String,
    args: Vec<String>,
    project_dir: PathBuf,
    log_dir: PathBuf,
    timeout: Duration,
    stream_output: bool,
    ui: Option<Arc<LoopUI>>,
}

impl ClaudeRunner {
    pub fn new(config: &Config) -> Self {
        let session = &config.toml().session;
        Self {
            program: session.command.clone(),
            args: session.args.clone(),
            project_dir: config.project_dir.clone(),
            log_dir: config.log_dir.clone(),
            timeout: config.session_timeout(),
            stream_output: session.stream_output,
            ui: None,
        }
    }

    pub fn with_ui(mut self, ui: Arc<LoopUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn prompt_file(&self, request: &SessionRequest) -> PathBuf {
        self.log_dir.join(format!(
            "session-{}-{}-{}-prompt.md",
            request.session, request.story_id, request.kind
        ))
    }

    pub fn output_file(&self, request: &SessionRequest) -> PathBuf {
        self.log_dir.join(format!(
            "session-{}-{}-{}-output.log",
            request.session, request.story_id, request.kind
        ))
    }

    fn io_err(&self, source: std::io::Error) -> ExternalError {
        ExternalError::Io {
            program: self.program.clone(),
            source,
        }
    }

    fn echo(&self, line: &str) {
        if !self.stream_output {
            return;
        }
        match &self.ui {
            Some(ui) => ui.print_line(line),
            None => println!("{}", line),
        }
    }

    /// Read both pipes to the end and wait for exit.
    async fn collect(&self, child: &mut Child) -> Result<(String, String, ExitStatus), ExternalError> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| self.io_err(std::io::Error::other("stdout not captured")))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| self.io_err(std::io::Error::other("stderr not captured")))?;

        let stderr_task = tokio::spawn(read_all_lines(stderr));

        let mut out = String::new();
        let mut lines = BufReader::new(stdout).lines();
        while let Some(line) = lines.next_line().await.map_err(|e| self.io_err(e))? {
            self.echo(&line);
            out.push_str(&line);
            out.push('\n');
        }

        let err = match stderr_task.await {
            Ok(result) => result.map_err(|e| self.io_err(e))?,
            Err(join) => return Err(self.io_err(std::io::Error::other(join))),
        };
        for line in err.lines() {
            self.echo(line);
        }

        let status = child.wait().await.map_err(|e| self.io_err(e))?;
        Ok((out, err, status))
    }
}

async fn read_all_lines<R: AsyncRead + Unpin>(reader: R) -> std::io::Result<String> {
    let mut out = String::new();
    let mut lines = BufReader::new(reader).lines();
    while let Some(line) = lines.next_line().await? {
        out.push_str(&line);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
impl SessionRunner for ClaudeRunner {
    async fn invoke(&self, request: &SessionRequest) -> Result<SessionOutput, ExternalError> {
        std::fs::create_dir_all(&self.log_dir).map_err(|e| self.io_err(e))?;
        let prompt_file = self.prompt_file(request);
        std::fs::write(&prompt_file, &request.prompt).map_err(|e| self.io_err(e))?;

        debug!(
            program = %self.program,
            args = ?self.args,
            story = %request.story_id,
            kind = %request.kind,
            session = request.session,
            prompt_chars = request.prompt.len(),
            "spawning session"
        );

        let start = Instant::now();
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.project_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| ExternalError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        // The prompt is fed concurrently so the deadline also covers a
        // session that never drains its stdin.
        let writer = child.stdin.take().map(|mut stdin| {
            let prompt = request.prompt.clone();
            tokio::spawn(async move {
                // A session that exits without reading its prompt closes the
                // pipe; its exit status is what matters.
                if let Err(e) = stdin.write_all(prompt.as_bytes()).await {
                    warn!(error = %e, "session did not accept the full prompt");
                }
                let _ = stdin.shutdown().await;
            })
        });

        let collected = timeout(self.timeout, self.collect(&mut child)).await;
        if let Some(writer) = writer {
            writer.abort();
        }
        let (stdout, stderr, status) = match collected {
            Ok(result) => result?,
            Err(_) => {
                let _ = child.kill().await;
                return Err(ExternalError::Timeout {
                    program: self.program.clone(),
                    after: self.timeout,
                });
            }
        };

        let mut text = stdout;
        if !stderr.trim().is_empty() {
            text.push_str(&stderr);
        }

        let output_file = self.output_file(request);
        std::fs::write(&output_file, &text).map_err(|e| self.io_err(e))?;

        let exit_code = status.code();
        if exit_code.is_none() {
            return Err(ExternalError::Killed {
                program: self.program.clone(),
            });
        }

        let duration = start.elapsed();
        info!(
            story = %request.story_id,
            kind = %request.kind,
            exit = ?exit_code,
            secs = duration.as_secs_f64(),
            "session finished"
        );

        Ok(SessionOutput {
            text,
            exit_code,
            duration,
            transcript: Some(output_file),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project_config::ProjectToml;
    use std::fs;
    use tempfile::tempdir;

    fn runner(dir: &std::path::Path, script: &str, timeout_secs: u64) -> ClaudeRunner {
        let mut toml = ProjectToml::default();
        toml.session.command = "sh".into();
        toml.session.args = vec!["-c".into(), script.into()];
        toml.session.timeout_secs = timeout_secs;
        toml.session.stream_output = false;
        let config = Config::from_toml(dir.to_path_buf(), toml, false);
        ClaudeRunner::new(&config)
    }

    fn request() -> SessionRequest {
        SessionRequest {
            kind: SessionKind::TestGeneration,
            story_id: "US-001".into(),
            session: 4,
            prompt: "write the tests".into(),
        }
    }

    #[tokio::test]
    async fn test_invoke_captures_output_and_transcripts() {
        let dir = tempdir().unwrap();
        let r = runner(
            dir.path(),
            "read p; echo \"got: $p\"; echo warn >&2; echo 'TESTS_GENERATED: US-001'",
            10,
        );
        let out = r.invoke(&request()).await.unwrap();

        assert!(out.success());
        assert!(out.text.contains("got: write the tests"));
        assert!(out.text.contains("TESTS_GENERATED: US-001"));
        assert!(out.text.contains("warn"));

        let prompt = fs::read_to_string(r.prompt_file(&request())).unwrap();
        assert_eq!(prompt, "write the tests");
        assert!(
            r.prompt_file(&request())
                .ends_with(".storyloop/logs/session-4-US-001-test-generation-prompt.md")
        );
        let log = fs::read_to_string(out.transcript.unwrap()).unwrap();
        assert_eq!(log, out.text);
    }

    #[tokio::test]
    async fn test_session_runs_in_project_dir() {
        let dir = tempdir().unwrap();
        let r = runner(dir.path(), "cat >/dev/null; touch created.txt", 10);
        r.invoke(&request()).await.unwrap();
        assert!(dir.path().join("created.txt").exists());
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_reported_not_error() {
        let dir = tempdir().unwrap();
        let r = runner(dir.path(), "cat >/dev/null; echo 'BLOCKED: no creds'; exit 2", 10);
        let out = r.invoke(&request()).await.unwrap();
        assert!(!out.success());
        assert_eq!(out.exit_code, Some(2));
        assert!(out.text.contains("BLOCKED: no creds"));
    }

    #[tokio::test]
    async fn test_timeout() {
        let dir = tempdir().unwrap();
        let r = runner(dir.path(), "sleep 5", 1);
        let err = r.invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ExternalError::Timeout { .. }));
    }

    #[tokio::test]
    async fn test_timeout_covers_undrained_prompt() {
        let dir = tempdir().unwrap();
        let r = runner(dir.path(), "sleep 20", 1);
        let mut req = request();
        req.prompt = "x".repeat(240_000);

        let started = Instant::now();
        let err = r.invoke(&req).await.unwrap_err();
        assert!(matches!(err, ExternalError::Timeout { .. }));
        assert!(
            started.elapsed() < Duration::from_secs(10),
            "took {:?}",
            started.elapsed()
        );
    }

    #[tokio::test]
    async fn test_large_prompt_is_delivered_in_full() {
        let dir = tempdir().unwrap();
        let r = runner(dir.path(), "wc -c", 10);
        let mut req = request();
        req.prompt = "x".repeat(240_000);
        let out = r.invoke(&req).await.unwrap();
        assert_eq!(out.text.trim(), "240000");
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let dir = tempdir().unwrap();
        let mut toml = ProjectToml::default();
        toml.session.command = "storyloop-no-such-session".into();
        let config = Config::from_toml(dir.path().to_path_buf(), toml, false);
        let err = ClaudeRunner::new(&config).invoke(&request()).await.unwrap_err();
        assert!(matches!(err, ExternalError::Spawn { .. }));
    }
}
