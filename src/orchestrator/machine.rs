//! The story loop state machine.
//!
//! Per story the phases run in a fixed order:
//!
//! ```text
//! Idle -> AwaitingTestGeneration -> VerifyingTestsFail -> AwaitingImplementation
//!      -> VerifyingTestsPass -> Completing -> Idle
//! ```
//!
//! Test generation is skipped when the artifact already exists. Any failure
//! ends the run in `Blocked`; an empty queue ends it in `QueueExhausted`.
//! Nothing is retried. `ExecutionState` is saved on every transition that
//! changes it and never on a failed phase, so a rerun resumes where the
//! block happened.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::audit::{HistoryEntry, HistoryRecorder};
use crate::config::Config;
use crate::context::{ContextAssembler, SessionKind, render_prompt};
use crate::errors::{Block, ExternalError, LoopError};
use crate::gates::{GateReport, TestSummary, VerificationGate};
use crate::orchestrator::runner::{SessionOutput, SessionRequest, SessionRunner};
use crate::orchestrator::state::{ExecutionState, StateStore};
use crate::prd::{PrdQueue, Story, WorkItem};
use crate::signals::{SessionSignal, SignalParser};
use crate::tracker::{Committer, commit_message};
use crate::ui::LoopUI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LoopPhase {
    Idle,
    AwaitingTestGeneration,
    VerifyingTestsFail,
    AwaitingImplementation,
    VerifyingTestsPass,
    Completing,
    Blocked,
    QueueExhausted,
}

impl LoopPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoopPhase::Blocked | LoopPhase::QueueExhausted)
    }

    /// Short present-tense description for progress output.
    pub fn describe(&self) -> &'static str {
        match self {
            LoopPhase::Idle => "selecting next story",
            LoopPhase::AwaitingTestGeneration => "generating tests",
            LoopPhase::VerifyingTestsFail => "checking tests fail",
            LoopPhase::AwaitingImplementation => "implementing",
            LoopPhase::VerifyingTestsPass => "checking tests pass",
            LoopPhase::Completing => "committing",
            LoopPhase::Blocked => "blocked",
            LoopPhase::QueueExhausted => "queue exhausted",
        }
    }
}

impl fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum LoopOutcome {
    QueueExhausted { completed: usize },
    Blocked(Block),
}

impl LoopOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoopOutcome::QueueExhausted { .. } => 0,
            LoopOutcome::Blocked(_) => 1,
        }
    }

    pub fn block(&self) -> Option<&Block> {
        match self {
            LoopOutcome::Blocked(block) => Some(block),
            LoopOutcome::QueueExhausted { .. } => None,
        }
    }
}

/// Everything fixed for one story while its phases run.
struct StoryRun {
    /// Work item with completion flags projected from state.
    item: WorkItem,
    story: Story,
    test_file: PathBuf,
    test_file_rel: PathBuf,
    session: u64,
    started: Instant,
    pass_summary: Option<TestSummary>,
}

pub struct Orchestrator {
    config: Config,
    queue: PrdQueue,
    store: StateStore,
    history: HistoryRecorder,
    assembler: ContextAssembler,
    parser: SignalParser,
    session: Box<dyn SessionRunner>,
    gate: Box<dyn VerificationGate>,
    committer: Box<dyn Committer>,
    ui: Option<Arc<LoopUI>>,
    visited: Vec<LoopPhase>,
    last_session: u64,
    story_started: Option<Instant>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        session: Box<dyn SessionRunner>,
        gate: Box<dyn VerificationGate>,
        committer: Box<dyn Committer>,
    ) -> Self {
        Self {
            queue: PrdQueue::new(&config.prds_dir),
            store: StateStore::new(&config.state_file),
            history: HistoryRecorder::new(&config.history_file),
            assembler: ContextAssembler::from_config(&config),
            parser: SignalParser::new(config.verbose),
            session,
            gate,
            committer,
            ui: None,
            visited: Vec::new(),
            last_session: 0,
            story_started: None,
            config,
        }
    }

    pub fn with_ui(mut self, ui: Arc<LoopUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    /// Replace the state store, e.g. with one that injects write faults.
    pub fn with_state_store(mut self, store: StateStore) -> Self {
        self.store = store;
        self
    }

    /// Phases entered so far, in order.
    pub fn visited(&self) -> &[LoopPhase] {
        &self.visited
    }

    /// Run until the queue is exhausted or a block occurs.
    pub async fn run(&mut self) -> LoopOutcome {
        match self.run_loop().await {
            Ok(completed) => {
                self.enter(LoopPhase::QueueExhausted);
                info!(completed, "queue exhausted");
                if let Some(ui) = &self.ui {
                    ui.queue_exhausted(completed);
                }
                LoopOutcome::QueueExhausted { completed }
            }
            Err(block) => {
                self.enter(LoopPhase::Blocked);
                error!(
                    kind = block.error.kind(),
                    phase = %block.phase,
                    prd = ?block.prd,
                    story = ?block.story_id,
                    "run blocked: {}",
                    block.error
                );
                self.record_block(&block);
                if let Some(ui) = &self.ui {
                    ui.blocked(&block);
                }
                LoopOutcome::Blocked(block)
            }
        }
    }

    async fn run_loop(&mut self) -> Result<usize, Block> {
        self.queue
            .validate_all()
            .map_err(|e| Block::new(e, LoopPhase::Idle))?;

        let mut state = self
            .store
            .load()
            .map_err(|e| {
                Block::new(
                    LoopError::persistence(self.store.path(), e),
                    LoopPhase::Idle,
                )
            })?
            .unwrap_or_default();

        let mut completed = 0;
        loop {
            self.enter(LoopPhase::Idle);
            let Some(item) = self.select_work_item(&mut state)? else {
                return Ok(completed);
            };

            let Some(story_id) = state.current_story.clone() else {
                self.archive(&mut state, &item)?;
                continue;
            };

            let mut run = self.start_story(&mut state, &item, &story_id)?;
            let mut phase = self.resume_phase(&state, &run);
            loop {
                self.enter(phase);
                phase = match phase {
                    LoopPhase::AwaitingTestGeneration => self.generate_tests(&run).await?,
                    LoopPhase::VerifyingTestsFail => {
                        self.verify_tests_fail(&mut state, &run).await?
                    }
                    LoopPhase::AwaitingImplementation => self.implement(&run).await?,
                    LoopPhase::VerifyingTestsPass => self.verify_tests_pass(&mut run).await?,
                    LoopPhase::Completing => {
                        self.complete(&mut state, &run)?;
                        completed += 1;
                        break;
                    }
                    other => {
                        return Err(self.block(
                            LoopError::StateMismatch {
                                detail: format!("no transition out of {}", other),
                            },
                            other,
                            Some(&run),
                        ));
                    }
                };
            }
        }
    }

    fn enter(&mut self, phase: LoopPhase) {
        debug!(%phase, "entering phase");
        self.visited.push(phase);
        if let Some(ui) = &self.ui
            && !phase.is_terminal()
            && phase != LoopPhase::Idle
        {
            ui.phase(phase);
        }
    }

    /// The work item to process: the one recorded in state, else the next
    /// queued one. `None` when the queue is empty.
    fn select_work_item(&mut self, state: &mut ExecutionState) -> Result<Option<WorkItem>, Block> {
        if let Some(prd) = state.current_prd.clone() {
            if self.queue.path_of(&prd).exists() {
                let item = self
                    .queue
                    .load(&prd)
                    .map_err(|e| Block::new(e, LoopPhase::Idle).at(Some(&prd), None))?;
                state.check_against(&item).map_err(|e| {
                    Block::new(
                        LoopError::StateMismatch {
                            detail: format!("{:#}", e),
                        },
                        LoopPhase::Idle,
                    )
                    .at(Some(&prd), state.current_story.as_deref())
                })?;
                self.announce_work_item(&item, state);
                return Ok(Some(item));
            }
            warn!(prd = %prd, "work item in state is no longer queued; moving on");
            state.clear_position();
            self.save(state, LoopPhase::Idle, None)?;
        }

        let next = self.queue.next().map_err(|e| {
            Block::new(
                LoopError::persistence(self.queue.prds_dir(), e),
                LoopPhase::Idle,
            )
        })?;
        let Some(prd) = next else {
            return Ok(None);
        };

        let item = self
            .queue
            .load(&prd)
            .map_err(|e| Block::new(e, LoopPhase::Idle).at(Some(&prd), None))?;
        state.start_work_item(&item);
        self.save(state, LoopPhase::Idle, None)?;
        info!(
            prd = %prd,
            remaining = state.remaining_stories.len(),
            completed = state.completed_stories.len(),
            "starting work item"
        );
        self.announce_work_item(&item, state);
        Ok(Some(item))
    }

    fn announce_work_item(&self, item: &WorkItem, state: &ExecutionState) {
        if let Some(ui) = &self.ui {
            ui.start_work_item(
                &item.id,
                item.user_stories.len(),
                state.completed_stories.len(),
            );
        }
    }

    /// Bump the session counter and fix the story's parameters.
    fn start_story(
        &mut self,
        state: &mut ExecutionState,
        item: &WorkItem,
        story_id: &str,
    ) -> Result<StoryRun, Block> {
        let story = item.story(story_id).cloned().ok_or_else(|| {
            Block::new(
                LoopError::StateMismatch {
                    detail: format!("story {} not found in {}", story_id, item.id),
                },
                LoopPhase::Idle,
            )
            .at(Some(&item.id), Some(story_id))
        })?;

        let session = state.next_session();
        self.save(state, LoopPhase::Idle, None)?;
        self.last_session = session;
        let started = Instant::now();
        self.story_started = Some(started);

        if let Some(ui) = &self.ui {
            ui.start_story(&story.id, &story.title, session);
        }
        info!(prd = %item.id, story = %story.id, session, "starting story");

        Ok(StoryRun {
            item: item.with_completion(&state.completed_stories),
            test_file: self.config.test_file_for(&story.id),
            test_file_rel: self.config.test_file_relative(&story.id),
            story,
            session,
            started,
            pass_summary: None,
        })
    }

    fn resume_phase(&self, state: &ExecutionState, run: &StoryRun) -> LoopPhase {
        if !run.test_file.exists() {
            return LoopPhase::AwaitingTestGeneration;
        }
        if state.tests_verified_failing.as_deref() == Some(run.story.id.as_str()) {
            info!(story = %run.story.id, "tests already verified failing; resuming implementation");
            return LoopPhase::AwaitingImplementation;
        }
        info!(story = %run.story.id, "test artifact exists; skipping test generation");
        LoopPhase::VerifyingTestsFail
    }

    async fn generate_tests(&mut self, run: &StoryRun) -> Result<LoopPhase, Block> {
        let phase = LoopPhase::AwaitingTestGeneration;
        let output = self.run_session(SessionKind::TestGeneration, run).await?;
        let signal = self.parser.parse(&output.text);

        match signal {
            SessionSignal::TestsGenerated(ref id) if id == &run.story.id && output.success() => {
                if !run.test_file.exists() {
                    return Err(self
                        .block(
                            LoopError::MissingTestArtifact {
                                path: run.test_file_rel.clone(),
                            },
                            phase,
                            Some(run),
                        )
                        .with_diagnostic(output.text));
                }
                info!(story = %run.story.id, test_file = %run.test_file_rel.display(), "tests generated");
                Ok(LoopPhase::VerifyingTestsFail)
            }
            other => Err(self.signal_block(other, "TESTS_GENERATED", phase, run, output)),
        }
    }

    async fn verify_tests_fail(
        &mut self,
        state: &mut ExecutionState,
        run: &StoryRun,
    ) -> Result<LoopPhase, Block> {
        let phase = LoopPhase::VerifyingTestsFail;
        let report = self.run_gate(phase, run, false).await?;
        if report.is_passed() {
            return Err(self
                .block(
                    LoopError::PrematureSuccess {
                        test_file: run.test_file_rel.clone(),
                    },
                    phase,
                    Some(run),
                )
                .with_diagnostic(report.output));
        }

        state.tests_verified_failing = Some(run.story.id.clone());
        self.save(state, phase, Some(run))?;
        Ok(LoopPhase::AwaitingImplementation)
    }

    async fn implement(&mut self, run: &StoryRun) -> Result<LoopPhase, Block> {
        let phase = LoopPhase::AwaitingImplementation;
        let output = self.run_session(SessionKind::Implementation, run).await?;
        let signal = self.parser.parse(&output.text);

        match signal {
            SessionSignal::StoryDone(ref id) if id == &run.story.id && output.success() => {
                info!(story = %run.story.id, "implementation reported done");
                Ok(LoopPhase::VerifyingTestsPass)
            }
            other => Err(self.signal_block(other, "STORY_DONE", phase, run, output)),
        }
    }

    async fn verify_tests_pass(&mut self, run: &mut StoryRun) -> Result<LoopPhase, Block> {
        let phase = LoopPhase::VerifyingTestsPass;
        let report = self.run_gate(phase, run, true).await?;
        if !report.is_passed() {
            return Err(self
                .block(
                    LoopError::ImplementationFailure {
                        test_file: run.test_file_rel.clone(),
                    },
                    phase,
                    Some(run),
                )
                .with_diagnostic(report.output));
        }
        run.pass_summary = Some(report.summary);
        Ok(LoopPhase::Completing)
    }

    /// Commit, then persist completion, then record history.
    fn complete(&mut self, state: &mut ExecutionState, run: &StoryRun) -> Result<(), Block> {
        let phase = LoopPhase::Completing;
        let message = commit_message(&run.story);
        let commit = self
            .committer
            .commit(&message)
            .map_err(|e| self.block(e.into(), phase, Some(run)))?;

        state.mark_story_complete(&run.story.id).map_err(|e| {
            self.block(
                LoopError::StateMismatch {
                    detail: format!("{:#}", e),
                },
                phase,
                Some(run),
            )
        })?;
        self.save(state, phase, Some(run))?;

        let mut entry = HistoryEntry::completed(&run.item.id, &run.story.id, &phase.to_string());
        entry.story_title = Some(run.story.title.clone());
        entry.acceptance_criteria = run.story.acceptance_criteria.clone();
        entry.test_summary = run.pass_summary;
        entry.commit = commit.clone();
        entry.duration = run.started.elapsed();
        entry.session = run.session;
        self.history.append(&entry).map_err(|e| {
            self.block(
                LoopError::persistence(self.history.path(), e),
                phase,
                Some(run),
            )
        })?;

        info!(story = %run.story.id, commit = ?commit, message = %message, "story complete");
        if let Some(ui) = &self.ui {
            ui.story_complete(&run.story.id, commit.as_deref());
        }
        self.story_started = None;
        Ok(())
    }

    /// Move a fully completed work item to the archive and clear the position.
    fn archive(&mut self, state: &mut ExecutionState, item: &WorkItem) -> Result<(), Block> {
        let phase = LoopPhase::Idle;
        state.check_against(item).map_err(|e| {
            Block::new(
                LoopError::StateMismatch {
                    detail: format!("{:#}", e),
                },
                phase,
            )
            .at(Some(&item.id), None)
        })?;

        let archived = self.queue.archive(&item.id).map_err(|e| {
            Block::new(
                LoopError::persistence(self.queue.path_of(&item.id), e),
                phase,
            )
            .at(Some(&item.id), None)
        })?;

        state.clear_position();
        self.save(state, phase, None)?;
        info!(prd = %item.id, to = %archived.display(), "work item archived");
        if let Some(ui) = &self.ui {
            ui.work_item_archived(&item.id);
        }
        Ok(())
    }

    async fn run_session(
        &mut self,
        kind: SessionKind,
        run: &StoryRun,
    ) -> Result<SessionOutput, Block> {
        let phase = match kind {
            SessionKind::TestGeneration => LoopPhase::AwaitingTestGeneration,
            SessionKind::Implementation => LoopPhase::AwaitingImplementation,
        };
        let bundle = self
            .assembler
            .assemble(kind, &run.item, &run.story, &run.test_file)
            .map_err(|e| self.block(e, phase, Some(run)))?;
        let request = SessionRequest {
            kind,
            story_id: run.story.id.clone(),
            session: run.session,
            prompt: render_prompt(&bundle, &run.test_file_rel),
        };

        self.session
            .invoke(&request)
            .await
            .map_err(|e| self.block(e.into(), phase, Some(run)))
    }

    async fn run_gate(
        &mut self,
        phase: LoopPhase,
        run: &StoryRun,
        expect_pass: bool,
    ) -> Result<GateReport, Block> {
        let report = self
            .gate
            .run(&run.test_file)
            .await
            .map_err(|e| self.block(e.into(), phase, Some(run)))?;
        debug!(
            story = %run.story.id,
            %phase,
            outcome = ?report.outcome,
            summary = %report.summary,
            "gate result"
        );
        if let Some(ui) = &self.ui {
            ui.gate_result(&report, expect_pass);
        }
        Ok(report)
    }

    /// Classify a session result that did not carry the expected marker.
    fn signal_block(
        &self,
        signal: SessionSignal,
        expected: &str,
        phase: LoopPhase,
        run: &StoryRun,
        output: SessionOutput,
    ) -> Block {
        let error = match signal {
            SessionSignal::Blocked(reason) => LoopError::SessionBlocked { reason },
            _ if !output.success() => LoopError::ExternalProcessFailure(ExternalError::Exit {
                program: "generation session".into(),
                code: output.exit_code.unwrap_or(-1),
            }),
            SessionSignal::NoSignal => LoopError::SignalNotFound {
                session: match phase {
                    LoopPhase::AwaitingTestGeneration => "test-generation".into(),
                    _ => "implementation".into(),
                },
            },
            other => LoopError::UnexpectedSignal {
                expected: format!("{}: {}", expected, run.story.id),
                found: other.to_string(),
            },
        };
        self.block(error, phase, Some(run)).with_diagnostic(output.text)
    }

    fn block(&self, error: LoopError, phase: LoopPhase, run: Option<&StoryRun>) -> Block {
        let block = Block::new(error, phase);
        match run {
            Some(run) => block.at(Some(&run.item.id), Some(&run.story.id)),
            None => block,
        }
    }

    fn save(
        &self,
        state: &mut ExecutionState,
        phase: LoopPhase,
        run: Option<&StoryRun>,
    ) -> Result<(), Block> {
        self.store.save(state).map_err(|e| {
            let block = Block::new(LoopError::persistence(self.store.path(), e), phase);
            match run {
                Some(run) => block.at(Some(&run.item.id), Some(&run.story.id)),
                None => block.at(state.current_prd.as_deref(), state.current_story.as_deref()),
            }
        })
    }

    /// Append the block to history. A failure here is logged and never
    /// replaces the original block.
    fn record_block(&self, block: &Block) {
        let mut entry = HistoryEntry::blocked(
            block.prd.as_deref(),
            block.story_id.as_deref(),
            &block.phase.to_string(),
            block.error.kind(),
            block.error.to_string(),
        );
        entry.session = self.last_session;
        entry.diagnostic = block.diagnostic.clone();
        if let Some(started) = self.story_started {
            entry.duration = started.elapsed();
        }
        if let Err(e) = self.history.append(&entry) {
            error!(error = %format!("{:#}", e), "failed to record block in history");
        }
    }
}
