//! The iteration controller behind `taskloop run` and `taskloop resume`.
//!
//! Each cycle re-reads the task document, stops on a terminal condition,
//! otherwise claims the next iteration number and dispatches one round. The
//! controller is the document's only writer during a run; parallel workers
//! report back through [`WorkerReport`](crate::dispatch::WorkerReport)s and
//! their passing verdicts are applied in one reconciling write.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{Context, Result};
use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::core::frontmatter::{FieldValue, keys};
use crate::core::partition::{WorkerAssignment, WorkerCount, partition};
use crate::core::report;
use crate::core::terminal;
use crate::core::types::{CriteriaSummary, IterationRecord, LoopStatus, Outcome, TaskStatus};
use crate::dispatch::{self, RoundLimits};
use crate::error::{ControlError, SinkError};
use crate::io::config::LoopConfig;
use crate::io::document::{self, FieldUpdate, TaskDocument, load_document, update_fields};
use crate::io::executor::Executor;
use crate::io::iteration_log::{IterationMeta, IterationPaths, RoundMode, RoundOutcome, write_meta};
use crate::io::notify::Notifier;
use crate::io::prompt::PromptEngine;
use crate::io::snapshot::{LoopSnapshot, Phase, SnapshotStore, WorkerInfo, WorkerState};

/// How a run takes ownership of the document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// `taskloop run`: refuses a document another controller is running.
    Fresh,
    /// `taskloop resume`: requires `loop_status: paused`.
    Resume,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub workers: WorkerCount,
    /// Overrides the document's `max_iterations`.
    pub max_iterations: Option<u32>,
    pub mode: RunMode,
    /// Take over a document left `running` by a crashed controller.
    pub force: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: WorkerCount::ONE,
            max_iterations: None,
            mode: RunMode::Fresh,
            force: false,
        }
    }
}

/// Passed to the per-round callback after every completed round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoundSummary {
    pub iteration: u32,
    pub max_iterations: u32,
    pub mode: RoundMode,
    /// Workers dispatched this round.
    pub workers: usize,
    pub summary: CriteriaSummary,
    pub gained: usize,
    pub outcome: RoundOutcome,
}

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopOutcome {
    pub run_id: String,
    pub outcome: Outcome,
    pub rounds: u32,
    pub iteration: u32,
    pub max_iterations: u32,
    pub summary: CriteriaSummary,
    pub history: Vec<IterationRecord>,
    pub message: String,
}

struct RunState {
    run_id: String,
    path: PathBuf,
    title: String,
    workers: WorkerCount,
    rounds: u32,
    snapshot: LoopSnapshot,
}

/// Drives a task document through rounds of delegated execution.
pub struct Controller<'a, E: Executor + ?Sized> {
    config: &'a LoopConfig,
    executor: &'a E,
    snapshots: &'a dyn SnapshotStore,
    notifier: &'a dyn Notifier,
    prompts: PromptEngine,
}

impl<'a, E: Executor + ?Sized> Controller<'a, E> {
    pub fn new(
        config: &'a LoopConfig,
        executor: &'a E,
        snapshots: &'a dyn SnapshotStore,
        notifier: &'a dyn Notifier,
    ) -> Result<Self> {
        Ok(Self {
            config,
            executor,
            snapshots,
            notifier,
            prompts: PromptEngine::new()?,
        })
    }

    /// Run the loop on `path` until a terminal outcome.
    ///
    /// `on_round` is called after every completed round. Precondition
    /// failures surface as [`ControlError`]; a malformed document as a
    /// [`FormatError`](crate::error::FormatError) in the error chain.
    #[instrument(skip_all, fields(path = %path.display(), workers = options.workers.get()))]
    pub fn run<F: FnMut(&RoundSummary)>(
        &self,
        path: &Path,
        options: &RunOptions,
        mut on_round: F,
    ) -> Result<LoopOutcome> {
        let doc = load_document(path)?;
        let mut state = self.new_state(&doc, options.workers);

        match options.mode {
            RunMode::Fresh => {
                if doc.frontmatter.status == TaskStatus::Complete {
                    info!(id = %doc.frontmatter.id, "document already complete");
                    return self.finalize(state, doc, Outcome::Completed);
                }
                if doc.frontmatter.loop_status == LoopStatus::Running {
                    if !options.force {
                        return Err(ControlError::AlreadyRunning {
                            id: doc.frontmatter.id.clone(),
                        }
                        .into());
                    }
                    warn!(id = %doc.frontmatter.id, "taking over a document left running");
                }
            }
            RunMode::Resume => {
                if doc.frontmatter.loop_status != LoopStatus::Paused {
                    return Err(ControlError::NotPaused {
                        id: doc.frontmatter.id.clone(),
                        status: doc.frontmatter.loop_status.to_string(),
                    }
                    .into());
                }
            }
        }

        let max_iterations = options
            .max_iterations
            .unwrap_or_else(|| self.document_budget(&doc));
        state.snapshot.loop_max_iterations = max_iterations;

        // `running` is never written for a document that could not run a round.
        let mut starting = doc.frontmatter.clone();
        starting.max_iterations = max_iterations;
        starting.loop_status = LoopStatus::Running;
        if let Some(outcome) = terminal::evaluate(&starting) {
            info!(id = %doc.frontmatter.id, %outcome, "nothing to run");
            let doc = update_fields(path, &[FieldUpdate::MaxIterations(max_iterations)])?;
            return self.finalize(state, doc, outcome);
        }

        let doc = update_fields(
            path,
            &[
                FieldUpdate::LoopStatus(LoopStatus::Running),
                FieldUpdate::MaxIterations(max_iterations),
            ],
        )?;

        let summary = doc.summary();
        info!(
            run_id = %state.run_id,
            id = %doc.frontmatter.id,
            iteration = doc.frontmatter.iteration,
            max_iterations,
            passing = summary.passing,
            total = summary.total,
            "loop started"
        );
        self.notify(&report::start_message(&state.title, &summary, state.workers.get()));
        self.set_session_name(
            &state.run_id,
            &report::session_name(&state.title, &summary, doc.frontmatter.iteration, state.workers.get()),
        );
        self.publish(&state.snapshot);

        loop {
            let doc = load_document(path)?;
            if let Some(outcome) = terminal::evaluate(&doc.frontmatter) {
                return self.finalize(state, doc, outcome);
            }
            let round = self.run_round(&mut state, doc)?;
            on_round(&round);

            let delay = self.config.round_delay();
            if !delay.is_zero() {
                thread::sleep(delay);
            }
        }
    }

    fn new_state(&self, doc: &TaskDocument, workers: WorkerCount) -> RunState {
        let now = Utc::now().timestamp_millis();
        let mut snapshot = LoopSnapshot {
            active: true,
            session_id: Uuid::new_v4().to_string(),
            task_description: format!("Loop: {}", doc.title),
            current_phase: Phase::Execute,
            phase_started_at: now,
            started_at: now,
            effort_level: doc.frontmatter.effort_level.clone(),
            criteria: Vec::new(),
            workers: Vec::new(),
            document_path: doc.path.display().to_string(),
            document_id: doc.frontmatter.id.clone(),
            loop_iteration: doc.frontmatter.iteration,
            loop_max_iterations: doc.frontmatter.max_iterations,
            loop_history: Vec::new(),
            parallel_workers: workers.get(),
            mode: "loop".to_string(),
            completed_at: None,
            summary: None,
        };
        snapshot.set_criteria(&doc.criteria);
        RunState {
            run_id: snapshot.session_id.clone(),
            path: doc.path.clone(),
            title: doc.title.clone(),
            workers,
            rounds: 0,
            snapshot,
        }
    }

    /// The document's own budget, or the configured default when it sets none.
    fn document_budget(&self, doc: &TaskDocument) -> u32 {
        let mut budget_keys = vec![keys::MAX_ITERATIONS];
        budget_keys.extend_from_slice(keys::MAX_ITERATIONS_ALIASES);
        match doc.parsed.get_any(&budget_keys) {
            None | Some((_, FieldValue::Null)) => self.config.default_max_iterations,
            Some(_) => doc.frontmatter.max_iterations,
        }
    }

    #[instrument(skip_all, fields(run_id = %state.run_id, iteration = doc.frontmatter.iteration + 1))]
    fn run_round(&self, state: &mut RunState, doc: TaskDocument) -> Result<RoundSummary> {
        let iteration = doc.frontmatter.iteration + 1;
        let doc = update_fields(
            &state.path,
            &[FieldUpdate::Iteration(iteration), FieldUpdate::Updated(document::today())],
        )?;
        let before = doc.summary();
        let failing = doc.failing();
        let started = Utc::now();
        let paths = IterationPaths::new(&self.config.logs_dir, &state.run_id, iteration);
        let limits = RoundLimits {
            timeout: self.config.round_timeout(),
            output_limit_bytes: self.config.executor_output_limit_bytes,
        };

        state.snapshot.loop_iteration = iteration;
        state.snapshot.enter_phase(Phase::Execute, started.timestamp_millis());

        let (mode, workers, outcome) = if state.workers.get() > 1 && failing.len() > 1 {
            let assignments = partition(&failing, state.workers);
            let outcome = self.parallel_round(state, &doc, &assignments, iteration, &paths, limits)?;
            (RoundMode::Parallel, assignments.len(), outcome)
        } else {
            self.publish(&state.snapshot);
            let result =
                dispatch::run_sequential(self.executor, &self.prompts, &doc, iteration, &paths, limits)?;
            let outcome = if result.failure.is_some() {
                RoundOutcome::ExecutorFailed
            } else {
                RoundOutcome::Ok
            };
            (RoundMode::Sequential, 1, outcome)
        };

        let after_doc = load_document(&state.path)?;
        let after = after_doc.summary();
        let ended = Utc::now();
        let gained = after.passing.saturating_sub(before.passing);
        let passed_ids: Vec<String> = before
            .failing_ids
            .iter()
            .filter(|id| !after.failing_ids.contains(id))
            .cloned()
            .collect();
        state.rounds += 1;

        let record = IterationRecord {
            iteration,
            started_at: started.timestamp_millis(),
            completed_at: ended.timestamp_millis(),
            criteria_passing: after.passing,
            criteria_total: after.total,
        };
        state.snapshot.loop_history.push(record);
        state.snapshot.set_criteria(&after_doc.criteria);
        state.snapshot.workers.clear();

        let meta = IterationMeta {
            run_id: state.run_id.clone(),
            iteration,
            mode,
            workers,
            started_at: started.to_rfc3339(),
            ended_at: ended.to_rfc3339(),
            duration_ms: u64::try_from((ended - started).num_milliseconds()).unwrap_or(0),
            passing_before: before.passing,
            passing_after: after.passing,
            total: after.total,
            outcome,
            passed_ids,
        };
        if let Err(err) = write_meta(&paths, &meta) {
            warn!(err = %format!("{err:#}"), "failed to write iteration meta");
        }

        info!(
            iteration,
            mode = ?mode,
            passing = after.passing,
            total = after.total,
            gained,
            outcome = ?outcome,
            "round complete"
        );
        self.notify(&report::round_message(iteration, &after, gained));
        self.set_session_name(
            &state.run_id,
            &report::session_name(&state.title, &after, iteration, state.workers.get()),
        );
        self.publish(&state.snapshot);

        Ok(RoundSummary {
            iteration,
            max_iterations: after_doc.frontmatter.max_iterations,
            mode,
            workers,
            summary: after,
            gained,
            outcome,
        })
    }

    fn parallel_round(
        &self,
        state: &mut RunState,
        doc: &TaskDocument,
        assignments: &[WorkerAssignment],
        iteration: u32,
        paths: &IterationPaths,
        limits: RoundLimits,
    ) -> Result<RoundOutcome> {
        state.snapshot.workers = assignments
            .iter()
            .map(|assignment| WorkerInfo {
                name: format!("worker-{}", assignment.worker_id),
                status: WorkerState::Working,
                criteria_ids: assignment.criteria.iter().map(|c| c.id.clone()).collect(),
                task: assignment
                    .lead()
                    .map(|c| format!("{}: {}", c.id, c.description))
                    .unwrap_or_default(),
            })
            .collect();
        self.publish(&state.snapshot);

        let reports = dispatch::run_parallel(
            self.executor,
            &self.prompts,
            doc,
            assignments,
            iteration,
            paths,
            limits,
        );

        for (info, report) in state.snapshot.workers.iter_mut().zip(&reports) {
            info.status = if report.verdict.is_pass() {
                WorkerState::Passed
            } else {
                WorkerState::Failed
            };
        }
        state
            .snapshot
            .enter_phase(Phase::Verify, Utc::now().timestamp_millis());
        self.publish(&state.snapshot);

        let current = fs::read_to_string(&state.path)
            .with_context(|| format!("read task document {}", state.path.display()))?;
        if document::fingerprint(&current) != doc.fingerprint() {
            warn!(path = %state.path.display(), "task document changed during parallel round; merging");
        }

        let passed: HashSet<String> = reports
            .iter()
            .filter(|r| r.verdict.is_pass())
            .map(|r| r.criterion_id.clone())
            .collect();
        debug!(passed = passed.len(), dispatched = reports.len(), "reconciling worker reports");
        document::reconcile_round(&state.path, &passed, &document::today())?;

        let outcome = if reports.iter().all(|r| r.is_clean()) {
            RoundOutcome::Ok
        } else {
            RoundOutcome::Degraded
        };
        Ok(outcome)
    }

    fn finalize(&self, mut state: RunState, doc: TaskDocument, outcome: Outcome) -> Result<LoopOutcome> {
        let doc = match outcome.final_loop_status() {
            Some(status) if doc.frontmatter.loop_status != status => {
                update_fields(&state.path, &[FieldUpdate::LoopStatus(status)])?
            }
            _ => doc,
        };
        let summary = doc.summary();
        let fm = &doc.frontmatter;
        let message = report::outcome_message(outcome, &summary, fm.iteration, fm.max_iterations);
        let now = Utc::now().timestamp_millis();

        let snapshot = &mut state.snapshot;
        snapshot.set_criteria(&doc.criteria);
        snapshot.workers.clear();
        snapshot.loop_iteration = fm.iteration;
        snapshot.loop_max_iterations = fm.max_iterations;
        snapshot.summary = Some(message.clone());
        if outcome == Outcome::Paused {
            snapshot.active = true;
            snapshot.enter_phase(Phase::Plan, now);
            snapshot.completed_at = None;
        } else {
            snapshot.active = false;
            snapshot.enter_phase(Phase::Complete, now);
            snapshot.completed_at = Some(now);
        }
        self.publish(&state.snapshot);
        self.set_session_name(&state.run_id, &report::final_session_name(&state.title, outcome));
        self.notify(&message);

        info!(
            run_id = %state.run_id,
            outcome = %outcome,
            rounds = state.rounds,
            iteration = fm.iteration,
            passing = summary.passing,
            total = summary.total,
            "loop finished"
        );

        Ok(LoopOutcome {
            run_id: state.run_id,
            outcome,
            rounds: state.rounds,
            iteration: fm.iteration,
            max_iterations: fm.max_iterations,
            summary,
            history: state.snapshot.loop_history,
            message,
        })
    }

    fn publish(&self, snapshot: &LoopSnapshot) {
        best_effort("snapshot", self.snapshots.publish(snapshot));
    }

    fn set_session_name(&self, run_id: &str, name: &str) {
        best_effort("session name", self.snapshots.set_session_name(run_id, name));
    }

    fn notify(&self, message: &str) {
        best_effort("notification", self.notifier.notify(message));
    }
}

fn best_effort(sink: &str, result: Result<(), SinkError>) {
    if let Err(err) = result {
        warn!(sink, err = %err, "progress sink failed");
    }
}
