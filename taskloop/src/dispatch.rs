//! One round of delegated execution: a single full-access worker, or a
//! fan-out of scoped worker threads joined at one barrier.

use std::thread;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, instrument, warn};

use crate::core::criteria::context_section;
use crate::core::partition::WorkerAssignment;
use crate::core::verdict::Verdict;
use crate::error::ExecutorError;
use crate::io::document::TaskDocument;
use crate::io::executor::{Capability, ExecOutput, ExecRequest, Executor};
use crate::io::iteration_log::IterationPaths;
use crate::io::prompt::{IterationPrompt, PromptEngine, WorkerPrompt};

/// Per-round executor limits.
#[derive(Debug, Clone, Copy)]
pub struct RoundLimits {
    pub timeout: Duration,
    pub output_limit_bytes: usize,
}

/// Result of the sequential worker. The worker edits the document itself, so
/// only whether it ran cleanly is recorded here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequentialReport {
    pub exit_code: Option<i32>,
    pub failure: Option<String>,
}

/// What one parallel worker reported back through its join handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerReport {
    pub worker_id: usize,
    pub criterion_id: String,
    pub verdict: Verdict,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    /// Spawn failure, crash, or setup error. `None` for a clean run.
    pub error: Option<String>,
}

impl WorkerReport {
    fn failed(worker_id: usize, criterion_id: &str, error: String) -> Self {
        Self {
            worker_id,
            criterion_id: criterion_id.to_string(),
            verdict: Verdict::Missing,
            exit_code: None,
            timed_out: false,
            error: Some(error),
        }
    }

    fn from_output(worker_id: usize, criterion_id: &str, output: &ExecOutput, limits: RoundLimits) -> Self {
        let check = output.check(limits.timeout);
        Self {
            worker_id,
            criterion_id: criterion_id.to_string(),
            verdict: Verdict::from_run(&output.stdout, check.is_ok(), criterion_id),
            exit_code: output.exit_code,
            timed_out: output.timed_out,
            error: check.err().map(|e| e.to_string()),
        }
    }

    pub fn is_clean(&self) -> bool {
        self.error.is_none()
    }
}

/// Run the full-access worker against the shared document.
///
/// Executor failures are folded into the report; the round still counts.
#[instrument(skip_all, fields(iteration = iteration))]
pub fn run_sequential<E: Executor + ?Sized>(
    executor: &E,
    prompts: &PromptEngine,
    doc: &TaskDocument,
    iteration: u32,
    paths: &IterationPaths,
    limits: RoundLimits,
) -> Result<SequentialReport> {
    let failing = doc.failing();
    let progress = doc.summary().ratio();
    let prompt = prompts.render_iteration(&IterationPrompt {
        document_path: &doc.path,
        iteration,
        max_iterations: doc.frontmatter.max_iterations,
        effort_level: &doc.frontmatter.effort_level,
        last_phase: doc.frontmatter.last_phase.as_deref(),
        progress: &progress,
        failing: &failing,
    })?;
    let log_path = match paths.create() {
        Ok(()) => Some(paths.executor_log_path.clone()),
        Err(err) => {
            warn!(err = %format!("{err:#}"), "no iteration log dir, running without a transcript");
            None
        }
    };

    let request = ExecRequest {
        workdir: doc.workdir(),
        prompt,
        capabilities: Capability::sequential_set(),
        timeout: limits.timeout,
        output_limit_bytes: limits.output_limit_bytes,
        log_path,
    };

    let report = match executor.execute(&request) {
        Ok(output) => SequentialReport {
            exit_code: output.exit_code,
            failure: output.check(limits.timeout).err().map(|e| e.to_string()),
        },
        Err(err) => {
            error!(err = %format!("{err:#}"), "sequential executor failed to start");
            SequentialReport {
                exit_code: None,
                failure: Some(format!("{err:#}")),
            }
        }
    };
    if let Some(failure) = &report.failure {
        warn!(failure, "sequential round made no progress");
    }
    Ok(report)
}

struct PreparedWorker {
    worker_id: usize,
    criterion_id: String,
    request: Option<ExecRequest>,
    setup_error: Option<String>,
}

/// Fan out one worker per assignment and wait for all of them.
///
/// Each worker is given a read-only copy of `doc` and a prompt for the
/// assignment's lead criterion. No worker touches the shared document; the
/// reports come back in assignment order once every thread has finished.
#[instrument(skip_all, fields(iteration = iteration, workers = assignments.len()))]
pub fn run_parallel<E: Executor + ?Sized>(
    executor: &E,
    prompts: &PromptEngine,
    doc: &TaskDocument,
    assignments: &[WorkerAssignment],
    iteration: u32,
    paths: &IterationPaths,
    limits: RoundLimits,
) -> Vec<WorkerReport> {
    let context = context_section(doc.parsed.body());
    let prepared: Vec<PreparedWorker> = assignments
        .iter()
        .filter_map(|assignment| {
            let lead = assignment.lead()?;
            let worker_paths = paths.worker(assignment.worker_id);
            let setup = worker_paths
                .write_document_copy(&doc.raw)
                .and_then(|()| {
                    prompts.render_worker(&WorkerPrompt {
                        worker_id: assignment.worker_id,
                        iteration,
                        document_path: &worker_paths.document_copy,
                        criterion: lead,
                        context: context.as_deref(),
                    })
                });
            let (request, setup_error) = match setup {
                Ok(prompt) => (
                    Some(ExecRequest {
                        workdir: doc.workdir(),
                        prompt,
                        capabilities: Capability::worker_set(),
                        timeout: limits.timeout,
                        output_limit_bytes: limits.output_limit_bytes,
                        log_path: Some(worker_paths.executor_log_path.clone()),
                    }),
                    None,
                ),
                Err(err) => (None, Some(format!("worker setup failed: {err:#}"))),
            };
            info!(worker_id = assignment.worker_id, criterion = %lead.id, "dispatching worker");
            Some(PreparedWorker {
                worker_id: assignment.worker_id,
                criterion_id: lead.id.clone(),
                request,
                setup_error,
            })
        })
        .collect();

    thread::scope(|scope| {
        let handles: Vec<_> = prepared
            .iter()
            .map(|worker| {
                let handle = worker.request.as_ref().map(|request| {
                    scope.spawn(move || run_worker(executor, worker, request, limits))
                });
                (worker, handle)
            })
            .collect();

        handles
            .into_iter()
            .map(|(worker, handle)| match (handle, &worker.setup_error) {
                (Some(handle), _) => handle.join().unwrap_or_else(|_| {
                    error!(worker_id = worker.worker_id, "worker thread panicked");
                    WorkerReport::failed(
                        worker.worker_id,
                        &worker.criterion_id,
                        "worker crashed".to_string(),
                    )
                }),
                (None, setup_error) => WorkerReport::failed(
                    worker.worker_id,
                    &worker.criterion_id,
                    setup_error.clone().unwrap_or_else(|| "worker not started".to_string()),
                ),
            })
            .collect()
    })
}

fn run_worker<E: Executor + ?Sized>(
    executor: &E,
    worker: &PreparedWorker,
    request: &ExecRequest,
    limits: RoundLimits,
) -> WorkerReport {
    match executor.execute(request) {
        Ok(output) => {
            let report = WorkerReport::from_output(worker.worker_id, &worker.criterion_id, &output, limits);
            info!(
                worker_id = worker.worker_id,
                criterion = %worker.criterion_id,
                verdict = ?report.verdict,
                exit_code = ?report.exit_code,
                "worker finished"
            );
            report
        }
        Err(err) => {
            let message = match err.downcast_ref::<ExecutorError>() {
                Some(e) => e.to_string(),
                None => format!("{err:#}"),
            };
            error!(worker_id = worker.worker_id, err = %message, "worker failed to start");
            WorkerReport::failed(worker.worker_id, &worker.criterion_id, message)
        }
    }
}
