//! Executor abstraction for worker invocation.
//!
//! The [`Executor`] trait decouples the controller from the actual worker
//! backend (by default the `claude` CLI). Tests use scripted executors that
//! return predetermined outputs without spawning processes.

use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, instrument, warn};

use crate::error::ExecutorError;
use crate::io::config::ExecutorConfig;
use crate::io::process::run_child;

/// A tool the worker process is allowed to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    FileEdit,
    FileWrite,
    Shell,
    Read,
    Glob,
    Search,
    WebFetch,
    WebSearch,
    NotebookEdit,
    TaskAuthoring,
}

impl Capability {
    /// Tool names passed to the worker CLI for this capability.
    pub fn tool_names(self) -> &'static [&'static str] {
        match self {
            Capability::FileEdit => &["Edit"],
            Capability::FileWrite => &["Write"],
            Capability::Shell => &["Bash"],
            Capability::Read => &["Read"],
            Capability::Glob => &["Glob"],
            Capability::Search => &["Grep"],
            Capability::WebFetch => &["WebFetch"],
            Capability::WebSearch => &["WebSearch"],
            Capability::NotebookEdit => &["NotebookEdit"],
            Capability::TaskAuthoring => &["Task", "TaskCreate", "TaskUpdate", "TaskList"],
        }
    }

    /// Parallel workers: everything except task authoring.
    pub fn worker_set() -> Vec<Capability> {
        let mut caps = Self::base_set();
        caps.push(Capability::NotebookEdit);
        caps
    }

    /// Sequential worker: full access including task authoring.
    pub fn sequential_set() -> Vec<Capability> {
        let mut caps = Self::base_set();
        caps.extend([Capability::TaskAuthoring, Capability::NotebookEdit]);
        caps
    }

    fn base_set() -> Vec<Capability> {
        vec![
            Capability::FileEdit,
            Capability::FileWrite,
            Capability::Shell,
            Capability::Read,
            Capability::Glob,
            Capability::Search,
            Capability::WebFetch,
            Capability::WebSearch,
        ]
    }
}

/// Comma-separated `--allowedTools` value.
pub fn allowed_tools(capabilities: &[Capability]) -> String {
    capabilities
        .iter()
        .flat_map(|cap| cap.tool_names().iter().copied())
        .collect::<Vec<_>>()
        .join(",")
}

/// Parameters for an executor invocation.
#[derive(Debug, Clone)]
pub struct ExecRequest {
    /// Working directory for the executor process.
    pub workdir: PathBuf,
    /// Prompt text passed to the worker.
    pub prompt: String,
    pub capabilities: Vec<Capability>,
    /// Maximum time to wait for the executor to complete.
    pub timeout: Duration,
    /// Keep at most this many bytes of each output stream.
    pub output_limit_bytes: usize,
    /// Where to tee the worker's output as it runs.
    pub log_path: Option<PathBuf>,
}

/// What the worker left behind on its terminal streams.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecOutput {
    /// Classify the invocation; `Ok(())` only for a clean exit 0.
    pub fn check(&self, timeout: Duration) -> Result<(), ExecutorError> {
        if self.timed_out {
            return Err(ExecutorError::Timeout(timeout));
        }
        if self.exit_code != Some(0) {
            return Err(ExecutorError::NonZeroExit(self.exit_code));
        }
        Ok(())
    }
}

/// Abstraction over worker execution backends.
///
/// `Err` means the worker could not be started at all and carries an
/// [`ExecutorError::Spawn`]. Timeouts and non-zero exits are reported in the
/// returned [`ExecOutput`].
pub trait Executor: Sync {
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput>;
}

/// Executor that spawns the configured CLI once per request.
#[derive(Debug, Clone)]
pub struct CommandExecutor {
    config: ExecutorConfig,
}

impl CommandExecutor {
    pub fn new(config: ExecutorConfig) -> Self {
        Self { config }
    }

    fn command(&self, request: &ExecRequest) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .arg("-p")
            .arg(&request.prompt)
            .arg("--allowedTools")
            .arg(allowed_tools(&request.capabilities))
            .current_dir(&request.workdir);
        cmd
    }

    /// Run a session attached to this terminal:
    /// `{program} {args…} {prompt} --allowedTools {tools}` in `workdir`.
    ///
    /// No deadline and no capture; returns once the session ends.
    #[instrument(skip_all, fields(program = %self.config.program))]
    pub fn run_attached(
        &self,
        workdir: &Path,
        prompt: &str,
        capabilities: &[Capability],
    ) -> Result<ExitStatus> {
        info!(workdir = %workdir.display(), "starting attached session");
        let status = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(prompt)
            .arg("--allowedTools")
            .arg(allowed_tools(capabilities))
            .current_dir(workdir)
            .env_remove("CLAUDECODE")
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| ExecutorError::Spawn {
                program: self.config.program.clone(),
                message: err.to_string(),
            })?;
        debug!(exit_code = ?status.code(), "attached session ended");
        Ok(status)
    }
}

impl Executor for CommandExecutor {
    #[instrument(skip_all, fields(program = %self.config.program, timeout_secs = request.timeout.as_secs()))]
    fn execute(&self, request: &ExecRequest) -> Result<ExecOutput> {
        info!(workdir = %request.workdir.display(), "starting executor");
        let output = run_child(
            self.command(request),
            request.timeout,
            request.output_limit_bytes,
            request.log_path.as_deref(),
        )
        .map_err(|err| ExecutorError::Spawn {
            program: self.config.program.clone(),
            message: format!("{err:#}"),
        })?;

        if output.timed_out {
            warn!(timeout_secs = request.timeout.as_secs(), "executor timed out");
        } else if !output.status.success() {
            warn!(exit_code = ?output.status.code(), "executor exited non-zero");
        } else {
            debug!("executor completed");
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&output.stdout.bytes).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr.bytes).into_owned(),
            exit_code: output.status.code(),
            timed_out: output.timed_out,
        })
    }
}
