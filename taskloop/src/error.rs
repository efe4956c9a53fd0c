//! Typed error taxonomy.
//!
//! Orchestration code returns `anyhow::Result`; these types travel inside the
//! `anyhow::Error` chain so callers can classify with `downcast_ref`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Malformed or missing frontmatter. Fatal: no state exists to operate on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid task document format: {reason}")]
pub struct FormatError {
    pub reason: String,
}

impl FormatError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Why a single executor invocation did not produce a usable result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutorError {
    #[error("failed to spawn executor `{program}`: {message}")]
    Spawn { program: String, message: String },
    #[error("executor timed out after {0:?}")]
    Timeout(Duration),
    #[error("executor exited with status {0:?}")]
    NonZeroExit(Option<i32>),
}

/// Best-effort side effect failure. Logged by the controller, never escalated.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("snapshot write failed for {path}: {source}")]
    Snapshot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("snapshot serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("notification failed: {0}")]
    Notify(String),
}

/// A pause/resume/stop/run request that the document's current state refuses.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ControlError {
    #[error("loop already running on {id} (use --force to take over a crashed run)")]
    AlreadyRunning { id: String },
    #[error("loop is not running on {id} (status: {status})")]
    NotRunning { id: String, status: String },
    #[error("loop is not paused on {id} (status: {status})")]
    NotPaused { id: String, status: String },
}
