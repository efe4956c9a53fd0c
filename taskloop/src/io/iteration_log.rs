//! Per-round artifacts under `{logs_dir}/{run_id}/{iteration}/`.
//!
//! These are product output, always written and unaffected by `RUST_LOG`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoundMode {
    Sequential,
    Parallel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundOutcome {
    /// The executor ran and exited cleanly.
    Ok,
    /// The sequential executor failed; the round made no progress.
    ExecutorFailed,
    /// At least one parallel worker crashed, timed out or exited non-zero.
    Degraded,
}

#[derive(Debug, Clone, Serialize)]
pub struct IterationMeta {
    pub run_id: String,
    pub iteration: u32,
    pub mode: RoundMode,
    pub workers: usize,
    /// RFC 3339.
    pub started_at: String,
    /// RFC 3339.
    pub ended_at: String,
    pub duration_ms: u64,
    pub passing_before: usize,
    pub passing_after: usize,
    pub total: usize,
    pub outcome: RoundOutcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub passed_ids: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct IterationPaths {
    pub dir: PathBuf,
    pub meta_path: PathBuf,
    pub executor_log_path: PathBuf,
}

impl IterationPaths {
    pub fn new(logs_dir: &Path, run_id: &str, iteration: u32) -> Self {
        let dir = logs_dir.join(run_id).join(iteration.to_string());
        Self {
            meta_path: dir.join("meta.json"),
            executor_log_path: dir.join("executor.log"),
            dir,
        }
    }

    pub fn worker(&self, worker_id: usize) -> WorkerPaths {
        let dir = self.dir.join(format!("worker-{worker_id}"));
        WorkerPaths {
            document_copy: dir.join("TASK.md"),
            executor_log_path: dir.join("executor.log"),
            dir,
        }
    }

    pub fn create(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create iteration dir {}", self.dir.display()))
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPaths {
    pub dir: PathBuf,
    pub document_copy: PathBuf,
    pub executor_log_path: PathBuf,
}

impl WorkerPaths {
    /// Write the worker's copy of the document and mark it read-only.
    pub fn write_document_copy(&self, contents: &str) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create worker dir {}", self.dir.display()))?;
        fs::write(&self.document_copy, contents)
            .with_context(|| format!("write {}", self.document_copy.display()))?;
        let mut perms = fs::metadata(&self.document_copy)
            .with_context(|| format!("stat {}", self.document_copy.display()))?
            .permissions();
        perms.set_readonly(true);
        fs::set_permissions(&self.document_copy, perms)
            .with_context(|| format!("set read-only {}", self.document_copy.display()))
    }
}

pub fn write_meta(paths: &IterationPaths, meta: &IterationMeta) -> Result<()> {
    paths.create()?;
    let mut buf = serde_json::to_string_pretty(meta)?;
    buf.push('\n');
    fs::write(&paths.meta_path, buf)
        .with_context(|| format!("write {}", paths.meta_path.display()))
}
