//! External state snapshots for dashboards and session naming.
//!
//! One JSON record per run id under the state directory, plus a shared
//! `session-names.json` registry mapping run ids to display names. Writes are
//! best-effort: failures surface as [`SinkError`] for the caller to log.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::types::{Criterion, CriterionKind, IterationRecord};
use crate::error::SinkError;
use crate::io::atomic::{FileLock, write_atomic};

pub const SESSION_NAMES_FILE: &str = "session-names.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Phase {
    Plan,
    Execute,
    Verify,
    Complete,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotCriterionStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotCriterion {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: CriterionKind,
    pub status: SnapshotCriterionStatus,
}

impl From<&Criterion> for SnapshotCriterion {
    fn from(c: &Criterion) -> Self {
        Self {
            id: c.id.clone(),
            description: c.description.clone(),
            kind: c.kind,
            status: if c.is_passing() {
                SnapshotCriterionStatus::Completed
            } else {
                SnapshotCriterionStatus::Pending
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Working,
    Passed,
    Failed,
}

/// Transient per-worker entry, present only during a parallel round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerInfo {
    pub name: String,
    pub status: WorkerState,
    pub criteria_ids: Vec<String>,
    pub task: String,
}

/// Independently readable projection of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoopSnapshot {
    pub active: bool,
    pub session_id: String,
    pub task_description: String,
    pub current_phase: Phase,
    /// Epoch milliseconds.
    pub phase_started_at: i64,
    /// Epoch milliseconds.
    pub started_at: i64,
    pub effort_level: String,
    pub criteria: Vec<SnapshotCriterion>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub workers: Vec<WorkerInfo>,
    pub document_path: String,
    pub document_id: String,
    pub loop_iteration: u32,
    pub loop_max_iterations: u32,
    pub loop_history: Vec<IterationRecord>,
    pub parallel_workers: usize,
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl LoopSnapshot {
    pub fn set_criteria(&mut self, criteria: &[Criterion]) {
        self.criteria = criteria.iter().map(SnapshotCriterion::from).collect();
    }

    pub fn enter_phase(&mut self, phase: Phase, now_ms: i64) {
        self.current_phase = phase;
        self.phase_started_at = now_ms;
    }
}

/// Port for publishing snapshots and display names.
pub trait SnapshotStore {
    fn publish(&self, snapshot: &LoopSnapshot) -> Result<(), SinkError>;
    fn set_session_name(&self, run_id: &str, name: &str) -> Result<(), SinkError>;
}

/// Writes `{state_dir}/{run_id}.json` and `{state_dir}/session-names.json`.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    state_dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn new(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }

    pub fn snapshot_path(&self, run_id: &str) -> PathBuf {
        self.state_dir.join(format!("{run_id}.json"))
    }

    pub fn session_names_path(&self) -> PathBuf {
        self.state_dir.join(SESSION_NAMES_FILE)
    }

    pub fn load(&self, run_id: &str) -> Result<Option<LoopSnapshot>, SinkError> {
        read_json(&self.snapshot_path(run_id))
    }

    pub fn session_names(&self) -> Result<BTreeMap<String, String>, SinkError> {
        Ok(read_json(&self.session_names_path())?.unwrap_or_default())
    }
}

impl SnapshotStore for FileSnapshotStore {
    fn publish(&self, snapshot: &LoopSnapshot) -> Result<(), SinkError> {
        let path = self.snapshot_path(&snapshot.session_id);
        write_json(&path, snapshot)?;
        debug!(path = %path.display(), phase = ?snapshot.current_phase, "published snapshot");
        Ok(())
    }

    fn set_session_name(&self, run_id: &str, name: &str) -> Result<(), SinkError> {
        let path = self.session_names_path();
        let _lock = FileLock::acquire(&path).map_err(|e| snapshot_error(&path, &e))?;
        let mut names = self.session_names()?;
        names.insert(run_id.to_string(), name.to_string());
        write_json(&path, &names)
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>, SinkError> {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(SinkError::Snapshot {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(&contents)?))
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), SinkError> {
    let mut buf = serde_json::to_string_pretty(value)?;
    buf.push('\n');
    write_atomic(path, &buf).map_err(|e| snapshot_error(path, &e))
}

fn snapshot_error(path: &Path, err: &anyhow::Error) -> SinkError {
    SinkError::Snapshot {
        path: path.to_path_buf(),
        source: std::io::Error::other(format!("{err:#}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CriterionStatus;

    fn snapshot(run_id: &str) -> LoopSnapshot {
        LoopSnapshot {
            active: true,
            session_id: run_id.to_string(),
            task_description: "Loop: Auth".to_string(),
            current_phase: Phase::Execute,
            phase_started_at: 10,
            started_at: 10,
            effort_level: "Standard".to_string(),
            criteria: vec![SnapshotCriterion::from(&Criterion {
                id: "ISC-A-1".to_string(),
                description: "no secrets".to_string(),
                verify: None,
                kind: CriterionKind::AntiCriterion,
                status: CriterionStatus::Passing,
            })],
            workers: Vec::new(),
            document_path: "/work/PRD-1.md".to_string(),
            document_id: "PRD-1".to_string(),
            loop_iteration: 1,
            loop_max_iterations: 5,
            loop_history: Vec::new(),
            parallel_workers: 1,
            mode: "loop".to_string(),
            completed_at: None,
            summary: None,
        }
    }

    #[test]
    fn publish_writes_camel_case_json() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path().join("state"));
        store.publish(&snapshot("run-1")).expect("publish");

        let raw = fs::read_to_string(store.snapshot_path("run-1")).expect("read");
        let value: serde_json::Value = serde_json::from_str(&raw).expect("json");
        assert_eq!(value["sessionId"], "run-1");
        assert_eq!(value["currentPhase"], "EXECUTE");
        assert_eq!(value["loopMaxIterations"], 5);
        assert_eq!(value["criteria"][0]["type"], "anti-criterion");
        assert_eq!(value["criteria"][0]["status"], "completed");
        assert!(value.get("completedAt").is_none());
        assert!(value.get("workers").is_none());

        assert_eq!(store.load("run-1").expect("load"), Some(snapshot("run-1")));
    }

    #[test]
    fn session_names_accumulate() {
        let temp = tempfile::tempdir().expect("tempdir");
        let store = FileSnapshotStore::new(temp.path());
        store.set_session_name("a", "Loop: A").expect("name a");
        store.set_session_name("b", "Loop: B").expect("name b");
        store.set_session_name("a", "Loop: A [COMPLETE]").expect("rename a");
        let names = store.session_names().expect("names");
        assert_eq!(names.len(), 2);
        assert_eq!(names["a"], "Loop: A [COMPLETE]");
    }

    #[test]
    fn unwritable_state_dir_is_a_sink_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a dir").expect("write");
        let store = FileSnapshotStore::new(blocker.join("state"));
        assert!(matches!(
            store.publish(&snapshot("run-1")),
            Err(SinkError::Snapshot { .. })
        ));
    }
}
