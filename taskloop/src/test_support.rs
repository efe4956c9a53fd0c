//! Test-only fakes for the executor and progress sinks, plus document builders.

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::error::{ExecutorError, SinkError};
use crate::io::config::LoopConfig;
use crate::io::executor::{ExecOutput, ExecRequest, Executor};
use crate::io::notify::Notifier;
use crate::io::snapshot::{LoopSnapshot, SnapshotStore};

/// Write `contents` to `dir/name` and return the path.
pub fn write_doc(dir: &Path, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write task document");
    path
}

/// Scratch directory plus a config rooted in it, with no inter-round delay.
pub fn workspace() -> (tempfile::TempDir, LoopConfig) {
    let temp = tempfile::tempdir().expect("tempdir");
    let config = LoopConfig {
        round_delay_ms: 0,
        round_timeout_secs: 5,
        ..LoopConfig::default()
    }
    .rooted_at(temp.path());
    (temp, config)
}

/// Builder for task document text.
#[derive(Debug, Clone)]
pub struct DocBuilder {
    fields: Vec<(String, String)>,
    title: String,
    context: Option<String>,
    criteria: Vec<String>,
}

pub fn doc(id: &str) -> DocBuilder {
    DocBuilder {
        fields: vec![
            ("id".to_string(), id.to_string()),
            ("status".to_string(), "DRAFT".to_string()),
            ("loop_status".to_string(), "idle".to_string()),
            ("iteration".to_string(), "0".to_string()),
            ("max_iterations".to_string(), "5".to_string()),
        ],
        title: "Test task".to_string(),
        context: None,
        criteria: Vec::new(),
    }
}

impl DocBuilder {
    /// Set or replace a frontmatter field; `value` is written verbatim.
    pub fn field(mut self, key: &str, value: &str) -> Self {
        match self.fields.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_string(),
            None => self.fields.push((key.to_string(), value.to_string())),
        }
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.fields.retain(|(k, _)| k != key);
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn context(mut self, text: &str) -> Self {
        self.context = Some(text.to_string());
        self
    }

    pub fn failing(mut self, id: &str, description: &str) -> Self {
        self.criteria.push(format!("- [ ] {id}: {description}"));
        self
    }

    pub fn passing(mut self, id: &str, description: &str) -> Self {
        self.criteria.push(format!("- [x] {id}: {description}"));
        self
    }

    pub fn build(&self) -> String {
        let mut out = String::from("---\n");
        for (key, value) in &self.fields {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push_str(&format!("---\n\n# {}\n\n", self.title));
        if let Some(context) = &self.context {
            out.push_str(&format!("## CONTEXT\n\n{context}\n\n"));
        }
        out.push_str("## CRITERIA\n\n");
        for line in &self.criteria {
            out.push_str(line);
            out.push('\n');
        }
        out
    }

    pub fn write(&self, dir: &Path, name: &str) -> PathBuf {
        write_doc(dir, name, &self.build())
    }
}

type DocumentEdit = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// One scripted executor invocation.
#[derive(Clone)]
pub struct ScriptedRun {
    stdout: String,
    exit_code: Option<i32>,
    timed_out: bool,
    spawn_error: bool,
    panic: bool,
    edit: Option<(PathBuf, DocumentEdit)>,
}

impl ScriptedRun {
    /// Clean exit with no output.
    pub fn ok() -> Self {
        Self {
            stdout: String::new(),
            exit_code: Some(0),
            timed_out: false,
            spawn_error: false,
            panic: false,
            edit: None,
        }
    }

    pub fn pass(id: &str) -> Self {
        Self::ok().stdout(&format!("working\nRESULT: {id} PASS\n"))
    }

    pub fn fail(id: &str, reason: &str) -> Self {
        Self::ok().stdout(&format!("RESULT: {id} FAIL: {reason}\n"))
    }

    pub fn timeout() -> Self {
        Self {
            exit_code: None,
            timed_out: true,
            ..Self::ok()
        }
    }

    pub fn spawn_error() -> Self {
        Self {
            spawn_error: true,
            ..Self::ok()
        }
    }

    /// The invocation panics on its worker thread.
    pub fn panic() -> Self {
        Self {
            panic: true,
            ..Self::ok()
        }
    }

    pub fn stdout(mut self, stdout: &str) -> Self {
        self.stdout = stdout.to_string();
        self
    }

    pub fn exit(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    /// Rewrite the file at `path` while "running", the way a worker with
    /// document access would.
    pub fn editing(mut self, path: &Path, edit: impl Fn(&str) -> String + Send + Sync + 'static) -> Self {
        self.edit = Some((path.to_path_buf(), Arc::new(edit)));
        self
    }

    fn run(&self) -> anyhow::Result<ExecOutput> {
        if self.panic {
            panic!("scripted worker crash");
        }
        if self.spawn_error {
            return Err(ExecutorError::Spawn {
                program: "scripted".to_string(),
                message: "no such program".to_string(),
            }
            .into());
        }
        if let Some((path, edit)) = &self.edit {
            let raw = fs::read_to_string(path).expect("read for scripted edit");
            fs::write(path, edit(&raw)).expect("scripted edit");
        }
        Ok(ExecOutput {
            stdout: self.stdout.clone(),
            stderr: String::new(),
            exit_code: self.exit_code,
            timed_out: self.timed_out,
        })
    }
}

/// Deterministic executor.
///
/// A worker prompt is matched against the criterion-keyed runs by its
/// `RESULT: {id} PASS` instruction. Any other request takes the next queued
/// run, or a clean no-op once the queue is empty. Every request is recorded.
#[derive(Default)]
pub struct ScriptedExecutor {
    by_criterion: Vec<(String, ScriptedRun)>,
    queue: Mutex<VecDeque<ScriptedRun>>,
    requests: Mutex<Vec<ExecRequest>>,
}

impl ScriptedExecutor {
    pub fn by_criterion<I, S>(runs: I) -> Self
    where
        I: IntoIterator<Item = (S, ScriptedRun)>,
        S: Into<String>,
    {
        Self {
            by_criterion: runs.into_iter().map(|(id, run)| (id.into(), run)).collect(),
            ..Self::default()
        }
    }

    pub fn queue(runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        Self {
            queue: Mutex::new(runs.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Add queued runs for requests not matched by criterion.
    pub fn then(self, runs: impl IntoIterator<Item = ScriptedRun>) -> Self {
        self.queue.lock().expect("queue lock").extend(runs);
        self
    }

    pub fn requests(&self) -> Vec<ExecRequest> {
        self.requests.lock().expect("requests lock").clone()
    }
}

impl Executor for ScriptedExecutor {
    fn execute(&self, request: &ExecRequest) -> anyhow::Result<ExecOutput> {
        self.requests.lock().expect("requests lock").push(request.clone());
        let keyed = self
            .by_criterion
            .iter()
            .find(|(id, _)| request.prompt.contains(&format!("RESULT: {id} PASS")))
            .map(|(_, run)| run.clone());
        let run = match keyed {
            Some(run) => run,
            None => self
                .queue
                .lock()
                .expect("queue lock")
                .pop_front()
                .unwrap_or_else(ScriptedRun::ok),
        };
        run.run()
    }
}

/// Records every message.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("messages lock").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str) -> Result<(), SinkError> {
        self.messages.lock().expect("messages lock").push(message.to_string());
        Ok(())
    }
}

/// Fails every call.
#[derive(Debug, Default)]
pub struct FailingNotifier;

impl Notifier for FailingNotifier {
    fn notify(&self, _message: &str) -> Result<(), SinkError> {
        Err(SinkError::Notify("endpoint unreachable".to_string()))
    }
}

/// Keeps every published snapshot and the latest session names in memory.
#[derive(Debug, Default)]
pub struct MemorySnapshotStore {
    published: Mutex<Vec<LoopSnapshot>>,
    names: Mutex<BTreeMap<String, String>>,
}

impl MemorySnapshotStore {
    pub fn published(&self) -> Vec<LoopSnapshot> {
        self.published.lock().expect("published lock").clone()
    }

    pub fn last(&self) -> Option<LoopSnapshot> {
        self.published().pop()
    }

    pub fn session_name(&self, run_id: &str) -> Option<String> {
        self.names.lock().expect("names lock").get(run_id).cloned()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn publish(&self, snapshot: &LoopSnapshot) -> Result<(), SinkError> {
        self.published.lock().expect("published lock").push(snapshot.clone());
        Ok(())
    }

    fn set_session_name(&self, run_id: &str, name: &str) -> Result<(), SinkError> {
        self.names
            .lock()
            .expect("names lock")
            .insert(run_id.to_string(), name.to_string());
        Ok(())
    }
}

/// Fails every call.
#[derive(Debug, Default)]
pub struct FailingSnapshotStore;

impl SnapshotStore for FailingSnapshotStore {
    fn publish(&self, snapshot: &LoopSnapshot) -> Result<(), SinkError> {
        Err(SinkError::Snapshot {
            path: PathBuf::from(format!("/unwritable/{}.json", snapshot.session_id)),
            source: std::io::Error::other("read-only file system"),
        })
    }

    fn set_session_name(&self, _run_id: &str, _name: &str) -> Result<(), SinkError> {
        Err(SinkError::Snapshot {
            path: PathBuf::from("/unwritable/session-names.json"),
            source: std::io::Error::other("read-only file system"),
        })
    }
}
