//! Worker subprocesses: a wall-clock ceiling, bounded capture and an optional
//! on-disk transcript.
//!
//! Each child leads its own process group so a deadline kill also takes down
//! anything it spawned. Only the tail of each stream is kept: the result
//! sentinel is the last thing a worker prints.

use std::collections::VecDeque;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, LineWriter, Read, Write};
use std::path::Path;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// How long to wait for the output pipes to close once the child is gone.
const PIPE_GRACE: Duration = Duration::from_secs(2);

/// The last bytes of one output stream.
#[derive(Debug, Default)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// Leading bytes discarded to stay within the capture limit.
    pub dropped: usize,
}

#[derive(Debug)]
struct Tail {
    buf: VecDeque<u8>,
    limit: usize,
    dropped: usize,
}

impl Tail {
    fn new(limit: usize) -> Self {
        Self {
            buf: VecDeque::new(),
            limit,
            dropped: 0,
        }
    }

    fn push(&mut self, chunk: &[u8]) {
        self.buf.extend(chunk);
        let excess = self.buf.len().saturating_sub(self.limit);
        if excess > 0 {
            self.buf.drain(..excess);
            self.dropped += excess;
        }
    }

    fn captured(&self) -> Captured {
        Captured {
            bytes: self.buf.iter().copied().collect(),
            dropped: self.dropped,
        }
    }
}

type SharedTail = Arc<Mutex<Tail>>;

fn snapshot(tail: &SharedTail) -> Captured {
    match tail.lock() {
        Ok(tail) => tail.captured(),
        Err(poisoned) => poisoned.into_inner().captured(),
    }
}

#[derive(Debug)]
pub struct ChildOutcome {
    pub status: ExitStatus,
    pub stdout: Captured,
    pub stderr: Captured,
    pub timed_out: bool,
}

/// Interleaved copy of both streams, written line by line.
#[derive(Clone)]
struct Transcript(Arc<Mutex<LineWriter<File>>>);

impl Transcript {
    fn create(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        }
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        Ok(Self(Arc::new(Mutex::new(LineWriter::new(file)))))
    }

    fn append(&self, line: &[u8]) {
        let Ok(mut out) = self.0.lock() else {
            return;
        };
        if let Err(err) = out.write_all(line).and_then(|()| out.flush()) {
            warn!(err = %err, "executor transcript write failed");
        }
    }
}

/// Reader threads still draining the child's pipes.
struct Readers {
    done: Receiver<()>,
    pending: usize,
}

impl Readers {
    /// Wait up to `grace` for every reader to hit end of stream.
    fn wait(&mut self, grace: Duration) -> bool {
        let until = Instant::now() + grace;
        while self.pending > 0 {
            let left = until.saturating_duration_since(Instant::now());
            if self.done.recv_timeout(left).is_err() {
                return false;
            }
            self.pending -= 1;
        }
        true
    }
}

/// Spawn `cmd` with stdin closed and wait at most `deadline` for it.
///
/// Both pipes are drained on reader threads while the child runs. Each stream
/// keeps its last `keep_bytes` bytes. A child still alive at the deadline is
/// killed with its whole process group and reported with `timed_out`.
/// Descendants that keep the pipes open after the child exits are killed too;
/// this never waits on the readers for more than a short grace period. A spawn
/// failure keeps the `std::io::Error` as its root cause.
#[instrument(skip_all, fields(deadline_secs = deadline.as_secs(), keep_bytes = keep_bytes))]
pub fn run_child(
    mut cmd: Command,
    deadline: Duration,
    keep_bytes: usize,
    transcript: Option<&Path>,
) -> Result<ChildOutcome> {
    let transcript = transcript.map(Transcript::create).transpose()?;

    own_process_group(&mut cmd);
    let mut child = cmd
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .inspect_err(|err| error!(err = %err, "spawn failed"))
        .context("spawn command")?;

    let stdout = child.stdout.take().ok_or_else(|| anyhow!("stdout not piped"))?;
    let stderr = child.stderr.take().ok_or_else(|| anyhow!("stderr not piped"))?;
    let (done_tx, done_rx) = mpsc::channel();
    let stdout = drain_in_background(stdout, keep_bytes, transcript.clone(), done_tx.clone());
    let stderr = drain_in_background(stderr, keep_bytes, transcript, done_tx);
    let mut readers = Readers {
        done: done_rx,
        pending: 2,
    };

    let (status, timed_out) = match child.wait_timeout(deadline).context("wait for child")? {
        Some(status) => (status, false),
        None => {
            warn!(deadline_secs = deadline.as_secs(), "deadline passed, killing process group");
            kill_tree(&mut child);
            (child.wait().context("reap killed child")?, true)
        }
    };

    if !readers.wait(PIPE_GRACE) {
        warn!("descendants still hold the output pipes, killing process group");
        kill_group(child.id());
        if !readers.wait(PIPE_GRACE) {
            warn!("output pipes still open, keeping what was read so far");
        }
    }

    let stdout = snapshot(&stdout);
    let stderr = snapshot(&stderr);
    if stdout.dropped + stderr.dropped > 0 {
        warn!(
            stdout_dropped = stdout.dropped,
            stderr_dropped = stderr.dropped,
            "child output exceeded capture limit, kept the tail"
        );
    }

    debug!(exit_code = ?status.code(), timed_out, "child finished");
    Ok(ChildOutcome {
        status,
        stdout,
        stderr,
        timed_out,
    })
}

fn drain_in_background<R: Read + Send + 'static>(
    stream: R,
    limit: usize,
    transcript: Option<Transcript>,
    done: Sender<()>,
) -> SharedTail {
    let tail = Arc::new(Mutex::new(Tail::new(limit)));
    let shared = Arc::clone(&tail);
    thread::spawn(move || {
        let mut reader = BufReader::new(stream);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => break,
                Ok(_) => {}
                Err(err) => {
                    warn!(err = %err, "read child output failed");
                    break;
                }
            }
            if let Some(transcript) = &transcript {
                transcript.append(&line);
            }
            if let Ok(mut tail) = shared.lock() {
                tail.push(&line);
            }
        }
        let _ = done.send(());
    });
    tail
}

fn kill_tree(child: &mut Child) {
    kill_group(child.id());
    if let Err(err) = child.kill() {
        debug!(err = %err, "child already gone");
    }
}

#[cfg(unix)]
fn own_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn own_process_group(_cmd: &mut Command) {}

#[cfg(unix)]
#[allow(unsafe_code)]
fn kill_group(pid: u32) {
    let Ok(pgid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: killpg takes no pointers. The group id is the child's pid, which
    // stays reserved while any member of its group is alive.
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } != 0 {
        debug!(err = %std::io::Error::last_os_error(), "process group already gone");
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}
