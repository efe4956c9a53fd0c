//! Loop configuration stored under `.taskloop/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::core::frontmatter::DEFAULT_MAX_ITERATIONS;
use crate::io::atomic::write_atomic;

/// Default config location relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = ".taskloop/config.toml";

/// Loop configuration (TOML).
///
/// Human-editable; missing fields fall back to the defaults below. The
/// controller receives this value explicitly and never consults ambient paths.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LoopConfig {
    /// Directory for per-run state snapshots and the session names registry.
    pub state_dir: PathBuf,

    /// Directory for per-round iteration logs.
    pub logs_dir: PathBuf,

    /// Directories searched for task documents by `status` and short references.
    pub search_roots: Vec<PathBuf>,

    /// Budget used when a document does not set `max_iterations`.
    pub default_max_iterations: u32,

    /// Wall-clock ceiling for each executor invocation, in seconds.
    pub round_timeout_secs: u64,

    /// Pause between rounds, in milliseconds.
    pub round_delay_ms: u64,

    /// Keep at most this many bytes of executor stdout/stderr in memory.
    pub executor_output_limit_bytes: usize,

    pub executor: ExecutorConfig,

    pub notify: NotifyConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Program spawned for each round or worker.
    pub program: String,
    /// Extra arguments placed before the prompt.
    pub args: Vec<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            program: "claude".to_string(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotifyConfig {
    /// Notification endpoint. Notifications are disabled when unset.
    pub url: Option<String>,
    pub voice_id: Option<String>,
    pub timeout_ms: u64,
}

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            url: None,
            voice_id: None,
            timeout_ms: 1_500,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(".taskloop/state"),
            logs_dir: PathBuf::from(".taskloop/iterations"),
            search_roots: Vec::new(),
            default_max_iterations: DEFAULT_MAX_ITERATIONS,
            round_timeout_secs: 600,
            round_delay_ms: 2_000,
            executor_output_limit_bytes: 100_000,
            executor: ExecutorConfig::default(),
            notify: NotifyConfig::default(),
        }
    }
}

impl LoopConfig {
    pub fn validate(&self) -> Result<()> {
        if self.default_max_iterations == 0 {
            return Err(anyhow!("default_max_iterations must be > 0"));
        }
        if self.round_timeout_secs == 0 {
            return Err(anyhow!("round_timeout_secs must be > 0"));
        }
        if self.executor_output_limit_bytes == 0 {
            return Err(anyhow!("executor_output_limit_bytes must be > 0"));
        }
        if self.executor.program.trim().is_empty() {
            return Err(anyhow!("executor.program must be non-empty"));
        }
        if self.notify.timeout_ms == 0 {
            return Err(anyhow!("notify.timeout_ms must be > 0"));
        }
        if let Some(url) = &self.notify.url
            && !(url.starts_with("http://") || url.starts_with("https://"))
        {
            return Err(anyhow!("notify.url must be an http(s) URL, got '{url}'"));
        }
        Ok(())
    }

    pub fn round_timeout(&self) -> Duration {
        Duration::from_secs(self.round_timeout_secs)
    }

    pub fn round_delay(&self) -> Duration {
        Duration::from_millis(self.round_delay_ms)
    }

    /// Resolve relative directories against `base`.
    pub fn rooted_at(mut self, base: &Path) -> Self {
        let root = |path: PathBuf| {
            if path.is_absolute() {
                path
            } else {
                base.join(path)
            }
        };
        self.state_dir = root(self.state_dir);
        self.logs_dir = root(self.logs_dir);
        self.search_roots = self.search_roots.into_iter().map(root).collect();
        self
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `LoopConfig::default()`.
pub fn load_config(path: &Path) -> Result<LoopConfig> {
    if !path.exists() {
        let cfg = LoopConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: LoopConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()
        .with_context(|| format!("validate {}", path.display()))?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &LoopConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
