//! Durable file replacement and advisory locking.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use fs2::FileExt;
use tracing::debug;

/// Replace `path` with `contents` via a sibling temp file, `sync_all`, and rename.
pub fn write_atomic(path: &Path, contents: &str) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| anyhow!("path has no parent directory: {}", path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("create directory {}", parent.display()))?;

    let tmp_path = sibling(path, "tmp")?;
    let mut tmp = File::create(&tmp_path)
        .with_context(|| format!("create temp file {}", tmp_path.display()))?;
    tmp.write_all(contents.as_bytes())
        .with_context(|| format!("write temp file {}", tmp_path.display()))?;
    tmp.sync_all()
        .with_context(|| format!("sync temp file {}", tmp_path.display()))?;
    drop(tmp);

    fs::rename(&tmp_path, path)
        .with_context(|| format!("replace {} with {}", path.display(), tmp_path.display()))?;
    Ok(())
}

/// `.{file_name}.{suffix}` next to `path`.
fn sibling(path: &Path, suffix: &str) -> Result<PathBuf> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("path has no file name: {}", path.display()))?;
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    Ok(parent.join(format!(".{}.{suffix}", name.to_string_lossy())))
}

/// Exclusive advisory lock on a sibling `.{name}.lock` file; released on drop.
#[derive(Debug)]
pub struct FileLock {
    file: File,
    path: PathBuf,
}

impl FileLock {
    /// Block until the lock for `target` is held.
    pub fn acquire(target: &Path) -> Result<Self> {
        let path = sibling(target, "lock")?;
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)
            .with_context(|| format!("open lock file {}", path.display()))?;
        file.lock_exclusive()
            .with_context(|| format!("lock {}", path.display()))?;
        debug!(lock = %path.display(), "acquired document lock");
        Ok(Self { file, path })
    }
}

impl Drop for FileLock {
    fn drop(&mut self) {
        if let Err(e) = FileExt::unlock(&self.file) {
            debug!(lock = %self.path.display(), err = %e, "unlock failed");
        }
    }
}
