//! Out-of-band loop control and status queries.
//!
//! Pause and stop only flip `loop_status`; a running controller honors the
//! change at the top of its next cycle.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, info, warn};

use crate::core::report;
use crate::core::types::LoopStatus;
use crate::error::ControlError;
use crate::io::discovery::find_documents;
use crate::io::document::{FieldUpdate, TaskDocument, load_document, today, update_fields};
use crate::io::notify::Notifier;

/// Request a pause. The document must be `running`.
pub fn pause(path: &Path, notifier: &dyn Notifier) -> Result<TaskDocument> {
    let doc = load_document(path)?;
    if doc.frontmatter.loop_status != LoopStatus::Running {
        return Err(ControlError::NotRunning {
            id: doc.frontmatter.id.clone(),
            status: doc.frontmatter.loop_status.to_string(),
        }
        .into());
    }
    let doc = set_loop_status(path, LoopStatus::Paused)?;
    info!(id = %doc.frontmatter.id, "pause requested");
    notify(notifier, &format!("Loop paused on {}.", doc.frontmatter.id));
    Ok(doc)
}

/// Request a stop, whatever the current state.
pub fn stop(path: &Path, notifier: &dyn Notifier) -> Result<TaskDocument> {
    let doc = set_loop_status(path, LoopStatus::Stopped)?;
    info!(id = %doc.frontmatter.id, "stop requested");
    notify(notifier, &format!("Loop stopped on {}.", doc.frontmatter.id));
    Ok(doc)
}

fn set_loop_status(path: &Path, status: LoopStatus) -> Result<TaskDocument> {
    update_fields(
        path,
        &[FieldUpdate::LoopStatus(status), FieldUpdate::Updated(today())],
    )
}

fn notify(notifier: &dyn Notifier, message: &str) {
    if let Err(err) = notifier.notify(message) {
        warn!(err = %err, "progress sink failed");
    }
}

/// Status block for one document.
pub fn status(path: &Path) -> Result<String> {
    let doc = load_document(path)?;
    Ok(report::status_block(
        &path.display().to_string(),
        &doc.frontmatter,
        &doc.summary(),
    ))
}

/// Status blocks for every parseable document under `roots`.
pub fn status_all(roots: &[PathBuf]) -> Vec<String> {
    find_documents(roots)
        .iter()
        .filter_map(|path| match status(path) {
            Ok(block) => Some(block),
            Err(err) => {
                debug!(path = %path.display(), err = %format!("{err:#}"), "skipping unreadable document");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{FailingNotifier, RecordingNotifier, doc};

    #[test]
    fn pause_requires_running() {
        let temp = tempfile::tempdir().expect("tempdir");
        let notifier = RecordingNotifier::default();
        let idle = doc("PRD-1").write(temp.path(), "PRD-1.md");
        let err = pause(&idle, &notifier).unwrap_err();
        assert_eq!(
            err.downcast_ref::<ControlError>(),
            Some(&ControlError::NotRunning {
                id: "PRD-1".to_string(),
                status: "idle".to_string(),
            })
        );

        let running = doc("PRD-2")
            .field("loop_status", "running")
            .write(temp.path(), "PRD-2.md");
        let paused = pause(&running, &notifier).expect("pause");
        assert_eq!(paused.frontmatter.loop_status, LoopStatus::Paused);
        assert_eq!(notifier.messages(), ["Loop paused on PRD-2."]);
    }

    #[test]
    fn stop_is_unconditional_and_tolerates_sink_failure() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = doc("PRD-1")
            .field("loop_status", "paused")
            .write(temp.path(), "PRD-1.md");
        let stopped = stop(&path, &FailingNotifier).expect("stop");
        assert_eq!(stopped.frontmatter.loop_status, LoopStatus::Stopped);
        assert_eq!(
            load_document(&path).expect("load").frontmatter.loop_status,
            LoopStatus::Stopped
        );
    }

    #[test]
    fn status_all_skips_unparseable_documents() {
        let temp = tempfile::tempdir().expect("tempdir");
        doc("PRD-1")
            .failing("ISC-A-1", "no secrets")
            .passing("ISC-DB-1", "schema")
            .write(temp.path(), "PRD-1.md");
        std::fs::write(temp.path().join("PRD-2.md"), "no frontmatter\n").expect("write");

        let blocks = status_all(&[temp.path().to_path_buf()]);
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].starts_with("○ PRD-1\n"));
        assert!(blocks[0].contains("Status: DRAFT | Loop: idle | Iteration: 0/5"));
        assert!(blocks[0].contains("[█████░░░░░] 1/2"));
    }
}
