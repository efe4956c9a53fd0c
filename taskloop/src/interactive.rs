//! `taskloop interactive`: one worker session attached to the terminal.
//!
//! No rounds and no bookkeeping. The worker gets the sequential capability
//! set and edits the document itself; the loop only reads it back afterwards.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::types::CriteriaSummary;
use crate::io::document::load_document;
use crate::io::executor::{Capability, CommandExecutor};
use crate::io::notify::Notifier;
use crate::io::prompt::{InteractivePrompt, PromptEngine};

/// A document ready to be handed to an attached session.
#[derive(Debug, Clone)]
pub struct Session {
    pub path: PathBuf,
    pub title: String,
    pub summary: CriteriaSummary,
    workdir: PathBuf,
    prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOutcome {
    /// `None` when the session was killed by a signal.
    pub exit_code: Option<i32>,
    /// Progress re-read after a clean exit.
    pub summary: Option<CriteriaSummary>,
}

impl Session {
    pub fn prepare(path: &Path, prompts: &PromptEngine) -> Result<Self> {
        let doc = load_document(path)?;
        let summary = doc.summary();
        let prompt = prompts.render_interactive(&InteractivePrompt {
            document_path: &doc.path,
            title: &doc.title,
            progress: &doc.frontmatter.verification_summary,
            failing_ids: &summary.failing_ids,
        })?;
        Ok(Self {
            workdir: doc.workdir(),
            path: doc.path,
            title: doc.title,
            summary,
            prompt,
        })
    }

    /// Run the session to completion.
    pub fn launch(&self, executor: &CommandExecutor, notifier: &dyn Notifier) -> Result<SessionOutcome> {
        if let Err(err) = notifier.notify(&format!("Starting interactive session on {}.", self.title)) {
            warn!(err = %err, "progress sink failed");
        }
        let status = executor.run_attached(&self.workdir, &self.prompt, &Capability::sequential_set())?;

        let summary = if status.success() {
            match load_document(&self.path) {
                Ok(doc) => Some(doc.summary()),
                Err(err) => {
                    debug!(err = %format!("{err:#}"), "document unreadable after session");
                    None
                }
            }
        } else {
            None
        };
        Ok(SessionOutcome {
            exit_code: status.code(),
            summary,
        })
    }
}
