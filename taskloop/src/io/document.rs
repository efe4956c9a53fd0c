//! Task document store: load, field updates, and round reconciliation.
//!
//! Every write takes the document lock, re-reads the file, applies the change
//! to the fresh contents, and atomically replaces the file. Fields that are not
//! named in an update, and the whole body outside checkbox flips, are written
//! back exactly as read.

use std::collections::HashSet;
use std::fs;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{debug, instrument};

use crate::core::criteria::{mark_passing, parse_criteria};
use crate::core::frontmatter::{FieldValue, Frontmatter, ParsedDocument, extract_title, keys};
use crate::core::types::{CriteriaSummary, Criterion, LoopStatus, TaskStatus};
use crate::error::FormatError;
use crate::io::atomic::{FileLock, write_atomic};

/// A parsed snapshot of the task document as it was on disk.
#[derive(Debug, Clone)]
pub struct TaskDocument {
    pub path: PathBuf,
    pub raw: String,
    pub parsed: ParsedDocument,
    pub frontmatter: Frontmatter,
    pub criteria: Vec<Criterion>,
    pub title: String,
}

impl TaskDocument {
    pub fn from_raw(path: &Path, raw: String) -> Result<Self, FormatError> {
        let parsed = ParsedDocument::parse(&raw)?;
        let frontmatter = Frontmatter::from_document(&parsed)?;
        let criteria = parse_criteria(parsed.body());
        let title = extract_title(parsed.body());
        Ok(Self {
            path: path.to_path_buf(),
            raw,
            parsed,
            frontmatter,
            criteria,
            title,
        })
    }

    pub fn summary(&self) -> CriteriaSummary {
        CriteriaSummary::from_criteria(&self.criteria)
    }

    /// Failing criteria in document order.
    pub fn failing(&self) -> Vec<Criterion> {
        self.criteria
            .iter()
            .filter(|c| !c.is_passing())
            .cloned()
            .collect()
    }

    /// Cheap fingerprint of the raw contents for change detection.
    pub fn fingerprint(&self) -> u64 {
        fingerprint(&self.raw)
    }

    /// Directory the executor runs in.
    pub fn workdir(&self) -> PathBuf {
        self.path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf)
    }
}

pub fn fingerprint(raw: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    raw.hash(&mut hasher);
    hasher.finish()
}

/// Read and parse the document at `path`.
///
/// A malformed frontmatter block surfaces as a [`FormatError`] in the chain.
pub fn load_document(path: &Path) -> Result<TaskDocument> {
    let raw =
        fs::read_to_string(path).with_context(|| format!("read task document {}", path.display()))?;
    let doc = TaskDocument::from_raw(path, raw)
        .with_context(|| format!("parse task document {}", path.display()))?;
    debug!(path = %path.display(), id = %doc.frontmatter.id, criteria = doc.criteria.len(), "loaded task document");
    Ok(doc)
}

/// A typed write to one controller-owned frontmatter field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldUpdate {
    Status(TaskStatus),
    LoopStatus(LoopStatus),
    Iteration(u32),
    MaxIterations(u32),
    LastPhase(String),
    FailingCriteria(Vec<String>),
    VerificationSummary(String),
    /// `YYYY-MM-DD`.
    Updated(String),
}

impl FieldUpdate {
    fn apply(&self, doc: &mut ParsedDocument) {
        match self {
            FieldUpdate::Status(status) => {
                doc.set(keys::STATUS, FieldValue::str(status.as_str()));
            }
            FieldUpdate::LoopStatus(status) => doc.set_with_aliases(
                keys::LOOP_STATUS,
                keys::LOOP_STATUS_ALIASES,
                FieldValue::str(status.as_str()),
            ),
            FieldUpdate::Iteration(n) => doc.set(keys::ITERATION, FieldValue::Int(i64::from(*n))),
            FieldUpdate::MaxIterations(n) => doc.set_with_aliases(
                keys::MAX_ITERATIONS,
                keys::MAX_ITERATIONS_ALIASES,
                FieldValue::Int(i64::from(*n)),
            ),
            FieldUpdate::LastPhase(phase) => doc.set(keys::LAST_PHASE, FieldValue::str(phase)),
            FieldUpdate::FailingCriteria(ids) => {
                doc.set(keys::FAILING_CRITERIA, FieldValue::List(ids.clone()));
            }
            FieldUpdate::VerificationSummary(ratio) => {
                doc.set(keys::VERIFICATION_SUMMARY, FieldValue::str(ratio));
            }
            FieldUpdate::Updated(date) => doc.set(keys::UPDATED, FieldValue::str(date)),
        }
    }
}

/// Today's local date in frontmatter form.
pub fn today() -> String {
    chrono::Local::now().format("%Y-%m-%d").to_string()
}

/// Lock, re-read, let `edit` change the parsed document, and write it back.
///
/// Returns the document as written.
pub fn modify_document<F>(path: &Path, edit: F) -> Result<TaskDocument>
where
    F: FnOnce(&mut ParsedDocument) -> Result<()>,
{
    let _lock = FileLock::acquire(path)?;
    let current = load_document(path)?;
    let mut parsed = current.parsed;
    edit(&mut parsed)?;
    let rendered = parsed.render();
    if rendered != current.raw {
        write_atomic(path, &rendered)
            .with_context(|| format!("write task document {}", path.display()))?;
    }
    TaskDocument::from_raw(path, rendered)
        .with_context(|| format!("reparse task document {}", path.display()))
}

/// Rewrite only the named fields.
#[instrument(skip_all, fields(path = %path.display(), fields = updates.len()))]
pub fn update_fields(path: &Path, updates: &[FieldUpdate]) -> Result<TaskDocument> {
    modify_document(path, |parsed| {
        for update in updates {
            update.apply(parsed);
        }
        Ok(())
    })
}

/// Apply one parallel round's passing verdicts in a single write.
///
/// Checks every unchecked line whose id passed, then records the resulting
/// `verification_summary`, `failing_criteria`, `last_phase: VERIFY` and
/// `updated`. When nothing is left failing the status becomes `COMPLETE`.
#[instrument(skip_all, fields(path = %path.display(), passed = passed.len()))]
pub fn reconcile_round(path: &Path, passed: &HashSet<String>, date: &str) -> Result<TaskDocument> {
    modify_document(path, |parsed| {
        let (body, flipped) = mark_passing(parsed.body(), passed);
        debug!(flipped, "checked passing criteria");
        parsed.set_body(body);

        let summary = CriteriaSummary::from_criteria(&parse_criteria(parsed.body()));
        let mut updates = vec![
            FieldUpdate::VerificationSummary(summary.ratio()),
            FieldUpdate::FailingCriteria(summary.failing_ids.clone()),
            FieldUpdate::LastPhase("VERIFY".to_string()),
            FieldUpdate::Updated(date.to_string()),
        ];
        if summary.total > 0 && summary.failing() == 0 {
            updates.push(FieldUpdate::Status(TaskStatus::Complete));
        }
        for update in &updates {
            update.apply(parsed);
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::write_doc;

    const DOC: &str = "---\nid: PRD-1\nstatus: DRAFT\nloopStatus: null\niteration: 0\nmaxIterations: 5\nowner: sam\n---\n\n# Auth\n\n- [ ] ISC-AUTH-1: login\n- [ ] ISC-DB-1: schema\n- [x] ISC-UI-1: form\n";

    #[test]
    fn load_parses_frontmatter_and_criteria() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-1.md", DOC);
        let doc = load_document(&path).expect("load");
        assert_eq!(doc.frontmatter.id, "PRD-1");
        assert_eq!(doc.frontmatter.max_iterations, 5);
        assert_eq!(doc.title, "Auth");
        assert_eq!(doc.summary().ratio(), "1/3");
        assert_eq!(doc.failing().len(), 2);
        assert_eq!(doc.workdir(), temp.path());
    }

    #[test]
    fn load_reports_format_error() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-bad.md", "# no frontmatter\n");
        let err = load_document(&path).unwrap_err();
        assert!(err.downcast_ref::<FormatError>().is_some());
    }

    #[test]
    fn update_fields_preserves_unknown_keys_and_body() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-1.md", DOC);
        let doc = update_fields(
            &path,
            &[
                FieldUpdate::LoopStatus(LoopStatus::Running),
                FieldUpdate::Iteration(1),
            ],
        )
        .expect("update");
        assert_eq!(doc.frontmatter.loop_status, LoopStatus::Running);
        assert_eq!(doc.frontmatter.iteration, 1);

        let on_disk = fs::read_to_string(&path).expect("read");
        assert_eq!(on_disk, doc.raw);
        assert!(on_disk.contains("\nloop_status: running\n"));
        assert!(on_disk.contains("\nmaxIterations: 5\nowner: sam\n---\n"));
        assert!(on_disk.ends_with("- [x] ISC-UI-1: form\n"));
    }

    #[test]
    fn empty_update_leaves_file_byte_identical() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-1.md", DOC);
        update_fields(&path, &[]).expect("update");
        assert_eq!(fs::read_to_string(&path).expect("read"), DOC);
    }

    #[test]
    fn reconcile_checks_passing_and_records_summary() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-1.md", DOC);
        let passed: HashSet<String> = ["ISC-DB-1".to_string()].into();
        let doc = reconcile_round(&path, &passed, "2026-10-19").expect("reconcile");

        assert_eq!(doc.summary().ratio(), "2/3");
        assert_eq!(doc.frontmatter.verification_summary, "2/3");
        assert_eq!(doc.frontmatter.failing_criteria, vec!["ISC-AUTH-1"]);
        assert_eq!(doc.frontmatter.last_phase.as_deref(), Some("VERIFY"));
        assert_eq!(doc.frontmatter.status, TaskStatus::Draft);
        assert!(doc.raw.contains("- [x] ISC-DB-1: schema\n"));
        assert!(doc.raw.contains("\nupdated: 2026-10-19\n"));
    }

    #[test]
    fn reconcile_completes_when_nothing_fails() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-1.md", DOC);
        let passed: HashSet<String> = ["ISC-DB-1".to_string(), "ISC-AUTH-1".to_string()].into();
        let doc = reconcile_round(&path, &passed, "2026-10-19").expect("reconcile");
        assert_eq!(doc.frontmatter.status, TaskStatus::Complete);
        assert!(doc.frontmatter.failing_criteria.is_empty());
    }

    #[test]
    fn reconcile_merges_concurrent_external_edit() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = write_doc(temp.path(), "PRD-1.md", DOC);
        let before = load_document(&path).expect("load");
        let edited = DOC.replace("- [x] ISC-UI-1: form\n", "- [x] ISC-UI-1: form\n- [ ] ISC-UI-2: new\n");
        fs::write(&path, &edited).expect("external edit");

        let passed: HashSet<String> = ["ISC-AUTH-1".to_string()].into();
        let doc = reconcile_round(&path, &passed, "2026-10-19").expect("reconcile");
        assert_ne!(doc.fingerprint(), before.fingerprint());
        assert!(doc.raw.contains("- [ ] ISC-UI-2: new\n"));
        assert_eq!(doc.summary().ratio(), "2/4");
    }
}
