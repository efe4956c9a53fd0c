//! Scaffolding for new, empty task documents.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;
use tracing::info;

use crate::io::config::{DEFAULT_CONFIG_PATH, LoopConfig, write_config};

const SLUG_MAX: usize = 40;

/// File-name slug: lowercase alphanumerics and dashes, at most 40 chars.
pub fn slugify(title: &str) -> String {
    let mut slug = String::new();
    let mut pending_dash = false;
    for c in title.to_lowercase().chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else if c.is_whitespace() || c == '-' {
            pending_dash = true;
        }
    }
    if pending_dash && !slug.is_empty() {
        slug.push('-');
    }
    slug.truncate(SLUG_MAX);
    let slug = slug.trim_end_matches('-').to_string();
    if slug.is_empty() {
        "task".to_string()
    } else {
        slug
    }
}

/// Document id for `title` created on `date`: `PRD-YYYYMMDD-{slug}`.
pub fn document_id(title: &str, date: NaiveDate) -> String {
    format!("PRD-{}-{}", date.format("%Y%m%d"), slugify(title))
}

pub fn render_document(title: &str, effort_level: &str, date: NaiveDate) -> String {
    let id = document_id(title, date);
    let today = date.format("%Y-%m-%d");
    format!(
        "---
prd: true
id: {id}
status: DRAFT
effort_level: {effort_level}
created: {today}
updated: {today}
iteration: 0
max_iterations: 128
loop_status: idle
last_phase: null
failing_criteria: []
verification_summary: \"0/0\"
---

# {title}

> _What this achieves and why it matters._

## CONTEXT

### Problem Space
_To be filled in._

### Key Files
_To be filled in._

### Constraints
_To be filled in._

## PLAN

_To be filled in._

## CRITERIA

_Format: `- [ ] ISC-{{DOMAIN}}-{{N}}: {{state that must hold}} | Verify: {{method}}`_

## DECISIONS

## LOG
"
    )
}

/// Write a new document into `dir`, refusing to overwrite an existing file.
pub fn create_document(dir: &Path, title: &str, effort_level: &str, date: NaiveDate) -> Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("create directory {}", dir.display()))?;
    let path = dir.join(format!("{}.md", document_id(title, date)));
    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&path)
        .with_context(|| format!("create task document {}", path.display()))?;
    file.write_all(render_document(title, effort_level, date).as_bytes())
        .with_context(|| format!("write task document {}", path.display()))?;
    info!(path = %path.display(), "created task document");
    Ok(path)
}

/// Write the default config under `root` unless one is already there.
///
/// Returns the path when a file was created.
pub fn ensure_default_config(root: &Path) -> Result<Option<PathBuf>> {
    let path = root.join(DEFAULT_CONFIG_PATH);
    if path.exists() {
        return Ok(None);
    }
    write_config(&path, &LoopConfig::default())?;
    info!(path = %path.display(), "wrote default config");
    Ok(Some(path))
}
