//! Locating task documents under the configured search roots.

use std::path::{Path, PathBuf};

use anyhow::{Result, bail};
use tracing::debug;
use walkdir::WalkDir;

const MAX_DEPTH: usize = 4;

fn is_task_document(name: &str) -> bool {
    name.starts_with("PRD-") && name.ends_with(".md")
}

/// Every `PRD-*.md` file under `roots`, sorted and deduplicated.
///
/// Missing roots are skipped. Entries named `current` (session symlinks) are
/// not descended into.
pub fn find_documents(roots: &[PathBuf]) -> Vec<PathBuf> {
    let mut found = Vec::new();
    for root in roots {
        if !root.is_dir() {
            debug!(root = %root.display(), "search root missing, skipping");
            continue;
        }
        let walker = WalkDir::new(root)
            .max_depth(MAX_DEPTH)
            .into_iter()
            .filter_entry(|entry| entry.depth() == 0 || entry.file_name() != "current");
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    debug!(err = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if entry.file_type().is_file() && is_task_document(&entry.file_name().to_string_lossy()) {
                found.push(entry.into_path());
            }
        }
    }
    found.sort();
    found.dedup();
    found
}

/// Resolve a user-supplied document reference.
///
/// A reference containing `/` or ending in `.md` is a path relative to `cwd`.
/// Anything else must match the file name of exactly one discovered document.
pub fn resolve_document_ref(reference: &str, cwd: &Path, roots: &[PathBuf]) -> Result<PathBuf> {
    if reference.contains('/') || reference.ends_with(".md") {
        return Ok(cwd.join(reference));
    }
    let matches: Vec<PathBuf> = find_documents(roots)
        .into_iter()
        .filter(|path| {
            path.file_name()
                .is_some_and(|name| name.to_string_lossy().contains(reference))
        })
        .collect();
    match matches.as_slice() {
        [single] => Ok(single.clone()),
        [] => bail!("task document not found: {reference}"),
        many => {
            let listing: Vec<String> = many.iter().map(|p| format!("  {}", p.display())).collect();
            bail!(
                "ambiguous task document reference \"{reference}\"; matches:\n{}",
                listing.join("\n")
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn touch(path: &Path) {
        fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
        fs::write(path, "---\nid: x\n---\n").expect("write");
    }

    #[test]
    fn finds_nested_documents_and_skips_current() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        touch(&root.join("s1/PRD-20260101-a.md"));
        touch(&root.join("s1/tasks/t1/PRD-20260102-b.md"));
        touch(&root.join("s1/tasks/current/PRD-20260102-b.md"));
        touch(&root.join("s2/notes.md"));
        touch(&root.join("a/b/c/d/e/PRD-too-deep.md"));

        let found = find_documents(&[root.clone(), root.join("missing")]);
        let names: Vec<String> = found
            .iter()
            .map(|p| p.strip_prefix(&root).expect("prefix").display().to_string())
            .collect();
        assert_eq!(names, ["s1/PRD-20260101-a.md", "s1/tasks/t1/PRD-20260102-b.md"]);
    }

    #[test]
    fn resolves_paths_and_unique_names() {
        let temp = tempfile::tempdir().expect("tempdir");
        let root = temp.path().to_path_buf();
        touch(&root.join("w/PRD-20260101-auth.md"));
        touch(&root.join("w/PRD-20260101-auth-v2.md"));
        touch(&root.join("w/PRD-20260102-db.md"));
        let roots = vec![root.clone()];

        assert_eq!(
            resolve_document_ref("docs/PRD-x.md", Path::new("/work"), &roots).expect("path"),
            PathBuf::from("/work/docs/PRD-x.md")
        );
        assert_eq!(
            resolve_document_ref("db", &root, &roots).expect("unique"),
            root.join("w/PRD-20260102-db.md")
        );
        let err = resolve_document_ref("auth", &root, &roots).unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
        let err = resolve_document_ref("nope", &root, &roots).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }
}
