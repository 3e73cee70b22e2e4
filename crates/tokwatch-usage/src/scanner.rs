//! Log file discovery.
//!
//! Walks the log root (e.g. `~/.claude/projects/`) and collects every
//! session log. A missing root is the normal state on a fresh machine and
//! yields an empty list.
//!
//! Symlinks are followed, but each physical file is returned once: a
//! directory reachable through several links (or through a link back to an
//! ancestor) would otherwise have its usage counted several times.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{debug, trace};
use walkdir::WalkDir;

/// Default extension of session logs.
pub const DEFAULT_LOG_EXTENSION: &str = "jsonl";

/// Enumerates log files under a root directory.
#[derive(Debug, Clone)]
pub struct LogScanner {
    root: PathBuf,
    extension: String,
}

impl LogScanner {
    /// Create a scanner for `.jsonl` files under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_LOG_EXTENSION.to_string(),
        }
    }

    /// Match a different file extension (without the dot).
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    /// Recursively collect log files, sorted by path.
    ///
    /// Hidden files and directories below the root are skipped. Unreadable
    /// directories and symlink loops are skipped rather than reported.
    pub fn scan(&self) -> Vec<PathBuf> {
        if !self.root.is_dir() {
            debug!(root = %self.root.display(), "Log root does not exist");
            return Vec::new();
        }

        let walker = WalkDir::new(&self.root)
            .follow_links(true)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| e.depth() == 0 || !is_hidden(e.path()));

        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    match e.loop_ancestor() {
                        Some(ancestor) => {
                            trace!(ancestor = %ancestor.display(), "Skipping symlink loop")
                        }
                        None => debug!(error = %e, "Skipping unreadable entry"),
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() || !self.matches_extension(entry.path()) {
                continue;
            }

            let physical = std::fs::canonicalize(entry.path())
                .unwrap_or_else(|_| entry.path().to_path_buf());
            if seen.insert(physical) {
                files.push(entry.into_path());
            } else {
                trace!(path = %entry.path().display(), "Skipping file already reached via another path");
            }
        }

        files.sort();

        debug!(root = %self.root.display(), count = files.len(), "Scanned log root");
        files
    }

    fn matches_extension(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e == self.extension)
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let scanner = LogScanner::new(dir.path().join("does-not-exist"));
        assert!(scanner.scan().is_empty());
    }

    #[test]
    fn test_recursive_scan_skips_hidden_and_other_extensions() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("-home-dev-api");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::create_dir_all(dir.path().join(".trash")).unwrap();

        std::fs::write(project.join("b.jsonl"), "").unwrap();
        std::fs::write(project.join("a.jsonl"), "").unwrap();
        std::fs::write(project.join("notes.txt"), "").unwrap();
        std::fs::write(project.join(".hidden.jsonl"), "").unwrap();
        std::fs::write(dir.path().join(".trash").join("old.jsonl"), "").unwrap();
        std::fs::write(dir.path().join("top.jsonl"), "").unwrap();

        let files = LogScanner::new(dir.path()).scan();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.strip_prefix(dir.path()).unwrap().to_path_buf())
            .collect();

        assert_eq!(
            names,
            vec![
                PathBuf::from("-home-dev-api/a.jsonl"),
                PathBuf::from("-home-dev-api/b.jsonl"),
                PathBuf::from("top.jsonl"),
            ]
        );
    }

    #[test]
    fn test_custom_extension() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("worker.log"), "").unwrap();
        std::fs::write(dir.path().join("session.jsonl"), "").unwrap();

        let files = LogScanner::new(dir.path()).with_extension("log").scan();
        assert_eq!(files, vec![dir.path().join("worker.log")]);
    }

    #[test]
    fn test_root_is_a_file() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("x.jsonl");
        std::fs::write(&file, "").unwrap();
        assert!(LogScanner::new(&file).scan().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_symlink_loop_yields_each_file_once() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("s.jsonl"), "").unwrap();
        std::os::unix::fs::symlink(&project, project.join("loop")).unwrap();

        let files = LogScanner::new(dir.path()).scan();
        assert_eq!(files, vec![project.join("s.jsonl")]);
    }

    #[cfg(unix)]
    #[test]
    fn test_sibling_symlink_is_not_counted_twice() {
        let dir = tempdir().unwrap();
        let project = dir.path().join("proj");
        std::fs::create_dir_all(&project).unwrap();
        std::fs::write(project.join("s.jsonl"), "").unwrap();
        std::fs::write(project.join("t.jsonl"), "").unwrap();
        std::os::unix::fs::symlink(&project, dir.path().join("alias")).unwrap();

        let files = LogScanner::new(dir.path()).scan();
        assert_eq!(files.len(), 2);

        let physical: HashSet<_> = files
            .iter()
            .map(|p| std::fs::canonicalize(p).unwrap())
            .collect();
        assert_eq!(physical.len(), 2);
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinked_file_outside_root_is_included() {
        let dir = tempdir().unwrap();
        let root = dir.path().join("root");
        let outside = dir.path().join("elsewhere");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("s.jsonl"), "").unwrap();
        std::os::unix::fs::symlink(outside.join("s.jsonl"), root.join("link.jsonl")).unwrap();

        assert_eq!(LogScanner::new(&root).scan(), vec![root.join("link.jsonl")]);
    }
}
