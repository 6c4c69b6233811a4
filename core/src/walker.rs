//! Directory traversal for snapshots.
//!
//! `walkdir` drives an explicit stack (no recursion) and reports symlink loops
//! when links are followed. On top of that the walker keeps a visited set of
//! canonical directories so a tree reachable through two links is read once.
//! Exclusion and size limits are plain predicates handed to the walker.

use crate::{Error, Result};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

/// An entry discovered during the walk.
#[derive(Debug, Clone)]
pub struct WalkEntry {
    pub path: PathBuf,
    /// Forward-slash path relative to the walk root.
    pub relative_path: String,
    pub size: u64,
    pub is_dir: bool,
}

impl WalkEntry {
    /// `None` when the relative path is not valid UTF-8 and cannot be a snapshot key.
    fn from_dir_entry(entry: &DirEntry, root: &Path) -> Result<Option<Self>> {
        let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
        let Some(relative_path) = relative_slash_path(relative) else {
            return Ok(None);
        };
        let metadata = entry
            .metadata()
            .map_err(|e| Error::file("stat", entry.path())(e.into()))?;

        Ok(Some(Self {
            path: entry.path().to_path_buf(),
            relative_path,
            size: metadata.len(),
            is_dir: metadata.is_dir(),
        }))
    }
}

/// Returns `true` to keep the entry. Rejected directories are not descended into.
pub type EntryFilter = Box<dyn Fn(&WalkEntry) -> bool + Send + Sync>;

pub struct Walker {
    root: PathBuf,
    follow_links: bool,
    filters: Vec<EntryFilter>,
}

impl Walker {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            follow_links: false,
            filters: Vec::new(),
        }
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    pub fn filter<F>(mut self, filter: F) -> Self
    where
        F: Fn(&WalkEntry) -> bool + Send + Sync + 'static,
    {
        self.filters.push(Box::new(filter));
        self
    }

    fn accepts(&self, entry: &WalkEntry) -> bool {
        self.filters.iter().all(|filter| filter(entry))
    }

    /// Collects every accepted regular file below the root, ordered by path.
    pub fn walk(&self) -> Result<Vec<WalkEntry>> {
        let mut visited = HashSet::new();
        if let Ok(canonical) = std::fs::canonicalize(&self.root) {
            visited.insert(canonical);
        }

        let mut files = Vec::new();
        let mut entries = WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .min_depth(1)
            .sort_by_file_name()
            .into_iter();

        while let Some(next) = entries.next() {
            let entry = match next {
                Ok(entry) => entry,
                Err(err) if err.loop_ancestor().is_some() => {
                    warn!(path = ?err.path(), "Skipping symlink loop");
                    continue;
                }
                Err(err) => {
                    let path = err.path().map(Path::to_path_buf).unwrap_or_default();
                    return Err(Error::file("read", path)(err.into()));
                }
            };

            if entry.file_type().is_symlink() {
                debug!(path = %entry.path().display(), "Skipping symlink");
                continue;
            }

            let Some(walk_entry) = WalkEntry::from_dir_entry(&entry, &self.root)? else {
                warn!(path = %entry.path().display(), "Skipping entry with a non UTF-8 name");
                if entry.file_type().is_dir() {
                    entries.skip_current_dir();
                }
                continue;
            };
            if !self.accepts(&walk_entry) {
                debug!(path = %walk_entry.relative_path, "Filtered out");
                if walk_entry.is_dir {
                    entries.skip_current_dir();
                }
                continue;
            }

            if walk_entry.is_dir {
                let canonical = std::fs::canonicalize(entry.path())
                    .map_err(Error::file("resolve", entry.path()))?;
                if !visited.insert(canonical) {
                    debug!(path = %walk_entry.relative_path, "Directory already visited");
                    entries.skip_current_dir();
                }
                continue;
            }

            if entry.file_type().is_file() {
                files.push(walk_entry);
            }
        }

        Ok(files)
    }
}

/// Gitignore-style exclusion patterns. A bare name such as `node_modules` or
/// `*.log` matches at any depth.
#[derive(Debug, Clone)]
pub struct PatternFilter {
    matcher: Gitignore,
}

impl PatternFilter {
    pub fn new(patterns: &[String]) -> Result<Self> {
        let mut builder = GitignoreBuilder::new("");
        for pattern in patterns {
            builder
                .add_line(None, pattern)
                .map_err(|e| Error::Config(format!("Invalid exclude pattern {}: {}", pattern, e)))?;
        }
        let matcher = builder
            .build()
            .map_err(|e| Error::Config(format!("Invalid exclude patterns: {}", e)))?;
        Ok(Self { matcher })
    }

    pub fn is_excluded(&self, relative_path: &str, is_dir: bool) -> bool {
        !relative_path.is_empty()
            && self
                .matcher
                .matched_path_or_any_parents(relative_path, is_dir)
                .is_ignore()
    }
}

fn relative_slash_path(path: &Path) -> Option<String> {
    path.components()
        .map(|component| component.as_os_str().to_str())
        .collect::<Option<Vec<_>>>()
        .map(|segments| segments.join("/"))
}
