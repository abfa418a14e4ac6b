//! Repository filesystem scanner.
//!
//! Walks the repository root with `walkdir`, pruning hidden entries,
//! configured build-artifact directories (`exclude_dirs`) and paths
//! matching `exclude_globs`. The same pruning rules drive both indexing
//! ([`Scanner::scan`]) and the structure map, so the two always agree on
//! what the repository contains.
//!
//! Unreadable files and walk errors are recorded as [`Warning`]s; only a
//! missing root is fatal.

use globset::{Glob, GlobSet, GlobSetBuilder};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::{DirEntry, WalkDir};

use repolens_core::models::{extension_of, normalize_extension, SourceFile, Warning};
use repolens_core::{Error, Result};

use crate::config::RepoConfig;

/// Files loaded for one indexing pass.
#[derive(Debug, Default)]
pub struct ScanReport {
    /// Sorted by relative path.
    pub files: Vec<SourceFile>,
    pub warnings: Vec<Warning>,
}

pub struct Scanner {
    root: PathBuf,
    exclude_dirs: BTreeSet<String>,
    exclude_globs: GlobSet,
    follow_symlinks: bool,
}

impl Scanner {
    pub fn new(config: &RepoConfig) -> Result<Self> {
        Ok(Self {
            root: config.root.clone(),
            exclude_dirs: config.exclude_dirs.iter().cloned().collect(),
            exclude_globs: build_globset(&config.exclude_globs)?,
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Fail with a configuration error unless the root is a directory.
    pub fn check_root(&self) -> Result<()> {
        if !self.root.is_dir() {
            return Err(Error::configuration(format!(
                "repository path does not exist or is not a directory: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    /// Load every file whose extension is in `extensions`.
    pub fn scan(&self, extensions: &[String]) -> Result<ScanReport> {
        self.check_root()?;
        let wanted: BTreeSet<String> = extensions.iter().map(|e| normalize_extension(e)).collect();

        let mut report = ScanReport::default();
        for entry in self.walker() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let path = e
                        .path()
                        .map(|p| self.relative(p))
                        .unwrap_or_else(|| self.root.display().to_string());
                    warn!(path = %path, error = %e, "skipping unreadable entry");
                    report.warnings.push(Warning::new(path, e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let rel = self.relative(entry.path());
            if !extension_of(&rel).is_some_and(|ext| wanted.contains(&ext)) {
                continue;
            }

            match std::fs::read(entry.path()) {
                Ok(bytes) => report.files.push(SourceFile::new(rel, bytes)),
                Err(e) => {
                    warn!(path = %rel, error = %e, "skipping unreadable file");
                    report.warnings.push(Warning::new(rel, e.to_string()));
                }
            }
        }

        report.files.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(report)
    }

    /// A walker over the root with pruning applied. Yields the root first.
    pub fn walker(&self) -> impl Iterator<Item = walkdir::Result<DirEntry>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(self.follow_symlinks)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(move |e| e.depth() == 0 || !self.is_pruned(e))
    }

    /// True for hidden entries, excluded directory names and glob matches.
    pub fn is_pruned(&self, entry: &DirEntry) -> bool {
        let name = entry.file_name().to_string_lossy();
        if name.starts_with('.') {
            return true;
        }
        if entry.file_type().is_dir() && self.exclude_dirs.contains(name.as_ref()) {
            return true;
        }
        !self.exclude_globs.is_empty() && self.exclude_globs.is_match(self.relative(entry.path()))
    }

    /// Path relative to the root with `/` separators.
    pub fn relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/")
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern).map_err(|e| {
            Error::configuration(format!("invalid exclude glob '{}': {}", pattern, e))
        })?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::configuration(format!("invalid exclude globs: {}", e)))
}
