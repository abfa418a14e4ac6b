//! Structure mapper: builds the repository map from the filesystem.
//!
//! Walks the repository with the [`Scanner`]'s pruning rules, lists files
//! of the requested extensions, and annotates each with declarations from
//! the matching [`DeclarationExtractor`](crate::declarations::DeclarationExtractor).
//! Nothing is cached; every call reflects the filesystem at call time.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, warn};

use repolens_core::chunk::decode_text;
use repolens_core::map::{FileOutline, MapNode, RepositoryMap};
use repolens_core::models::{extension_of, normalize_extension, Language};
use repolens_core::Result;

use crate::declarations::extractor_for;
use crate::scanner::Scanner;

/// Heading and usage note wrapped around the map by [`StructureMapper::context_map`].
const CONTEXT_HEADING: &str = "REPOSITORY STRUCTURE:";
const CONTEXT_NOTE: &str = "This map shows the file structure and main definitions in the codebase.
Use this to understand the overall architecture and locate relevant files.";

pub struct StructureMapper {
    scanner: Arc<Scanner>,
}

impl StructureMapper {
    pub fn new(scanner: Arc<Scanner>) -> Self {
        Self { scanner }
    }

    /// Build the full map tree for files with the given extensions.
    pub fn build_tree(&self, extensions: &[String]) -> Result<RepositoryMap> {
        self.scanner.check_root()?;
        let wanted: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();

        // Open directories from the root down to the current walk position.
        let mut stack: Vec<(String, Vec<MapNode>)> = vec![(root_name(self.scanner.root()), Vec::new())];

        for entry in self.scanner.walker() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry in structure map");
                    continue;
                }
            };
            let depth = entry.depth();
            if depth == 0 {
                continue;
            }
            while stack.len() > depth {
                close_dir(&mut stack);
            }

            let name = entry.file_name().to_string_lossy().to_string();
            if entry.file_type().is_dir() {
                stack.push((name, Vec::new()));
                continue;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = self.scanner.relative(entry.path());
            if !extension_of(&rel).is_some_and(|ext| wanted.contains(&ext)) {
                continue;
            }

            let outline = outline_for(entry.path(), &rel);
            if let Some((_, children)) = stack.last_mut() {
                children.push(MapNode::File { name, outline });
            }
        }

        while stack.len() > 1 {
            close_dir(&mut stack);
        }
        let (name, children) = stack.pop().unwrap_or_default();
        Ok(RepositoryMap::new(MapNode::Dir { name, children }))
    }

    /// The full map rendered as text.
    pub fn tree_text(&self, extensions: &[String]) -> Result<String> {
        Ok(self.build_tree(extensions)?.render())
    }

    /// The map bounded to `max_lines` lines.
    pub fn build_compact_map(&self, extensions: &[String], max_lines: usize) -> Result<String> {
        Ok(self.build_tree(extensions)?.compact(max_lines))
    }

    /// The full map under a heading, for display.
    pub fn context_map(&self, extensions: &[String]) -> Result<String> {
        let tree = self.tree_text(extensions)?;
        Ok(format!("{}\n{}\n\n{}", CONTEXT_HEADING, tree, CONTEXT_NOTE))
    }
}

fn close_dir(stack: &mut Vec<(String, Vec<MapNode>)>) {
    if let Some((name, children)) = stack.pop() {
        if let Some((_, parent)) = stack.last_mut() {
            parent.push(MapNode::Dir { name, children });
        }
    }
}

fn root_name(root: &Path) -> String {
    root.canonicalize()
        .ok()
        .as_deref()
        .and_then(Path::file_name)
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.display().to_string())
}

fn outline_for(path: &Path, rel: &str) -> FileOutline {
    let Some(extractor) = Language::from_path(rel).and_then(extractor_for) else {
        return FileOutline::Declarations(Vec::new());
    };

    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => return FileOutline::ParseError(e.to_string()),
    };
    let Some(source) = decode_text(&bytes) else {
        return FileOutline::ParseError("could not decode file contents".to_string());
    };

    match extractor.extract(&source) {
        Ok(decls) => {
            debug!(path = rel, declarations = decls.len(), "extracted declarations");
            FileOutline::Declarations(decls)
        }
        Err(msg) => {
            warn!(path = rel, error = %msg, "declaration extraction failed");
            FileOutline::ParseError(msg)
        }
    }
}
