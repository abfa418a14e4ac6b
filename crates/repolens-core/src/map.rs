//! Repository map: a directory tree annotated with declarations.
//!
//! The app crate walks the filesystem and builds a [`RepositoryMap`];
//! this module owns rendering and budget-aware compaction. Rendering
//! produces typed [`MapLine`]s so compaction selects on what a line *is*
//! rather than on what its text happens to contain.
//!
//! # Layout
//!
//! ```text
//! repo/
//!   main.py:
//!     - def main(argv)
//!   pkg/
//!     models.py:
//!       - class User
//!         - def save(self)
//!     broken.py:
//!       - [Parse error: syntax error at line 3]
//! ```

use crate::models::Declaration;

/// What a file contributes to the map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutline {
    /// Declarations found; empty for files without an extractor.
    Declarations(Vec<Declaration>),
    /// Extraction failed for this file only.
    ParseError(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MapNode {
    Dir { name: String, children: Vec<MapNode> },
    File { name: String, outline: FileOutline },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineKind {
    Dir,
    File,
    Declaration,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapLine {
    pub kind: LineKind,
    pub text: String,
}

/// A rendered-on-demand repository outline rooted at one directory node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryMap {
    pub root: MapNode,
}

impl RepositoryMap {
    pub fn new(root: MapNode) -> Self {
        Self { root }
    }

    /// Every line of the full map, top to bottom.
    ///
    /// Within a directory, files come before subdirectories, each in the
    /// order stored in the tree.
    pub fn lines(&self) -> Vec<MapLine> {
        let mut out = Vec::new();
        render_node(&self.root, 0, &mut out);
        out
    }

    /// The full map as text.
    pub fn render(&self) -> String {
        join(self.lines().iter())
    }

    /// The map bounded to `max_lines` lines.
    ///
    /// Returns the full map unchanged when it fits. Otherwise keeps only
    /// directory and declaration lines, in order, up to the budget.
    pub fn compact(&self, max_lines: usize) -> String {
        let lines = self.lines();
        if lines.len() <= max_lines {
            return join(lines.iter());
        }
        join(
            lines
                .iter()
                .filter(|l| matches!(l.kind, LineKind::Dir | LineKind::Declaration))
                .take(max_lines),
        )
    }
}

fn join<'a>(lines: impl Iterator<Item = &'a MapLine>) -> String {
    lines.map(|l| l.text.as_str()).collect::<Vec<_>>().join("\n")
}

fn render_node(node: &MapNode, depth: usize, out: &mut Vec<MapLine>) {
    match node {
        MapNode::Dir { name, children } => {
            out.push(MapLine {
                kind: LineKind::Dir,
                text: format!("{}{}/", indent(depth), name),
            });
            let (files, dirs): (Vec<&MapNode>, Vec<&MapNode>) = children
                .iter()
                .partition(|c| matches!(c, MapNode::File { .. }));
            for child in files.into_iter().chain(dirs) {
                render_node(child, depth + 1, out);
            }
        }
        MapNode::File { name, outline } => {
            out.push(MapLine {
                kind: LineKind::File,
                text: format!("{}{}:", indent(depth), name),
            });
            match outline {
                FileOutline::Declarations(decls) => {
                    for decl in decls {
                        render_declaration(decl, depth + 1, out);
                    }
                }
                FileOutline::ParseError(msg) => out.push(MapLine {
                    kind: LineKind::Error,
                    text: format!("{}- [Parse error: {}]", indent(depth + 1), msg),
                }),
            }
        }
    }
}

fn render_declaration(decl: &Declaration, depth: usize, out: &mut Vec<MapLine>) {
    out.push(MapLine {
        kind: LineKind::Declaration,
        text: format!("{}- {}", indent(depth), decl.signature()),
    });
    for member in &decl.members {
        render_declaration(member, depth + 1, out);
    }
}

fn indent(depth: usize) -> String {
    "  ".repeat(depth)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(name: &str, decls: Vec<Declaration>) -> MapNode {
        MapNode::File {
            name: name.to_string(),
            outline: FileOutline::Declarations(decls),
        }
    }

    fn dir(name: &str, children: Vec<MapNode>) -> MapNode {
        MapNode::Dir {
            name: name.to_string(),
            children,
        }
    }

    fn sample() -> RepositoryMap {
        let mut user = Declaration::class("class", "User");
        user.members
            .push(Declaration::function("def", "save", vec!["self".into()]));
        RepositoryMap::new(dir(
            "repo",
            vec![
                dir(
                    "pkg",
                    vec![
                        file("models.py", vec![user]),
                        MapNode::File {
                            name: "broken.py".into(),
                            outline: FileOutline::ParseError("bad indent".into()),
                        },
                    ],
                ),
                file(
                    "main.py",
                    vec![Declaration::function("def", "main", vec!["argv".into()])],
                ),
                file("notes.py", vec![]),
            ],
        ))
    }

    #[test]
    fn test_render_layout() {
        let expected = "\
repo/
  main.py:
    - def main(argv)
  notes.py:
  pkg/
    models.py:
      - class User
        - def save(self)
    broken.py:
      - [Parse error: bad indent]";
        assert_eq!(sample().render(), expected);
    }

    #[test]
    fn test_compact_returns_full_when_it_fits() {
        let map = sample();
        let full = map.render();
        assert_eq!(map.compact(100), full);
        assert_eq!(map.compact(full.lines().count()), full);
    }

    #[test]
    fn test_compact_keeps_dirs_and_declarations_in_order() {
        let compact = sample().compact(5);
        assert_eq!(
            compact,
            "repo/\n    - def main(argv)\n  pkg/\n      - class User\n        - def save(self)"
        );
    }

    #[test]
    fn test_compact_respects_budget() {
        let map = sample();
        for budget in 1..12 {
            assert!(map.compact(budget).lines().count() <= budget);
        }
        assert_eq!(map.compact(2), "repo/\n    - def main(argv)");
    }

    #[test]
    fn test_file_named_like_declaration_is_not_kept() {
        let map = RepositoryMap::new(dir(
            "r",
            vec![file("class_def.py", vec![]), file("x.py", vec![])],
        ));
        assert_eq!(map.compact(2), "r/");
    }
}
