//! Core data models that flow through the indexing and retrieval pipeline.
//!
//! ```text
//! SourceFile ──chunk──▶ Chunk ──embed──▶ IndexEntry ──query──▶ RetrievalResult ──ask──▶ Answer
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};

/// Languages the chunker knows boundary rules for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    JavaScript,
    TypeScript,
    Java,
    Cpp,
    Go,
    Rust,
}

impl Language {
    /// Detect a language from a file extension, with or without the leading dot.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "py" => Some(Language::Python),
            "js" => Some(Language::JavaScript),
            "ts" => Some(Language::TypeScript),
            "java" => Some(Language::Java),
            "cpp" => Some(Language::Cpp),
            "go" => Some(Language::Go),
            "rs" => Some(Language::Rust),
            _ => None,
        }
    }

    /// Detect a language from a path's extension.
    pub fn from_path(path: &str) -> Option<Self> {
        extension_of(path).and_then(|ext| Self::from_extension(&ext))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Java => "java",
            Language::Cpp => "cpp",
            Language::Go => "go",
            Language::Rust => "rust",
        }
    }

    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag {
            "python" => Some(Language::Python),
            "javascript" => Some(Language::JavaScript),
            "typescript" => Some(Language::TypeScript),
            "java" => Some(Language::Java),
            "cpp" => Some(Language::Cpp),
            "go" => Some(Language::Go),
            "rust" => Some(Language::Rust),
            _ => None,
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a user-supplied extension to the `.ext` lowercase form.
///
/// `"py"`, `".py"` and `".PY"` all become `".py"`.
pub fn normalize_extension(ext: &str) -> String {
    format!(".{}", ext.trim().trim_start_matches('.').to_ascii_lowercase())
}

/// Extension of a `/`-separated path in `.ext` form, if it has one.
pub fn extension_of(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let dot = name.rfind('.')?;
    if dot == 0 || dot + 1 == name.len() {
        return None;
    }
    Some(normalize_extension(&name[dot + 1..]))
}

/// A file loaded from the repository, before decoding.
///
/// `path` is relative to the repository root and uses `/` separators;
/// it is the provenance every chunk carries.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: String,
    pub bytes: Vec<u8>,
    pub language: Option<Language>,
}

impl SourceFile {
    pub fn new(path: impl Into<String>, bytes: Vec<u8>) -> Self {
        let path = path.into();
        let language = Language::from_path(&path);
        Self {
            path,
            bytes,
            language,
        }
    }
}

/// A bounded fragment of a source file prepared for embedding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// UUIDv5 over path, ordinal, and content hash.
    pub id: String,
    pub path: String,
    pub language: Language,
    /// Position within the file, contiguous from 0.
    pub ordinal: usize,
    /// Byte offset of `text` within the decoded file.
    pub start: usize,
    pub text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }
}

/// A chunk plus its embedding vector, as handed to the similarity index.
#[derive(Debug, Clone)]
pub struct IndexEntry {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
}

/// A non-fatal, per-file problem recorded during a traversal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Warning {
    pub path: String,
    pub message: String,
}

impl Warning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Kind of a top-level declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclarationKind {
    /// Class-like: classes, structs, enums, traits, named types.
    Class,
    /// Function-like: functions and methods.
    Function,
}

/// A declaration extracted from a source file for the repository map.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Declaration {
    pub kind: DeclarationKind,
    /// Source keyword shown in the map (`def`, `class`, `fn`, `struct`, ...).
    pub keyword: String,
    pub name: String,
    /// Parameter names; always empty for class-like declarations.
    pub params: Vec<String>,
    /// Methods of a class-like declaration.
    pub members: Vec<Declaration>,
}

impl Declaration {
    pub fn class(keyword: &str, name: impl Into<String>) -> Self {
        Self {
            kind: DeclarationKind::Class,
            keyword: keyword.to_string(),
            name: name.into(),
            params: Vec::new(),
            members: Vec::new(),
        }
    }

    pub fn function(keyword: &str, name: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            kind: DeclarationKind::Function,
            keyword: keyword.to_string(),
            name: name.into(),
            params,
            members: Vec::new(),
        }
    }

    /// One-line signature, e.g. `def foo(x, y)` or `class Foo`.
    pub fn signature(&self) -> String {
        match self.kind {
            DeclarationKind::Class => format!("{} {}", self.keyword, self.name),
            DeclarationKind::Function => {
                format!("{} {}({})", self.keyword, self.name, self.params.join(", "))
            }
        }
    }
}

/// Chunks selected for a question, most to least relevant under MMR.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalResult {
    pub chunks: Vec<Chunk>,
}

impl RetrievalResult {
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Chunk> {
        self.chunks.iter()
    }
}

/// Generated answer text plus the retrieval that backed it.
#[derive(Debug, Clone)]
pub struct Answer {
    pub text: String,
    pub sources: RetrievalResult,
}
