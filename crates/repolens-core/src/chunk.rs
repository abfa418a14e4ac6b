//! Language-aware code chunker.
//!
//! Splits decoded source files into [`Chunk`]s no longer than
//! `chunk_size` bytes, preferring to cut where a declaration starts so
//! that a function or class body stays in one chunk unless it alone
//! exceeds the limit.
//!
//! # Algorithm
//!
//! 1. Filter files by the requested extensions; record a [`Warning`] for
//!    each requested extension the chunker has no rules for.
//! 2. Decode each file with [`decode_text`]; undecodable files are skipped
//!    with a warning.
//! 3. Recursively split the text into contiguous pieces. At each level the
//!    coarsest boundary kind that exists in the span is used:
//!    declaration lines → blank lines → lines → words → characters.
//!    Pieces that fit are merged greedily into windows; pieces that don't
//!    fit are split again at the next finer boundary.
//! 4. Extend the start of every window after the first backwards into its
//!    predecessor by up to `chunk_overlap` bytes, without exceeding
//!    `chunk_size`.
//!
//! Windows partition the file, so dropping each chunk's overlap prefix and
//! concatenating reproduces the original text exactly.

use std::collections::BTreeSet;
use std::ops::Range;

use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::models::{extension_of, normalize_extension, Chunk, Language, SourceFile, Warning};

/// Chunk sizing, in bytes of decoded text.
#[derive(Debug, Clone, Copy)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 2000,
            chunk_overlap: 200,
        }
    }
}

/// Output of one chunking pass.
#[derive(Debug, Default)]
pub struct ChunkReport {
    pub chunks: Vec<Chunk>,
    pub warnings: Vec<Warning>,
    /// Files that produced at least one chunk.
    pub files_chunked: usize,
}

/// Chunk every file whose extension is in `extensions`.
///
/// Never fails: unsupported extensions and undecodable files become
/// warnings. An empty chunk list is a valid result; the caller decides
/// whether it is fatal.
pub fn chunk_files(files: &[SourceFile], extensions: &[String], params: &ChunkParams) -> ChunkReport {
    let mut report = ChunkReport::default();

    let requested: BTreeSet<String> = extensions.iter().map(|e| normalize_extension(e)).collect();
    let mut supported = BTreeSet::new();
    for ext in &requested {
        if Language::from_extension(ext).is_some() {
            supported.insert(ext.clone());
        } else {
            report
                .warnings
                .push(Warning::new(format!("*{}", ext), "extension not supported, skipping"));
        }
    }

    for file in files {
        let Some(ext) = extension_of(&file.path) else {
            continue;
        };
        if !supported.contains(&ext) {
            continue;
        }
        let Some(language) = file.language else {
            continue;
        };
        let Some(text) = decode_text(&file.bytes) else {
            report
                .warnings
                .push(Warning::new(&file.path, "could not decode file contents, skipping"));
            continue;
        };

        let chunks = chunk_text(&file.path, &text, language, params);
        if !chunks.is_empty() {
            report.files_chunked += 1;
        }
        report.chunks.extend(chunks);
    }

    report
}

/// Split one decoded file into chunks with contiguous ordinals from 0.
///
/// Empty text yields no chunks.
pub fn chunk_text(path: &str, text: &str, language: Language, params: &ChunkParams) -> Vec<Chunk> {
    split_spans(text, language, params)
        .into_iter()
        .enumerate()
        .map(|(ordinal, span)| make_chunk(path, language, ordinal, span.start, &text[span]))
        .collect()
}

/// Compute chunk byte ranges for `text`, overlap included.
pub fn split_spans(text: &str, language: Language, params: &ChunkParams) -> Vec<Range<usize>> {
    if text.is_empty() {
        return Vec::new();
    }

    let max = params.chunk_size.max(1);
    let overlap = params.chunk_overlap.min(max - 1);
    let limits = Limits {
        max,
        merge: max - overlap,
    };
    let rules = LanguageRules::for_language(language);

    let mut windows = Vec::new();
    split_range(text, 0..text.len(), Boundary::ALL, &rules, &limits, &mut windows);

    let mut spans = Vec::with_capacity(windows.len());
    for (i, window) in windows.iter().enumerate() {
        if i == 0 {
            spans.push(window.clone());
            continue;
        }
        let previous = &windows[i - 1];
        let budget = overlap
            .min(max.saturating_sub(window.len()))
            .min(previous.len());
        let start = overlap_start(text, window.start, budget);
        spans.push(start..window.end);
    }
    spans
}

/// Best-effort decoding: UTF-8 (BOM optional), UTF-16 with a BOM, then
/// Latin-1 for anything that is not binary. Content with NUL bytes that
/// is not UTF-16 is treated as binary and rejected.
pub fn decode_text(bytes: &[u8]) -> Option<String> {
    if let Some(rest) = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]) {
        return String::from_utf8(rest.to_vec()).ok();
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFF, 0xFE]) {
        return decode_utf16(rest, u16::from_le_bytes);
    }
    if let Some(rest) = bytes.strip_prefix(&[0xFE, 0xFF]) {
        return decode_utf16(rest, u16::from_be_bytes);
    }
    if let Ok(text) = std::str::from_utf8(bytes) {
        if text.contains('\0') {
            return None;
        }
        return Some(text.to_string());
    }
    if bytes.contains(&0) {
        return None;
    }
    Some(bytes.iter().map(|&b| b as char).collect())
}

fn decode_utf16(bytes: &[u8], to_unit: fn([u8; 2]) -> u16) -> Option<String> {
    if bytes.len() % 2 != 0 {
        return None;
    }
    let units = bytes.chunks_exact(2).map(|pair| to_unit([pair[0], pair[1]]));
    char::decode_utf16(units).collect::<Result<String, _>>().ok()
}

struct Limits {
    /// Hard ceiling for any window.
    max: usize,
    /// Ceiling when merging several pieces, leaving room for overlap.
    merge: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Boundary {
    Declarations,
    BlankLines,
    Lines,
    Words,
    Chars,
}

impl Boundary {
    const ALL: &'static [Boundary] = &[
        Boundary::Declarations,
        Boundary::BlankLines,
        Boundary::Lines,
        Boundary::Words,
        Boundary::Chars,
    ];
}

/// Per-language line prefixes that mark split points.
struct LanguageRules {
    /// Column-0 prefixes that open a top-level declaration.
    declarations: &'static [&'static str],
    /// Column-0 prefixes of lines that belong to the declaration below
    /// them (decorators, attributes, doc comments).
    leading: &'static [&'static str],
}

impl LanguageRules {
    fn for_language(language: Language) -> Self {
        match language {
            Language::Python => Self {
                declarations: &["class ", "def ", "async def "],
                leading: &["@", "#"],
            },
            Language::JavaScript => Self {
                declarations: &[
                    "function ",
                    "async function ",
                    "class ",
                    "export ",
                    "const ",
                    "let ",
                    "var ",
                ],
                leading: &["//", "/**", " *", "@"],
            },
            Language::TypeScript => Self {
                declarations: &[
                    "function ",
                    "async function ",
                    "class ",
                    "abstract class ",
                    "interface ",
                    "type ",
                    "enum ",
                    "namespace ",
                    "export ",
                    "const ",
                    "let ",
                    "var ",
                ],
                leading: &["//", "/**", " *", "@"],
            },
            Language::Java => Self {
                declarations: &[
                    "public ",
                    "protected ",
                    "private ",
                    "class ",
                    "interface ",
                    "enum ",
                    "abstract ",
                    "final ",
                    "static ",
                ],
                leading: &["@", "//", "/**", " *"],
            },
            Language::Cpp => Self {
                declarations: &[
                    "class ",
                    "struct ",
                    "namespace ",
                    "template",
                    "void ",
                    "int ",
                    "bool ",
                    "auto ",
                    "double ",
                    "float ",
                    "char ",
                    "static ",
                    "inline ",
                ],
                leading: &["//", "/**", " *"],
            },
            Language::Go => Self {
                declarations: &["func ", "type ", "var ", "const "],
                leading: &["//"],
            },
            Language::Rust => Self {
                declarations: &[
                    "fn ",
                    "pub ",
                    "async fn ",
                    "unsafe ",
                    "impl",
                    "struct ",
                    "enum ",
                    "trait ",
                    "mod ",
                    "const ",
                    "static ",
                    "macro_rules!",
                ],
                leading: &["#[", "///", "//!", "//"],
            },
        }
    }
}

fn split_range(
    text: &str,
    range: Range<usize>,
    boundaries: &[Boundary],
    rules: &LanguageRules,
    limits: &Limits,
    out: &mut Vec<Range<usize>>,
) {
    if range.len() <= limits.max {
        out.push(range);
        return;
    }

    let slice = &text[range.clone()];
    let mut level = 0;
    let mut cuts = Vec::new();
    while level < boundaries.len() && boundaries[level] != Boundary::Chars {
        cuts = cut_points(slice, boundaries[level], rules);
        if !cuts.is_empty() {
            break;
        }
        level += 1;
    }
    if cuts.is_empty() {
        hard_split(text, range, limits.max, out);
        return;
    }
    let finer = &boundaries[level + 1..];

    let mut window: Option<Range<usize>> = None;
    let mut piece_start = range.start;
    for end in cuts
        .into_iter()
        .map(|c| range.start + c)
        .chain(std::iter::once(range.end))
    {
        let piece = piece_start..end;
        piece_start = end;

        if piece.len() > limits.max {
            if let Some(w) = window.take() {
                out.push(w);
            }
            split_range(text, piece, finer, rules, limits, out);
            continue;
        }

        window = match window {
            Some(w) if w.len() + piece.len() <= limits.merge => Some(w.start..piece.end),
            Some(w) => {
                out.push(w);
                Some(piece)
            }
            None => Some(piece),
        };
    }
    if let Some(w) = window {
        out.push(w);
    }
}

/// Offsets inside `slice` where a new piece may begin, ascending, never
/// 0 or `slice.len()`.
fn cut_points(slice: &str, boundary: Boundary, rules: &LanguageRules) -> Vec<usize> {
    let mut cuts: Vec<usize> = match boundary {
        Boundary::Declarations => line_starts(slice)
            .filter(|&ls| rules.declarations.iter().any(|p| slice[ls..].starts_with(p)))
            .map(|ls| attach_leading_lines(slice, ls, rules.leading))
            .collect(),
        Boundary::BlankLines => slice.match_indices("\n\n").map(|(p, _)| p + 2).collect(),
        Boundary::Lines => line_starts(slice).collect(),
        Boundary::Words => slice.match_indices(' ').map(|(p, _)| p + 1).collect(),
        Boundary::Chars => Vec::new(),
    };
    cuts.retain(|&c| c > 0 && c < slice.len());
    cuts.sort_unstable();
    cuts.dedup();
    cuts
}

/// Start offset of every line after the first.
fn line_starts(slice: &str) -> impl Iterator<Item = usize> + '_ {
    slice.match_indices('\n').map(|(p, _)| p + 1)
}

/// Move a cut at line start `cut` upward over decorator/comment lines so
/// they stay with the declaration below.
fn attach_leading_lines(slice: &str, mut cut: usize, prefixes: &[&str]) -> usize {
    while cut > 0 {
        let prev_end = cut - 1;
        let prev_start = slice[..prev_end].rfind('\n').map(|i| i + 1).unwrap_or(0);
        let line = &slice[prev_start..prev_end];
        if !line.is_empty() && prefixes.iter().any(|p| line.starts_with(p)) {
            cut = prev_start;
        } else {
            break;
        }
    }
    cut
}

fn hard_split(text: &str, range: Range<usize>, max: usize, out: &mut Vec<Range<usize>>) {
    let mut start = range.start;
    while start < range.end {
        let mut end = floor_char_boundary(text, (start + max).min(range.end));
        if end <= start {
            end = text[start..]
                .char_indices()
                .nth(1)
                .map(|(i, _)| start + i)
                .unwrap_or(range.end);
        }
        out.push(start..end);
        start = end;
    }
}

/// Choose where an overlapping chunk starts: at most `budget` bytes
/// before `window_start`, snapped to a char boundary and, when possible,
/// to the start of a line.
fn overlap_start(text: &str, window_start: usize, budget: usize) -> usize {
    if budget == 0 {
        return window_start;
    }
    let mut start = window_start - budget;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    if let Some(nl) = text[start..window_start].find('\n') {
        let line_start = start + nl + 1;
        if line_start < window_start {
            start = line_start;
        }
    }
    start
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

fn make_chunk(path: &str, language: Language, ordinal: usize, start: usize, text: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());
    let id = Uuid::new_v5(
        &Uuid::NAMESPACE_OID,
        format!("{}#{}:{}", path, ordinal, hash).as_bytes(),
    );

    Chunk {
        id: id.to_string(),
        path: path.to_string(),
        language,
        ordinal,
        start,
        text: text.to_string(),
        hash,
    }
}
