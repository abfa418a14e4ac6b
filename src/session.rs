//! Session orchestration and the interactive question loop.
//!
//! A [`Session`] owns one repository, one persisted index and the
//! providers behind it. It starts `Uninitialized`; a successful
//! [`Session::index`] moves it to `Ready`, and re-indexing keeps it there.
//!
//! ```text
//! index(ext, force=false) ──▶ load_existing? ──yes──▶ map + assembler ──▶ Ready
//!                                  │ no
//!                                  ▼
//!                      scan ─▶ chunk ─▶ initialize
//! ```
//!
//! [`Session::run_loop`] drives the interactive mode from any async line
//! source, so scripted input works the same as a terminal.

use std::future::Future;
use std::io::Write;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tracing::{info, warn};

use repolens_core::chunk::chunk_files;
use repolens_core::embedding::Embedder;
use repolens_core::generation::Generator;
use repolens_core::index::Index;
use repolens_core::models::{normalize_extension, Warning};
use repolens_core::rag::ContextAssembler;
use repolens_core::store::SimilarityIndex;
use repolens_core::{Error, Result};

use crate::config::Config;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::scanner::Scanner;
use crate::sqlite_index::SqliteIndex;
use crate::structure::StructureMapper;

/// Characters of chunk text shown per source.
pub const PREVIEW_CHARS: usize = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
}

/// Which path `index` took.
#[derive(Debug)]
pub enum IndexOutcome {
    /// The persisted index was reused; no files were parsed.
    Loaded,
    /// Files were parsed and the index rebuilt.
    Rebuilt {
        chunks: usize,
        files: usize,
        warnings: Vec<Warning>,
    },
}

/// Provenance and a bounded excerpt of one retrieved chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePreview {
    pub path: String,
    pub preview: String,
}

impl SourcePreview {
    fn new(path: &str, text: &str) -> Self {
        let mut preview: String = text.chars().take(PREVIEW_CHARS).collect();
        if text.chars().nth(PREVIEW_CHARS).is_some() {
            preview.push_str("...");
        }
        Self {
            path: path.to_string(),
            preview,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionAnswer {
    pub text: String,
    /// Empty unless sources were requested.
    pub sources: Vec<SourcePreview>,
}

pub struct Session {
    config: Config,
    scanner: Arc<Scanner>,
    mapper: StructureMapper,
    index: Arc<Index>,
    generator: Arc<dyn Generator>,
    assembler: Option<ContextAssembler>,
    extensions: Vec<String>,
    show_sources: bool,
}

impl Session {
    /// Build a session from explicit collaborators.
    pub fn new(
        config: Config,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        store: Arc<dyn SimilarityIndex>,
    ) -> Result<Self> {
        let scanner = Arc::new(Scanner::new(&config.repo)?);
        let index = Index::new(embedder, store, config.retrieval_params())
            .with_batch_size(config.embedding.batch_size);
        Ok(Self {
            mapper: StructureMapper::new(scanner.clone()),
            scanner,
            index: Arc::new(index),
            generator,
            assembler: None,
            extensions: config.extensions(),
            show_sources: false,
            config,
        })
    }

    /// Build a session with the configured HTTP providers and the SQLite
    /// index at `index.path`.
    pub fn from_config(config: Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding).map_err(Error::provider)?;
        let generator = create_generator(&config.llm).map_err(Error::generation)?;
        let store = Arc::new(SqliteIndex::new(&config.index.path));
        Self::new(config, embedder, generator, store)
    }

    pub fn state(&self) -> SessionState {
        if self.assembler.is_some() {
            SessionState::Ready
        } else {
            SessionState::Uninitialized
        }
    }

    pub fn is_ready(&self) -> bool {
        self.state() == SessionState::Ready
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Whether loop answers carry source previews.
    pub fn show_sources(&self) -> bool {
        self.show_sources
    }

    pub fn set_show_sources(&mut self, show_sources: bool) {
        self.show_sources = show_sources;
    }

    /// Flip the sources toggle and return the new value.
    pub fn toggle_sources(&mut self) -> bool {
        self.show_sources = !self.show_sources;
        self.show_sources
    }

    /// Index the repository for `extensions`.
    ///
    /// Without `force_reindex`, a usable persisted index is reused as is.
    /// An empty or unusable one falls through to a rebuild.
    pub async fn index(&mut self, extensions: &[String], force_reindex: bool) -> Result<IndexOutcome> {
        self.scanner.check_root()?;
        let extensions: Vec<String> = extensions.iter().map(|e| normalize_extension(e)).collect();

        let loaded = !force_reindex && self.index.load_existing().await && self.index.len().await? > 0;
        let outcome = if loaded {
            IndexOutcome::Loaded
        } else {
            self.rebuild(&extensions).await?
        };

        let map = self
            .mapper
            .build_compact_map(&extensions, self.config.map.max_lines)?;
        self.assembler = Some(ContextAssembler::new(
            self.index.clone(),
            self.generator.clone(),
            map,
            self.config.retrieval.k,
        ));
        self.extensions = extensions;
        info!(outcome = outcome_label(&outcome), "session ready");
        Ok(outcome)
    }

    async fn rebuild(&self, extensions: &[String]) -> Result<IndexOutcome> {
        let scan = self.scanner.scan(extensions)?;
        let report = chunk_files(&scan.files, extensions, &self.config.chunk_params());

        let mut warnings = scan.warnings;
        warnings.extend(report.warnings);
        for w in &warnings {
            warn!(path = %w.path, "{}", w.message);
        }

        if report.chunks.is_empty() {
            return Err(Error::NoDocuments {
                root: self.scanner.root().display().to_string(),
                extensions: extensions.join(", "),
            });
        }

        info!(
            chunks = report.chunks.len(),
            files = report.files_chunked,
            "processed code chunks"
        );
        self.index.initialize(&report.chunks).await?;
        Ok(IndexOutcome::Rebuilt {
            chunks: report.chunks.len(),
            files: report.files_chunked,
            warnings,
        })
    }

    /// Answer `question`; with `show_sources`, attach a preview of each
    /// retrieved chunk.
    pub async fn ask(&self, question: &str, show_sources: bool) -> Result<SessionAnswer> {
        let assembler = self.assembler.as_ref().ok_or(Error::NotReady)?;
        if !show_sources {
            return Ok(SessionAnswer {
                text: assembler.ask(question).await?,
                sources: Vec::new(),
            });
        }

        let answer = assembler.ask_with_sources(question).await?;
        let sources = answer
            .sources
            .iter()
            .map(|c| SourcePreview::new(&c.path, &c.text))
            .collect();
        Ok(SessionAnswer {
            text: answer.text,
            sources,
        })
    }

    /// The full repository map under its heading, for the last indexed
    /// extensions (or the configured ones before indexing).
    pub fn structure_map(&self) -> Result<String> {
        self.mapper.context_map(&self.extensions)
    }

    /// Run the interactive loop until `exit`, end of input, or `interrupt`
    /// resolves. Errors from individual questions and undecodable input
    /// lines are printed and the loop carries on; only an I/O failure on
    /// `input` or `out` ends it early.
    ///
    /// `interactive` adds the banner and the `You:` prompt.
    pub async fn run_loop<R, W, F>(
        &mut self,
        mut input: R,
        out: &mut W,
        interrupt: F,
        interactive: bool,
    ) -> anyhow::Result<LoopSummary>
    where
        R: AsyncBufRead + Unpin,
        W: Write,
        F: Future<Output = ()>,
    {
        let mut summary = LoopSummary::default();
        tokio::pin!(interrupt);

        if interactive {
            writeln!(out, "{}", BANNER_RULE)?;
            writeln!(out, "INTERACTIVE CODE ASSISTANT")?;
            writeln!(out, "{}", BANNER_RULE)?;
            writeln!(out, "Type 'exit' to quit, 'sources' to toggle source visibility")?;
        }

        loop {
            if interactive {
                write!(out, "\nYou: ")?;
                out.flush()?;
            }

            let mut buf = Vec::new();
            let read = tokio::select! {
                read = input.read_until(b'\n', &mut buf) => read?,
                _ = &mut interrupt => {
                    writeln!(out, "\nGoodbye!")?;
                    break;
                }
            };
            if read == 0 {
                break;
            }
            let line = match String::from_utf8(buf) {
                Ok(line) => line,
                Err(e) => {
                    summary.errors += 1;
                    warn!(error = %e, "undecodable input line");
                    writeln!(out, "\nError: input is not valid UTF-8: {}", e.utf8_error())?;
                    continue;
                }
            };

            match LoopCommand::parse(&line) {
                LoopCommand::Exit => {
                    writeln!(out, "Goodbye!")?;
                    break;
                }
                LoopCommand::ToggleSources => {
                    let status = if self.toggle_sources() { "ON" } else { "OFF" };
                    writeln!(out, "Source documents: {}", status)?;
                }
                LoopCommand::Empty => {}
                LoopCommand::Question(question) => {
                    summary.questions += 1;
                    match self.ask(question, self.show_sources).await {
                        Ok(answer) => write_answer(out, &answer)?,
                        Err(e) => {
                            summary.errors += 1;
                            warn!(error = %e, "question failed");
                            writeln!(out, "\nError: {}", e)?;
                        }
                    }
                }
            }
        }

        Ok(summary)
    }
}

const BANNER_RULE: &str =
    "================================================================================";

fn outcome_label(outcome: &IndexOutcome) -> &'static str {
    match outcome {
        IndexOutcome::Loaded => "loaded",
        IndexOutcome::Rebuilt { .. } => "rebuilt",
    }
}

/// Print an answer followed by its numbered sources, if any.
pub fn write_answer<W: Write>(out: &mut W, answer: &SessionAnswer) -> std::io::Result<()> {
    writeln!(out, "\nAssistant:\n{}", answer.text)?;
    if answer.sources.is_empty() {
        return Ok(());
    }
    writeln!(out, "\nSources:")?;
    for (i, source) in answer.sources.iter().enumerate() {
        writeln!(out, "\n[{}] {}", i + 1, source.path)?;
        writeln!(out, "{}", "-".repeat(40))?;
        writeln!(out, "{}", source.preview)?;
    }
    Ok(())
}

/// What happened during one run of the loop.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct LoopSummary {
    pub questions: usize,
    /// Failed questions plus undecodable input lines.
    pub errors: usize,
}

/// One line of interactive input.
#[derive(Debug, PartialEq, Eq)]
pub enum LoopCommand<'a> {
    Exit,
    ToggleSources,
    Empty,
    Question(&'a str),
}

impl<'a> LoopCommand<'a> {
    pub fn parse(line: &'a str) -> Self {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            return LoopCommand::Empty;
        }
        match trimmed.to_ascii_lowercase().as_str() {
            "exit" | "quit" | "q" => LoopCommand::Exit,
            "sources" => LoopCommand::ToggleSources,
            _ => LoopCommand::Question(trimmed),
        }
    }
}
