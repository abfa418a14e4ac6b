//! Configuration parsing and validation.
//!
//! repolens is configured from a TOML file (default `./config/repolens.toml`),
//! then environment variables, then CLI flags, in increasing precedence.
//! Every field has a default, so an empty file (or no file at the default
//! location) yields a working local setup against Ollama.
//!
//! # Example
//!
//! ```toml
//! [repo]
//! root = "."
//! extensions = [".py", ".rs"]
//!
//! [index]
//! path = "./repolens_db"
//!
//! [chunking]
//! chunk_size = 2000
//! chunk_overlap = 200
//!
//! [retrieval]
//! k = 8
//! fetch_k = 20
//! lambda = 0.5
//!
//! [map]
//! max_lines = 150
//!
//! [embedding]
//! provider = "ollama"
//! model = "nomic-embed-text"
//!
//! [llm]
//! provider = "ollama"
//! model = "llama3.2"
//! url = "http://localhost:11434"
//! temperature = 0.0
//! ```
//!
//! # Environment overrides
//!
//! | Variable | Field |
//! |----------|-------|
//! | `LLM_PROVIDER` | `llm.provider` (and `embedding.provider` when unset) |
//! | `LLM_MODEL` | `llm.model` |
//! | `LLM_BASE_URL` | `llm.url` |
//! | `LLM_TEMPERATURE` | `llm.temperature` |
//! | `EMBEDDING_MODEL` | `embedding.model` |
//! | `DB_PATH` | `index.path` |
//! | `OPENAI_API_KEY` | API key for the `openai` provider |

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use repolens_core::chunk::ChunkParams;
use repolens_core::models::normalize_extension;
use repolens_core::search::RetrievalParams;
use repolens_core::Error;

/// Default location of the configuration file.
pub const DEFAULT_CONFIG_PATH: &str = "./config/repolens.toml";

const OLLAMA_URL: &str = "http://localhost:11434";
const OPENAI_URL: &str = "https://api.openai.com/v1";

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub repo: RepoConfig,
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub map: MapConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RepoConfig {
    #[serde(default = "default_root")]
    pub root: PathBuf,
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names skipped anywhere in the tree, on top of hidden entries.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
    /// Glob patterns (relative paths) excluded from indexing and the map.
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

impl Default for RepoConfig {
    fn default() -> Self {
        Self {
            root: default_root(),
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
        }
    }
}

fn default_root() -> PathBuf {
    PathBuf::from(".")
}

fn default_extensions() -> Vec<String> {
    vec![".py".to_string()]
}

fn default_exclude_dirs() -> Vec<String> {
    [".git", "__pycache__", "node_modules", "target"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./repolens_db")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_chunk_size() -> usize {
    2000
}
fn default_chunk_overlap() -> usize {
    200
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_fetch_k")]
    pub fetch_k: usize,
    #[serde(default = "default_lambda")]
    pub lambda: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            fetch_k: default_fetch_k(),
            lambda: default_lambda(),
        }
    }
}

fn default_k() -> usize {
    8
}
fn default_fetch_k() -> usize {
    20
}
fn default_lambda() -> f32 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct MapConfig {
    #[serde(default = "default_max_lines")]
    pub max_lines: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            max_lines: default_max_lines(),
        }
    }
}

fn default_max_lines() -> usize {
    150
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `ollama` or `openai`; follows `llm.provider` when unset.
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Per-request timeout; unset waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            url: None,
            batch_size: default_batch_size(),
            timeout_secs: None,
            api_key: None,
        }
    }
}

fn default_batch_size() -> usize {
    64
}

impl EmbeddingConfig {
    pub fn provider(&self) -> &str {
        self.provider.as_deref().unwrap_or("ollama")
    }

    pub fn model(&self) -> &str {
        match (&self.model, self.provider()) {
            (Some(model), _) => model,
            (None, "openai") => "text-embedding-3-large",
            (None, _) => "nomic-embed-text",
        }
    }

    pub fn base_url(&self) -> &str {
        match (&self.url, self.provider()) {
            (Some(url), _) => url,
            (None, "openai") => OPENAI_URL,
            (None, _) => OLLAMA_URL,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_llm_provider")]
    pub provider: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub temperature: f32,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(skip)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            model: default_llm_model(),
            url: None,
            temperature: 0.0,
            max_tokens: None,
            timeout_secs: None,
            api_key: None,
        }
    }
}

fn default_llm_provider() -> String {
    "ollama".to_string()
}
fn default_llm_model() -> String {
    "llama3.2".to_string()
}

impl LlmConfig {
    pub fn base_url(&self) -> &str {
        match (&self.url, self.provider.as_str()) {
            (Some(url), _) => url,
            (None, "openai") => OPENAI_URL,
            (None, _) => OLLAMA_URL,
        }
    }
}

/// Values passed on the command line, applied last.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub repo: Option<PathBuf>,
    pub extensions: Option<Vec<String>>,
    pub db_path: Option<PathBuf>,
}

impl Config {
    pub fn chunk_params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunking.chunk_size,
            chunk_overlap: self.chunking.chunk_overlap,
        }
    }

    pub fn retrieval_params(&self) -> RetrievalParams {
        RetrievalParams {
            k: self.retrieval.k,
            fetch_k: self.retrieval.fetch_k,
            lambda: self.retrieval.lambda,
        }
    }

    /// Extensions in normalized `.ext` form.
    pub fn extensions(&self) -> Vec<String> {
        self.repo
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .collect()
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.llm.provider = provider.to_ascii_lowercase();
        }
        if let Some(model) = lookup("LLM_MODEL") {
            self.llm.model = model;
        }
        if let Some(url) = lookup("LLM_BASE_URL") {
            self.llm.url = Some(url);
        }
        if let Some(t) = lookup("LLM_TEMPERATURE") {
            self.llm.temperature = t
                .trim()
                .parse()
                .with_context(|| format!("LLM_TEMPERATURE is not a number: {}", t))?;
        }
        if let Some(model) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = Some(model);
        }
        if let Some(path) = lookup("DB_PATH") {
            self.index.path = PathBuf::from(path);
        }

        if self.embedding.provider.is_none() {
            self.embedding.provider = Some(self.llm.provider.clone());
        }
        if self.embedding.url.is_none() && self.embedding.provider() == self.llm.provider {
            self.embedding.url = self.llm.url.clone();
        }

        let api_key = lookup("OPENAI_API_KEY").filter(|k| !k.trim().is_empty());
        self.llm.api_key = api_key.clone();
        self.embedding.api_key = api_key;
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(repo) = &overrides.repo {
            self.repo.root = repo.clone();
        }
        if let Some(extensions) = &overrides.extensions {
            self.repo.extensions = extensions.clone();
        }
        if let Some(db_path) = &overrides.db_path {
            self.index.path = db_path.clone();
        }
    }

    /// Check value ranges and provider credentials.
    pub fn validate(&self) -> repolens_core::Result<()> {
        if self.chunking.chunk_size == 0 {
            return Err(Error::configuration("chunking.chunk_size must be > 0"));
        }
        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(Error::configuration(
                "chunking.chunk_overlap must be smaller than chunking.chunk_size",
            ));
        }
        if self.retrieval.k < 1 {
            return Err(Error::configuration("retrieval.k must be >= 1"));
        }
        if self.retrieval.fetch_k < self.retrieval.k {
            return Err(Error::configuration("retrieval.fetch_k must be >= retrieval.k"));
        }
        if !(0.0..=1.0).contains(&self.retrieval.lambda) {
            return Err(Error::configuration("retrieval.lambda must be in [0.0, 1.0]"));
        }
        if self.map.max_lines < 1 {
            return Err(Error::configuration("map.max_lines must be >= 1"));
        }
        if self.embedding.batch_size < 1 {
            return Err(Error::configuration("embedding.batch_size must be >= 1"));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(Error::configuration("llm.temperature must be in [0.0, 2.0]"));
        }
        if self.repo.extensions.is_empty() {
            return Err(Error::configuration("repo.extensions must not be empty"));
        }

        for (section, provider, key) in [
            ("llm", self.llm.provider.as_str(), &self.llm.api_key),
            ("embedding", self.embedding.provider(), &self.embedding.api_key),
        ] {
            match provider {
                "ollama" => {}
                "openai" => {
                    if key.is_none() {
                        return Err(Error::configuration(format!(
                            "OPENAI_API_KEY must be set when {}.provider is 'openai'",
                            section
                        )));
                    }
                }
                other => {
                    return Err(Error::configuration(format!(
                        "unknown {}.provider: '{}'. Must be ollama or openai.",
                        section, other
                    )))
                }
            }
        }
        Ok(())
    }
}

/// Parse a configuration document without touching the environment.
pub fn parse_config(content: &str) -> Result<Config> {
    toml::from_str(content).with_context(|| "Failed to parse config file")
}

/// Load, override and validate the configuration.
///
/// A missing file is an error only when `required` is set (an explicit
/// `--config`); otherwise the built-in defaults are used.
pub fn load_config(path: &Path, required: bool, overrides: &Overrides) -> Result<Config> {
    let mut config = if path.exists() || required {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        parse_config(&content)?
    } else {
        Config::default()
    };

    config.apply_env(|key| std::env::var(key).ok())?;
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}
