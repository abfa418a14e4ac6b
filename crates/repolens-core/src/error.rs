//! Error taxonomy shared by the indexing and question-answering pipeline.
//!
//! Per-file problems never show up here; they are [`Warning`](crate::models::Warning)s
//! collected alongside the result. These variants are per-call failures
//! that propagate to the immediate caller.

use thiserror::Error;

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Bad path, missing credentials, invalid settings.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// `Index::initialize` was handed zero chunks.
    #[error("cannot initialize an index from an empty corpus")]
    EmptyCorpus,

    /// Indexing produced no chunks for the requested extensions.
    #[error("no documents were parsed from {root} for extensions [{extensions}]; check the repository path and file extensions")]
    NoDocuments { root: String, extensions: String },

    /// Index queried or extended before it was created or loaded.
    #[error("index not initialized; call initialize() or load_existing() first")]
    NotInitialized,

    /// Session used before `index` succeeded.
    #[error("session not ready; index the repository first")]
    NotReady,

    /// Embedding backend failure.
    #[error("embedding provider error: {0}")]
    Provider(String),

    /// Generation backend failure.
    #[error("generation failed: {0}")]
    Generation(String),

    /// Similarity-index storage failure.
    #[error("index storage error: {0}")]
    Storage(String),
}

impl Error {
    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Wrap an embedding collaborator failure, keeping its context chain.
    pub fn provider(err: anyhow::Error) -> Self {
        Self::Provider(format!("{:#}", err))
    }

    pub fn generation(err: anyhow::Error) -> Self {
        Self::Generation(format!("{:#}", err))
    }

    pub fn storage(err: anyhow::Error) -> Self {
        Self::Storage(format!("{:#}", err))
    }
}
