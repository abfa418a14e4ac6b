//! Similarity-index abstraction.
//!
//! The [`SimilarityIndex`] trait is the narrow contract the [`Index`](crate::index::Index)
//! needs from a persisted vector store: create from scratch, reopen,
//! append, and rank against a query vector. How vectors are laid out on
//! disk is the implementation's business.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::{Chunk, IndexEntry};

/// A stored chunk ranked against a query vector.
///
/// Carries the vector so MMR can measure redundancy between candidates
/// without another round-trip.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub chunk: Chunk,
    pub vector: Vec<f32>,
    /// Cosine similarity to the query.
    pub score: f32,
}

/// Persisted similarity index.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`open`](SimilarityIndex::open) | Reopen a previously created index |
/// | [`create`](SimilarityIndex::create) | Create or overwrite the index from entries |
/// | [`append`](SimilarityIndex::append) | Add entries to an existing index |
/// | [`nearest`](SimilarityIndex::nearest) | Rank stored entries against a vector |
/// | [`len`](SimilarityIndex::len) | Number of stored entries |
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Reopen the persisted index built with embedding model `model`.
    ///
    /// `Ok(false)` when nothing has been persisted or the stored model
    /// differs. `Err` for anything else (corrupt file, I/O failure).
    async fn open(&self, model: &str) -> Result<bool>;

    /// Replace any existing contents with `entries`, recording `model`.
    ///
    /// On failure the previous contents should stay usable where the
    /// backend can manage it; callers re-check with `open`.
    async fn create(&self, model: &str, entries: &[IndexEntry]) -> Result<()>;

    /// Add entries. An entry whose chunk id is already stored replaces it.
    async fn append(&self, entries: &[IndexEntry]) -> Result<()>;

    /// Top `limit` entries by cosine similarity, best first.
    ///
    /// Ties are broken by `(path, ordinal)` so results are deterministic.
    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Candidate>>;

    async fn len(&self) -> Result<usize>;
}

/// Sort candidates best-first and keep the top `limit`.
pub fn rank_candidates(mut candidates: Vec<Candidate>, limit: usize) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.chunk.path.cmp(&b.chunk.path))
            .then_with(|| a.chunk.ordinal.cmp(&b.chunk.ordinal))
    });
    candidates.truncate(limit);
    candidates
}
