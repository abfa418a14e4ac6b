//! In-memory [`SimilarityIndex`] for tests and throwaway sessions.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`. Search is
//! brute-force cosine similarity. "Persistence" lasts as long as the
//! value: once [`create`](SimilarityIndex::create) has run, later
//! [`open`](SimilarityIndex::open) calls for the same model succeed.

use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use anyhow::{anyhow, Result};
use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::models::IndexEntry;

use super::{rank_candidates, Candidate, SimilarityIndex};

#[derive(Default)]
struct State {
    /// Model the contents were built with; `None` until created.
    model: Option<String>,
    entries: Vec<IndexEntry>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// An index that behaves as if `entries` had already been persisted
    /// with `model`.
    pub fn with_entries(model: &str, entries: Vec<IndexEntry>) -> Self {
        Self {
            state: RwLock::new(State {
                model: Some(model.to_string()),
                entries,
            }),
        }
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state.read().map_err(|_| anyhow!("in-memory index lock poisoned"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state.write().map_err(|_| anyhow!("in-memory index lock poisoned"))
    }
}

#[async_trait]
impl SimilarityIndex for InMemoryIndex {
    async fn open(&self, model: &str) -> Result<bool> {
        Ok(self.read()?.model.as_deref() == Some(model))
    }

    async fn create(&self, model: &str, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.write()?;
        state.model = Some(model.to_string());
        state.entries = entries.to_vec();
        Ok(())
    }

    async fn append(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut state = self.write()?;
        if state.model.is_none() {
            return Err(anyhow!("append to an index that was never created"));
        }
        for entry in entries {
            match state.entries.iter_mut().find(|e| e.chunk.id == entry.chunk.id) {
                Some(existing) => *existing = entry.clone(),
                None => state.entries.push(entry.clone()),
            }
        }
        Ok(())
    }

    async fn nearest(&self, query: &[f32], limit: usize) -> Result<Vec<Candidate>> {
        let state = self.read()?;
        let candidates = state
            .entries
            .iter()
            .map(|e| Candidate {
                chunk: e.chunk.clone(),
                vector: e.vector.clone(),
                score: cosine_similarity(query, &e.vector),
            })
            .collect();
        Ok(rank_candidates(candidates, limit))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }
}
