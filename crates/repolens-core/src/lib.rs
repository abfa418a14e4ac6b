//! # repolens core
//!
//! Shared, I/O-free logic for repolens: data models, code chunking,
//! repository-map compaction, the similarity-index abstraction, MMR
//! retrieval, and RAG prompt assembly.
//!
//! This crate contains no filesystem, network, or database access. The
//! outside world reaches it through three capability traits:
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`embedding::Embedder`] | Turn texts into vectors |
//! | [`generation::Generator`] | Complete a prompt into text |
//! | [`store::SimilarityIndex`] | Persist vectors and rank them against a query |
//!
//! The `repolens` app crate supplies the HTTP providers and the SQLite
//! index; tests supply deterministic doubles.

pub mod chunk;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod map;
pub mod models;
pub mod rag;
pub mod search;
pub mod store;

pub use error::{Error, Result};
