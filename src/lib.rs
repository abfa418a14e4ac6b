//! # repolens
//!
//! Ask natural-language questions about a code repository. Answers are
//! generated from retrieved code chunks plus a compact structural map of
//! the repository's files and declarations.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────┐   ┌──────────────┐
//! │   Scanner   │──▶│ Chunk+Embed  │──▶│ SQLite index │
//! │ (walkdir)   │   │ (core+HTTP)  │   │  (vectors)   │
//! └──────┬──────┘   └──────────────┘   └──────┬───────┘
//!        │                                    │ MMR
//!        ▼                                    ▼
//! ┌─────────────┐                      ┌──────────────┐
//! │ Structure   │──── compact map ────▶│  Assembler   │──▶ LLM
//! │ (tree-sitter)                      │  (prompt)    │
//! └─────────────┘                      └──────────────┘
//! ```
//!
//! The pure pipeline (chunking, MMR, prompt assembly, map rendering) lives
//! in `repolens-core`; this crate supplies the filesystem, network and
//! database sides plus the CLI.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration, env and CLI overrides |
//! | [`scanner`] | Repository walk with exclusion rules |
//! | [`declarations`] | Per-language declaration extractors |
//! | [`structure`] | Repository map builder |
//! | [`embedding`] | Ollama and OpenAI embedders |
//! | [`generation`] | Ollama and OpenAI chat generators |
//! | [`sqlite_index`] | Persisted similarity index |
//! | [`session`] | Orchestration and the interactive loop |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema creation |

pub mod config;
pub mod db;
pub mod declarations;
pub mod embedding;
pub mod generation;
pub mod migrate;
pub mod scanner;
pub mod session;
pub mod sqlite_index;
pub mod structure;
