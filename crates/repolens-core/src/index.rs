//! The [`Index`]: embedding plus similarity storage plus MMR retrieval.
//!
//! Wraps an [`Embedder`] and a [`SimilarityIndex`] behind the four
//! operations the pipeline needs:
//!
//! | Operation | Requires ready | Effect |
//! |-----------|----------------|--------|
//! | [`initialize`](Index::initialize) | no | Embed all chunks, overwrite the persisted index |
//! | [`load_existing`](Index::load_existing) | no | Reopen a persisted index if one is usable |
//! | [`query`](Index::query) | yes | Embed the question, MMR over a candidate pool |
//! | [`add_documents`](Index::add_documents) | yes | Embed and append without rebuilding |

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::embedding::Embedder;
use crate::error::{Error, Result};
use crate::models::{Chunk, IndexEntry, RetrievalResult};
use crate::search::{mmr_select, RetrievalParams};
use crate::store::SimilarityIndex;

/// Default number of texts per embedding request.
pub const DEFAULT_BATCH_SIZE: usize = 64;

pub struct Index {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn SimilarityIndex>,
    params: RetrievalParams,
    batch_size: usize,
    ready: AtomicBool,
}

impl Index {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        store: Arc<dyn SimilarityIndex>,
        params: RetrievalParams,
    ) -> Self {
        Self {
            embedder,
            store,
            params,
            batch_size: DEFAULT_BATCH_SIZE,
            ready: AtomicBool::new(false),
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// True once `initialize` or `load_existing` has succeeded.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Embed `chunks` and create the persisted index from them,
    /// overwriting whatever was there.
    pub async fn initialize(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Err(Error::EmptyCorpus);
        }

        let entries = self.embed_chunks(chunks).await?;
        let model = self.embedder.model_name();
        if let Err(e) = self.store.create(model, &entries).await {
            // Stay ready only if whatever was there before survived.
            let intact = matches!(self.store.open(model).await, Ok(true));
            self.ready.store(intact, Ordering::SeqCst);
            return Err(Error::storage(e));
        }
        self.ready.store(true, Ordering::SeqCst);

        info!(
            chunks = entries.len(),
            model = self.embedder.model_name(),
            "index built"
        );
        Ok(())
    }

    /// Reopen the persisted index.
    ///
    /// Returns `false` when nothing usable is persisted. Load failures are
    /// logged and also reported as `false`, leaving the caller free to
    /// rebuild.
    pub async fn load_existing(&self) -> bool {
        match self.store.open(self.embedder.model_name()).await {
            Ok(true) => {
                self.ready.store(true, Ordering::SeqCst);
                info!(model = self.embedder.model_name(), "loaded existing index");
                true
            }
            Ok(false) => {
                debug!("no usable persisted index");
                false
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "failed to load existing index, will rebuild");
                false
            }
        }
    }

    /// Retrieve up to `k` relevant, non-redundant chunks for `question`.
    ///
    /// `k` is capped at the configured pool size.
    pub async fn query(&self, question: &str, k: usize) -> Result<RetrievalResult> {
        if !self.is_ready() {
            return Err(Error::NotInitialized);
        }
        let pool_size = self.params.pool_size();
        let k = k.min(pool_size);
        if k == 0 {
            return Ok(RetrievalResult::default());
        }

        let mut vectors = self
            .embedder
            .embed(&[question.to_string()])
            .await
            .map_err(Error::provider)?;
        let query_vec = vectors
            .pop()
            .ok_or_else(|| Error::Provider("embedder returned no vector for the question".into()))?;

        let pool = self
            .store
            .nearest(&query_vec, pool_size)
            .await
            .map_err(Error::storage)?;
        let picks = mmr_select(&pool, k, self.params.lambda);
        debug!(pool = pool.len(), selected = picks.len(), "mmr selection");

        let chunks = picks.into_iter().map(|i| pool[i].chunk.clone()).collect();
        Ok(RetrievalResult { chunks })
    }

    /// Embed `chunks` and append them to the existing index.
    pub async fn add_documents(&self, chunks: &[Chunk]) -> Result<()> {
        if !self.is_ready() {
            return Err(Error::NotInitialized);
        }
        if chunks.is_empty() {
            return Ok(());
        }
        let entries = self.embed_chunks(chunks).await?;
        self.store.append(&entries).await.map_err(Error::storage)?;
        info!(chunks = entries.len(), "appended to index");
        Ok(())
    }

    /// Number of stored entries.
    pub async fn len(&self) -> Result<usize> {
        self.store.len().await.map_err(Error::storage)
    }

    async fn embed_chunks(&self, chunks: &[Chunk]) -> Result<Vec<IndexEntry>> {
        let mut entries = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed(&texts).await.map_err(Error::provider)?;
            if vectors.len() != batch.len() {
                return Err(Error::Provider(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            entries.extend(batch.iter().cloned().zip(vectors).map(|(chunk, vector)| IndexEntry {
                chunk,
                vector,
            }));
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Language;
    use crate::store::memory::InMemoryIndex;
    use crate::store::Candidate;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Maps each text to a vector from its letter counts.
    struct LetterEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for LetterEmbedder {
        fn model_name(&self) -> &str {
            "letters"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![0.0f32; 26];
                    for b in t.bytes().filter(u8::is_ascii_lowercase) {
                        v[(b - b'a') as usize] += 1.0;
                    }
                    v
                })
                .collect())
        }
    }

    struct FailingEmbedder;

    #[async_trait]
    impl Embedder for FailingEmbedder {
        fn model_name(&self) -> &str {
            "broken"
        }

        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            anyhow::bail!("connection refused")
        }
    }

    /// Fixed vectors per text; anything else embeds as `query`.
    struct TableEmbedder {
        table: Vec<(&'static str, Vec<f32>)>,
        query: Vec<f32>,
    }

    #[async_trait]
    impl Embedder for TableEmbedder {
        fn model_name(&self) -> &str {
            "table"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    self.table
                        .iter()
                        .find(|(key, _)| key == t)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_else(|| self.query.clone())
                })
                .collect())
        }
    }

    fn chunk(path: &str, text: &str) -> Chunk {
        Chunk {
            id: path.to_string(),
            path: path.to_string(),
            language: Language::Python,
            ordinal: 0,
            start: 0,
            text: text.to_string(),
            hash: String::new(),
        }
    }

    fn index_with(store: Arc<InMemoryIndex>) -> Index {
        let embedder = Arc::new(LetterEmbedder {
            calls: AtomicUsize::new(0),
        });
        Index::new(embedder, store, RetrievalParams::default())
    }

    #[tokio::test]
    async fn test_initialize_empty_corpus() {
        let index = index_with(Arc::new(InMemoryIndex::new()));
        assert!(matches!(index.initialize(&[]).await, Err(Error::EmptyCorpus)));
        assert!(!index.is_ready());
    }

    #[tokio::test]
    async fn test_query_before_ready() {
        let index = index_with(Arc::new(InMemoryIndex::new()));
        assert!(matches!(index.query("q", 3).await, Err(Error::NotInitialized)));
        assert!(matches!(
            index.add_documents(&[chunk("a.py", "aaa")]).await,
            Err(Error::NotInitialized)
        ));
    }

    #[tokio::test]
    async fn test_initialize_then_query() {
        let index = index_with(Arc::new(InMemoryIndex::new()));
        index
            .initialize(&[chunk("a.py", "aaaa"), chunk("b.py", "bbbb"), chunk("c.py", "cccc")])
            .await
            .unwrap();
        let result = index.query("bb", 2).await.unwrap();
        assert_eq!(result.len(), 2);
        assert_eq!(result.chunks[0].path, "b.py");
    }

    #[tokio::test]
    async fn test_batches_embedding_requests() {
        let embedder = Arc::new(LetterEmbedder {
            calls: AtomicUsize::new(0),
        });
        let index = Index::new(
            embedder.clone(),
            Arc::new(InMemoryIndex::new()),
            RetrievalParams::default(),
        )
        .with_batch_size(2);
        let chunks: Vec<_> = (0..5).map(|i| chunk(&format!("{}.py", i), "abc")).collect();
        index.initialize(&chunks).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(index.len().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn test_load_existing_false_then_true() {
        let store = Arc::new(InMemoryIndex::new());
        let first = index_with(store.clone());
        assert!(!first.load_existing().await);
        first.initialize(&[chunk("a.py", "abc")]).await.unwrap();

        let second = index_with(store);
        assert!(second.load_existing().await);
        assert!(second.is_ready());
    }

    #[tokio::test]
    async fn test_add_documents_appends() {
        let index = index_with(Arc::new(InMemoryIndex::new()));
        index.initialize(&[chunk("a.py", "abc")]).await.unwrap();
        index.add_documents(&[chunk("b.py", "xyz")]).await.unwrap();
        assert_eq!(index.len().await.unwrap(), 2);
    }

    /// Opens once, then loses its contents on the first `create`.
    struct LosingStore {
        opens: AtomicUsize,
    }

    #[async_trait]
    impl SimilarityIndex for LosingStore {
        async fn open(&self, _model: &str) -> anyhow::Result<bool> {
            Ok(self.opens.fetch_add(1, Ordering::SeqCst) == 0)
        }

        async fn create(&self, _model: &str, _entries: &[IndexEntry]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn append(&self, _entries: &[IndexEntry]) -> anyhow::Result<()> {
            anyhow::bail!("disk full")
        }

        async fn nearest(&self, _query: &[f32], _limit: usize) -> anyhow::Result<Vec<Candidate>> {
            anyhow::bail!("index is not open")
        }

        async fn len(&self) -> anyhow::Result<usize> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn test_failed_rebuild_clears_ready_when_store_lost() {
        let index = Index::new(
            Arc::new(LetterEmbedder {
                calls: AtomicUsize::new(0),
            }),
            Arc::new(LosingStore {
                opens: AtomicUsize::new(0),
            }),
            RetrievalParams::default(),
        );
        assert!(index.load_existing().await);

        let err = index.initialize(&[chunk("a.py", "abc")]).await.unwrap_err();
        assert!(matches!(err, Error::Storage(ref m) if m.contains("disk full")));
        assert!(!index.is_ready());
        assert!(matches!(index.query("abc", 1).await, Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn test_embedder_failure_is_provider_error() {
        let index = Index::new(
            Arc::new(FailingEmbedder),
            Arc::new(InMemoryIndex::new()),
            RetrievalParams::default(),
        );
        let err = index.initialize(&[chunk("a.py", "abc")]).await.unwrap_err();
        assert!(matches!(err, Error::Provider(ref m) if m.contains("connection refused")));
    }

    async fn table_index(k: usize, fetch_k: usize) -> Index {
        let embedder = Arc::new(TableEmbedder {
            table: vec![
                ("a", vec![1.0, 0.0, 0.0]),
                ("b", vec![1.0, 0.01, 0.0]),
                ("c", vec![0.3, 1.0, 0.0]),
                ("d", vec![0.0, 0.0, 1.0]),
            ],
            query: vec![1.0, 0.2, 0.0],
        });
        let params = RetrievalParams {
            k,
            fetch_k,
            lambda: 0.5,
        };
        let index = Index::new(embedder, Arc::new(InMemoryIndex::new()), params);
        index
            .initialize(&[
                chunk("a.py", "a"),
                chunk("b.py", "b"),
                chunk("c.py", "c"),
                chunk("d.py", "d"),
            ])
            .await
            .unwrap();
        index
    }

    async fn paths(index: &Index, k: usize) -> Vec<String> {
        let result = index.query("where", k).await.unwrap();
        result.chunks.into_iter().map(|c| c.path).collect()
    }

    #[tokio::test]
    async fn test_larger_k_extends_results() {
        for (k, fetch_k) in [(2, 2), (2, 3), (4, 4)] {
            let index = table_index(k, fetch_k).await;
            let mut previous: Vec<String> = Vec::new();
            for call_k in 1..=5 {
                let current = paths(&index, call_k).await;
                assert!(
                    current.starts_with(&previous),
                    "k={} gave {:?} after {:?}",
                    call_k,
                    current,
                    previous
                );
                let mut unique = current.clone();
                unique.sort();
                unique.dedup();
                assert_eq!(unique.len(), current.len());
                previous = current;
            }
        }
    }

    #[tokio::test]
    async fn test_query_capped_at_pool() {
        let index = table_index(2, 2).await;
        assert_eq!(paths(&index, 2).await, paths(&index, 3).await);
        assert_eq!(paths(&index, 10).await.len(), 2);
    }
}
