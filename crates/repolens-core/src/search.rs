//! Maximal-marginal-relevance (MMR) selection.
//!
//! The similarity index returns a candidate pool ranked purely by
//! similarity to the query. MMR then picks results one at a time:
//!
//! ```text
//! next = argmax_i  λ · sim(query, cᵢ)  −  (1 − λ) · max_{s ∈ selected} sim(cᵢ, s)
//! ```
//!
//! `λ = 1` degenerates to plain top-k; `λ = 0` maximizes diversity only.
//!
//! Selection is greedy and never looks ahead, so the first `n` picks do not
//! depend on `k`. The pool size is fixed by [`RetrievalParams`] alone, so
//! asking for more results extends the previous list instead of
//! reshuffling it.

use crate::embedding::cosine_similarity;
use crate::store::Candidate;

/// Retrieval tuning, decoupled from application config.
#[derive(Debug, Clone, Copy)]
pub struct RetrievalParams {
    /// Results returned per question.
    pub k: usize,
    /// Candidate pool size fetched from the similarity index before MMR.
    pub fetch_k: usize,
    /// Relevance/diversity trade-off in `[0, 1]`.
    pub lambda: f32,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            k: 8,
            fetch_k: 20,
            lambda: 0.5,
        }
    }
}

impl RetrievalParams {
    /// Candidates fetched per query. Independent of the per-call `k`, which
    /// is clamped to this.
    pub fn pool_size(&self) -> usize {
        self.fetch_k.max(self.k)
    }
}

/// Choose up to `k` candidates by MMR, returning indices into
/// `candidates` in selection order.
///
/// Relevance is each candidate's `score`. Ties go to the lower index, and
/// since pools arrive best-first that means the more relevant candidate.
pub fn mmr_select(candidates: &[Candidate], k: usize, lambda: f32) -> Vec<usize> {
    let n = candidates.len();
    let k = k.min(n);
    let mut selected = Vec::with_capacity(k);
    let mut taken = vec![false; n];
    // Highest similarity of each candidate to anything selected so far.
    let mut redundancy = vec![f32::NEG_INFINITY; n];

    while selected.len() < k {
        let mut best: Option<(usize, f32)> = None;
        for i in 0..n {
            if taken[i] {
                continue;
            }
            let score = if selected.is_empty() {
                candidates[i].score
            } else {
                lambda * candidates[i].score - (1.0 - lambda) * redundancy[i]
            };
            match best {
                Some((_, b)) if score.total_cmp(&b).is_le() => {}
                _ => best = Some((i, score)),
            }
        }

        let Some((pick, _)) = best else {
            break;
        };
        taken[pick] = true;
        selected.push(pick);

        for i in 0..n {
            if !taken[i] {
                let sim = cosine_similarity(&candidates[i].vector, &candidates[pick].vector);
                if sim > redundancy[i] {
                    redundancy[i] = sim;
                }
            }
        }
    }

    selected
}
