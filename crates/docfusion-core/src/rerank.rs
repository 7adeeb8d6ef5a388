//! Second-pass reranking of a federated candidate pool.
//!
//! The [`Reranker`] defines the ordering contract; the relevance model is
//! supplied through [`RelevanceScorer`] (a cross-encoder, an embedding
//! similarity, or anything else returning "higher is more relevant").

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::error::IndexError;
use crate::fusion::cmp_score_desc;
use crate::models::ScoredPassage;

/// Capability that scores `(query, passage)` pairs.
#[async_trait]
pub trait RelevanceScorer: Send + Sync {
    /// Identifier for logs (e.g. `"bge-reranker-base"`).
    fn name(&self) -> &str;
    /// One score per passage, in input order.
    async fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>>;
}

/// Reorders candidates by relevance and keeps the best `top_k`.
#[derive(Clone, Default)]
pub struct Reranker {
    scorer: Option<Arc<dyn RelevanceScorer>>,
}

impl Reranker {
    pub fn new(scorer: Arc<dyn RelevanceScorer>) -> Self {
        Self {
            scorer: Some(scorer),
        }
    }

    /// A reranker that orders by the fused retrieval score alone.
    pub fn passthrough() -> Self {
        Self { scorer: None }
    }

    pub fn scorer_name(&self) -> &str {
        self.scorer.as_ref().map(|s| s.name()).unwrap_or("passthrough")
    }

    /// Score, sort, and truncate `candidates`.
    ///
    /// Ordering is relevance descending, then fused retrieval score
    /// descending; equal candidates keep their pool order. An empty pool
    /// returns immediately without calling the scorer.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredPassage>,
        top_k: usize,
    ) -> Result<Vec<ScoredPassage>, IndexError> {
        if candidates.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        if let Some(scorer) = &self.scorer {
            let texts: Vec<&str> = candidates.iter().map(|c| c.content()).collect();
            let scores = scorer
                .score_batch(query, &texts)
                .await
                .map_err(|e| IndexError::Scoring(e.to_string()))?;
            if scores.len() != candidates.len() {
                return Err(IndexError::Scoring(format!(
                    "scorer '{}' returned {} scores for {} candidates",
                    scorer.name(),
                    scores.len(),
                    candidates.len()
                )));
            }
            for (c, s) in candidates.iter_mut().zip(scores) {
                c.rerank_score = Some(s);
            }
        }

        candidates.sort_by(|a, b| {
            cmp_score_desc(a.relevance(), b.relevance()).then(cmp_score_desc(a.score, b.score))
        });
        debug!(scorer = self.scorer_name(), pool = candidates.len(), top_k, "reranked");
        candidates.truncate(top_k);
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Passage, PassageKind, PassageRecord};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scores by the number of query words contained in the passage.
    struct OverlapScorer {
        calls: AtomicUsize,
    }

    impl OverlapScorer {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RelevanceScorer for OverlapScorer {
        fn name(&self) -> &str {
            "overlap"
        }
        async fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(passages
                .iter()
                .map(|p| query.split_whitespace().filter(|w| p.contains(w)).count() as f64)
                .collect())
        }
    }

    fn candidate(content: &str, score: f64) -> ScoredPassage {
        ScoredPassage::new(
            PassageRecord::from(Passage::new("d", 1, PassageKind::Text, content)),
            score,
        )
    }

    #[tokio::test]
    async fn test_empty_pool_skips_scorer() {
        let scorer = Arc::new(OverlapScorer::new());
        let reranker = Reranker::new(scorer.clone());
        let out = reranker.rerank("q", vec![], 5).await.unwrap();
        assert!(out.is_empty());
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_sorts_by_relevance_then_fused_score() {
        let reranker = Reranker::new(Arc::new(OverlapScorer::new()));
        let pool = vec![
            candidate("alpha", 0.9),
            candidate("alpha beta", 0.1),
            candidate("beta", 0.5),
            candidate("gamma", 0.7),
        ];
        let out = reranker.rerank("alpha beta", pool, 3).await.unwrap();
        let contents: Vec<&str> = out.iter().map(|c| c.content()).collect();
        // "alpha" and "beta" tie at 1.0; higher fused score wins.
        assert_eq!(contents, vec!["alpha beta", "alpha", "beta"]);
        assert_eq!(out[0].rerank_score, Some(2.0));
        assert_eq!(out[0].score, 0.1);
    }

    #[tokio::test]
    async fn test_passthrough_orders_by_fused_score() {
        let out = Reranker::passthrough()
            .rerank("x", vec![candidate("a", 0.2), candidate("b", 0.8)], 5)
            .await
            .unwrap();
        assert_eq!(out[0].content(), "b");
        assert!(out.iter().all(|c| c.rerank_score.is_none()));
    }

    /// Returns NaN for every third passage.
    struct PatchyScorer;

    #[async_trait]
    impl RelevanceScorer for PatchyScorer {
        fn name(&self) -> &str {
            "patchy"
        }
        async fn score_batch(&self, _query: &str, passages: &[&str]) -> Result<Vec<f64>> {
            Ok((0..passages.len())
                .map(|i| if i % 3 == 0 { f64::NAN } else { ((i * 37) % 101) as f64 })
                .collect())
        }
    }

    #[tokio::test]
    async fn test_nan_scores_rank_last_without_panicking() {
        let reranker = Reranker::new(Arc::new(PatchyScorer));
        for size in [5usize, 21, 40, 64, 300] {
            let pool: Vec<ScoredPassage> = (0..size)
                .map(|i| candidate(&format!("p{}", i), (i % 7) as f64 / 7.0))
                .collect();
            let out = reranker.rerank("q", pool, size).await.unwrap();
            assert_eq!(out.len(), size);

            let scores: Vec<f64> = out.iter().map(|c| c.relevance()).collect();
            let real = scores.iter().take_while(|s| !s.is_nan()).count();
            assert_eq!(real, size - size.div_ceil(3));
            assert!(scores[real..].iter().all(|s| s.is_nan()));
            assert!(scores[..real].windows(2).all(|w| w[0] >= w[1]));
        }
    }

    struct BrokenScorer;

    #[async_trait]
    impl RelevanceScorer for BrokenScorer {
        fn name(&self) -> &str {
            "broken"
        }
        async fn score_batch(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f64>> {
            Ok(vec![1.0])
        }
    }

    #[tokio::test]
    async fn test_wrong_score_count_is_error() {
        let reranker = Reranker::new(Arc::new(BrokenScorer));
        let err = reranker
            .rerank("x", vec![candidate("a", 0.2), candidate("b", 0.8)], 5)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::Scoring(_)));
    }
}
