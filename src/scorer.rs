//! Relevance scorers for the second-pass reranker.
//!
//! - **`none`**: [`Reranker::passthrough`], ordering by the fused score.
//! - **`embedding`**: [`EmbeddingScorer`], cosine similarity between the
//!   query and passage embeddings of the configured embedder.
//! - **`local`**: [`CrossEncoderScorer`], a fastembed cross-encoder
//!   (requires the `local-models` feature).

use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::Arc;

use docfusion_core::embedding::{cosine_similarity, Embedder};
use docfusion_core::rerank::{RelevanceScorer, Reranker};

use crate::config::RerankConfig;

/// Build the reranker named by `config.provider`.
pub fn create_reranker(config: &RerankConfig, embedder: Arc<dyn Embedder>) -> Result<Reranker> {
    match config.provider.as_str() {
        "none" => Ok(Reranker::passthrough()),
        "embedding" => Ok(Reranker::new(Arc::new(EmbeddingScorer::new(embedder)))),
        #[cfg(feature = "local-models")]
        "local" => Ok(Reranker::new(Arc::new(CrossEncoderScorer::new(config)?))),
        #[cfg(not(feature = "local-models"))]
        "local" => bail!("Local rerank provider requires --features local-models"),
        other => bail!("Unknown rerank provider: {}", other),
    }
}

/// Scores passages by cosine similarity to the query embedding.
pub struct EmbeddingScorer {
    embedder: Arc<dyn Embedder>,
    name: String,
}

impl EmbeddingScorer {
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        let name = format!("cosine:{}", embedder.model_name());
        Self { embedder, name }
    }
}

#[async_trait]
impl RelevanceScorer for EmbeddingScorer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>> {
        let mut texts = Vec::with_capacity(passages.len() + 1);
        texts.push(query.to_string());
        texts.extend(passages.iter().map(|p| p.to_string()));

        let vectors = self.embedder.embed(&texts).await?;
        let Some((q, rest)) = vectors.split_first() else {
            bail!("embedder returned no vectors");
        };
        Ok(rest.iter().map(|v| cosine_similarity(q, v) as f64).collect())
    }
}

/// Cross-encoder reranking via fastembed's `TextRerank`.
#[cfg(feature = "local-models")]
pub struct CrossEncoderScorer {
    model: Arc<std::sync::Mutex<fastembed::TextRerank>>,
    name: String,
    batch_size: usize,
}

#[cfg(feature = "local-models")]
impl CrossEncoderScorer {
    pub fn new(config: &RerankConfig) -> Result<Self> {
        use fastembed::{RerankInitOptions, RerankerModel};

        let name = config
            .model
            .clone()
            .unwrap_or_else(|| "bge-reranker-base".to_string());
        let model = match name.as_str() {
            "bge-reranker-base" => RerankerModel::BGERerankerBase,
            "bge-reranker-v2-m3" => RerankerModel::BGERerankerV2M3,
            "jina-reranker-v1-turbo-en" => RerankerModel::JINARerankerV1TurboEn,
            other => bail!(
                "Unknown local rerank model: '{}'. Supported models: \
                 bge-reranker-base, bge-reranker-v2-m3, jina-reranker-v1-turbo-en",
                other
            ),
        };

        let reranker = fastembed::TextRerank::try_new(
            RerankInitOptions::new(model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local rerank model: {}", e))?;

        Ok(Self {
            model: Arc::new(std::sync::Mutex::new(reranker)),
            name,
            batch_size: config.batch_size.max(1),
        })
    }
}

#[cfg(feature = "local-models")]
#[async_trait]
impl RelevanceScorer for CrossEncoderScorer {
    fn name(&self) -> &str {
        &self.name
    }

    async fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>> {
        let model = Arc::clone(&self.model);
        let query = query.to_string();
        let documents: Vec<String> = passages.iter().map(|p| p.to_string()).collect();
        let count = documents.len();
        let batch_size = self.batch_size;

        let results = tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("rerank model lock poisoned"))?;
            model
                .rerank(query, documents, false, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local reranking failed: {}", e))
        })
        .await??;

        // Results come back sorted by score; restore input order.
        let mut scores = vec![f64::NEG_INFINITY; count];
        for r in results {
            if let Some(slot) = scores.get_mut(r.index) {
                *slot = r.score as f64;
            }
        }
        Ok(scores)
    }
}
