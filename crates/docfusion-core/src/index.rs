//! Per-document hybrid passage index.
//!
//! A [`PassageIndex`] holds an ordered list of [`PassageRecord`]s, a dense
//! embedding matrix with one row per record, and (in
//! [`SparseMode::Hybrid`]) a BM25 index with one document per record.
//! Position `i` means the same passage in all three structures.
//!
//! The index is built once from a fixed passage set and is immutable
//! afterwards, so a built index can be shared across tasks behind an `Arc`
//! and queried concurrently.

use std::sync::Arc;

use tracing::{debug, instrument};

use crate::codec::Snapshot;
use crate::dense::{DenseMatrix, ExactCosineIndex};
use crate::embedding::{embed_one, Embedder};
use crate::error::IndexError;
use crate::fusion::fuse;
use crate::models::{Passage, PassageRecord};
use crate::sparse::Bm25Index;

/// Whether the lexical BM25 capability is available.
///
/// Resolved once from configuration; every index built by one federation
/// shares the same mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SparseMode {
    DenseOnly,
    #[default]
    Hybrid,
}

struct Built {
    records: Vec<PassageRecord>,
    dense: ExactCosineIndex,
    sparse: Option<Bm25Index>,
}

/// Dense + sparse index over one document's passages.
pub struct PassageIndex {
    embedder: Arc<dyn Embedder>,
    sparse_mode: SparseMode,
    model_name: String,
    built: Option<Built>,
}

impl std::fmt::Debug for PassageIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassageIndex")
            .field("model_name", &self.model_name)
            .field("sparse_mode", &self.sparse_mode)
            .field("passages", &self.len())
            .field("built", &self.is_built())
            .finish()
    }
}

impl PassageIndex {
    /// An unbuilt index. Queries fail with [`IndexError::NotBuilt`] until
    /// [`build`](Self::build) succeeds.
    pub fn new(embedder: Arc<dyn Embedder>, sparse_mode: SparseMode) -> Self {
        let model_name = embedder.model_name().to_string();
        Self {
            embedder,
            sparse_mode,
            model_name,
            built: None,
        }
    }

    /// Create and build in one step.
    pub async fn from_passages(
        embedder: Arc<dyn Embedder>,
        sparse_mode: SparseMode,
        passages: Vec<Passage>,
    ) -> Result<Self, IndexError> {
        let mut index = Self::new(embedder, sparse_mode);
        index.build(passages).await?;
        Ok(index)
    }

    /// Embed every passage in one batch and build the dense and sparse
    /// structures. Replaces any previous contents.
    #[instrument(skip_all, fields(model = %self.model_name, passages = passages.len()))]
    pub async fn build(&mut self, passages: Vec<Passage>) -> Result<(), IndexError> {
        let records: Vec<PassageRecord> = passages.into_iter().map(PassageRecord::from).collect();

        let matrix = if records.is_empty() {
            DenseMatrix::empty(self.embedder.dims())
        } else {
            let texts: Vec<String> = records.iter().map(|r| r.passage.content.clone()).collect();
            let vectors = self
                .embedder
                .embed(&texts)
                .await
                .map_err(|e| IndexError::Embedding(e.to_string()))?;
            if vectors.len() != texts.len() {
                return Err(IndexError::Embedding(format!(
                    "embedder returned {} vectors for {} passages",
                    vectors.len(),
                    texts.len()
                )));
            }
            let dims = self.embedder.dims();
            if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
                return Err(IndexError::Embedding(format!(
                    "embedder '{}' declares {} dimensions but returned a vector of {}",
                    self.model_name,
                    dims,
                    bad.len()
                )));
            }
            DenseMatrix::from_rows(dims, vectors)?
        };

        self.built = Some(self.assemble(records, matrix));
        debug!(rows = self.len(), sparse = self.has_sparse(), "passage index built");
        Ok(())
    }

    fn assemble(&self, records: Vec<PassageRecord>, matrix: DenseMatrix) -> Built {
        let sparse = match self.sparse_mode {
            SparseMode::Hybrid => {
                let texts: Vec<&str> = records.iter().map(|r| r.passage.content.as_str()).collect();
                Some(Bm25Index::build(&texts))
            }
            SparseMode::DenseOnly => None,
        };
        Built {
            records,
            dense: ExactCosineIndex::fit(matrix),
            sparse,
        }
    }

    fn built(&self) -> Result<&Built, IndexError> {
        self.built.as_ref().ok_or(IndexError::NotBuilt)
    }

    /// Exact cosine ranking of every passage against `text`.
    ///
    /// Returns at most `min(k, len)` `(row, similarity)` pairs, ties broken
    /// by row. The embedder is not called when nothing can be returned.
    pub async fn query_dense(&self, text: &str, k: usize) -> Result<Vec<(usize, f32)>, IndexError> {
        let built = self.built()?;
        if k == 0 || built.records.is_empty() {
            return Ok(Vec::new());
        }
        let query = embed_one(self.embedder.as_ref(), text)
            .await
            .map_err(|e| IndexError::Embedding(e.to_string()))?;
        Ok(built.dense.search(&query, k))
    }

    /// BM25 ranking of passages against `text`; empty in dense-only mode.
    pub fn query_sparse(&self, text: &str, k: usize) -> Result<Vec<(usize, f64)>, IndexError> {
        let built = self.built()?;
        Ok(match &built.sparse {
            Some(bm25) => bm25.top_k(text, k),
            None => Vec::new(),
        })
    }

    /// Hybrid retrieval: dense and sparse top-`k` fused with weight `alpha`.
    #[instrument(skip(self, text), fields(model = %self.model_name))]
    pub async fn retrieve(&self, text: &str, k: usize, alpha: f64) -> Result<Vec<(usize, f64)>, IndexError> {
        let dense = self.query_dense(text, k).await?;
        let sparse = self.query_sparse(text, k)?;
        debug!(dense = dense.len(), sparse = sparse.len(), "fusing candidates");
        Ok(fuse(&dense, &sparse, k, alpha))
    }

    /// Capture the persisted form of a built index.
    pub fn to_snapshot(&self) -> Result<Snapshot, IndexError> {
        let built = self.built()?;
        Ok(Snapshot {
            model_name: self.model_name.clone(),
            matrix: built.dense.matrix().clone(),
            records: built.records.clone(),
        })
    }

    /// Restore from a snapshot, re-fitting the dense search and rebuilding
    /// BM25 from passage contents.
    ///
    /// Fails with [`IndexError::CorruptSnapshot`] when the snapshot was
    /// written by a different embedding model or breaks the row invariant.
    pub fn from_snapshot(
        snapshot: Snapshot,
        embedder: Arc<dyn Embedder>,
        sparse_mode: SparseMode,
    ) -> Result<Self, IndexError> {
        snapshot.validate()?;
        if snapshot.model_name != embedder.model_name() {
            return Err(IndexError::corrupt(format!(
                "snapshot built with model '{}', current model is '{}'",
                snapshot.model_name,
                embedder.model_name()
            )));
        }
        if snapshot.matrix.rows() > 0 && snapshot.matrix.dims() != embedder.dims() {
            return Err(IndexError::corrupt(format!(
                "snapshot has {} dimensions, embedder produces {}",
                snapshot.matrix.dims(),
                embedder.dims()
            )));
        }

        let mut index = Self::new(embedder, sparse_mode);
        index.built = Some(index.assemble(snapshot.records, snapshot.matrix));
        Ok(index)
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn len(&self) -> usize {
        self.built.as_ref().map(|b| b.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_sparse(&self) -> bool {
        self.built.as_ref().is_some_and(|b| b.sparse.is_some())
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn sparse_mode(&self) -> SparseMode {
        self.sparse_mode
    }

    pub fn record(&self, row: usize) -> Option<&PassageRecord> {
        self.built.as_ref().and_then(|b| b.records.get(row))
    }

    pub fn records(&self) -> &[PassageRecord] {
        self.built.as_ref().map(|b| b.records.as_slice()).unwrap_or(&[])
    }
}
