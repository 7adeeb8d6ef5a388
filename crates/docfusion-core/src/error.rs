//! Error taxonomy for index construction, querying, and snapshot loading.

use thiserror::Error;

/// Errors raised by [`PassageIndex`](crate::index::PassageIndex) and the
/// snapshot codec.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum IndexError {
    /// A query was issued before `build` or a snapshot load.
    #[error("passage index has not been built")]
    NotBuilt,
    /// A snapshot is missing, truncated, or does not match the embedder.
    #[error("corrupt index snapshot: {0}")]
    CorruptSnapshot(String),
    /// The embedding capability failed or returned inconsistent vectors.
    #[error("embedding failed: {0}")]
    Embedding(String),
    /// The relevance-scoring capability failed or returned the wrong count.
    #[error("relevance scoring failed: {0}")]
    Scoring(String),
}

impl IndexError {
    pub fn corrupt(msg: impl Into<String>) -> Self {
        IndexError::CorruptSnapshot(msg.into())
    }
}
