//! # docfusion core
//!
//! Shared, I/O-free logic for docfusion: passage models, chunking, the
//! hybrid dense + BM25 [`PassageIndex`](index::PassageIndex), score fusion,
//! the reranking contract, and the snapshot codec.
//!
//! This crate contains no tokio, filesystem, or network dependencies. The
//! application crate supplies embedding and scoring capabilities through
//! the [`Embedder`](embedding::Embedder) and
//! [`RelevanceScorer`](rerank::RelevanceScorer) traits and owns all
//! persistence.

pub mod chunk;
pub mod codec;
pub mod dense;
pub mod embedding;
pub mod error;
pub mod fusion;
pub mod index;
pub mod models;
pub mod refs;
pub mod rerank;
pub mod sparse;

pub use error::IndexError;
pub use index::{PassageIndex, SparseMode};
pub use models::{CrossReferences, Passage, PassageKind, PassageRecord, ScoredPassage};
