//! # DocFusion
//!
//! Hybrid passage retrieval over a federation of per-document indices.
//!
//! Each ingested document is parsed into passages, chunked, and indexed on
//! its own (dense vectors plus BM25). Queries fan out to every index, the
//! candidates are fused and merged, and a reranker picks the final order.
//! Indices are persisted as snapshots keyed by a content uid, so restarts
//! and re-ingests of unchanged files skip the embedding work.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────────┐   ┌────────────────────┐
//! │  Parser  │──▶│ Chunk+Embed  │──▶│ PassageIndex (1/doc)│
//! │ PDF/Text │   │ (core crate) │   │ dense + BM25        │
//! └──────────┘   └──────────────┘   └─────────┬──────────┘
//!                                             │ snapshots + registry
//!                      ┌──────────────────────┤
//!                      ▼                      ▼
//!                 ┌──────────┐          ┌──────────┐
//!                 │   CLI    │          │   HTTP   │
//!                 │(docfusion)│         │  (axum)  │
//!                 └──────────┘          └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! docfusion ingest ./papers          # index every PDF/text file
//! docfusion ask "what is the sensor range?"
//! docfusion search "thermal limits" --top-k 5
//! docfusion serve                    # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`embedding`] | Embedding providers (hash, OpenAI, Ollama, local) |
//! | [`scorer`] | Relevance scorers used for reranking |
//! | [`parser`] | PDF and plain-text document parsing |
//! | [`registry`] | Filename to content uid registry |
//! | [`snapshot`] | On-disk index snapshots |
//! | [`federation`] | Per-document index set: ingest, query, remove |
//! | [`answer`] | Answer generation from retrieved passages |
//! | [`chat`] | Multi-turn sessions with short retrieval history |
//! | [`eval`] | Retrieval and answer quality heuristics |
//! | [`scan`] | Resolve ingest paths into document files |
//! | [`server`] | HTTP API |

pub mod answer;
pub mod chat;
pub mod config;
pub mod embedding;
pub mod eval;
pub mod federation;
pub mod logging;
pub mod parser;
pub mod registry;
pub mod scan;
pub mod scorer;
pub mod server;
pub mod snapshot;
