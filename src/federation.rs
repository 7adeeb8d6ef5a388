//! Per-document index federation.
//!
//! [`IndexFederation`] owns one [`PassageIndex`] per ingested document,
//! keyed by a content uid, and answers queries across all of them.
//!
//! # Storage Layout
//!
//! ```text
//! <data_dir>/
//!   documents/<filename>          stored source documents
//!   index/registry.json           filename → { uid, source_path }
//!   index/by_id/<uid>/            one snapshot per document index
//! ```
//!
//! # Query Pipeline
//!
//! 1. Heal: any registered document whose index is not in memory is
//!    re-parsed from its source and loaded or rebuilt.
//! 2. Each of the `N` loaded indices returns
//!    [`per_index_budget`]`(top_k, N)` hybrid candidates.
//! 3. Candidates are concatenated and the [`Reranker`] keeps the best
//!    `top_k`.
//!
//! Indices that fail at query time are skipped with a warning; a query
//! over an empty corpus returns no results.
//!
//! # Concurrency
//!
//! The registry and the uid → index map sit behind one `RwLock`. Each uid
//! has a `OnceCell` slot, so concurrent queries or ingests never build the
//! same index twice, while distinct documents build independently.

use anyhow::{Context, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info, instrument, warn};

use docfusion_core::embedding::Embedder;
use docfusion_core::fusion::{merge_candidates, per_index_budget};
use docfusion_core::rerank::Reranker;
use docfusion_core::{IndexError, Passage, PassageIndex, ScoredPassage, SparseMode};

use crate::answer::{Answer, AnswerGenerator, AnswerStyle, Citation, ExtractiveAnswerer, NO_DOCUMENTS};
use crate::config::{Config, UidPolicy};
use crate::embedding::create_embedder;
use crate::parser::{AutoParser, DocumentParser};
use crate::registry::{self, Registry, RegistryEntry};
use crate::scorer::create_reranker;
use crate::snapshot;

/// Retrieval and storage settings fixed for the federation's lifetime.
#[derive(Debug, Clone)]
pub struct FederationOptions {
    pub data_dir: PathBuf,
    pub alpha: f64,
    pub sparse_mode: SparseMode,
    pub uid_policy: UidPolicy,
}

impl FederationOptions {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            alpha: docfusion_core::fusion::DEFAULT_ALPHA,
            sparse_mode: SparseMode::Hybrid,
            uid_policy: UidPolicy::Content,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            data_dir: config.storage.data_dir.clone(),
            alpha: config.retrieval.hybrid_alpha,
            sparse_mode: config.retrieval.sparse.into(),
            uid_policy: config.retrieval.uid_policy,
        }
    }
}

/// External models the federation delegates to.
#[derive(Clone)]
pub struct Capabilities {
    pub embedder: Arc<dyn Embedder>,
    pub reranker: Reranker,
    pub parser: Arc<dyn DocumentParser>,
    pub generator: Arc<dyn AnswerGenerator>,
}

impl Capabilities {
    /// Embedder only; passthrough reranking, default parser and generator.
    pub fn new(embedder: Arc<dyn Embedder>) -> Self {
        Self {
            embedder,
            reranker: Reranker::passthrough(),
            parser: Arc::new(AutoParser::default()),
            generator: Arc::new(ExtractiveAnswerer),
        }
    }

    pub fn with_reranker(mut self, reranker: Reranker) -> Self {
        self.reranker = reranker;
        self
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let embedder = create_embedder(&config.embedding)?;
        let reranker = create_reranker(&config.rerank, embedder.clone())?;
        Ok(Self {
            embedder,
            reranker,
            parser: Arc::new(AutoParser::new(config.chunking.options())),
            generator: Arc::new(ExtractiveAnswerer),
        })
    }
}

/// A parsed document ready to index.
#[derive(Debug, Clone)]
pub struct Document {
    pub filename: String,
    pub source_path: PathBuf,
    pub passages: Vec<Passage>,
}

/// Where an ingested index came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexOrigin {
    /// Already in memory for this uid.
    Cached,
    /// Restored from an on-disk snapshot.
    Loaded,
    /// Embedded from the supplied passages.
    Built,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub filename: String,
    pub content_uid: String,
    /// False when the filename was already registered under the same uid.
    pub added: bool,
    pub origin: IndexOrigin,
    pub passages: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RemoveOutcome {
    pub removed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct FederationStatus {
    pub documents: usize,
    pub loaded_indices: usize,
    pub passages: usize,
}

type IndexSlot = Arc<OnceCell<Arc<PassageIndex>>>;

#[derive(Default)]
struct State {
    registry: Registry,
    indices: HashMap<String, IndexSlot>,
}

struct Layout {
    documents_dir: PathBuf,
    snapshots_dir: PathBuf,
    registry_path: PathBuf,
}

impl Layout {
    fn new(data_dir: &Path) -> Self {
        let index_root = data_dir.join("index");
        Self {
            documents_dir: data_dir.join("documents"),
            snapshots_dir: index_root.join("by_id"),
            registry_path: index_root.join("registry.json"),
        }
    }

    fn snapshot_dir(&self, uid: &str) -> PathBuf {
        self.snapshots_dir.join(uid)
    }

    /// Hidden sibling of the stored document that keeps its extension.
    fn staging_path(&self, filename: &str) -> PathBuf {
        self.documents_dir
            .join(format!("{}{}-{}", STAGING_PREFIX, uuid::Uuid::new_v4().simple(), filename))
    }
}

const STAGING_PREFIX: &str = ".staged-";

/// Delete staged uploads left behind by an interrupted ingest.
fn clear_staged(documents_dir: &Path) {
    let Ok(entries) = std::fs::read_dir(documents_dir) else {
        return;
    };
    for entry in entries.flatten() {
        let is_staged = entry
            .file_name()
            .to_str()
            .is_some_and(|n| n.starts_with(STAGING_PREFIX));
        if is_staged {
            if let Err(e) = std::fs::remove_file(entry.path()) {
                warn!(path = %entry.path().display(), error = %e, "failed to delete stale staged upload");
            }
        }
    }
}

pub struct IndexFederation {
    options: FederationOptions,
    caps: Capabilities,
    layout: Layout,
    state: RwLock<State>,
}

impl IndexFederation {
    /// Open the corpus under `options.data_dir`.
    ///
    /// Registry entries whose source file is gone are dropped. Every
    /// remaining snapshot is loaded; entries whose snapshot cannot be
    /// loaded stay registered and are rebuilt on the next query.
    pub async fn open(options: FederationOptions, caps: Capabilities) -> Result<Self> {
        let layout = Layout::new(&options.data_dir);
        for dir in [&layout.documents_dir, &layout.snapshots_dir] {
            tokio::fs::create_dir_all(dir)
                .await
                .with_context(|| format!("Failed to create {}", dir.display()))?;
        }

        clear_staged(&layout.documents_dir);

        let mut registry = Registry::load(&layout.registry_path);
        for filename in registry.prune_missing_sources() {
            warn!(%filename, "source document missing, dropping from registry");
        }

        let mut indices: HashMap<String, IndexSlot> = HashMap::new();
        for (filename, entry) in registry.iter() {
            let slot = indices.entry(entry.uid.clone()).or_default();
            if slot.initialized() {
                continue;
            }
            let dir = layout.snapshot_dir(&entry.uid);
            match snapshot::load_index(&dir, caps.embedder.clone(), options.sparse_mode).await {
                Ok(index) => {
                    debug!(%filename, uid = %entry.uid, passages = index.len(), "snapshot loaded");
                    let _ = slot.set(Arc::new(index));
                }
                Err(e) => {
                    warn!(%filename, uid = %entry.uid, error = %e, "snapshot unavailable, will rebuild on demand");
                }
            }
        }
        registry.save(&layout.registry_path)?;

        info!(
            documents = registry.len(),
            loaded = indices.values().filter(|s| s.initialized()).count(),
            "corpus opened"
        );

        Ok(Self {
            options,
            caps,
            layout,
            state: RwLock::new(State { registry, indices }),
        })
    }

    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::open(FederationOptions::from_config(config), Capabilities::from_config(config)?).await
    }

    pub fn documents_dir(&self) -> &Path {
        &self.layout.documents_dir
    }

    pub fn options(&self) -> &FederationOptions {
        &self.options
    }

    /// Register `document` and make its index available.
    ///
    /// The index is taken from memory, loaded from a snapshot, or built
    /// from `document.passages`, in that order of preference. A filename
    /// re-ingested under a new uid drops the previous index and snapshot.
    pub async fn ingest(&self, document: Document) -> Result<IngestOutcome> {
        self.ingest_inner(document, None).await
    }

    /// Ingest `document`, whose bytes currently live at `staged`.
    ///
    /// `staged` replaces `document.source_path` only after the index is
    /// available, so a failed ingest never touches the stored source.
    #[instrument(skip_all, fields(filename = %document.filename))]
    async fn ingest_inner(&self, document: Document, staged: Option<&Path>) -> Result<IngestOutcome> {
        let Document {
            filename,
            source_path,
            passages,
        } = document;
        let uid = registry::content_uid(
            self.options.uid_policy,
            &filename,
            staged.unwrap_or(&source_path),
        )?;

        let slot = {
            let mut state = self.state.write().await;
            state.indices.entry(uid.clone()).or_default().clone()
        };
        let (index, origin) = match self.load_or_build(&slot, &uid, passages).await {
            Ok(built) => built,
            Err(e) => {
                let mut state = self.state.write().await;
                if !slot.initialized() && !state.registry.references_uid(&uid) {
                    state.indices.remove(&uid);
                }
                return Err(e);
            }
        };

        let mut state = self.state.write().await;
        if let Some(staged) = staged {
            if let Err(e) = tokio::fs::rename(staged, &source_path).await {
                if !state.registry.references_uid(&uid) {
                    state.indices.remove(&uid);
                }
                return Err(anyhow::Error::new(e).context(format!("Failed to store {}", source_path.display())));
            }
        }
        state.indices.insert(uid.clone(), slot);
        let previous = state
            .registry
            .insert(filename.clone(), RegistryEntry::new(uid.clone(), source_path));
        let added = previous.as_ref().map_or(true, |p| p.uid != uid);

        if let Some(prev) = previous.filter(|p| p.uid != uid) {
            if !state.registry.references_uid(&prev.uid) {
                state.indices.remove(&prev.uid);
                snapshot::remove_tree_best_effort(&self.layout.snapshot_dir(&prev.uid));
                info!(%filename, old_uid = %prev.uid, "dropped previous version");
            }
        }
        state.registry.save(&self.layout.registry_path)?;

        info!(%filename, %uid, ?origin, passages = index.len(), "document ingested");
        Ok(IngestOutcome {
            filename,
            content_uid: uid,
            added,
            origin,
            passages: index.len(),
        })
    }

    /// Store `path` in the documents directory, parse it, and ingest it.
    ///
    /// The stored copy is replaced only when the ingest succeeds.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestOutcome> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| anyhow::anyhow!("Not a file path: {}", path.display()))?
            .to_string();

        let stored = self.layout.documents_dir.join(&filename);
        let same_file = match (std::fs::canonicalize(path), std::fs::canonicalize(&stored)) {
            (Ok(a), Ok(b)) => a == b,
            _ => false,
        };
        if same_file {
            let passages = self.parse_source(&filename, &stored).await?;
            return self
                .ingest(Document {
                    filename,
                    source_path: stored,
                    passages,
                })
                .await;
        }

        let staged = self.layout.staging_path(&filename);
        tokio::fs::copy(path, &staged)
            .await
            .with_context(|| format!("Failed to copy {} into corpus", path.display()))?;
        self.ingest_staged(filename, staged).await
    }

    /// Ingest uploaded `bytes` as `filename`.
    pub async fn ingest_bytes(&self, filename: &str, bytes: &[u8]) -> Result<IngestOutcome> {
        let staged = self.layout.staging_path(filename);
        tokio::fs::write(&staged, bytes)
            .await
            .with_context(|| format!("Failed to stage upload {}", filename))?;
        self.ingest_staged(filename.to_string(), staged).await
    }

    async fn ingest_staged(&self, filename: String, staged: PathBuf) -> Result<IngestOutcome> {
        let source_path = self.layout.documents_dir.join(&filename);
        let result = match self.parse_source(&filename, &staged).await {
            Ok(passages) => {
                let document = Document {
                    filename,
                    source_path,
                    passages,
                };
                self.ingest_inner(document, Some(&staged)).await
            }
            Err(e) => Err(e),
        };
        if result.is_err() {
            if let Err(e) = tokio::fs::remove_file(&staged).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(path = %staged.display(), error = %e, "failed to delete staged upload");
                }
            }
        }
        result
    }

    async fn parse_source(&self, filename: &str, path: &Path) -> Result<Vec<Passage>> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let parser = self.caps.parser.clone();
        let filename = filename.to_string();
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || parser.parse(&filename, &bytes, &path)).await?
    }

    async fn load_or_build(
        &self,
        slot: &IndexSlot,
        uid: &str,
        passages: Vec<Passage>,
    ) -> Result<(Arc<PassageIndex>, IndexOrigin)> {
        let mut origin = IndexOrigin::Cached;
        let origin_ref = &mut origin;
        let index = slot
            .get_or_try_init(move || async move {
                let (index, from) = self.materialize(uid, passages).await?;
                *origin_ref = from;
                Ok::<_, anyhow::Error>(Arc::new(index))
            })
            .await?
            .clone();
        Ok((index, origin))
    }

    /// Load the snapshot for `uid`, or build from `passages` and persist.
    async fn materialize(&self, uid: &str, passages: Vec<Passage>) -> Result<(PassageIndex, IndexOrigin)> {
        let dir = self.layout.snapshot_dir(uid);
        match snapshot::load_index(&dir, self.caps.embedder.clone(), self.options.sparse_mode).await {
            Ok(index) => {
                debug!(%uid, passages = index.len(), "snapshot loaded");
                Ok((index, IndexOrigin::Loaded))
            }
            Err(IndexError::CorruptSnapshot(reason)) => {
                debug!(%uid, %reason, "no usable snapshot, building");
                let index = PassageIndex::from_passages(
                    self.caps.embedder.clone(),
                    self.options.sparse_mode,
                    passages,
                )
                .await?;
                if let Err(e) = snapshot::save_index(&index, &dir).await {
                    warn!(%uid, error = %e, "failed to persist snapshot");
                }
                Ok((index, IndexOrigin::Built))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Bring an unbuilt registry entry back into memory.
    async fn heal(&self, slot: &IndexSlot, filename: &str, entry: &RegistryEntry) -> Result<Arc<PassageIndex>> {
        let index = slot
            .get_or_try_init(move || async move {
                let passages = self.parse_source(filename, &entry.source_path).await?;
                let (index, _) = self.materialize(&entry.uid, passages).await?;
                info!(%filename, uid = %entry.uid, "index restored");
                Ok::<_, anyhow::Error>(Arc::new(index))
            })
            .await?;
        Ok(index.clone())
    }

    async fn is_registered(&self, uid: &str) -> bool {
        self.state.read().await.registry.references_uid(uid)
    }

    /// Federated hybrid retrieval followed by reranking.
    #[instrument(skip(self, text))]
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<ScoredPassage>> {
        if text.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }

        let targets: Vec<(String, RegistryEntry, IndexSlot)> = {
            let state = self.state.read().await;
            state
                .registry
                .iter()
                .filter_map(|(filename, entry)| {
                    let slot = state.indices.get(&entry.uid)?;
                    Some((filename.clone(), entry.clone(), slot.clone()))
                })
                .collect()
        };

        let mut loaded = Vec::with_capacity(targets.len());
        for (filename, entry, slot) in targets {
            let index = match slot.get() {
                Some(index) => index.clone(),
                None => match self.heal(&slot, &filename, &entry).await {
                    Ok(index) if self.is_registered(&entry.uid).await => index,
                    Ok(_) => {
                        debug!(%filename, "removed while healing");
                        snapshot::remove_tree_best_effort(&self.layout.snapshot_dir(&entry.uid));
                        continue;
                    }
                    Err(e) => {
                        warn!(%filename, error = %e, "index unavailable, skipping");
                        continue;
                    }
                },
            };
            loaded.push((filename, index));
        }

        let per_index_k = per_index_budget(top_k, loaded.len());
        debug!(indices = loaded.len(), per_index_k, "federated query");

        let mut per_index = Vec::with_capacity(loaded.len());
        for (filename, index) in &loaded {
            match index.retrieve(text, per_index_k, self.options.alpha).await {
                Ok(hits) => per_index.push(
                    hits.into_iter()
                        .filter_map(|(row, score)| {
                            index.record(row).cloned().map(|r| ScoredPassage::new(r, score))
                        })
                        .collect::<Vec<_>>(),
                ),
                Err(e) => warn!(%filename, error = %e, "retrieval failed, skipping index"),
            }
        }
        let pool = merge_candidates(per_index);
        debug!(pool = pool.len(), "candidate pool");

        match self.caps.reranker.rerank(text, pool.clone(), top_k).await {
            Ok(ranked) => Ok(ranked),
            Err(e) => {
                warn!(error = %e, "reranking failed, falling back to fused order");
                Ok(Reranker::passthrough().rerank(text, pool, top_k).await?)
            }
        }
    }

    /// Query, then answer from the top passages.
    pub async fn ask(&self, question: &str, top_k: usize, style: AnswerStyle) -> Result<Answer> {
        self.ask_with_retrieval(question, question, top_k, style).await
    }

    /// Retrieve with `retrieval_query` but answer `question`.
    pub async fn ask_with_retrieval(
        &self,
        question: &str,
        retrieval_query: &str,
        top_k: usize,
        style: AnswerStyle,
    ) -> Result<Answer> {
        let empty = self.state.read().await.registry.is_empty();
        if empty {
            return Ok(Answer {
                answer: NO_DOCUMENTS.to_string(),
                chunks: Vec::new(),
            });
        }
        let chunks = self.query(retrieval_query, top_k).await?;
        let citations: Vec<Citation> = chunks.iter().map(Citation::from).collect();
        let answer = self.caps.generator.answer(question, &citations, style).await?;
        Ok(Answer { answer, chunks })
    }

    /// Forget `filename`: its index, snapshot, stored source, and registry
    /// entry. Cleanup failures are logged and do not fail the call.
    #[instrument(skip(self))]
    pub async fn remove(&self, filename: &str) -> Result<RemoveOutcome> {
        let mut state = self.state.write().await;
        let Some(entry) = state.registry.remove(filename) else {
            return Ok(RemoveOutcome { removed: false });
        };

        if !state.registry.references_uid(&entry.uid) {
            state.indices.remove(&entry.uid);
            let failures = snapshot::remove_tree_best_effort(&self.layout.snapshot_dir(&entry.uid));
            if failures > 0 {
                warn!(uid = %entry.uid, failures, "snapshot only partially removed");
            }
        }

        if entry.source_path.starts_with(&self.layout.documents_dir) {
            match std::fs::remove_file(&entry.source_path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %entry.source_path.display(), error = %e, "failed to delete source"),
            }
        }

        state.registry.save(&self.layout.registry_path)?;
        info!(uid = %entry.uid, "document removed");
        Ok(RemoveOutcome { removed: true })
    }

    /// Drop every index and snapshot and empty the registry.
    pub async fn reset(&self) -> Result<()> {
        let mut state = self.state.write().await;
        state.indices.clear();
        state.registry.clear();

        let failures = snapshot::remove_tree_best_effort(&self.layout.snapshots_dir);
        if failures > 0 {
            warn!(failures, "snapshot root only partially removed");
        }
        tokio::fs::create_dir_all(&self.layout.snapshots_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.layout.snapshots_dir.display()))?;
        state.registry.save(&self.layout.registry_path)?;

        info!("corpus reset");
        Ok(())
    }

    /// Registered filenames, sorted.
    pub async fn list(&self) -> Vec<String> {
        self.state.read().await.registry.filenames()
    }

    /// The in-memory index for `filename`, if it is registered and loaded.
    pub async fn loaded_index(&self, filename: &str) -> Option<Arc<PassageIndex>> {
        let state = self.state.read().await;
        let entry = state.registry.get(filename)?;
        state.indices.get(&entry.uid)?.get().cloned()
    }

    pub async fn status(&self) -> FederationStatus {
        let state = self.state.read().await;
        let mut loaded_indices = 0;
        let mut passages = 0;
        for (_, entry) in state.registry.iter() {
            if let Some(index) = state.indices.get(&entry.uid).and_then(|s| s.get()) {
                loaded_indices += 1;
                passages += index.len();
            }
        }
        FederationStatus {
            documents: state.registry.len(),
            loaded_indices,
            passages,
        }
    }
}
