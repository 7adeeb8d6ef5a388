//! Federation behaviour across ingest, restart, removal, and reranking.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

use docfusion::config::UidPolicy;
use docfusion::federation::{Capabilities, FederationOptions, IndexFederation, IndexOrigin};
use docfusion::parser::{DocumentParser, TextParser};
use docfusion_core::embedding::HashingEmbedder;
use docfusion_core::rerank::{RelevanceScorer, Reranker};
use docfusion_core::{Passage, SparseMode};

/// Counts how many query words each passage contains.
struct WordHitScorer;

#[async_trait]
impl RelevanceScorer for WordHitScorer {
    fn name(&self) -> &str {
        "word-hits"
    }

    async fn score_batch(&self, query: &str, passages: &[&str]) -> Result<Vec<f64>> {
        let words: Vec<String> = query.split_whitespace().map(|w| w.to_lowercase()).collect();
        Ok(passages
            .iter()
            .map(|p| {
                let lower = p.to_lowercase();
                words.iter().filter(|w| lower.contains(w.as_str())).count() as f64
            })
            .collect())
    }
}

struct FailingScorer;

#[async_trait]
impl RelevanceScorer for FailingScorer {
    fn name(&self) -> &str {
        "failing"
    }

    async fn score_batch(&self, _query: &str, _passages: &[&str]) -> Result<Vec<f64>> {
        anyhow::bail!("model unavailable")
    }
}

/// Remembers the size of the last candidate pool it scored.
#[derive(Default)]
struct PoolSizeScorer {
    last_pool: AtomicUsize,
}

#[async_trait]
impl RelevanceScorer for PoolSizeScorer {
    fn name(&self) -> &str {
        "pool-size"
    }

    async fn score_batch(&self, _query: &str, passages: &[&str]) -> Result<Vec<f64>> {
        self.last_pool.store(passages.len(), Ordering::SeqCst);
        Ok(vec![0.0; passages.len()])
    }
}

/// Text parser that refuses anything mentioning "garbage".
struct StrictTextParser;

impl DocumentParser for StrictTextParser {
    fn parse(&self, document_id: &str, bytes: &[u8], path: &Path) -> Result<Vec<Passage>> {
        if String::from_utf8_lossy(bytes).contains("garbage") {
            anyhow::bail!("unreadable document");
        }
        TextParser::default().parse(document_id, bytes, path)
    }
}

fn caps() -> Capabilities {
    Capabilities::new(Arc::new(HashingEmbedder::new(64)))
}

async fn open_with(data: &Path, caps: Capabilities) -> IndexFederation {
    IndexFederation::open(FederationOptions::new(data), caps).await.unwrap()
}

async fn open(data: &Path) -> IndexFederation {
    open_with(data, caps()).await
}

fn write(dir: &TempDir, name: &str, body: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

const REACTOR: &str = "The reactor coolant loop runs at 290 degrees.\x0c\
    Coolant pumps are inspected every quarter. See Figure 2 for the loop layout.\x0c\
    Table 1 lists the pump vendors.";
const GARDEN: &str = "Tomatoes need full sun and regular watering.\x0c\
    Compost improves soil structure for tomatoes and peppers.";

#[tokio::test]
async fn test_two_documents_end_to_end() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let fed = open_with(
        data.path(),
        caps().with_reranker(Reranker::new(Arc::new(WordHitScorer))),
    )
    .await;

    fed.ingest_file(&write(&src, "reactor.txt", REACTOR)).await.unwrap();
    fed.ingest_file(&write(&src, "garden.txt", GARDEN)).await.unwrap();
    assert_eq!(fed.list().await, vec!["garden.txt".to_string(), "reactor.txt".to_string()]);

    let hits = fed.query("coolant pumps", 4).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.len() <= 4);

    let ids: HashSet<&str> = hits.iter().map(|h| h.id()).collect();
    assert_eq!(ids.len(), hits.len());

    let scores: Vec<f64> = hits.iter().map(|h| h.rerank_score.unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(hits[0].record.passage.document_id, "reactor.txt");
    assert!(hits[0].content().contains("Coolant pumps"));
}

#[tokio::test]
async fn test_reranker_failure_falls_back_to_fused_order() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let fed = open_with(
        data.path(),
        caps().with_reranker(Reranker::new(Arc::new(FailingScorer))),
    )
    .await;
    fed.ingest_file(&write(&src, "reactor.txt", REACTOR)).await.unwrap();

    let hits = fed.query("coolant", 2).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.rerank_score.is_none()));
}

#[tokio::test]
async fn test_remove_then_query() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let fed = open(data.path()).await;
    let reactor = fed.ingest_file(&write(&src, "reactor.txt", REACTOR)).await.unwrap();
    fed.ingest_file(&write(&src, "garden.txt", GARDEN)).await.unwrap();

    assert!(fed.remove("reactor.txt").await.unwrap().removed);
    assert!(!fed.remove("reactor.txt").await.unwrap().removed);

    assert_eq!(fed.list().await, vec!["garden.txt".to_string()]);
    assert!(!data.path().join("documents/reactor.txt").exists());
    assert!(!data
        .path()
        .join("index/by_id")
        .join(&reactor.content_uid)
        .exists());
    // The caller's original file is never touched.
    assert!(src.path().join("reactor.txt").exists());

    let hits = fed.query("coolant pumps reactor", 10).await.unwrap();
    assert!(hits.iter().all(|h| h.record.passage.document_id == "garden.txt"));
}

#[tokio::test]
async fn test_reset_empties_everything() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let fed = open(data.path()).await;
    fed.ingest_file(&write(&src, "reactor.txt", REACTOR)).await.unwrap();

    fed.reset().await.unwrap();
    assert!(fed.list().await.is_empty());
    assert!(fed.query("coolant", 5).await.unwrap().is_empty());

    let by_id = data.path().join("index/by_id");
    assert!(by_id.is_dir());
    assert_eq!(std::fs::read_dir(&by_id).unwrap().count(), 0);

    // Usable again after a reset.
    fed.ingest_file(&write(&src, "garden.txt", GARDEN)).await.unwrap();
    assert_eq!(fed.query("tomatoes", 3).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_reopen_loads_snapshots() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let path = write(&src, "reactor.txt", REACTOR);
    let first = {
        let fed = open(data.path()).await;
        fed.ingest_file(&path).await.unwrap()
    };
    assert_eq!(first.origin, IndexOrigin::Built);

    let fed = open(data.path()).await;
    assert_eq!(fed.list().await, vec!["reactor.txt".to_string()]);
    assert_eq!(fed.status().await.loaded_indices, 1);

    let again = fed.ingest_file(&path).await.unwrap();
    assert_eq!(again.origin, IndexOrigin::Cached);
    assert!(!again.added);
    assert_eq!(again.content_uid, first.content_uid);
}

#[tokio::test]
async fn test_corrupt_snapshot_is_rebuilt_on_query() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let uid = {
        let fed = open(data.path()).await;
        fed.ingest_file(&write(&src, "reactor.txt", REACTOR))
            .await
            .unwrap()
            .content_uid
    };

    let snapshot = data.path().join("index/by_id").join(&uid);
    std::fs::write(snapshot.join("embeddings.bin"), b"not a matrix").unwrap();

    let fed = open(data.path()).await;
    assert_eq!(fed.list().await, vec!["reactor.txt".to_string()]);
    assert_eq!(fed.status().await.loaded_indices, 0);

    let hits = fed.query("coolant", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert_eq!(fed.status().await.loaded_indices, 1);

    // The rebuilt snapshot is valid on the next start.
    let fed = open(data.path()).await;
    assert_eq!(fed.status().await.loaded_indices, 1);
}

#[tokio::test]
async fn test_missing_source_is_pruned_on_open() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    {
        let fed = open(data.path()).await;
        fed.ingest_file(&write(&src, "reactor.txt", REACTOR)).await.unwrap();
        fed.ingest_file(&write(&src, "garden.txt", GARDEN)).await.unwrap();
    }
    std::fs::remove_file(data.path().join("documents/garden.txt")).unwrap();

    let fed = open(data.path()).await;
    assert_eq!(fed.list().await, vec!["reactor.txt".to_string()]);

    let registry = std::fs::read_to_string(data.path().join("index/registry.json")).unwrap();
    assert!(!registry.contains("garden.txt"));
}

#[tokio::test]
async fn test_dense_only_mode() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let mut options = FederationOptions::new(data.path());
    options.sparse_mode = SparseMode::DenseOnly;
    let fed = IndexFederation::open(options, caps()).await.unwrap();

    fed.ingest_file(&write(&src, "garden.txt", GARDEN)).await.unwrap();
    let hits = fed.query("tomatoes sun", 5).await.unwrap();
    assert_eq!(hits.len(), 2);
}

#[tokio::test]
async fn test_content_uid_is_stable_across_names() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let fed = open(data.path()).await;
    let a = fed.ingest_file(&write(&src, "a.txt", GARDEN)).await.unwrap();
    let a_again = fed.ingest_file(&src.path().join("a.txt")).await.unwrap();
    let b = fed.ingest_file(&write(&src, "b.txt", GARDEN)).await.unwrap();

    assert_eq!(a.content_uid, a_again.content_uid);
    // The filename is part of the uid.
    assert_ne!(a.content_uid, b.content_uid);
}

#[tokio::test]
async fn test_generation_policy_issues_fresh_uids() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let mut options = FederationOptions::new(data.path());
    options.uid_policy = UidPolicy::Generation;
    let fed = IndexFederation::open(options, caps()).await.unwrap();

    let path = write(&src, "garden.txt", GARDEN);
    let first = fed.ingest_file(&path).await.unwrap();
    let second = fed.ingest_file(&path).await.unwrap();
    assert_ne!(first.content_uid, second.content_uid);
    assert_eq!(second.origin, IndexOrigin::Built);
    assert_eq!(fed.list().await.len(), 1);
}

#[tokio::test]
async fn test_concurrent_ingest_of_distinct_documents() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let fed = Arc::new(open(data.path()).await);

    let mut tasks = tokio::task::JoinSet::new();
    for i in 0..6 {
        let path = write(&src, &format!("doc{}.txt", i), &format!("Document number {} about topic {}.", i, i));
        let fed = fed.clone();
        tasks.spawn(async move { fed.ingest_file(&path).await });
    }
    while let Some(res) = tasks.join_next().await {
        res.unwrap().unwrap();
    }

    assert_eq!(fed.list().await.len(), 6);
    assert_eq!(fed.status().await.loaded_indices, 6);
    let hits = fed.query("document topic", 6).await.unwrap();
    assert_eq!(hits.len(), 6);
}

#[tokio::test]
async fn test_pool_holds_per_index_budget_from_every_index() {
    let src = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let scorer = Arc::new(PoolSizeScorer::default());
    let fed = open_with(data.path(), caps().with_reranker(Reranker::new(scorer.clone()))).await;

    for name in ["one", "two", "three"] {
        let pages: Vec<String> = (1..=10)
            .map(|p| format!("Section {} of document {} covers item {}.", p, name, p * 7))
            .collect();
        fed.ingest_file(&write(&src, &format!("{}.txt", name), &pages.join("\x0c")))
            .await
            .unwrap();
    }

    // Three indices, top_k 7: each contributes max(3, ceil(21 / 3)) = 7.
    let hits = fed.query("section document item", 7).await.unwrap();
    assert_eq!(scorer.last_pool.load(Ordering::SeqCst), 21);
    assert_eq!(hits.len(), 7);

    // Ten results over three indices: ceil(30 / 3) = 10 each.
    fed.query("section document item", 10).await.unwrap();
    assert_eq!(scorer.last_pool.load(Ordering::SeqCst), 30);
}

#[tokio::test]
async fn test_failed_reingest_keeps_stored_source() {
    let src = TempDir::new().unwrap();
    let replacement = TempDir::new().unwrap();
    let data = TempDir::new().unwrap();
    let strict = || {
        let mut caps = caps();
        caps.parser = Arc::new(StrictTextParser);
        caps
    };

    let first = {
        let fed = open_with(data.path(), strict()).await;
        let first = fed.ingest_file(&write(&src, "reactor.txt", REACTOR)).await.unwrap();

        let bad = write(&replacement, "reactor.txt", "garbage not a document");
        assert!(fed.ingest_file(&bad).await.is_err());
        assert!(fed.ingest_bytes("reactor.txt", b"more garbage").await.is_err());
        first
    };

    let stored = data.path().join("documents/reactor.txt");
    assert_eq!(std::fs::read_to_string(&stored).unwrap(), REACTOR);
    let names: Vec<String> = std::fs::read_dir(data.path().join("documents"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
        .collect();
    assert_eq!(names, vec!["reactor.txt".to_string()]);

    // Losing the snapshot still heals from the intact source.
    let snapshot = data.path().join("index/by_id").join(&first.content_uid);
    std::fs::remove_file(snapshot.join("embeddings.bin")).unwrap();
    let fed = open_with(data.path(), strict()).await;
    let hits = fed.query("coolant pumps", 3).await.unwrap();
    assert!(!hits.is_empty());
    assert!(hits.iter().all(|h| h.record.passage.document_id == "reactor.txt"));
}

#[tokio::test]
async fn test_upload_bytes_replaces_source_on_success() {
    let data = TempDir::new().unwrap();
    let fed = open(data.path()).await;
    let first = fed.ingest_bytes("notes.txt", GARDEN.as_bytes()).await.unwrap();
    let second = fed.ingest_bytes("notes.txt", REACTOR.as_bytes()).await.unwrap();
    assert_ne!(first.content_uid, second.content_uid);
    assert_eq!(
        std::fs::read_to_string(data.path().join("documents/notes.txt")).unwrap(),
        REACTOR
    );
    assert_eq!(std::fs::read_dir(data.path().join("documents")).unwrap().count(), 1);
}
