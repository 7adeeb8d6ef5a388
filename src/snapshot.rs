//! On-disk persistence of per-document passage indices.
//!
//! Each index lives in its own directory, `<data_dir>/index/by_id/<uid>/`,
//! holding the three files described in [`docfusion_core::codec`]. Loading
//! never builds: any missing, truncated, or mismatched file surfaces as
//! [`IndexError::CorruptSnapshot`] so the caller can decide to rebuild.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};
use walkdir::WalkDir;

use docfusion_core::codec::{self, Snapshot, MATRIX_FILE, MODEL_FILE, RECORDS_FILE};
use docfusion_core::embedding::Embedder;
use docfusion_core::{IndexError, PassageIndex, SparseMode};

/// Write `index` into `dir`, creating it if needed.
pub async fn save_index(index: &PassageIndex, dir: &Path) -> Result<()> {
    let snapshot = index.to_snapshot()?;
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create snapshot dir: {}", dir.display()))?;

    let records = codec::encode_records(&snapshot.records)?;
    tokio::fs::write(dir.join(MATRIX_FILE), codec::encode_matrix(&snapshot.matrix)).await?;
    tokio::fs::write(dir.join(RECORDS_FILE), records).await?;
    // Model name last: a snapshot without it is never considered complete.
    tokio::fs::write(dir.join(MODEL_FILE), codec::encode_model(&snapshot.model_name)).await?;

    debug!(dir = %dir.display(), rows = snapshot.records.len(), "snapshot saved");
    Ok(())
}

/// Restore an index from `dir` for `embedder`.
pub async fn load_index(
    dir: &Path,
    embedder: Arc<dyn Embedder>,
    sparse_mode: SparseMode,
) -> Result<PassageIndex, IndexError> {
    let model = read_part(dir, MODEL_FILE).await?;
    let matrix = read_part(dir, MATRIX_FILE).await?;
    let records = read_part(dir, RECORDS_FILE).await?;

    let snapshot = Snapshot {
        model_name: codec::decode_model(&model)?,
        matrix: codec::decode_matrix(&matrix)?,
        records: codec::decode_records(&records)?,
    };
    PassageIndex::from_snapshot(snapshot, embedder, sparse_mode)
}

async fn read_part(dir: &Path, name: &str) -> Result<Vec<u8>, IndexError> {
    let path = dir.join(name);
    tokio::fs::read(&path)
        .await
        .map_err(|e| IndexError::corrupt(format!("{}: {}", path.display(), e)))
}

/// Delete `dir` and everything under it, continuing past failures.
///
/// Returns the number of entries that could not be removed.
pub fn remove_tree_best_effort(dir: &Path) -> usize {
    if !dir.exists() {
        return 0;
    }
    let mut failures = 0;
    for entry in WalkDir::new(dir).contents_first(true) {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                warn!(error = %e, "cannot walk snapshot tree");
                failures += 1;
                continue;
            }
        };
        let path = entry.path();
        let result = if entry.file_type().is_dir() {
            std::fs::remove_dir(path)
        } else {
            std::fs::remove_file(path)
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "failed to remove");
            failures += 1;
        }
    }
    failures
}

#[cfg(test)]
mod tests {
    use super::*;
    use docfusion_core::embedding::HashingEmbedder;
    use docfusion_core::{Passage, PassageKind};
    use tempfile::TempDir;

    fn passages() -> Vec<Passage> {
        vec![
            Passage::new("a.txt", 1, PassageKind::Text, "hybrid retrieval with bm25"),
            Passage::new("a.txt", 2, PassageKind::Caption, "Figure 1: pipeline"),
        ]
    }

    #[tokio::test]
    async fn test_save_then_load_matches() {
        let tmp = TempDir::new().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));
        let index = PassageIndex::from_passages(embedder.clone(), SparseMode::Hybrid, passages())
            .await
            .unwrap();
        let dir = tmp.path().join("uid1");
        save_index(&index, &dir).await.unwrap();

        let loaded = load_index(&dir, embedder, SparseMode::Hybrid).await.unwrap();
        assert_eq!(loaded.records(), index.records());
        assert_eq!(
            loaded.retrieve("bm25 retrieval", 2, 0.6).await.unwrap(),
            index.retrieve("bm25 retrieval", 2, 0.6).await.unwrap()
        );
    }

    #[tokio::test]
    async fn test_missing_and_truncated_files_are_corrupt() {
        let tmp = TempDir::new().unwrap();
        let embedder: Arc<dyn Embedder> = Arc::new(HashingEmbedder::new(32));

        let err = load_index(tmp.path(), embedder.clone(), SparseMode::Hybrid)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CorruptSnapshot(_)));

        let index = PassageIndex::from_passages(embedder.clone(), SparseMode::Hybrid, passages())
            .await
            .unwrap();
        save_index(&index, tmp.path()).await.unwrap();
        std::fs::write(tmp.path().join(MATRIX_FILE), b"DFMX").unwrap();
        let err = load_index(tmp.path(), embedder, SparseMode::Hybrid)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CorruptSnapshot(_)));
    }

    #[tokio::test]
    async fn test_other_model_is_corrupt() {
        let tmp = TempDir::new().unwrap();
        let index = PassageIndex::from_passages(
            Arc::new(HashingEmbedder::new(32)),
            SparseMode::Hybrid,
            passages(),
        )
        .await
        .unwrap();
        save_index(&index, tmp.path()).await.unwrap();
        let err = load_index(tmp.path(), Arc::new(HashingEmbedder::new(16)), SparseMode::Hybrid)
            .await
            .unwrap_err();
        assert!(matches!(err, IndexError::CorruptSnapshot(_)));
    }

    #[test]
    fn test_remove_tree() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path().join("by_id");
        std::fs::create_dir_all(root.join("a/b")).unwrap();
        std::fs::write(root.join("a/b/f.bin"), b"x").unwrap();
        assert_eq!(remove_tree_best_effort(&root), 0);
        assert!(!root.exists());
        assert_eq!(remove_tree_best_effort(&root), 0);
    }
}
