//! Score fusion within one index and candidate budgeting across indices.
//!
//! # Hybrid Fusion
//!
//! 1. Take the dense candidates `(row, cosine)` and the sparse candidates
//!    `(row, bm25)`, each already limited to `k`.
//! 2. If there are no sparse candidates, return the dense list unchanged.
//! 3. Divide each BM25 score by the maximum BM25 score in the set (all
//!    zero when that maximum is zero).
//! 4. `fused = α × cosine + (1 - α) × bm25_norm`, where a row missing from
//!    one list simply gets no contribution from it.
//! 5. Sort by fused score descending, then row ascending, and keep `k`.
//!
//! # Federation Budget
//!
//! Each of `N` indices is asked for `max(3, ⌈3 × top_k / N⌉)` candidates,
//! oversampling the final `top_k` threefold so the reranker has a pool to
//! choose from.

use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Default dense weight; values above 0.5 favour semantic similarity.
pub const DEFAULT_ALPHA: f64 = 0.6;

/// Oversampling factor applied to `top_k` before dividing across indices.
pub const OVERSAMPLE: usize = 3;

/// Minimum number of candidates requested from any single index.
pub const MIN_PER_INDEX: usize = 3;

/// Descending score order that is total even for NaN, which ranks last.
pub fn cmp_score_desc(a: f64, b: f64) -> Ordering {
    let key = |s: f64| if s.is_nan() { f64::NEG_INFINITY } else { s };
    key(b).total_cmp(&key(a))
}

/// Fuse dense and sparse candidate lists for one index.
///
/// ```rust
/// use docfusion_core::fusion::fuse;
///
/// let dense = vec![(0, 0.9f32), (1, 0.5)];
/// let sparse = vec![(1, 4.0), (2, 2.0)];
/// let fused = fuse(&dense, &sparse, 3, 0.5);
/// assert_eq!(fused[0].0, 1); // 0.25 + 0.5
/// assert_eq!(fused.len(), 3);
/// ```
pub fn fuse(dense: &[(usize, f32)], sparse: &[(usize, f64)], k: usize, alpha: f64) -> Vec<(usize, f64)> {
    if sparse.is_empty() {
        return dense
            .iter()
            .take(k)
            .map(|&(row, sim)| (row, sim as f64))
            .collect();
    }

    let max_sparse = sparse
        .iter()
        .map(|&(_, s)| s)
        .fold(f64::NEG_INFINITY, f64::max);

    let mut scores: BTreeMap<usize, f64> = BTreeMap::new();
    for &(row, sim) in dense {
        *scores.entry(row).or_insert(0.0) += alpha * sim as f64;
    }
    for &(row, s) in sparse {
        let norm = if max_sparse > 0.0 { s / max_sparse } else { 0.0 };
        *scores.entry(row).or_insert(0.0) += (1.0 - alpha) * norm;
    }

    let mut fused: Vec<(usize, f64)> = scores.into_iter().collect();
    fused.sort_by(|a, b| cmp_score_desc(a.1, b.1).then(a.0.cmp(&b.0)));
    fused.truncate(k);
    fused
}

/// Per-index candidate budget for a federated query over `num_indices`.
pub fn per_index_budget(top_k: usize, num_indices: usize) -> usize {
    let n = num_indices.max(1);
    MIN_PER_INDEX.max((top_k * OVERSAMPLE).div_ceil(n))
}

/// Concatenate per-index candidate lists in index order.
pub fn merge_candidates<T>(per_index: impl IntoIterator<Item = Vec<T>>) -> Vec<T> {
    per_index.into_iter().flatten().collect()
}
