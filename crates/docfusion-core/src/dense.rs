//! Exact brute-force cosine search over a dense embedding matrix.
//!
//! Every query scans all rows. [`DenseMatrix`] owns the row-major vectors; [`ExactCosineIndex`]
//! is fitted on a matrix and caches per-row norms for querying.

use crate::error::IndexError;
use crate::fusion::cmp_score_desc;

/// Row-major `rows × dims` matrix of f32 embeddings.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    dims: usize,
    data: Vec<f32>,
}

impl DenseMatrix {
    /// An empty matrix with the given column count.
    pub fn empty(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
        }
    }

    /// Build a matrix from per-row vectors, checking every row has `dims`
    /// columns.
    pub fn from_rows(dims: usize, rows: Vec<Vec<f32>>) -> Result<Self, IndexError> {
        let mut data = Vec::with_capacity(rows.len() * dims);
        for (i, row) in rows.into_iter().enumerate() {
            if row.len() != dims {
                return Err(IndexError::Embedding(format!(
                    "row {} has {} dimensions, expected {}",
                    i,
                    row.len(),
                    dims
                )));
            }
            data.extend(row);
        }
        Ok(Self { dims, data })
    }

    /// Wrap a flat buffer, checking it divides evenly into rows.
    pub fn from_flat(dims: usize, data: Vec<f32>) -> Result<Self, IndexError> {
        if dims == 0 && !data.is_empty() {
            return Err(IndexError::corrupt("zero-dimension matrix with data"));
        }
        if dims > 0 && data.len() % dims != 0 {
            return Err(IndexError::corrupt(format!(
                "matrix length {} is not a multiple of {} dimensions",
                data.len(),
                dims
            )));
        }
        Ok(Self { dims, data })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn rows(&self) -> usize {
        if self.dims == 0 {
            0
        } else {
            self.data.len() / self.dims
        }
    }

    pub fn row(&self, i: usize) -> &[f32] {
        &self.data[i * self.dims..(i + 1) * self.dims]
    }

    pub fn as_flat(&self) -> &[f32] {
        &self.data
    }
}

/// Exact cosine nearest-neighbour search fitted on a [`DenseMatrix`].
#[derive(Debug, Clone)]
pub struct ExactCosineIndex {
    matrix: DenseMatrix,
    norms: Vec<f32>,
}

impl ExactCosineIndex {
    /// Fit on `matrix`, precomputing the norm of every row.
    pub fn fit(matrix: DenseMatrix) -> Self {
        let norms = (0..matrix.rows())
            .map(|i| matrix.row(i).iter().map(|x| x * x).sum::<f32>().sqrt())
            .collect();
        Self { matrix, norms }
    }

    pub fn matrix(&self) -> &DenseMatrix {
        &self.matrix
    }

    pub fn len(&self) -> usize {
        self.norms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.norms.is_empty()
    }

    /// Top `k` rows by cosine similarity to `query`.
    ///
    /// Sorted by similarity descending, ties broken by row ascending.
    /// Zero rows or a zero query score `0.0`.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(usize, f32)> {
        if k == 0 || self.is_empty() || query.len() != self.matrix.dims() {
            return Vec::new();
        }

        let q_norm: f32 = query.iter().map(|x| x * x).sum::<f32>().sqrt();
        let mut scored: Vec<(usize, f32)> = (0..self.len())
            .map(|i| {
                let denom = q_norm * self.norms[i];
                let sim = if denom < f32::EPSILON {
                    0.0
                } else {
                    let dot: f32 = self
                        .matrix
                        .row(i)
                        .iter()
                        .zip(query.iter())
                        .map(|(a, b)| a * b)
                        .sum();
                    dot / denom
                };
                (i, sim)
            })
            .collect();

        scored.sort_by(|a, b| cmp_score_desc(a.1 as f64, b.1 as f64).then(a.0.cmp(&b.0)));
        scored.truncate(k);
        scored
    }
}
