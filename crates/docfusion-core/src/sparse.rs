//! Okapi BM25 term index.
//!
//! Scores documents by query-term frequency, inverse document frequency,
//! and document length. Tokenization is lowercase whitespace splitting,
//! and the same [`tokenize`] is used at build and query time so term ids
//! stay consistent.
//!
//! # Scoring
//!
//! ```text
//! idf(t)      = ln(N - n(t) + 0.5) - ln(n(t) + 0.5)
//! score(d, q) = Σ_t∈q idf(t) · f(t,d)·(k1+1) / (f(t,d) + k1·(1 - b + b·|d|/avgdl))
//! ```
//!
//! Terms whose idf is negative (present in more than half the corpus) are
//! floored to `epsilon × mean(idf)`. Repeated query terms count once per
//! occurrence.

use std::collections::HashMap;

use crate::fusion::cmp_score_desc;

/// Term-frequency saturation.
pub const K1: f64 = 1.5;
/// Length normalization strength.
pub const B: f64 = 0.75;
/// Fraction of the mean idf used as the floor for negative idf values.
pub const EPSILON: f64 = 0.25;

/// Lowercase, whitespace-split tokenizer shared by indexing and querying.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// BM25 index over a fixed, ordered document set.
///
/// Document numbers are positions in the input slice passed to
/// [`Bm25Index::build`].
#[derive(Debug, Clone)]
pub struct Bm25Index {
    term_ids: HashMap<String, usize>,
    /// Per term: `(doc, frequency)` pairs in ascending doc order.
    postings: Vec<Vec<(usize, u32)>>,
    idf: Vec<f64>,
    doc_lens: Vec<usize>,
    avgdl: f64,
}

impl Bm25Index {
    /// Build from raw document texts.
    pub fn build<S: AsRef<str>>(docs: &[S]) -> Self {
        let mut term_ids: HashMap<String, usize> = HashMap::new();
        let mut postings: Vec<Vec<(usize, u32)>> = Vec::new();
        let mut doc_lens = Vec::with_capacity(docs.len());

        for (doc, text) in docs.iter().enumerate() {
            let tokens = tokenize(text.as_ref());
            doc_lens.push(tokens.len());

            let mut freqs: HashMap<usize, u32> = HashMap::new();
            for token in tokens {
                let next_id = term_ids.len();
                let id = *term_ids.entry(token).or_insert(next_id);
                if id == postings.len() {
                    postings.push(Vec::new());
                }
                *freqs.entry(id).or_insert(0) += 1;
            }
            for (id, f) in freqs {
                postings[id].push((doc, f));
            }
        }

        let n = docs.len() as f64;
        let total_len: usize = doc_lens.iter().sum();
        let avgdl = if docs.is_empty() {
            0.0
        } else {
            total_len as f64 / n
        };

        let mut idf: Vec<f64> = postings
            .iter()
            .map(|p| {
                let df = p.len() as f64;
                (n - df + 0.5).ln() - (df + 0.5).ln()
            })
            .collect();

        if !idf.is_empty() {
            let mean = idf.iter().sum::<f64>() / idf.len() as f64;
            let floor = EPSILON * mean;
            for v in idf.iter_mut() {
                if *v < 0.0 {
                    *v = floor;
                }
            }
        }

        Self {
            term_ids,
            postings,
            idf,
            doc_lens,
            avgdl,
        }
    }

    /// Number of indexed documents.
    pub fn doc_count(&self) -> usize {
        self.doc_lens.len()
    }

    /// Number of distinct terms.
    pub fn vocabulary_size(&self) -> usize {
        self.term_ids.len()
    }

    /// BM25 score of every document for `query`, indexed by doc number.
    pub fn scores(&self, query: &str) -> Vec<f64> {
        let mut scores = vec![0.0f64; self.doc_count()];
        for token in tokenize(query) {
            let Some(&id) = self.term_ids.get(&token) else {
                continue;
            };
            let idf = self.idf[id];
            for &(doc, f) in &self.postings[id] {
                let f = f as f64;
                let len_ratio = if self.avgdl > 0.0 {
                    self.doc_lens[doc] as f64 / self.avgdl
                } else {
                    0.0
                };
                scores[doc] += idf * (f * (K1 + 1.0)) / (f + K1 * (1.0 - B + B * len_ratio));
            }
        }
        scores
    }

    /// Top `k` documents by score, descending, ties by doc number ascending.
    ///
    /// Every document is ranked, including those scoring zero, so the result
    /// length is `min(k, doc_count)`.
    pub fn top_k(&self, query: &str, k: usize) -> Vec<(usize, f64)> {
        let mut ranked: Vec<(usize, f64)> = self.scores(query).into_iter().enumerate().collect();
        ranked.sort_by(|a, b| cmp_score_desc(a.1, b.1).then(a.0.cmp(&b.0)));
        ranked.truncate(k);
        ranked
    }
}
