//! Model-free quality heuristics for retrieval and answers.
//!
//! These are proxies, useful for spotting regressions on a fixed question
//! set, not calibrated metrics.

use std::collections::HashSet;

use docfusion_core::{PassageRecord, ScoredPassage};

const REFERENCE_WORDS: &[&str] = &["figure", "table", "eq", "equation"];

/// Query words of five or more characters.
fn keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|w| w.chars().count() >= 5)
        .map(str::to_string)
        .collect()
}

/// Fraction of the first `k` results that look relevant.
///
/// A result counts when it contains a query keyword, or when it carries
/// figure/table/equation references and the query asks about one.
pub fn precision_at_k(retrieved: &[ScoredPassage], query: &str, k: usize) -> f64 {
    let lower_q = query.to_lowercase();
    let kws = keywords(query);
    let asks_reference = REFERENCE_WORDS.iter().any(|w| lower_q.contains(*w));

    let hits = retrieved
        .iter()
        .take(k)
        .filter(|item| {
            let text = item.content().to_lowercase();
            kws.iter().any(|kw| text.contains(kw.as_str()))
                || (asks_reference && !item.record.passage.cross_references.is_empty())
        })
        .count();
    hits as f64 / k.min(retrieved.len()).max(1) as f64
}

/// Distinct pages represented in `records` over the document page count.
pub fn page_coverage(records: &[PassageRecord], total_pages: usize) -> f64 {
    if total_pages == 0 {
        return 0.0;
    }
    let pages: HashSet<u32> = records.iter().map(|r| r.passage.page).collect();
    pages.len() as f64 / total_pages as f64
}

/// Share of query keywords echoed in the answer.
pub fn answer_correctness_proxy(answer: &str, query: &str) -> f64 {
    let lower = answer.trim().to_lowercase();
    if lower.is_empty() || lower.starts_with("insufficient") {
        return 0.0;
    }
    let kws = keywords(query);
    if kws.is_empty() {
        return if lower.chars().count() > 10 { 0.5 } else { 0.0 };
    }
    kws.iter().filter(|k| lower.contains(k.as_str())).count() as f64 / kws.len() as f64
}

/// Share of numeric tokens in the answer that never appear in the contexts.
pub fn hallucination_rate_proxy(answer: &str, contexts: &[&str]) -> f64 {
    let context_all = contexts.join(" \n ").to_lowercase();
    let answer = answer.to_lowercase();
    let numbers: HashSet<&str> = answer
        .split_whitespace()
        .filter(|t| t.chars().any(|c| c.is_ascii_digit()))
        .collect();
    if numbers.is_empty() {
        return 0.0;
    }
    let missing = numbers.iter().filter(|n| !context_all.contains(**n)).count();
    missing as f64 / numbers.len() as f64
}
