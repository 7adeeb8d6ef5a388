//! Cross-reference label extraction.
//!
//! Finds mentions such as `Figure 3`, `Fig. 2b`, `Table 1`, or `Eq. (4)`
//! in passage text and collects their labels per reference kind.

use regex::Regex;
use std::sync::LazyLock;

use crate::models::CrossReferences;

static FIGURE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bfig(?:ure|\.)?\s*(\d+[a-z]?)").expect("valid regex"));
static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\btable\s*(\d+[a-z]?)").expect("valid regex"));
static EQUATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\beq(?:uation)?\.?\s*\(?(\d+[a-z]?)\)?").expect("valid regex")
});

/// Extract figure, table, and equation labels from `text`.
///
/// Labels keep first-seen order and are de-duplicated per kind.
///
/// ```rust
/// use docfusion_core::refs::extract_cross_references;
///
/// let refs = extract_cross_references("As shown in Figure 2 and Fig. 2, see Table 1.");
/// assert_eq!(refs.figure, vec!["2"]);
/// assert_eq!(refs.table, vec!["1"]);
/// ```
pub fn extract_cross_references(text: &str) -> CrossReferences {
    CrossReferences {
        figure: collect_labels(&FIGURE_RE, text),
        table: collect_labels(&TABLE_RE, text),
        equation: collect_labels(&EQUATION_RE, text),
    }
}

fn collect_labels(re: &Regex, text: &str) -> Vec<String> {
    let mut labels: Vec<String> = Vec::new();
    for caps in re.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            let label = m.as_str().to_string();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
    }
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extracts_all_kinds() {
        let refs = extract_cross_references(
            "Figure 3a compares Table 2 against Eq. 7 and equation (8).",
        );
        assert_eq!(refs.figure, vec!["3a"]);
        assert_eq!(refs.table, vec!["2"]);
        assert_eq!(refs.equation, vec!["7", "8"]);
    }

    #[test]
    fn test_case_insensitive_and_deduplicated() {
        let refs = extract_cross_references("FIG 4, fig. 4, Figure 5, TABLE 1, table 1");
        assert_eq!(refs.figure, vec!["4", "5"]);
        assert_eq!(refs.table, vec!["1"]);
    }

    #[test]
    fn test_plain_text_has_no_refs() {
        let refs = extract_cross_references("Transformers replace recurrence with attention.");
        assert!(refs.is_empty());
    }

    #[test]
    fn test_words_containing_prefixes_are_ignored() {
        let refs = extract_cross_references("The equal weights and a stable 5 setup");
        assert!(refs.is_empty());
    }
}
