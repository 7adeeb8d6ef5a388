//! Core data models that flow through chunking, indexing, and retrieval.
//!
//! A [`Passage`] is produced by a document parser, becomes a
//! [`PassageRecord`] once it has a content address, and is returned to
//! callers as a [`ScoredPassage`] after retrieval and reranking.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Number of hex characters kept from the SHA-256 content address.
const ID_HEX_LEN: usize = 16;

/// What a passage was extracted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassageKind {
    Text,
    Caption,
    Table,
}

impl PassageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PassageKind::Text => "text",
            PassageKind::Caption => "caption",
            PassageKind::Table => "table",
        }
    }
}

impl fmt::Display for PassageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Figure, table, and equation labels referenced by a passage's text.
///
/// Each list keeps first-seen order and holds no duplicates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrossReferences {
    #[serde(default)]
    pub figure: Vec<String>,
    #[serde(default)]
    pub table: Vec<String>,
    #[serde(default)]
    pub equation: Vec<String>,
}

impl CrossReferences {
    pub fn is_empty(&self) -> bool {
        self.figure.is_empty() && self.table.is_empty() && self.equation.is_empty()
    }
}

/// One retrievable unit of document content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    pub document_id: String,
    /// 1-based page number.
    pub page: u32,
    pub kind: PassageKind,
    pub content: String,
    #[serde(default)]
    pub cross_references: CrossReferences,
}

impl Passage {
    pub fn new(
        document_id: impl Into<String>,
        page: u32,
        kind: PassageKind,
        content: impl Into<String>,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            page: page.max(1),
            kind,
            content: content.into(),
            cross_references: CrossReferences::default(),
        }
    }

    pub fn with_cross_references(mut self, refs: CrossReferences) -> Self {
        self.cross_references = refs;
        self
    }

    /// Deterministic content address over `(document_id, page, kind, content)`.
    pub fn content_address(&self) -> String {
        content_address(&self.document_id, self.page, self.kind, &self.content)
    }
}

/// A [`Passage`] plus its content-address id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassageRecord {
    pub id: String,
    #[serde(flatten)]
    pub passage: Passage,
}

impl From<Passage> for PassageRecord {
    fn from(passage: Passage) -> Self {
        Self {
            id: passage.content_address(),
            passage,
        }
    }
}

/// A retrieved [`PassageRecord`] with its fused retrieval score and, once
/// reranked, its relevance score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPassage {
    #[serde(flatten)]
    pub record: PassageRecord,
    pub score: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_score: Option<f64>,
}

impl ScoredPassage {
    pub fn new(record: PassageRecord, score: f64) -> Self {
        Self {
            record,
            score,
            rerank_score: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.record.id
    }

    pub fn content(&self) -> &str {
        &self.record.passage.content
    }

    /// Rerank score when present, otherwise the fused retrieval score.
    pub fn relevance(&self) -> f64 {
        self.rerank_score.unwrap_or(self.score)
    }
}

/// SHA-256 content address, hex encoded and truncated to 16 characters.
///
/// Fields are separated by `0x1f` so that shifting characters between
/// adjacent fields cannot produce a collision.
pub fn content_address(document_id: &str, page: u32, kind: PassageKind, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(page.to_string().as_bytes());
    hasher.update([0x1f]);
    hasher.update(kind.as_str().as_bytes());
    hasher.update([0x1f]);
    hasher.update(content.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..ID_HEX_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Passage {
        Passage::new("paper.pdf", 3, PassageKind::Text, "Attention is all you need.")
    }

    #[test]
    fn test_content_address_is_stable() {
        let a = PassageRecord::from(sample());
        let b = PassageRecord::from(sample());
        assert_eq!(a.id, b.id);
        assert_eq!(a.id.len(), 16);
    }

    #[test]
    fn test_content_address_changes_with_each_field() {
        let base = sample().content_address();

        let mut p = sample();
        p.page = 4;
        assert_ne!(p.content_address(), base);

        let mut p = sample();
        p.kind = PassageKind::Caption;
        assert_ne!(p.content_address(), base);

        let mut p = sample();
        p.content.push('!');
        assert_ne!(p.content_address(), base);

        let mut p = sample();
        p.document_id = "other.pdf".to_string();
        assert_ne!(p.content_address(), base);
    }

    #[test]
    fn test_content_address_ignores_cross_references() {
        let refs = CrossReferences {
            figure: vec!["2".to_string()],
            ..Default::default()
        };
        let with_refs = sample().with_cross_references(refs);
        assert_eq!(with_refs.content_address(), sample().content_address());
    }

    #[test]
    fn test_field_boundaries_do_not_collide() {
        let a = content_address("ab", 1, PassageKind::Text, "c");
        let b = content_address("a", 1, PassageKind::Text, "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn test_page_is_clamped_to_one() {
        let p = Passage::new("d", 0, PassageKind::Table, "x");
        assert_eq!(p.page, 1);
    }

    #[test]
    fn test_record_serializes_flat() {
        let record = PassageRecord::from(sample());
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["kind"], "text");
        assert_eq!(json["page"], 3);
        assert!(json.get("passage").is_none());
        let back: PassageRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn test_relevance_prefers_rerank_score() {
        let mut sp = ScoredPassage::new(PassageRecord::from(sample()), 0.4);
        assert_eq!(sp.relevance(), 0.4);
        sp.rerank_score = Some(2.5);
        assert_eq!(sp.relevance(), 2.5);
    }
}
