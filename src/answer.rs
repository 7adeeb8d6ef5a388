//! Answer generation over retrieved passages.
//!
//! [`AnswerGenerator`] is the seam for any generator (a hosted LLM, a local
//! seq2seq model). The bundled [`ExtractiveAnswerer`] needs no model: it
//! picks the context sentences that share the most terms with the question
//! and cites the passage each came from.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use docfusion_core::chunk::split_sentences;
use docfusion_core::ScoredPassage;

/// Reply when no context supports an answer.
pub const INSUFFICIENT_EVIDENCE: &str = "Insufficient evidence.";

/// Reply when the corpus is empty.
pub const NO_DOCUMENTS: &str = "No documents indexed yet.";

/// Contexts handed to the generator, best first.
pub const MAX_CONTEXTS: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStyle {
    #[default]
    Concise,
    Detailed,
    Bullet,
    Citation,
}

impl FromStr for AnswerStyle {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "concise" => Ok(Self::Concise),
            "detailed" => Ok(Self::Detailed),
            "bullet" => Ok(Self::Bullet),
            "citation" => Ok(Self::Citation),
            other => anyhow::bail!(
                "Unknown answer style: '{}'. Must be concise, detailed, bullet, or citation.",
                other
            ),
        }
    }
}

impl fmt::Display for AnswerStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Concise => "concise",
            Self::Detailed => "detailed",
            Self::Bullet => "bullet",
            Self::Citation => "citation",
        };
        f.write_str(s)
    }
}

/// A context passage with the id the answer cites it by.
#[derive(Debug, Clone, PartialEq)]
pub struct Citation {
    pub id: String,
    pub text: String,
}

impl From<&ScoredPassage> for Citation {
    fn from(p: &ScoredPassage) -> Self {
        Self {
            id: p.id().to_string(),
            text: p.content().to_string(),
        }
    }
}

/// Answer plus the passages it was drawn from.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub chunks: Vec<ScoredPassage>,
}

#[async_trait]
pub trait AnswerGenerator: Send + Sync {
    async fn answer(&self, query: &str, contexts: &[Citation], style: AnswerStyle) -> Result<String>;
}

/// Sentence-extraction generator.
#[derive(Debug, Clone, Default)]
pub struct ExtractiveAnswerer;

struct Candidate<'a> {
    sentence: String,
    cite: &'a str,
    overlap: usize,
    order: usize,
}

impl ExtractiveAnswerer {
    fn sentence_budget(style: AnswerStyle) -> usize {
        match style {
            AnswerStyle::Concise => 2,
            AnswerStyle::Detailed => 6,
            AnswerStyle::Bullet | AnswerStyle::Citation => 4,
        }
    }

    fn rank<'a>(query: &str, contexts: &'a [Citation]) -> Vec<Candidate<'a>> {
        let terms = query_terms(query);
        let mut candidates = Vec::new();
        for ctx in contexts.iter().take(MAX_CONTEXTS) {
            for sentence in split_sentences(&ctx.text) {
                let overlap = query_terms(&sentence).intersection(&terms).count();
                if overlap > 0 {
                    let order = candidates.len();
                    candidates.push(Candidate {
                        sentence,
                        cite: &ctx.id,
                        overlap,
                        order,
                    });
                }
            }
        }
        candidates.sort_by(|a, b| b.overlap.cmp(&a.overlap).then(a.order.cmp(&b.order)));
        candidates
    }
}

#[async_trait]
impl AnswerGenerator for ExtractiveAnswerer {
    async fn answer(&self, query: &str, contexts: &[Citation], style: AnswerStyle) -> Result<String> {
        let mut picked = Self::rank(query, contexts);
        if picked.is_empty() {
            return Ok(INSUFFICIENT_EVIDENCE.to_string());
        }
        picked.truncate(Self::sentence_budget(style));

        let text = match style {
            AnswerStyle::Concise | AnswerStyle::Detailed => picked
                .iter()
                .map(|c| format!("{} [{}]", c.sentence, c.cite))
                .collect::<Vec<_>>()
                .join(" "),
            AnswerStyle::Bullet => picked
                .iter()
                .map(|c| format!("- {} [{}]", c.sentence, c.cite))
                .collect::<Vec<_>>()
                .join("\n"),
            AnswerStyle::Citation => picked
                .iter()
                .map(|c| format!("{} [CITATION: {}]", c.sentence, c.cite))
                .collect::<Vec<_>>()
                .join(" "),
        };
        Ok(text)
    }
}

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "what", "which", "who", "how", "why", "when", "where",
    "does", "did", "with", "from", "that", "this", "these", "those", "into", "about", "their",
    "there", "have", "has", "been", "can", "not",
];

/// Lowercase alphanumeric terms of three or more characters, minus stopwords.
fn query_terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !STOPWORDS.contains(&t.as_str()))
        .collect()
}
