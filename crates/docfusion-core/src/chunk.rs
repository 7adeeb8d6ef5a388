//! Sentence-window passage chunker.
//!
//! Turns page-level blocks produced by a document parser into retrievable
//! [`Passage`]s. Text blocks are split into sentences and regrouped into
//! overlapping windows bounded by `max_chars`; captions and tables are kept
//! whole.
//!
//! # Algorithm
//!
//! 1. Split text into sentences at `.`, `!` or `?` followed by whitespace
//!    and an uppercase letter, `(` or `[`.
//! 2. Starting at sentence `start`, accumulate sentences while the window
//!    stays within `max_chars` (each sentence costs its length plus one).
//! 3. A single sentence longer than `max_chars` becomes its own window,
//!    truncated at a char boundary.
//! 4. The next window starts `overlap_sentences` before the end of the
//!    previous one, but always advances by at least one sentence.
//! 5. Passages identical in `(document_id, page, kind, content)` are
//!    dropped, keeping the first.
//!
//! # Example
//!
//! ```rust
//! use docfusion_core::chunk::{chunk_passages, ChunkOptions};
//! use docfusion_core::models::{Passage, PassageKind};
//!
//! let blocks = vec![Passage::new("a.pdf", 1, PassageKind::Text, "One. Two. Three.")];
//! let passages = chunk_passages(blocks, &ChunkOptions::default());
//! assert_eq!(passages.len(), 1);
//! assert_eq!(passages[0].content, "One. Two. Three.");
//! ```

use std::collections::HashSet;

use crate::models::{Passage, PassageKind};
use crate::refs::extract_cross_references;

/// Window sizing for [`chunk_passages`].
#[derive(Debug, Clone)]
pub struct ChunkOptions {
    pub max_chars: usize,
    pub overlap_sentences: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            max_chars: 1200,
            overlap_sentences: 1,
        }
    }
}

/// Chunk parser blocks into passages and drop exact duplicates.
pub fn chunk_passages(blocks: Vec<Passage>, opts: &ChunkOptions) -> Vec<Passage> {
    let mut output = Vec::new();

    for block in blocks {
        match block.kind {
            PassageKind::Text => {
                let sentences = split_sentences(&block.content);
                for window in sliding_window(&sentences, opts.max_chars, opts.overlap_sentences) {
                    let refs = extract_cross_references(&window);
                    output.push(
                        Passage::new(block.document_id.clone(), block.page, PassageKind::Text, window)
                            .with_cross_references(refs),
                    );
                }
            }
            PassageKind::Caption | PassageKind::Table => {
                if !block.content.trim().is_empty() {
                    output.push(block);
                }
            }
        }
    }

    dedup_passages(output)
}

/// Drop passages whose `(document_id, page, kind, content)` was already seen.
pub fn dedup_passages(passages: Vec<Passage>) -> Vec<Passage> {
    let mut seen: HashSet<(String, u32, PassageKind, String)> = HashSet::new();
    passages
        .into_iter()
        .filter(|p| {
            seen.insert((
                p.document_id.clone(),
                p.page,
                p.kind,
                p.content.clone(),
            ))
        })
        .collect()
}

/// Split text into sentences without any language model.
///
/// A boundary is a run of `.`, `!` or `?` followed by whitespace whose next
/// character is uppercase, `(` or `[`.
pub fn split_sentences(text: &str) -> Vec<String> {
    let chars: Vec<(usize, char)> = text.char_indices().collect();
    let mut sentences = Vec::new();
    let mut start = 0usize;
    let mut i = 0usize;

    while i < chars.len() {
        let (_, c) = chars[i];
        if matches!(c, '.' | '!' | '?') {
            let mut j = i + 1;
            while j < chars.len() && chars[j].1.is_whitespace() {
                j += 1;
            }
            if j > i + 1 && j < chars.len() {
                let next = chars[j].1;
                if next.is_uppercase() || next == '(' || next == '[' {
                    let end = chars[i + 1].0;
                    push_trimmed(&mut sentences, &text[start..end]);
                    start = chars[j].0;
                    i = j;
                    continue;
                }
            }
        }
        i += 1;
    }

    push_trimmed(&mut sentences, &text[start..]);
    sentences
}

fn push_trimmed(out: &mut Vec<String>, piece: &str) {
    let trimmed = piece.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

/// Group sentences into overlapping windows of at most `max_chars`.
pub fn sliding_window(sentences: &[String], max_chars: usize, overlap_sentences: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut start = 0usize;

    while start < sentences.len() {
        let mut current: Vec<&str> = Vec::new();
        let mut total = 0usize;
        let mut i = start;
        while i < sentences.len() && total + sentences[i].len() + 1 <= max_chars {
            current.push(&sentences[i]);
            total += sentences[i].len() + 1;
            i += 1;
        }

        if current.is_empty() {
            let s = &sentences[start];
            chunks.push(s[..snap_to_char_boundary(s, max_chars)].to_string());
            i = start + 1;
        } else {
            chunks.push(current.join(" "));
        }

        if i >= sentences.len() {
            break;
        }
        start = i.saturating_sub(overlap_sentences).max(start + 1);
    }

    chunks
}

/// Snap a byte index back to the nearest valid UTF-8 char boundary.
fn snap_to_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}
