//! Document parsing into page-scoped passages.
//!
//! A [`DocumentParser`] turns raw file bytes into chunked [`Passage`]s.
//! Parsers first split a document into pages, then classify each line of a
//! page as caption (`Figure 3: …`, `Fig. 3 …`), table title (`Table 2 …`),
//! or body text, and finally hand the page blocks to the core chunker.
//!
//! | Extension | Parser |
//! |-----------|--------|
//! | `.pdf` | [`PdfParser`] (text layer via `pdf-extract`, one page per PDF page) |
//! | anything else | [`TextParser`] (UTF-8, pages separated by form feed `\x0c`) |

use anyhow::{Context, Result};
use regex::Regex;
use std::path::Path;
use std::sync::LazyLock;

use docfusion_core::chunk::{chunk_passages, ChunkOptions};
use docfusion_core::refs::extract_cross_references;
use docfusion_core::{Passage, PassageKind};

static CAPTION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(?:figure|fig\.?)\s*\d+").expect("valid regex"));
static TABLE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^table\s*\d+").expect("valid regex"));

/// Capability that turns a document into passages.
///
/// Called on the blocking thread pool; implementations may do CPU-heavy or
/// synchronous work.
pub trait DocumentParser: Send + Sync {
    fn parse(&self, document_id: &str, bytes: &[u8], path: &Path) -> Result<Vec<Passage>>;
}

/// Plain text and Markdown.
#[derive(Debug, Clone, Default)]
pub struct TextParser {
    pub chunking: ChunkOptions,
}

impl TextParser {
    pub fn new(chunking: ChunkOptions) -> Self {
        Self { chunking }
    }
}

impl DocumentParser for TextParser {
    fn parse(&self, document_id: &str, bytes: &[u8], _path: &Path) -> Result<Vec<Passage>> {
        let text = String::from_utf8_lossy(bytes);
        let blocks = text
            .split('\x0c')
            .enumerate()
            .flat_map(|(i, page)| page_blocks(document_id, i as u32 + 1, page))
            .collect();
        Ok(chunk_passages(blocks, &self.chunking))
    }
}

/// PDF text layer extraction. Scanned PDFs without text yield no passages.
#[derive(Debug, Clone, Default)]
pub struct PdfParser {
    pub chunking: ChunkOptions,
}

impl PdfParser {
    pub fn new(chunking: ChunkOptions) -> Self {
        Self { chunking }
    }
}

impl DocumentParser for PdfParser {
    fn parse(&self, document_id: &str, bytes: &[u8], path: &Path) -> Result<Vec<Passage>> {
        let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
            .map_err(|e| anyhow::anyhow!("{}", e))
            .with_context(|| format!("Failed to extract PDF text: {}", path.display()))?;
        let blocks = pages
            .iter()
            .enumerate()
            .flat_map(|(i, page)| page_blocks(document_id, i as u32 + 1, page))
            .collect();
        Ok(chunk_passages(blocks, &self.chunking))
    }
}

/// Dispatches on file extension.
#[derive(Debug, Clone, Default)]
pub struct AutoParser {
    text: TextParser,
    pdf: PdfParser,
}

impl AutoParser {
    pub fn new(chunking: ChunkOptions) -> Self {
        Self {
            text: TextParser::new(chunking.clone()),
            pdf: PdfParser::new(chunking),
        }
    }
}

impl DocumentParser for AutoParser {
    fn parse(&self, document_id: &str, bytes: &[u8], path: &Path) -> Result<Vec<Passage>> {
        let is_pdf = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("pdf"));
        if is_pdf {
            self.pdf.parse(document_id, bytes, path)
        } else {
            self.text.parse(document_id, bytes, path)
        }
    }
}

/// Classify one page's lines into blocks.
///
/// Caption and table lines become standalone blocks carrying their own
/// cross-references; the remaining lines are joined into one text block.
pub fn page_blocks(document_id: &str, page: u32, text: &str) -> Vec<Passage> {
    let mut blocks = Vec::new();
    let mut body: Vec<&str> = Vec::new();

    for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let kind = if CAPTION_RE.is_match(line) {
            PassageKind::Caption
        } else if TABLE_RE.is_match(line) {
            PassageKind::Table
        } else {
            body.push(line);
            continue;
        };
        blocks.push(
            Passage::new(document_id, page, kind, line)
                .with_cross_references(extract_cross_references(line)),
        );
    }

    if !body.is_empty() {
        blocks.insert(0, Passage::new(document_id, page, PassageKind::Text, body.join(" ")));
    }
    blocks
}
