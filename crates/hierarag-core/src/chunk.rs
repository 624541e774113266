//! Multi-strategy text chunker.
//!
//! Splits a document body into [`Chunk`]s under one of three strategies:
//!
//! - **fixed** — sliding byte window with overlap, snapped to whitespace.
//! - **adaptive** — sentence-packing that prefers paragraph boundaries and
//!   carries trailing sentences into the next chunk when a split lands
//!   inside a paragraph.
//! - **hierarchical** — paragraph groups become `parent` chunks, each split
//!   into adaptive `child` chunks that link back to their parent.
//!
//! Token budgets are converted to bytes with a 4 bytes/token ratio. Every
//! chunk's text is an exact substring of the body (`body[start..end]`), so
//! citations can point back into the source.
//!
//! # Example
//!
//! ```rust
//! use hierarag_core::chunk::{chunk_document, ChunkOptions, ChunkStrategy};
//!
//! let opts = ChunkOptions { strategy: ChunkStrategy::Fixed, ..ChunkOptions::default() };
//! let chunks = chunk_document("doc-123", "Hello world.\n\nSecond paragraph.", &opts).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].chunk_index, 0);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::str::FromStr;
use uuid::Uuid;

use crate::error::RagError;
use crate::models::{Chunk, ChunkLevel};
use crate::text::{
    next_char_boundary, paragraph_spans, sentence_spans, snap_to_char_boundary, trim_span,
};

/// Approximate bytes-per-token ratio.
pub const CHARS_PER_TOKEN: usize = 4;

/// Separator placed between pages by the text extractors.
///
/// The form feed marks the page boundary; the surrounding blank lines make
/// it a paragraph boundary as well.
pub const PAGE_BREAK: &str = "\n\n\x0c\n\n";

type Span = (usize, usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkStrategy {
    #[default]
    Hierarchical,
    Fixed,
    Adaptive,
}

impl ChunkStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkStrategy::Hierarchical => "hierarchical",
            ChunkStrategy::Fixed => "fixed",
            ChunkStrategy::Adaptive => "adaptive",
        }
    }
}

impl FromStr for ChunkStrategy {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hierarchical" => Ok(ChunkStrategy::Hierarchical),
            "fixed" => Ok(ChunkStrategy::Fixed),
            "adaptive" => Ok(ChunkStrategy::Adaptive),
            other => Err(RagError::InvalidInput(format!(
                "unknown chunking strategy: {}. Use hierarchical, fixed, or adaptive.",
                other
            ))),
        }
    }
}

/// Chunking parameters, in tokens.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkOptions {
    pub strategy: ChunkStrategy,
    /// Budget for retrieval-sized chunks (fixed, adaptive, hierarchical children).
    pub max_tokens: usize,
    /// Overlap carried between consecutive chunks.
    pub overlap_tokens: usize,
    /// Budget for hierarchical parent chunks.
    pub parent_max_tokens: usize,
    /// Adaptive chunks close at a paragraph boundary once this size is reached.
    pub min_tokens: usize,
}

impl Default for ChunkOptions {
    fn default() -> Self {
        Self {
            strategy: ChunkStrategy::Hierarchical,
            max_tokens: 256,
            overlap_tokens: 32,
            parent_max_tokens: 1024,
            min_tokens: 64,
        }
    }
}

impl ChunkOptions {
    pub fn validate(&self) -> Result<(), RagError> {
        if self.max_tokens == 0 {
            return Err(RagError::InvalidInput("max_tokens must be > 0".into()));
        }
        if self.overlap_tokens * 2 > self.max_tokens {
            return Err(RagError::InvalidInput(
                "overlap_tokens must be at most half of max_tokens".into(),
            ));
        }
        if self.parent_max_tokens < self.max_tokens {
            return Err(RagError::InvalidInput(
                "parent_max_tokens must be >= max_tokens".into(),
            ));
        }
        if self.min_tokens > self.max_tokens {
            return Err(RagError::InvalidInput(
                "min_tokens must be <= max_tokens".into(),
            ));
        }
        Ok(())
    }

    fn max_chars(&self) -> usize {
        self.max_tokens * CHARS_PER_TOKEN
    }

    fn overlap_chars(&self) -> usize {
        self.overlap_tokens * CHARS_PER_TOKEN
    }

    fn min_chars(&self) -> usize {
        self.min_tokens * CHARS_PER_TOKEN
    }

    fn parent_max_chars(&self) -> usize {
        self.parent_max_tokens * CHARS_PER_TOKEN
    }
}

/// Split a document body into chunks using the configured strategy.
///
/// # Guarantees
///
/// - At least one chunk is returned (a single empty `flat` chunk for blank text).
/// - Chunk indices are contiguous: `0, 1, 2, …, N-1`.
/// - `text == body[start_offset..end_offset]` and the text is trimmed.
/// - Chunk ids are deterministic for a given `(document_id, chunk_index)`.
pub fn chunk_document(
    document_id: &str,
    text: &str,
    opts: &ChunkOptions,
) -> Result<Vec<Chunk>, RagError> {
    opts.validate()?;

    let pages = PageIndex::new(text);
    let mut builder = ChunkBuilder {
        document_id,
        text,
        pages: &pages,
        chunks: Vec::new(),
    };

    if !text.trim().is_empty() {
        let (start, end) = trim_span(text, 0, text.len());
        match opts.strategy {
            ChunkStrategy::Fixed => {
                for span in fixed_spans(text, start, end, opts.max_chars(), opts.overlap_chars()) {
                    builder.push(span, ChunkLevel::Flat, None);
                }
            }
            ChunkStrategy::Adaptive => {
                for span in adaptive_spans(text, start, end, opts) {
                    builder.push(span, ChunkLevel::Flat, None);
                }
            }
            ChunkStrategy::Hierarchical => {
                for parent in parent_spans(text, start, end, opts.parent_max_chars()) {
                    let parent_pos = builder.push(parent, ChunkLevel::Parent, None);
                    let parent_id = builder.chunks[parent_pos].id.clone();
                    let mut child_ids = Vec::new();
                    for child in adaptive_spans(text, parent.0, parent.1, opts) {
                        let pos = builder.push(child, ChunkLevel::Child, Some(parent_id.clone()));
                        child_ids.push(builder.chunks[pos].id.clone());
                    }
                    builder.chunks[parent_pos].child_ids = child_ids;
                }
            }
        }
    }

    if builder.chunks.is_empty() {
        let (s, e) = trim_span(text, 0, text.len());
        builder.push((s, e), ChunkLevel::Flat, None);
    }

    Ok(builder.chunks)
}

struct ChunkBuilder<'a> {
    document_id: &'a str,
    text: &'a str,
    pages: &'a PageIndex,
    chunks: Vec<Chunk>,
}

impl ChunkBuilder<'_> {
    fn push(&mut self, span: Span, level: ChunkLevel, parent_id: Option<String>) -> usize {
        let index = self.chunks.len() as i64;
        let text = &self.text[span.0..span.1];
        self.chunks.push(Chunk {
            id: chunk_id(self.document_id, index),
            document_id: self.document_id.to_string(),
            chunk_index: index,
            text: text.to_string(),
            hash: hash_text(text),
            level,
            parent_id,
            child_ids: Vec::new(),
            page: self.pages.page_at(span.0),
            start_offset: span.0,
            end_offset: span.1,
            token_estimate: text.len().div_ceil(CHARS_PER_TOKEN),
        });
        self.chunks.len() - 1
    }
}

/// Form-feed positions, used to assign page numbers.
struct PageIndex {
    breaks: Vec<usize>,
}

impl PageIndex {
    fn new(text: &str) -> Self {
        Self {
            breaks: text.match_indices('\x0c').map(|(i, _)| i).collect(),
        }
    }

    fn page_at(&self, offset: usize) -> Option<u32> {
        if self.breaks.is_empty() {
            return None;
        }
        Some(1 + self.breaks.partition_point(|&b| b < offset) as u32)
    }
}

/// Sliding-window spans over `[start, end)`.
fn fixed_spans(text: &str, start: usize, end: usize, max: usize, overlap: usize) -> Vec<Span> {
    let mut spans = Vec::new();
    let mut pos = start;

    while pos < end {
        let rest = &text[pos..end];
        let lead = rest.len() - rest.trim_start().len();
        if lead == rest.len() {
            break;
        }
        pos += lead;

        let mut stop = snap_to_char_boundary(text, (pos + max).min(end));
        if stop < end {
            if let Some(ws) = text[pos..stop].rfind(char::is_whitespace) {
                if pos + ws > pos + max / 2 {
                    stop = pos + ws;
                }
            }
        }
        if stop <= pos {
            stop = next_char_boundary(text, pos);
        }

        let (s, e) = trim_span(text, pos, stop);
        if s < e {
            spans.push((s, e));
        }
        if stop >= end {
            break;
        }

        let mut next = stop;
        if overlap > 0 {
            next = snap_to_char_boundary(text, stop.saturating_sub(overlap));
            if next > pos {
                if let Some(ws) = text[next..stop].find(char::is_whitespace) {
                    next += ws;
                }
            }
        }
        if next <= pos {
            next = stop;
        }
        pos = next;
    }

    spans
}

/// Sentence-packing spans over `[start, end)`.
fn adaptive_spans(text: &str, start: usize, end: usize, opts: &ChunkOptions) -> Vec<Span> {
    let max = opts.max_chars();
    let min = opts.min_chars();
    let overlap = opts.overlap_chars();

    // (start, end, paragraph ordinal)
    let mut sentences: Vec<(usize, usize, usize)> = Vec::new();
    for (para, (ps, pe)) in paragraph_spans(text, start, end).into_iter().enumerate() {
        for (s, e) in sentence_spans(text, ps, pe) {
            sentences.push((s, e, para));
        }
    }

    let mut spans = Vec::new();
    let mut current: Vec<(usize, usize, usize)> = Vec::new();

    for sent in sentences {
        let (s, e, para) = sent;

        if e - s > max {
            if let Some(span) = span_of(&current) {
                spans.push(span);
            }
            current.clear();
            spans.extend(fixed_spans(text, s, e, max, overlap));
            continue;
        }

        if let (Some(first), Some(last)) = (current.first().copied(), current.last().copied()) {
            let crosses_paragraph = para != last.2;
            if e - first.0 > max {
                spans.push((first.0, last.1));
                current = if crosses_paragraph {
                    Vec::new()
                } else {
                    overlap_tail(&current, overlap)
                };
                if current.first().is_some_and(|f| e - f.0 > max) {
                    current.clear();
                }
            } else if crosses_paragraph && last.1 - first.0 >= min {
                spans.push((first.0, last.1));
                current.clear();
            }
        }
        current.push(sent);
    }

    if let Some(span) = span_of(&current) {
        spans.push(span);
    }
    spans
}

fn span_of(sentences: &[(usize, usize, usize)]) -> Option<Span> {
    match (sentences.first(), sentences.last()) {
        (Some(first), Some(last)) => Some((first.0, last.1)),
        _ => None,
    }
}

/// Trailing sentences of a closed chunk that fit in the overlap budget.
///
/// Never returns the whole chunk, so the next chunk always advances.
fn overlap_tail(sentences: &[(usize, usize, usize)], overlap: usize) -> Vec<(usize, usize, usize)> {
    let Some(last) = sentences.last() else {
        return Vec::new();
    };
    let mut keep_from = sentences.len();
    for i in (1..sentences.len()).rev() {
        if last.1 - sentences[i].0 <= overlap {
            keep_from = i;
        } else {
            break;
        }
    }
    sentences[keep_from..].to_vec()
}

/// Paragraph groups for hierarchical parents.
fn parent_spans(text: &str, start: usize, end: usize, max: usize) -> Vec<Span> {
    let mut parents = Vec::new();
    let mut current: Option<Span> = None;

    for (ps, pe) in paragraph_spans(text, start, end) {
        if pe - ps > max {
            if let Some(span) = current.take() {
                parents.push(span);
            }
            parents.extend(fixed_spans(text, ps, pe, max, 0));
            continue;
        }
        current = match current {
            Some((cs, ce)) if pe - cs > max => {
                parents.push((cs, ce));
                Some((ps, pe))
            }
            Some((cs, _)) => Some((cs, pe)),
            None => Some((ps, pe)),
        };
    }

    if let Some(span) = current {
        parents.push(span);
    }
    parents
}

fn chunk_id(document_id: &str, index: i64) -> String {
    let name = format!("{}:{}", document_id, index);
    Uuid::new_v5(&Uuid::NAMESPACE_OID, name.as_bytes()).to_string()
}

/// SHA-256 of chunk text, used for embedding staleness detection.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sentence(i: usize) -> String {
        format!("Sentence number {} talks about retrieval.", i)
    }

    fn paragraph(from: usize, count: usize) -> String {
        (from..from + count)
            .map(sentence)
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn opts(strategy: ChunkStrategy) -> ChunkOptions {
        ChunkOptions {
            strategy,
            max_tokens: 25,
            overlap_tokens: 12,
            parent_max_tokens: 75,
            min_tokens: 5,
        }
    }

    fn assert_offsets(body: &str, chunks: &[Chunk]) {
        for c in chunks {
            assert_eq!(&body[c.start_offset..c.end_offset], c.text);
            assert_eq!(c.text, c.text.trim());
        }
    }

    fn assert_contiguous(chunks: &[Chunk]) {
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64, "Index mismatch at position {}", i);
        }
    }

    #[test]
    fn test_empty_text_single_flat_chunk() {
        for strategy in [
            ChunkStrategy::Fixed,
            ChunkStrategy::Adaptive,
            ChunkStrategy::Hierarchical,
        ] {
            let chunks = chunk_document("doc1", "  \n ", &opts(strategy)).unwrap();
            assert_eq!(chunks.len(), 1);
            assert_eq!(chunks[0].text, "");
            assert_eq!(chunks[0].level, ChunkLevel::Flat);
        }
    }

    #[test]
    fn test_small_text_fixed_single_chunk() {
        let chunks = chunk_document("doc1", "Hello, world!", &opts(ChunkStrategy::Fixed)).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "Hello, world!");
        assert_eq!(chunks[0].page, None);
    }

    #[test]
    fn test_small_text_hierarchical_parent_and_child() {
        let chunks =
            chunk_document("doc1", "Hello, world!", &opts(ChunkStrategy::Hierarchical)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].level, ChunkLevel::Parent);
        assert_eq!(chunks[1].level, ChunkLevel::Child);
        assert_eq!(chunks[1].parent_id.as_deref(), Some(chunks[0].id.as_str()));
        assert_eq!(chunks[0].child_ids, vec![chunks[1].id.clone()]);
    }

    #[test]
    fn test_fixed_windows_overlap_and_respect_max() {
        let body = (0..60)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let o = ChunkOptions {
            max_tokens: 10,
            overlap_tokens: 5,
            ..opts(ChunkStrategy::Fixed)
        };
        let chunks = chunk_document("doc1", &body, &o).unwrap();
        assert!(chunks.len() > 3);
        assert_offsets(&body, &chunks);
        assert_contiguous(&chunks);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset < pair[0].end_offset, "expected overlap");
            assert!(pair[1].start_offset > pair[0].start_offset, "expected progress");
        }
        for c in &chunks {
            assert!(c.text.len() <= 40);
            assert!(!c.text.starts_with("ord"), "window started mid-word: {}", c.text);
        }
        assert!(chunks.last().unwrap().text.ends_with("word59"));
    }

    #[test]
    fn test_fixed_without_overlap_is_disjoint() {
        let body = (0..60)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let o = ChunkOptions {
            max_tokens: 10,
            overlap_tokens: 0,
            ..opts(ChunkStrategy::Fixed)
        };
        let chunks = chunk_document("doc1", &body, &o).unwrap();
        for pair in chunks.windows(2) {
            assert!(pair[1].start_offset >= pair[0].end_offset);
        }
    }

    #[test]
    fn test_adaptive_overlap_inside_paragraph() {
        let body = paragraph(0, 6);
        let chunks = chunk_document("doc1", &body, &opts(ChunkStrategy::Adaptive)).unwrap();
        assert!(chunks.len() >= 3);
        assert_offsets(&body, &chunks);
        assert_eq!(
            chunks[0].text,
            format!("{} {}", sentence(0), sentence(1))
        );
        assert!(chunks[1].text.starts_with(&sentence(1)));
        for c in &chunks {
            assert!(c.text.len() <= 100);
        }
    }

    #[test]
    fn test_adaptive_no_overlap_across_paragraphs() {
        let body = format!("{}\n\n{}", paragraph(0, 2), paragraph(2, 2));
        let chunks = chunk_document("doc1", &body, &opts(ChunkStrategy::Adaptive)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].text, paragraph(0, 2));
        assert_eq!(chunks[1].text, paragraph(2, 2));
        assert!(chunks[1].start_offset >= chunks[0].end_offset);
    }

    #[test]
    fn test_adaptive_small_paragraphs_merge_below_min() {
        let body = "Tiny one.\n\nTiny two.\n\nTiny three.";
        let o = ChunkOptions {
            min_tokens: 20,
            ..opts(ChunkStrategy::Adaptive)
        };
        let chunks = chunk_document("doc1", body, &o).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, body);
    }

    #[test]
    fn test_adaptive_oversized_sentence_is_windowed() {
        let long = (0..80).map(|_| "lorem").collect::<Vec<_>>().join(" ") + ".";
        let chunks = chunk_document("doc1", &long, &opts(ChunkStrategy::Adaptive)).unwrap();
        assert!(chunks.len() > 1);
        assert_offsets(&long, &chunks);
        for c in &chunks {
            assert!(c.text.len() <= 100);
        }
    }

    #[test]
    fn test_hierarchical_links_and_containment() {
        let body = (0..4)
            .map(|p| paragraph(p * 3, 3))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_document("doc1", &body, &opts(ChunkStrategy::Hierarchical)).unwrap();
        assert_offsets(&body, &chunks);
        assert_contiguous(&chunks);

        let parents: Vec<&Chunk> = chunks
            .iter()
            .filter(|c| c.level == ChunkLevel::Parent)
            .collect();
        assert_eq!(parents.len(), 2);
        for parent in &parents {
            assert!(parent.text.len() <= 300);
            assert!(!parent.child_ids.is_empty());
            for child_id in &parent.child_ids {
                let child = chunks.iter().find(|c| &c.id == child_id).unwrap();
                assert_eq!(child.level, ChunkLevel::Child);
                assert_eq!(child.parent_id.as_ref(), Some(&parent.id));
                assert!(child.start_offset >= parent.start_offset);
                assert!(child.end_offset <= parent.end_offset);
                assert!(child.chunk_index > parent.chunk_index);
            }
        }
        let children = chunks.iter().filter(|c| c.level == ChunkLevel::Child).count();
        let linked: usize = parents.iter().map(|p| p.child_ids.len()).sum();
        assert_eq!(children, linked);
    }

    #[test]
    fn test_page_numbers_from_page_breaks() {
        let body = format!("{}{}{}", paragraph(0, 2), PAGE_BREAK, paragraph(2, 2));
        let chunks = chunk_document("doc1", &body, &opts(ChunkStrategy::Adaptive)).unwrap();
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].page, Some(1));
        assert_eq!(chunks[1].page, Some(2));
    }

    #[test]
    fn test_multibyte_utf8_chars() {
        let text = "┌──────────────────┐\n│ Hello world      │\n└──────────────────┘";
        for strategy in [
            ChunkStrategy::Fixed,
            ChunkStrategy::Adaptive,
            ChunkStrategy::Hierarchical,
        ] {
            let o = ChunkOptions {
                max_tokens: 3,
                overlap_tokens: 1,
                parent_max_tokens: 6,
                min_tokens: 1,
                strategy,
            };
            let chunks = chunk_document("doc1", text, &o).unwrap();
            assert!(!chunks.is_empty());
            assert_offsets(text, &chunks);
        }
    }

    #[test]
    fn test_deterministic() {
        let body = paragraph(0, 8);
        let c1 = chunk_document("doc1", &body, &opts(ChunkStrategy::Hierarchical)).unwrap();
        let c2 = chunk_document("doc1", &body, &opts(ChunkStrategy::Hierarchical)).unwrap();
        assert_eq!(c1, c2);
        let other = chunk_document("doc2", &body, &opts(ChunkStrategy::Hierarchical)).unwrap();
        assert_ne!(c1[0].id, other[0].id);
    }

    #[test]
    fn test_invalid_options() {
        let mut o = opts(ChunkStrategy::Fixed);
        o.overlap_tokens = 20;
        assert!(chunk_document("doc1", "text", &o).is_err());
        let mut o = opts(ChunkStrategy::Fixed);
        o.max_tokens = 0;
        o.overlap_tokens = 0;
        assert!(o.validate().is_err());
        let mut o = opts(ChunkStrategy::Hierarchical);
        o.parent_max_tokens = 10;
        assert!(o.validate().is_err());
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!(
            "adaptive".parse::<ChunkStrategy>().unwrap(),
            ChunkStrategy::Adaptive
        );
        assert!("semantic".parse::<ChunkStrategy>().is_err());
    }
}
