//! Character-window chunking with overlap and heading inheritance.
//!
//! Windows are measured in characters, never split a UTF-8 sequence, and are
//! trimmed before use. Each chunk carries the closest heading that starts at
//! or before it, so context survives a split in the middle of a section.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::ChunkingError;
use crate::types::{Chunk, Document};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub max_chunk_length: usize,
    pub overlap_length: usize,
    pub min_chunk_length: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self { max_chunk_length: 1000, overlap_length: 100, min_chunk_length: 100 }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ChunkingError> {
        if self.max_chunk_length == 0 {
            return Err(ChunkingError::InvalidConfig("max_chunk_length must be positive".to_string()));
        }
        if self.overlap_length >= self.max_chunk_length {
            return Err(ChunkingError::InvalidConfig(format!(
                "overlap_length ({}) must be smaller than max_chunk_length ({})",
                self.overlap_length, self.max_chunk_length
            )));
        }
        if self.min_chunk_length > self.max_chunk_length {
            return Err(ChunkingError::InvalidConfig(format!(
                "min_chunk_length ({}) must not exceed max_chunk_length ({})",
                self.min_chunk_length, self.max_chunk_length
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Chunker {
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(config: ChunkingConfig) -> Result<Self, ChunkingError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Split one document. Short documents come back as a single chunk.
    pub fn chunk_document(&self, document: &Document) -> Result<Vec<Chunk>, ChunkingError> {
        let text = document.raw_text.as_str();
        if text.trim().is_empty() {
            return Err(ChunkingError::Empty(document.id.clone()));
        }
        if text.contains('\0') {
            return Err(ChunkingError::Malformed { document_id: document.id.clone(), reason: "text contains NUL bytes".to_string() });
        }

        let headings = find_headings(text);
        // Byte offset of every char start, plus the end of the text.
        let boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
        let windows = self.windows(boundaries.len() - 1);
        let single = windows.len() == 1;

        let mut chunks = Vec::with_capacity(windows.len());
        for (start_char, end_char) in windows {
            let (window_start, window_end) = (boundaries[start_char], boundaries[end_char]);
            let raw = &text[window_start..window_end];
            let trimmed = raw.trim();
            if trimmed.is_empty() { continue; }
            if !single && trimmed.chars().count() < self.config.min_chunk_length { continue; }
            let start = window_start + (raw.len() - raw.trim_start().len());
            let end = start + trimmed.len();
            chunks.push(Chunk::new(&document.id, heading_at(&headings, start), trimmed.to_string(), start, end));
        }

        if chunks.is_empty() {
            return Err(ChunkingError::Malformed {
                document_id: document.id.clone(),
                reason: format!("no passage reached {} characters", self.config.min_chunk_length),
            });
        }
        debug!(document = %document.title, chunks = chunks.len(), "chunked document");
        Ok(chunks)
    }

    /// Chunk every document, skipping (and logging) the ones that fail.
    pub fn chunk_corpus(&self, documents: &[Document]) -> Vec<Chunk> {
        let mut all_chunks = Vec::new();
        let mut skipped = 0usize;
        for document in documents {
            match self.chunk_document(document) {
                Ok(chunks) => all_chunks.extend(chunks),
                Err(e) => { skipped += 1; warn!(title = %document.title, url = %document.url, error = %e, "skipping document"); }
            }
        }
        tracing::info!(documents = documents.len(), skipped, chunks = all_chunks.len(), "chunked corpus");
        all_chunks
    }

    /// `[start, end)` character windows covering `len` characters.
    fn windows(&self, len: usize) -> Vec<(usize, usize)> {
        let stride = self.config.max_chunk_length - self.config.overlap_length;
        let mut windows = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.config.max_chunk_length).min(len);
            windows.push((start, end));
            if end >= len { break; }
            start += stride;
        }
        windows
    }
}

/// Byte offset and title of every heading line, in document order.
fn find_headings(text: &str) -> Vec<(usize, String)> {
    let mut headings = Vec::new();
    let mut offset = 0;
    for line in text.split_inclusive('\n') {
        if let Some(title) = parse_heading(line.trim()) { headings.push((offset, title)); }
        offset += line.len();
    }
    headings
}

/// Markdown ATX (`## Title`) or MediaWiki (`== Title ==`) heading text.
fn parse_heading(line: &str) -> Option<String> {
    if line.starts_with('#') {
        let level = line.chars().take_while(|c| *c == '#').count();
        let rest = &line[level..];
        if level > 6 || !(rest.is_empty() || rest.starts_with(' ')) { return None; }
        let title = rest.trim().trim_end_matches('#').trim();
        return (!title.is_empty()).then(|| title.to_string());
    }
    if line.len() >= 4 && line.starts_with("==") && line.ends_with("==") {
        let title = line.trim_matches('=').trim();
        return (!title.is_empty()).then(|| title.to_string());
    }
    None
}

fn heading_at(headings: &[(usize, String)], position: usize) -> Option<String> {
    let idx = headings.partition_point(|(offset, _)| *offset <= position);
    idx.checked_sub(1).map(|i| headings[i].1.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_markdown_and_wiki_headings() {
        assert_eq!(parse_heading("## Tags"), Some("Tags".to_string()));
        assert_eq!(parse_heading("# INCAR #"), Some("INCAR".to_string()));
        assert_eq!(parse_heading("== Description =="), Some("Description".to_string()));
        assert_eq!(parse_heading("#hashtag"), None);
        assert_eq!(parse_heading("####### too deep"), None);
        assert_eq!(parse_heading("plain text"), None);
    }

    #[test]
    fn heading_is_carried_across_windows() {
        let body = "x".repeat(1500);
        let doc = Document::new("https://example.org/a", "A", format!("## Section One\n{body}"));
        let chunker = Chunker::new(ChunkingConfig::default()).unwrap();
        let chunks = chunker.chunk_document(&doc).unwrap();
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.heading.as_deref() == Some("Section One")));
    }

    #[test]
    fn offsets_respect_multibyte_characters() {
        let doc = Document::new("u", "t", "ä".repeat(250));
        let config = ChunkingConfig { max_chunk_length: 100, overlap_length: 10, min_chunk_length: 5 };
        let chunks = Chunker::new(config).unwrap().chunk_document(&doc).unwrap();
        for c in &chunks {
            assert_eq!(&doc.raw_text[c.start_offset..c.end_offset], c.text);
            assert!(c.text.chars().count() <= 100);
        }
    }

    #[test]
    fn rejects_overlap_not_smaller_than_max() {
        let config = ChunkingConfig { max_chunk_length: 100, overlap_length: 100, min_chunk_length: 1 };
        assert!(matches!(Chunker::new(config), Err(ChunkingError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_min_longer_than_max() {
        let config = ChunkingConfig { max_chunk_length: 100, overlap_length: 10, min_chunk_length: 101 };
        assert!(matches!(Chunker::new(config), Err(ChunkingError::InvalidConfig(_))));
        let config = ChunkingConfig { max_chunk_length: 100, overlap_length: 10, min_chunk_length: 100 };
        assert!(Chunker::new(config).is_ok());
    }
}
