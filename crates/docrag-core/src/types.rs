//! Domain types shared by the chunker, the vector index and the pipeline.

use serde::{Deserialize, Serialize};

pub type ChunkId = String;
pub type DocumentId = String;

/// A cleaned source page as produced by the corpus loader.
///
/// `id` is derived from the source URL and content, so the same page always
/// hashes to the same identity. Documents are never mutated after loading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub url: String,
    pub title: String,
    pub raw_text: String,
}

impl Document {
    pub fn new(url: impl Into<String>, title: impl Into<String>, raw_text: impl Into<String>) -> Self {
        let url = url.into();
        let raw_text = raw_text.into();
        let id = document_id(&url, &raw_text);
        Self { id, url, title: title.into(), raw_text }
    }

    pub fn meta(&self) -> DocumentMeta {
        DocumentMeta { id: self.id.clone(), url: self.url.clone(), title: self.title.clone() }
    }
}

/// Document-level facts kept by an index after the raw text is gone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: DocumentId,
    pub url: String,
    pub title: String,
}

/// A passage of a document; the unit of indexing and retrieval.
///
/// Offsets are byte offsets into the parent's `raw_text` and always fall on
/// character boundaries. `embedding` is empty until the chunk is embedded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: DocumentId,
    pub heading: Option<String>,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl Chunk {
    pub fn new(document_id: &str, heading: Option<String>, text: String, start_offset: usize, end_offset: usize) -> Self {
        let id = chunk_id(document_id, start_offset, end_offset, &text);
        Self { id, document_id: document_id.to_string(), heading, text, start_offset, end_offset, embedding: Vec::new() }
    }

    pub fn with_embedding(mut self, embedding: Vec<f32>) -> Self {
        self.embedding = embedding;
        self
    }
}

/// Vector comparison used by an index. Every metric reports similarity in `[0, 1]`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    /// Cosine similarity; negative values are reported as 0.
    #[default]
    Cosine,
    /// Raw dot product clamped to `[0, 1]`; meant for normalised vectors.
    DotProduct,
    /// `1 / (1 + euclidean distance)`.
    L2,
}

/// A raw nearest-neighbour hit as returned by a `VectorIndex`.
///
/// `similarity` is always in `[0, 1]`, higher is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub similarity: f32,
}

/// A user question. `top_k` is clamped by the retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub top_k: Option<usize>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into(), top_k: None }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// A retrieved passage after thresholding and diversity limiting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalResult {
    pub chunk_id: ChunkId,
    pub document_id: DocumentId,
    pub similarity: f32,
    pub snippet: String,
    pub text: String,
    pub heading: Option<String>,
    pub title: String,
    pub url: String,
}

/// Source attribution attached to an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub marker: usize,
    pub chunk_id: ChunkId,
    pub title: String,
    pub url: String,
    pub heading: Option<String>,
    pub snippet: String,
    pub similarity: f32,
}

/// Final grounded answer. `sources[i]` is what marker `[i + 1]` in `text` refers to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Answer {
    pub text: String,
    pub sources: Vec<Citation>,
    pub num_sources: usize,
    pub retrieval_time: f64,
}

/// Stable identity of a document: BLAKE3 over url and content.
pub fn document_id(url: &str, raw_text: &str) -> DocumentId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(url.as_bytes());
    hasher.update(&[0]);
    hasher.update(raw_text.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Stable identity of a chunk: BLAKE3 over document id, boundaries and text, truncated to 128 bits.
pub fn chunk_id(document_id: &str, start: usize, end: usize, text: &str) -> ChunkId {
    let mut hasher = blake3::Hasher::new();
    hasher.update(document_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(start.to_string().as_bytes());
    hasher.update(&[0]);
    hasher.update(end.to_string().as_bytes());
    hasher.update(&[0]);
    hasher.update(text.as_bytes());
    let hex = hasher.finalize().to_hex();
    hex.as_str()[..32].to_string()
}

/// First `max_chars` characters of `text`, with `...` appended when cut.
pub fn snippet(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
