use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::{GenerationError, Result};
use crate::types::{Chunk, Document, DocumentMeta, SearchHit};

/// Maps text to fixed-dimension, L2-normalised vectors.
pub trait Embedder: Send + Sync {
    /// Identifies model and dimension; stored in snapshots.
    fn embedder_id(&self) -> &str;
    fn dim(&self) -> usize;
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text.to_string()])?
            .pop()
            .ok_or_else(|| crate::error::Error::Embedding("embedder returned no vector".to_string()))
    }
}

/// Read-only nearest-neighbour search over embedded chunks.
///
/// Implementations are immutable once shared: `search` takes `&self` and may be
/// called from many threads at once. Similarities are reported in `[0, 1]` and
/// hits are ordered by similarity descending, then chunk id ascending.
pub trait VectorIndex: Send + Sync {
    fn backend(&self) -> &'static str;
    fn dimension(&self) -> usize;
    fn size(&self) -> usize;
    fn num_documents(&self) -> usize;
    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>>;
    fn chunk(&self, id: &str) -> Option<&Chunk>;
    fn document(&self, id: &str) -> Option<&DocumentMeta>;
    /// Write a versioned snapshot into `dir`.
    fn persist(&self, dir: &Path) -> Result<()>;
}

/// Text generation service: prompt in, text out, bounded by `timeout`.
#[async_trait]
pub trait Generator: Send + Sync {
    fn name(&self) -> &str;
    async fn generate(&self, prompt: &str, timeout: Duration) -> std::result::Result<String, GenerationError>;
}

/// Source of cleaned documents.
pub trait CorpusLoader: Send + Sync {
    fn load_corpus(&self) -> Result<Vec<Document>>;
}
