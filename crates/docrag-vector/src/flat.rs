use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use chrono::{DateTime, Utc};

use docrag_core::{Chunk, DocumentMeta, Error, Metric, Result, SearchHit, VectorIndex};

use crate::metric::similarity;
use crate::snapshot;

/// Exact brute-force index: every search scores every chunk.
///
/// Mutated only through `add` / `add_document` while it is being built; once
/// wrapped in an `Arc` it is read-only.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    metric: Metric,
    dimension: usize,
    embedder_id: String,
    created_at: DateTime<Utc>,
    documents: BTreeMap<String, DocumentMeta>,
    chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
}

impl FlatIndex {
    pub fn new(dimension: usize, metric: Metric, embedder_id: impl Into<String>) -> Self {
        Self {
            metric,
            dimension,
            embedder_id: embedder_id.into(),
            created_at: Utc::now(),
            documents: BTreeMap::new(),
            chunks: Vec::new(),
            positions: HashMap::new(),
        }
    }

    /// Build an index from embedded chunks and the documents they belong to.
    pub fn build(
        dimension: usize,
        metric: Metric,
        embedder_id: impl Into<String>,
        documents: impl IntoIterator<Item = DocumentMeta>,
        chunks: impl IntoIterator<Item = Chunk>,
    ) -> Result<Self> {
        let mut index = Self::new(dimension, metric, embedder_id);
        for doc in documents {
            index.add_document(doc);
        }
        for chunk in chunks {
            index.add(chunk)?;
        }
        Ok(index)
    }

    pub fn add_document(&mut self, meta: DocumentMeta) {
        self.documents.insert(meta.id.clone(), meta);
    }

    /// Insert one embedded chunk. Its document must already be registered.
    pub fn add(&mut self, chunk: Chunk) -> Result<()> {
        if chunk.embedding.len() != self.dimension {
            return Err(Error::DimensionMismatch { expected: self.dimension, actual: chunk.embedding.len() });
        }
        if self.positions.contains_key(&chunk.id) {
            return Err(Error::DuplicateChunk(chunk.id));
        }
        if !self.documents.contains_key(&chunk.document_id) {
            return Err(Error::NotFound(format!("document {} for chunk {}", chunk.document_id, chunk.id)));
        }
        self.positions.insert(chunk.id.clone(), self.chunks.len());
        self.chunks.push(chunk);
        Ok(())
    }

    pub fn metric(&self) -> Metric { self.metric }
    pub fn embedder_id(&self) -> &str { &self.embedder_id }
    pub fn created_at(&self) -> DateTime<Utc> { self.created_at }
    pub fn chunks(&self) -> &[Chunk] { &self.chunks }
    pub fn documents(&self) -> impl Iterator<Item = &DocumentMeta> { self.documents.values() }

    pub(crate) fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Load `snapshot.json` from `dir`. Any inconsistency is `IndexCorruption`.
    pub fn load(dir: &Path, expected_dim: usize) -> Result<Self> {
        snapshot::read(dir, expected_dim)
    }
}

impl VectorIndex for FlatIndex {
    fn backend(&self) -> &'static str { "flat" }
    fn dimension(&self) -> usize { self.dimension }
    fn size(&self) -> usize { self.chunks.len() }
    fn num_documents(&self) -> usize { self.documents.len() }

    fn search(&self, query: &[f32], k: usize) -> Result<Vec<SearchHit>> {
        if query.len() != self.dimension {
            return Err(Error::DimensionMismatch { expected: self.dimension, actual: query.len() });
        }
        let mut hits: Vec<SearchHit> = self
            .chunks
            .iter()
            .map(|c| SearchHit { chunk_id: c.id.clone(), similarity: similarity(self.metric, query, &c.embedding) })
            .collect();
        hits.sort_by(rank);
        hits.truncate(k);
        Ok(hits)
    }

    fn chunk(&self, id: &str) -> Option<&Chunk> {
        self.positions.get(id).map(|&i| &self.chunks[i])
    }

    fn document(&self, id: &str) -> Option<&DocumentMeta> {
        self.documents.get(id)
    }

    fn persist(&self, dir: &Path) -> Result<()> {
        snapshot::write(self, dir)
    }
}

/// Similarity descending, then chunk id ascending.
pub fn rank(a: &SearchHit, b: &SearchHit) -> Ordering {
    b.similarity.total_cmp(&a.similarity).then_with(|| a.chunk_id.cmp(&b.chunk_id))
}
