//! Ownership of the live index.
//!
//! Readers clone the `Arc` out of a short read lock and search without further
//! locking. A rebuild runs under an async mutex, builds the new index off to
//! the side, persists it and only then swaps the pointer.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressStyle};
use parking_lot::RwLock;
use tracing::{info, warn};

use docrag_core::{Chunk, Chunker, CorpusLoader, Document, Embedder, Error, Metric, Result, Settings, VectorIndex};
use docrag_vector::{snapshot, FlatIndex};

/// How `IndexService::init` obtained its index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitOutcome {
    Loaded,
    Built,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildSummary {
    pub documents: usize,
    pub skipped_documents: usize,
    pub chunks: usize,
    pub elapsed: Duration,
}

pub struct IndexService {
    index_dir: PathBuf,
    metric: Metric,
    batch_size: usize,
    show_progress: bool,
    live: RwLock<Option<Arc<dyn VectorIndex>>>,
    rebuild_lock: tokio::sync::Mutex<()>,
}

impl IndexService {
    pub fn new(settings: &Settings) -> Self {
        Self {
            index_dir: settings.index_dir(),
            metric: settings.retrieval.metric,
            batch_size: settings.embedding.batch_size.max(1),
            show_progress: false,
            live: RwLock::new(None),
            rebuild_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Draw an indicatif progress bar while embedding.
    pub fn with_progress(mut self, show: bool) -> Self {
        self.show_progress = show;
        self
    }

    pub fn index_dir(&self) -> &Path { &self.index_dir }

    pub fn install(&self, index: Arc<dyn VectorIndex>) {
        *self.live.write() = Some(index);
    }

    pub fn current(&self) -> Result<Arc<dyn VectorIndex>> {
        self.live.read().clone().ok_or(Error::IndexNotBuilt)
    }

    pub fn is_ready(&self) -> bool { self.live.read().is_some() }

    /// Load the persisted snapshot if there is one, otherwise build and persist.
    pub async fn init(&self, corpus: Arc<dyn CorpusLoader>, chunker: &Chunker, embedder: Arc<dyn Embedder>) -> Result<InitOutcome> {
        if let Some(index) = self.load_snapshot(embedder.dim()).await? {
            if index.embedder_id() != embedder.embedder_id() {
                warn!(snapshot = index.embedder_id(), current = embedder.embedder_id(), "snapshot was built by a different embedder");
            }
            self.install(Arc::new(index));
            return Ok(InitOutcome::Loaded);
        }
        self.rebuild(corpus, chunker, embedder).await?;
        Ok(InitOutcome::Built)
    }

    /// Install the persisted snapshot, if any. Returns whether one was loaded.
    pub async fn load_existing(&self, expected_dim: usize) -> Result<bool> {
        match self.load_snapshot(expected_dim).await? {
            Some(index) => {
                self.install(Arc::new(index));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load_snapshot(&self, expected_dim: usize) -> Result<Option<FlatIndex>> {
        if !snapshot::exists(&self.index_dir) {
            return Ok(None);
        }
        let _guard = self.rebuild_lock.lock().await;
        let dir = self.index_dir.clone();
        let index = tokio::task::spawn_blocking(move || FlatIndex::load(&dir, expected_dim))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        Ok(Some(index))
    }

    /// Build a fresh index from `corpus`, persist it and make it live.
    ///
    /// On failure the previously installed index stays live.
    pub async fn rebuild(&self, corpus: Arc<dyn CorpusLoader>, chunker: &Chunker, embedder: Arc<dyn Embedder>) -> Result<BuildSummary> {
        let _guard = self.rebuild_lock.lock().await;
        let started = Instant::now();
        info!(dir = %self.index_dir.display(), "rebuilding index");

        let plan = BuildPlan {
            chunker: chunker.clone(),
            embedder,
            metric: self.metric,
            batch_size: self.batch_size,
            show_progress: self.show_progress,
            index_dir: self.index_dir.clone(),
        };
        let (index, mut summary) = tokio::task::spawn_blocking(move || corpus.load_corpus().and_then(|documents| plan.run(documents)))
            .await
            .map_err(|e| Error::Io(std::io::Error::other(e)))??;
        summary.elapsed = started.elapsed();

        self.install(Arc::new(index));
        info!(documents = summary.documents, chunks = summary.chunks, skipped = summary.skipped_documents, elapsed_ms = summary.elapsed.as_millis() as u64, "index is live");
        Ok(summary)
    }
}

struct BuildPlan {
    chunker: Chunker,
    embedder: Arc<dyn Embedder>,
    metric: Metric,
    batch_size: usize,
    show_progress: bool,
    index_dir: PathBuf,
}

impl BuildPlan {
    fn run(self, documents: Vec<Document>) -> Result<(FlatIndex, BuildSummary)> {
        info!(documents = documents.len(), "loaded corpus");
        let mut seen = HashSet::new();
        let documents: Vec<Document> = documents.into_iter().filter(|d| seen.insert(d.id.clone())).collect();

        let chunks = self.chunker.chunk_corpus(&documents);
        let with_chunks: HashSet<&str> = chunks.iter().map(|c| c.document_id.as_str()).collect();
        let metas: Vec<_> = documents.iter().filter(|d| with_chunks.contains(d.id.as_str())).map(Document::meta).collect();
        let skipped_documents = documents.len() - metas.len();

        let embedded = self.embed_all(chunks)?;
        let index = FlatIndex::build(self.embedder.dim(), self.metric, self.embedder.embedder_id(), metas, embedded)?;
        index.persist(&self.index_dir)?;

        let summary = BuildSummary { documents: index.num_documents(), skipped_documents, chunks: index.size(), elapsed: Duration::ZERO };
        Ok((index, summary))
    }

    fn embed_all(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let pb = self.progress_bar(chunks.len() as u64);
        let mut embedded = Vec::with_capacity(chunks.len());
        let mut remaining = chunks.into_iter();
        loop {
            let batch: Vec<Chunk> = remaining.by_ref().take(self.batch_size).collect();
            if batch.is_empty() { break; }
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts)?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!("embedder returned {} vectors for {} texts", vectors.len(), batch.len())));
            }
            pb.inc(batch.len() as u64);
            embedded.extend(batch.into_iter().zip(vectors).map(|(c, v)| c.with_embedding(v)));
        }
        pb.finish_with_message("embedded");
        Ok(embedded)
    }

    fn progress_bar(&self, len: u64) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} chunks ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        pb.set_style(style);
        pb
    }
}
