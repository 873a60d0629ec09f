#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use docrag_core::{Chunk, Document, Embedder, Error, GenerationError, Generator, Metric, Result, Settings};
use docrag_pipeline::IndexService;
use docrag_vector::FlatIndex;

/// Returns the same vector for every text; fails the first `fail_first` calls.
pub struct FixedEmbedder {
    pub vector: Vec<f32>,
    pub fail_first: usize,
    pub calls: AtomicUsize,
}

impl FixedEmbedder {
    pub fn new(vector: Vec<f32>) -> Self { Self { vector, fail_first: 0, calls: AtomicUsize::new(0) } }
    pub fn failing(vector: Vec<f32>, fail_first: usize) -> Self { Self { vector, fail_first, calls: AtomicUsize::new(0) } }
    pub fn calls(&self) -> usize { self.calls.load(Ordering::SeqCst) }
}

impl Embedder for FixedEmbedder {
    fn embedder_id(&self) -> &str { "fixed" }
    fn dim(&self) -> usize { self.vector.len() }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.fail_first {
            return Err(Error::Embedding("model not warmed up".to_string()));
        }
        Ok(texts.iter().map(|_| self.vector.clone()).collect())
    }
}

/// Replies with a fixed text and records every prompt it was given.
pub struct ScriptedGenerator {
    pub reply: std::result::Result<String, GenerationError>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedGenerator {
    pub fn replying(text: &str) -> Self { Self { reply: Ok(text.to_string()), prompts: Mutex::new(Vec::new()) } }
    pub fn failing(err: GenerationError) -> Self { Self { reply: Err(err), prompts: Mutex::new(Vec::new()) } }
    pub fn prompts(&self) -> Vec<String> { self.prompts.lock().clone() }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn name(&self) -> &str { "scripted" }
    async fn generate(&self, prompt: &str, _timeout: Duration) -> std::result::Result<String, GenerationError> {
        self.prompts.lock().push(prompt.to_string());
        self.reply.clone()
    }
}

/// Never answers within any reasonable timeout.
pub struct SlowGenerator;

#[async_trait]
impl Generator for SlowGenerator {
    fn name(&self) -> &str { "slow" }
    async fn generate(&self, _prompt: &str, _timeout: Duration) -> std::result::Result<String, GenerationError> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok("too late".to_string())
    }
}

/// Unit vector in 3-d whose cosine with `[1, 0, 0]` is `s`.
pub fn at_similarity(s: f32) -> Vec<f32> {
    vec![s, (1.0 - s * s).max(0.0).sqrt(), 0.0]
}

/// One document per similarity, one chunk each, indexed with the cosine metric.
pub fn index_with_similarities(sims: &[f32]) -> (FlatIndex, Vec<Chunk>) {
    let docs: Vec<Document> = sims
        .iter()
        .enumerate()
        .map(|(i, _)| Document::new(format!("https://www.vasp.at/wiki/Page_{i}"), format!("Page {i}"), format!("body {i}")))
        .collect();
    let chunks: Vec<Chunk> = docs
        .iter()
        .zip(sims)
        .map(|(d, s)| Chunk::new(&d.id, Some("Tags".to_string()), format!("passage scored {s}"), 0, 20).with_embedding(at_similarity(*s)))
        .collect();
    let index = FlatIndex::build(3, Metric::Cosine, "fixed", docs.iter().map(Document::meta), chunks.clone()).unwrap_or_else(|e| panic!("{e}"));
    (index, chunks)
}

pub fn test_settings(index_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.data.index_dir = index_dir.to_string_lossy().into_owned();
    settings
}

pub fn service_with(index: FlatIndex, settings: &Settings) -> Arc<IndexService> {
    let service = Arc::new(IndexService::new(settings));
    service.install(Arc::new(index));
    service
}
