use std::hash::Hasher;

use docrag_core::{Embedder, Result};
use twox_hash::XxHash64;

/// Deterministic bag-of-words embedder using feature hashing.
///
/// Needs no model files, so it backs tests and `APP_USE_FAKE_EMBEDDINGS=1`
/// runs. Texts sharing words get positive cosine similarity.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dim: usize,
    id: String,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        let dim = dim.max(1);
        Self { dim, id: format!("hash-xxh64-{dim}") }
    }

    pub fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut v = vec![0f32; self.dim];
        for token in tokens(text) {
            let mut hasher = XxHash64::with_seed(0);
            hasher.write(token.as_bytes());
            let h = hasher.finish();
            v[(h % self.dim as u64) as usize] += 1.0;
        }
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for x in &mut v { *x /= norm; }
        }
        v
    }
}

impl Embedder for HashEmbedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }
    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()).map(str::to_lowercase)
}
