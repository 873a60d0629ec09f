use std::collections::HashMap;

use tracing::{debug, warn};

use docrag_core::config::RetrievalSettings;
use docrag_core::types::snippet;
use docrag_core::{Result, RetrievalResult, SearchHit, VectorIndex};
use docrag_vector::rank;

/// Turns raw nearest-neighbour hits into an ordered, thresholded, diversified result list.
#[derive(Debug, Clone)]
pub struct Retriever {
    settings: RetrievalSettings,
}

impl Retriever {
    pub fn new(settings: RetrievalSettings) -> Self { Self { settings } }

    /// `requested` (or the configured default) clamped to `[1, max_top_k]`.
    pub fn effective_top_k(&self, requested: Option<usize>) -> usize {
        requested.unwrap_or(self.settings.top_k).clamp(1, self.settings.max_top_k.max(1))
    }

    /// Search `index` and keep at most `top_k` results.
    ///
    /// Starts from `top_k * candidate_multiplier` candidates and doubles the window
    /// while the per-document cap leaves slots open, until the index is exhausted
    /// or the window reaches hits below `min_similarity`.
    pub fn retrieve(&self, index: &dyn VectorIndex, query_embedding: &[f32], top_k: Option<usize>) -> Result<Vec<RetrievalResult>> {
        let k = self.effective_top_k(top_k);
        let total = index.size();
        let mut fetch = k.saturating_mul(self.settings.candidate_multiplier.max(1));
        loop {
            let mut hits = index.search(query_embedding, fetch)?;
            let candidates = hits.len();
            let exhausted = candidates < fetch || fetch >= total;
            let reached_threshold = hits.iter().any(|h| h.similarity < self.settings.min_similarity);
            hits.retain(|h| h.similarity >= self.settings.min_similarity);
            hits.sort_by(rank);

            let results = self.select(index, &hits, k);
            if results.len() == k || exhausted || reached_threshold {
                debug!(top_k = k, candidates, above_threshold = hits.len(), returned = results.len(), "retrieved");
                return Ok(results);
            }
            debug!(fetch, returned = results.len(), "per-document cap left open slots, widening search");
            fetch = fetch.saturating_mul(2).min(total);
        }
    }

    /// Walk ranked hits, enforcing the per-document cap, until `k` are taken.
    fn select(&self, index: &dyn VectorIndex, hits: &[SearchHit], k: usize) -> Vec<RetrievalResult> {
        let mut per_document: HashMap<&str, usize> = HashMap::new();
        let mut results = Vec::with_capacity(k);
        for hit in hits {
            if results.len() == k { break; }
            let Some(chunk) = index.chunk(&hit.chunk_id) else {
                warn!(chunk_id = %hit.chunk_id, "search returned an unknown chunk");
                continue;
            };
            let taken = per_document.entry(chunk.document_id.as_str()).or_insert(0);
            if *taken >= self.settings.max_chunks_per_document { continue; }
            *taken += 1;

            let (title, url) = index
                .document(&chunk.document_id)
                .map(|d| (d.title.clone(), d.url.clone()))
                .unwrap_or_default();
            results.push(RetrievalResult {
                chunk_id: chunk.id.clone(),
                document_id: chunk.document_id.clone(),
                similarity: hit.similarity,
                snippet: snippet(&chunk.text, self.settings.snippet_chars),
                text: chunk.text.clone(),
                heading: chunk.heading.clone(),
                title,
                url,
            });
        }
        results
    }
}
