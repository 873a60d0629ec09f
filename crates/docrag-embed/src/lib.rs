pub mod bge;
pub mod device;
pub mod hash;
pub mod pool;
pub mod tokenize;

use std::sync::Arc;

use tracing::info;

use docrag_core::config::{EmbedderBackend, Settings};
use docrag_core::{Embedder, Result};

pub use bge::{resolve_model_dir, BgeM3Embedder};
pub use device::select_device;
pub use hash::HashEmbedder;
pub use pool::masked_mean_l2;

/// True when `APP_USE_FAKE_EMBEDDINGS` is `1` or `true`.
pub fn fake_embeddings_requested() -> bool {
    std::env::var("APP_USE_FAKE_EMBEDDINGS")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
}

/// Build the configured embedder. `APP_USE_FAKE_EMBEDDINGS` forces the hash backend.
pub fn embedder_from_settings(settings: &Settings) -> Result<Arc<dyn Embedder>> {
    let dim = settings.embedding.dimension;
    if fake_embeddings_requested() || settings.embedding.backend == EmbedderBackend::Hash {
        info!(dim, "using hash embedder");
        return Ok(Arc::new(HashEmbedder::new(dim)));
    }
    let model_dir = resolve_model_dir(settings.model_dir())?;
    Ok(Arc::new(BgeM3Embedder::load(&model_dir, &settings.embedding)?))
}
