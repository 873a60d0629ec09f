use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context};
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::xlm_roberta::{Config as XLMRobertaConfig, XLMRobertaModel};
use tokenizers::Tokenizer;
use tracing::{debug, info};

use docrag_core::config::EmbeddingSettings;
use docrag_core::{Embedder, Error, Result};

use crate::device::select_device;
use crate::pool::masked_mean_l2;
use crate::tokenize::tokenize_batch;

/// BGE-M3 dense embeddings from local XLM-RoBERTa weights.
///
/// The model directory must hold `tokenizer.json`, `config.json` and either
/// `model.safetensors` or `pytorch_model.bin`.
pub struct BgeM3Embedder {
    model: XLMRobertaModel,
    tokenizer: Tokenizer,
    device: Device,
    dim: usize,
    max_len: usize,
    id: String,
}

impl BgeM3Embedder {
    pub fn load(model_dir: &Path, settings: &EmbeddingSettings) -> Result<Self> {
        Self::load_inner(model_dir, settings).map_err(|e| Error::Embedding(format!("{e:#}")))
    }

    fn load_inner(model_dir: &Path, settings: &EmbeddingSettings) -> anyhow::Result<Self> {
        let device = select_device();
        let started = Instant::now();
        info!(model_dir = %model_dir.display(), "loading BGE-M3");

        let tokenizer_path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow!("failed to load tokenizer from {}: {e}", tokenizer_path.display()))?;

        let config_path = model_dir.join("config.json");
        let config: XLMRobertaConfig = serde_json::from_str(
            &std::fs::read_to_string(&config_path).with_context(|| format!("reading {}", config_path.display()))?,
        )?;

        let weights = load_weights(model_dir, &device)?;
        let vb = VarBuilder::from_tensors(weights, DType::F32, &device);
        let model = XLMRobertaModel::new(&config, vb)?;

        info!(elapsed_ms = started.elapsed().as_millis() as u64, "BGE-M3 loaded");
        Ok(Self {
            model,
            tokenizer,
            device,
            dim: settings.dimension,
            max_len: settings.max_len,
            id: format!("bge-m3-{}", settings.dimension),
        })
    }

    fn forward(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        let (input_ids, attention_mask) = tokenize_batch(&self.tokenizer, texts, self.max_len, &self.device)?;
        let token_type_ids = input_ids.zeros_like()?;
        let hidden = self.model.forward(&input_ids, &attention_mask, &token_type_ids, None, None, None)?;
        let pooled = masked_mean_l2(&hidden, &attention_mask)?;
        Ok(pooled.to_device(&Device::Cpu)?.to_dtype(DType::F32)?.to_vec2::<f32>()?)
    }
}

impl Embedder for BgeM3Embedder {
    fn embedder_id(&self) -> &str { &self.id }
    fn dim(&self) -> usize { self.dim }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() { return Ok(Vec::new()); }
        let started = Instant::now();
        let vectors = self.forward(texts).map_err(|e| Error::Embedding(format!("{e:#}")))?;
        if let Some(v) = vectors.iter().find(|v| v.len() != self.dim) {
            return Err(Error::DimensionMismatch { expected: self.dim, actual: v.len() });
        }
        debug!(batch = texts.len(), elapsed_ms = started.elapsed().as_millis() as u64, "embedded batch");
        Ok(vectors)
    }
}

fn load_weights(model_dir: &Path, device: &Device) -> anyhow::Result<HashMap<String, Tensor>> {
    let safetensors = model_dir.join("model.safetensors");
    if safetensors.exists() {
        return Ok(candle_core::safetensors::load(&safetensors, device)?);
    }
    let pickle = model_dir.join("pytorch_model.bin");
    let weights = candle_core::pickle::read_all(&pickle).with_context(|| format!("reading {}", pickle.display()))?;
    Ok(weights.into_iter().collect())
}

/// First existing directory among the configured one, `APP_MODEL_DIR`,
/// `MODEL_DIR` and `models/bge-m3`.
pub fn resolve_model_dir(configured: Option<PathBuf>) -> Result<PathBuf> {
    let candidates = configured
        .into_iter()
        .chain(std::env::var("APP_MODEL_DIR").ok().map(PathBuf::from))
        .chain(std::env::var("MODEL_DIR").ok().map(PathBuf::from))
        .chain(std::iter::once(PathBuf::from("models/bge-m3")));
    for dir in candidates {
        if dir.is_dir() {
            return Ok(dir);
        }
    }
    Err(Error::NotFound("BGE-M3 model directory (set embedding.model_dir or APP_MODEL_DIR)".to_string()))
}
