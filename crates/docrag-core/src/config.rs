//! Layered settings loader and path helpers.
//!
//! Uses Figment to merge compiled defaults + `config.toml` + `config.<env>.toml`
//! + `APP_*` env vars, then validates the result. Relative paths are resolved
//! against the directory the settings were loaded from.

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};

use crate::chunker::ChunkingConfig;
use crate::error::{Error, Result};
use crate::types::Metric;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Settings {
    pub data: DataSettings,
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalSettings,
    pub embedding: EmbeddingSettings,
    pub generation: GenerationSettings,
    pub pipeline: PipelineSettings,
    pub logging: LoggingSettings,
    /// Directory relative paths are resolved against; not part of the file format.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DataSettings {
    pub corpus_dir: String,
    pub index_dir: String,
}

impl Default for DataSettings {
    fn default() -> Self {
        Self { corpus_dir: "data/processed".to_string(), index_dir: "data/index".to_string() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalSettings {
    pub metric: Metric,
    pub top_k: usize,
    pub max_top_k: usize,
    pub min_similarity: f32,
    pub max_chunks_per_document: usize,
    pub candidate_multiplier: usize,
    pub snippet_chars: usize,
}

impl Default for RetrievalSettings {
    fn default() -> Self {
        Self { metric: Metric::Cosine, top_k: 5, max_top_k: 20, min_similarity: 0.25, max_chunks_per_document: 3, candidate_multiplier: 4, snippet_chars: 200 }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EmbedderBackend {
    /// Deterministic feature hashing; no model files needed.
    Hash,
    /// Local BGE-M3 (XLM-RoBERTa) weights loaded with candle.
    BgeM3,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingSettings {
    pub backend: EmbedderBackend,
    pub dimension: usize,
    pub model_dir: Option<String>,
    pub max_len: usize,
    pub batch_size: usize,
    /// Extra attempts for a failed query embedding. Zero disables retrying.
    pub retries: usize,
}

impl Default for EmbeddingSettings {
    fn default() -> Self {
        Self { backend: EmbedderBackend::BgeM3, dimension: 1024, model_dir: None, max_len: 256, batch_size: 32, retries: 0 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationSettings {
    pub api_key: Option<String>,
    pub base_url: String,
    pub model: String,
    pub timeout_secs: u64,
    pub temperature: f32,
    pub top_p: f32,
    pub top_k: u32,
    pub max_output_tokens: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://generativelanguage.googleapis.com".to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout_secs: 60,
            temperature: 0.3,
            top_p: 0.95,
            top_k: 40,
            max_output_tokens: 2048,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// What the corpus documents; named in the prompt instructions.
    pub subject: String,
    /// Answer with a fixed "nothing found" message instead of calling the
    /// generator when retrieval comes back empty.
    pub skip_generation_without_context: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { subject: "VASP (Vienna Ab initio Simulation Package)".to_string(), skip_generation_without_context: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { level: "info".to_string() }
    }
}

impl Settings {
    /// Load from the current directory using `RUST_ENV` (default `dev`).
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new("."), None)
    }

    /// Merge defaults, `config.toml`, `config.<env>.toml` and `APP_*` env vars.
    ///
    /// Nested keys use `__` in env vars, e.g. `APP_RETRIEVAL__TOP_K=8`.
    pub fn load_from(base_dir: &Path, env_name: Option<&str>) -> Result<Self> {
        let env_name = env_name.map(str::to_string).unwrap_or_else(|| env::var("RUST_ENV").unwrap_or_else(|_| "dev".to_string()));

        let mut figment = Figment::from(Serialized::defaults(Settings::default())).merge(Toml::file(base_dir.join("config.toml")));
        match env_name.as_str() {
            "dev" | "development" => figment = figment.merge(Toml::file(base_dir.join("config.dev.toml"))),
            "prod" | "production" => figment = figment.merge(Toml::file(base_dir.join("config.prod.toml"))),
            "test" | "testing" => figment = figment.merge(Toml::file(base_dir.join("config.test.toml"))),
            _ => {}
        }
        figment = figment.merge(Env::prefixed("APP_").split("__"));

        let mut settings: Settings = figment.extract().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        settings.base_dir = base_dir.to_path_buf();
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        self.chunking.validate().map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let r = &self.retrieval;
        if r.top_k == 0 || r.max_top_k == 0 {
            return Err(Error::InvalidConfig("retrieval.top_k and retrieval.max_top_k must be positive".to_string()));
        }
        if r.top_k > r.max_top_k {
            return Err(Error::InvalidConfig(format!("retrieval.top_k ({}) exceeds retrieval.max_top_k ({})", r.top_k, r.max_top_k)));
        }
        if !(0.0..=1.0).contains(&r.min_similarity) {
            return Err(Error::InvalidConfig(format!("retrieval.min_similarity must be within [0, 1], got {}", r.min_similarity)));
        }
        if r.max_chunks_per_document == 0 || r.candidate_multiplier == 0 {
            return Err(Error::InvalidConfig("retrieval.max_chunks_per_document and retrieval.candidate_multiplier must be positive".to_string()));
        }
        if self.embedding.dimension == 0 || self.embedding.batch_size == 0 {
            return Err(Error::InvalidConfig("embedding.dimension and embedding.batch_size must be positive".to_string()));
        }
        if self.generation.timeout_secs == 0 {
            return Err(Error::InvalidConfig("generation.timeout_secs must be positive".to_string()));
        }
        Ok(())
    }

    pub fn corpus_dir(&self) -> PathBuf {
        resolve_with_base(&self.base_dir, &self.data.corpus_dir)
    }

    pub fn index_dir(&self) -> PathBuf {
        resolve_with_base(&self.base_dir, &self.data.index_dir)
    }

    pub fn model_dir(&self) -> Option<PathBuf> {
        self.embedding.model_dir.as_ref().map(|dir| resolve_with_base(&self.base_dir, dir))
    }
}

/// Expand a user-provided path string:
/// - Expands leading '~' to the user's home directory
/// - Expands ${VAR} and $VAR environment variables
/// - Returns a PathBuf without attempting to canonicalize
pub fn expand_path<S: AsRef<str>>(input: S) -> PathBuf {
    let s = input.as_ref();
    let expanded_env = shellexpand::env(s).unwrap_or(std::borrow::Cow::Borrowed(s));
    let expanded = shellexpand::tilde(&expanded_env);
    PathBuf::from(expanded.as_ref())
}

/// Resolve a possibly relative path against a given base directory after expansion.
/// If `p` is absolute, it's returned as-is; otherwise `base.join(p)` is returned.
pub fn resolve_with_base<S: AsRef<str>>(base: &Path, p: S) -> PathBuf {
    let p = expand_path(p);
    if p.is_absolute() { p } else { base.join(p) }
}
