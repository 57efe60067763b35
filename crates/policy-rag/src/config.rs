//! TOML configuration.
//!
//! Every section is optional; an empty file yields the defaults below.
//!
//! ```toml
//! [chunking]
//! chunk_size = 500
//! chunk_overlap = 100
//!
//! [retrieval]
//! k = 5
//! context_budget = 12000
//! fetch_k = 20
//!
//! [retrieval.threshold]
//! cutoff = 0.4
//! fallback_cutoff = 0.3
//! min_results = 3
//!
//! [retrieval.keyword_boost]
//! weight = 0.2
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-ada-002"
//!
//! [generation]
//! model = "gpt-3.5-turbo"
//! temperature = 0.1
//!
//! [index]
//! backend = "memory"
//! snapshot_path = "./data/index.json"
//! ```

use anyhow::{bail, Context, Result};
use policy_rag_core::chunk::ChunkingConfig;
use policy_rag_core::index::DistanceMetric;
use policy_rag_core::retrieval::RetrievalStrategy;
use policy_rag_core::ServiceConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub generation: GenerationConfig,
    pub index: IndexConfig,
    pub ingest: IngestConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_k")]
    pub k: usize,
    #[serde(default = "default_context_budget")]
    pub context_budget: usize,
    #[serde(flatten)]
    pub strategy: RetrievalStrategy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            k: default_k(),
            context_budget: default_context_budget(),
            strategy: RetrievalStrategy::default(),
        }
    }
}

fn default_k() -> usize {
    5
}
fn default_context_budget() -> usize {
    12_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: None,
            dims: None,
            base_url: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_embedding_provider() -> String {
    "openai".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    5
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    /// Model name, falling back to the provider's default.
    pub fn model_or_default(&self) -> String {
        self.model.clone().unwrap_or_else(|| {
            match self.provider.as_str() {
                "ollama" => "nomic-embed-text",
                "local" => "all-minilm-l6-v2",
                _ => "text-embedding-ada-002",
            }
            .to_string()
        })
    }

    /// Vector dimensionality, falling back to the known size of the model.
    pub fn dims_or_default(&self) -> usize {
        self.dims.unwrap_or_else(|| match self.model_or_default().as_str() {
            "text-embedding-3-large" => 3072,
            "nomic-embed-text" | "bge-base-en-v1.5" => 768,
            "all-minilm-l6-v2" | "bge-small-en-v1.5" => 384,
            "bge-large-en-v1.5" => 1024,
            _ => 1536,
        })
    }

    pub fn base_url_or_default(&self) -> String {
        self.base_url.clone().unwrap_or_else(|| {
            match self.provider.as_str() {
                "ollama" => "http://localhost:11434",
                _ => "https://api.openai.com/v1",
            }
            .to_string()
        })
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    #[serde(default = "default_generation_provider")]
    pub provider: String,
    #[serde(default = "default_generation_model")]
    pub model: String,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,
    #[serde(default = "default_generation_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            model: default_generation_model(),
            temperature: default_temperature(),
            base_url: default_openai_base_url(),
            timeout_secs: default_generation_timeout_secs(),
        }
    }
}

fn default_generation_provider() -> String {
    "openai".to_string()
}
fn default_generation_model() -> String {
    "gpt-3.5-turbo".to_string()
}
fn default_temperature() -> f64 {
    0.1
}
fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_generation_timeout_secs() -> u64 {
    120
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: PathBuf,
    #[serde(default)]
    pub chroma: ChromaConfig,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            snapshot_path: default_snapshot_path(),
            chroma: ChromaConfig::default(),
        }
    }
}

fn default_backend() -> String {
    "memory".to_string()
}
fn default_snapshot_path() -> PathBuf {
    PathBuf::from("./data/index.json")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChromaConfig {
    #[serde(default = "default_chroma_url")]
    pub url: String,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_distance")]
    pub distance: DistanceMetric,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ChromaConfig {
    fn default() -> Self {
        Self {
            url: default_chroma_url(),
            collection: default_collection(),
            distance: default_distance(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_chroma_url() -> String {
    "http://localhost:8000".to_string()
}
fn default_collection() -> String {
    "policy_documents".to_string()
}
fn default_distance() -> DistanceMetric {
    DistanceMetric::L2
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_max_file_bytes")]
    pub max_file_bytes: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            include_globs: default_include_globs(),
            exclude_globs: Vec::new(),
            follow_symlinks: false,
            max_file_bytes: default_max_file_bytes(),
        }
    }
}

fn default_include_globs() -> Vec<String> {
    ["**/*.txt", "**/*.md", "**/*.pdf", "**/*.docx"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_bytes() -> u64 {
    10 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive; `RUST_LOG` takes precedence.
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}

impl Config {
    /// The core service settings carried by this config.
    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            chunking: self.chunking.clone(),
            retrieval: self.retrieval.strategy.clone(),
            k: self.retrieval.k,
            context_budget: self.retrieval.context_budget,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    config
        .service_config()
        .validate()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    match config.embedding.provider.as_str() {
        "openai" | "ollama" | "local" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be openai, ollama, or local.",
            other
        ),
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }
    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0");
    }

    if config.generation.provider != "openai" {
        bail!(
            "Unknown generation provider: '{}'. Must be openai.",
            config.generation.provider
        );
    }
    if !(0.0..=2.0).contains(&config.generation.temperature) {
        bail!("generation.temperature must be in [0.0, 2.0]");
    }

    match config.index.backend.as_str() {
        "memory" | "chroma" => {}
        other => bail!("Unknown index backend: '{}'. Must be memory or chroma.", other),
    }

    if config.ingest.include_globs.is_empty() {
        bail!("ingest.include_globs must not be empty");
    }

    Ok(())
}
