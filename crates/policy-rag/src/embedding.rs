//! Embedding providers.
//!
//! Implements the core [`Embedder`] trait for:
//! - **[`OpenAiEmbedder`]**: `POST {base_url}/embeddings` with batching, retry, and backoff.
//! - **[`OllamaEmbedder`]**: `POST {base_url}/api/embed` on a local Ollama instance.
//! - **`LocalEmbedder`**: in-process inference via fastembed (`local-embeddings` feature).
//!
//! Use [`create_embedder`] to pick one from configuration. All failures are
//! reported as [`RagError::EmbeddingFailure`].

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use policy_rag_core::embedding::Embedder;
use policy_rag_core::RagError;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::EmbeddingConfig;
use crate::http::{build_client, openai_api_key, post_json_with_retry};

type CoreResult<T> = policy_rag_core::Result<T>;

/// Build the embedder selected by `embedding.provider`.
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config))),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => anyhow::bail!(
            "Local embedding provider requires building with --features local-embeddings"
        ),
        other => anyhow::bail!("Unknown embedding provider: {}", other),
    }
}

fn embedding_failure(message: impl std::fmt::Display) -> RagError {
    RagError::EmbeddingFailure(format!("{:#}", message))
}

// ============ OpenAI ============

pub struct OpenAiEmbedder {
    client: Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OpenAiEmbedder {
    /// The API key is read from `OPENAI_API_KEY` on each request, so building
    /// the embedder never fails for a missing key.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!(
                "{}/embeddings",
                config.base_url_or_default().trim_end_matches('/')
            ),
            model: config.model_or_default(),
            dims: config.dims_or_default(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }

    async fn embed_one_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let api_key = openai_api_key().map_err(embedding_failure)?;
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let response =
            post_json_with_retry(&self.client, &self.url, Some(&api_key), &body, self.max_retries)
                .await
                .map_err(embedding_failure)?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| embedding_failure(format!("invalid response body: {}", e)))?;
        let vectors = parse_openai_response(&json)?;
        if vectors.len() != texts.len() {
            return Err(embedding_failure(format!(
                "requested {} embeddings, received {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        self.embed_one_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| embedding_failure("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(model = %self.model, batch = batch.len(), "embedding batch");
            vectors.extend(self.embed_one_batch(batch).await?);
        }
        Ok(vectors)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index`.
pub fn parse_openai_response(json: &Value) -> CoreResult<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| embedding_failure("invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| embedding_failure("invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_f32_vec(embedding)));
    }

    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

fn to_f32_vec(values: &[Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: Client,
    url: String,
    model: String,
    dims: usize,
    batch_size: usize,
    max_retries: u32,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!(
                "{}/api/embed",
                config.base_url_or_default().trim_end_matches('/')
            ),
            model: config.model_or_default(),
            dims: config.dims_or_default(),
            batch_size: config.batch_size.max(1),
            max_retries: config.max_retries,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
        self.embed_batch(&[text.to_string()])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| embedding_failure("empty embedding response"))
    }

    async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let response =
                post_json_with_retry(&self.client, &self.url, None, &body, self.max_retries)
                    .await
                    .map_err(embedding_failure)?;
            let json: Value = response
                .json()
                .await
                .map_err(|e| embedding_failure(format!("invalid response body: {}", e)))?;
            vectors.extend(parse_ollama_response(&json)?);
        }
        Ok(vectors)
    }
}

pub fn parse_ollama_response(json: &Value) -> CoreResult<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| embedding_failure("invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|embedding| {
            embedding
                .as_array()
                .map(|values| to_f32_vec(values))
                .ok_or_else(|| embedding_failure("invalid Ollama response: embedding is not an array"))
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings")]
pub use local::LocalEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use policy_rag_core::embedding::Embedder;

    use super::{embedding_failure, CoreResult};
    use crate::config::EmbeddingConfig;

    /// Runs a fastembed model in-process. The model is loaded on first use and
    /// kept for the life of the embedder.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Self {
            Self {
                model_name: config.model_or_default(),
                dims: config.dims_or_default(),
                batch_size: config.batch_size.max(1),
                model: Arc::new(Mutex::new(None)),
            }
        }
    }

    fn fastembed_model(name: &str) -> CoreResult<fastembed::EmbeddingModel> {
        match name {
            "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
            "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
            "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
            "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
            other => Err(embedding_failure(format!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5",
                other
            ))),
        }
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }

        fn dims(&self) -> usize {
            self.dims
        }

        async fn embed(&self, text: &str) -> CoreResult<Vec<f32>> {
            self.embed_batch(&[text.to_string()])
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| embedding_failure("empty embedding response"))
        }

        async fn embed_batch(&self, texts: &[String]) -> CoreResult<Vec<Vec<f32>>> {
            let which = fastembed_model(&self.model_name)?;
            let slot = self.model.clone();
            let batch_size = self.batch_size;
            let texts = texts.to_vec();

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| embedding_failure("local model lock poisoned"))?;
                if guard.is_none() {
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(which).with_show_download_progress(false),
                    )
                    .map_err(|e| {
                        embedding_failure(format!("Failed to initialize local embedding model: {}", e))
                    })?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| embedding_failure("local model unavailable"))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| embedding_failure(format!("Local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| embedding_failure(format!("embedding task failed: {}", e)))?
        }
    }
}
