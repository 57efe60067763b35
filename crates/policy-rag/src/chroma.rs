//! Chroma-backed [`VectorIndex`] over the REST API.
//!
//! The collection is created on first use (`get_or_create`) with the
//! configured `hnsw:space`, and its id is cached for the life of the
//! process. Chroma reports distances; they are converted to similarities
//! with [`distance_to_similarity`] before leaving this module.
//!
//! Every HTTP or decoding failure maps to
//! [`RagError::IndexUnavailable`]; nothing here is retried.

use std::collections::BTreeSet;

use async_trait::async_trait;
use policy_rag_core::index::{
    distance_to_similarity, sort_by_position, DistanceMetric, IndexedChunk, ScoredChunk,
    VectorIndex,
};
use policy_rag_core::models::{Chunk, ChunkMetadata};
use policy_rag_core::{RagError, Result};
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::config::ChromaConfig;
use crate::http::build_client;

fn unavailable(message: impl Into<String>) -> RagError {
    RagError::IndexUnavailable(message.into())
}

pub struct ChromaIndex {
    client: Client,
    base_url: String,
    collection: String,
    metric: DistanceMetric,
    collection_id: OnceCell<String>,
}

impl ChromaIndex {
    pub fn new(config: &ChromaConfig) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base_url: config.url.trim_end_matches('/').to_string(),
            collection: config.collection.clone(),
            metric: config.distance,
            collection_id: OnceCell::new(),
        })
    }

    async fn collection_id(&self) -> Result<&str> {
        let id = self
            .collection_id
            .get_or_try_init(|| async {
                let body = json!({
                    "name": self.collection,
                    "metadata": { "hnsw:space": space_name(self.metric) },
                    "get_or_create": true,
                });
                let url = format!("{}/api/v1/collections", self.base_url);
                let json = self.send_json(self.client.post(&url).json(&body), &url).await?;
                let id = json
                    .get("id")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| unavailable("collection response missing id"))?;
                debug!(collection = %self.collection, id, "resolved chroma collection");
                Ok::<_, RagError>(id.to_string())
            })
            .await?;
        Ok(id.as_str())
    }

    async fn collection_url(&self, op: &str) -> Result<String> {
        let id = self.collection_id().await?;
        Ok(format!("{}/api/v1/collections/{}/{}", self.base_url, id, op))
    }

    async fn post(&self, op: &str, body: Value) -> Result<Value> {
        let url = self.collection_url(op).await?;
        self.send_json(self.client.post(&url).json(&body), &url).await
    }

    async fn send_json(&self, request: reqwest::RequestBuilder, url: &str) -> Result<Value> {
        let response = request
            .send()
            .await
            .map_err(|e| unavailable(format!("request to {} failed: {}", url, e)))?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(unavailable(format!("HTTP {} from {}: {}", status, url, text)));
        }
        response
            .json()
            .await
            .map_err(|e| unavailable(format!("invalid response from {}: {}", url, e)))
    }

    async fn ids_where(&self, filter: Value) -> Result<Vec<String>> {
        let json = self.post("get", json!({ "where": filter, "include": [] })).await?;
        string_array(json.get("ids"))
    }

    async fn delete_ids(&self, ids: &[String]) -> Result<()> {
        if !ids.is_empty() {
            self.post("delete", json!({ "ids": ids })).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for ChromaIndex {
    async fn add(&self, entries: &[IndexedChunk]) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        // One upsert call per batch; Chroma applies it as a unit.
        let body = upsert_body(entries)?;
        self.post("upsert", body).await?;
        Ok(())
    }

    async fn replace_document(&self, document_hash: &str, entries: &[IndexedChunk]) -> Result<()> {
        // Chunk ids are positional, so the upsert overwrites every surviving
        // position in place. Only positions past the new end are stale.
        self.add(entries).await?;
        let stale = self
            .ids_where(json!({
                "$and": [
                    { "document_hash": document_hash },
                    { "chunk_index": { "$gte": entries.len() } },
                ]
            }))
            .await?;
        debug!(hash = document_hash, stale = stale.len(), "replacing document chunks");
        self.delete_ids(&stale).await
    }

    async fn search_with_score(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let json = self
            .post(
                "query",
                json!({
                    "query_embeddings": [query],
                    "n_results": k,
                    "include": ["documents", "metadatas", "distances"],
                }),
            )
            .await?;
        parse_query_response(&json, self.metric)
    }

    async fn delete_by_document(&self, document_hash: &str) -> Result<bool> {
        let ids = self
            .ids_where(json!({ "document_hash": document_hash }))
            .await?;
        self.delete_ids(&ids).await?;
        Ok(!ids.is_empty())
    }

    async fn count(&self) -> Result<usize> {
        let url = self.collection_url("count").await?;
        let json = self.send_json(self.client.get(&url), &url).await?;
        json.as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| unavailable(format!("unexpected count response: {}", json)))
    }

    async fn list_unique_documents(&self) -> Result<Vec<String>> {
        let json = self.post("get", json!({ "include": ["metadatas"] })).await?;
        parse_file_names(&json)
    }

    async fn chunks_for_file(&self, file_name: &str) -> Result<Vec<Chunk>> {
        let json = self
            .post(
                "get",
                json!({
                    "where": { "filename": file_name },
                    "include": ["documents", "metadatas"],
                }),
            )
            .await?;
        let mut chunks = parse_get_response(&json)?;
        sort_by_position(&mut chunks);
        Ok(chunks)
    }

    async fn clear(&self) -> Result<usize> {
        let json = self.post("get", json!({ "include": [] })).await?;
        let ids = string_array(json.get("ids"))?;
        self.delete_ids(&ids).await?;
        Ok(ids.len())
    }
}

fn space_name(metric: DistanceMetric) -> &'static str {
    match metric {
        DistanceMetric::L2 => "l2",
        DistanceMetric::Cosine => "cosine",
        DistanceMetric::Ip => "ip",
    }
}

fn upsert_body(entries: &[IndexedChunk]) -> Result<Value> {
    let mut ids = Vec::with_capacity(entries.len());
    let mut embeddings = Vec::with_capacity(entries.len());
    let mut documents = Vec::with_capacity(entries.len());
    let mut metadatas = Vec::with_capacity(entries.len());

    for entry in entries {
        ids.push(entry.chunk.id.clone());
        embeddings.push(&entry.embedding);
        documents.push(entry.chunk.text.clone());
        metadatas.push(
            serde_json::to_value(entry.chunk.metadata())
                .map_err(|e| unavailable(format!("metadata encode: {}", e)))?,
        );
    }

    Ok(json!({
        "ids": ids,
        "embeddings": embeddings,
        "documents": documents,
        "metadatas": metadatas,
    }))
}

fn string_array(value: Option<&Value>) -> Result<Vec<String>> {
    let items = value
        .and_then(|v| v.as_array())
        .ok_or_else(|| unavailable("expected an array in chroma response"))?;
    Ok(items
        .iter()
        .filter_map(|v| v.as_str().map(str::to_string))
        .collect())
}

/// Decode a `/query` response for a single query embedding. Chroma nests
/// every field one level per query, so only index `0` is read.
pub fn parse_query_response(json: &Value, metric: DistanceMetric) -> Result<Vec<ScoredChunk>> {
    let first = |field: &str| -> Vec<Value> {
        json.get(field)
            .and_then(|v| v.get(0))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };

    let ids = first("ids");
    let documents = first("documents");
    let metadatas = first("metadatas");
    let distances = first("distances");

    if documents.len() != ids.len() || metadatas.len() != ids.len() || distances.len() != ids.len()
    {
        return Err(unavailable("chroma query response has mismatched lengths"));
    }

    let mut results = Vec::with_capacity(ids.len());
    for (((id, document), metadata), distance) in
        ids.iter().zip(&documents).zip(metadatas).zip(&distances)
    {
        let id = id.as_str().unwrap_or_default();
        let text = document.as_str().unwrap_or_default();
        let meta: ChunkMetadata = serde_json::from_value(metadata)
            .map_err(|e| unavailable(format!("chunk {} has bad metadata: {}", id, e)))?;
        let distance = distance
            .as_f64()
            .ok_or_else(|| unavailable(format!("chunk {} has no distance", id)))?;
        results.push(ScoredChunk {
            chunk: Chunk::from_metadata(id, text, meta),
            score: distance_to_similarity(distance, metric),
        });
    }

    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    Ok(results)
}

/// Decode the chunks of a `/get` response fetched with documents and
/// metadatas included.
pub fn parse_get_response(json: &Value) -> Result<Vec<Chunk>> {
    let ids = string_array(json.get("ids"))?;
    let field = |name: &str| -> Vec<Value> {
        json.get(name)
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default()
    };
    let documents = field("documents");
    let metadatas = field("metadatas");
    if documents.len() != ids.len() || metadatas.len() != ids.len() {
        return Err(unavailable("chroma get response has mismatched lengths"));
    }

    ids.into_iter()
        .zip(documents)
        .zip(metadatas)
        .map(|((id, document), metadata)| {
            let meta: ChunkMetadata = serde_json::from_value(metadata)
                .map_err(|e| unavailable(format!("chunk {} has bad metadata: {}", id, e)))?;
            let text = document.as_str().unwrap_or_default().to_string();
            Ok(Chunk::from_metadata(id, text, meta))
        })
        .collect()
}

/// Distinct `filename` values from a `/get` response, sorted.
pub fn parse_file_names(json: &Value) -> Result<Vec<String>> {
    let metadatas = json
        .get("metadatas")
        .and_then(|v| v.as_array())
        .ok_or_else(|| unavailable("chroma get response missing metadatas"))?;
    let names: BTreeSet<String> = metadatas
        .iter()
        .filter_map(|m| m.get("filename").and_then(|f| f.as_str()))
        .map(str::to_string)
        .collect();
    Ok(names.into_iter().collect())
}
