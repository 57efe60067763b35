//! The RAG service: ingest, removal, and answer orchestration.
//!
//! [`RagService`] is constructed once with its injected capabilities and is
//! cheap to clone. Each request walks a fixed state machine:
//!
//! ```text
//! INIT ─▶ RETRIEVE ─▶ ASSEMBLE ─▶ GENERATE ─▶ (STREAM_TOKENS)* ─▶ COMPLETE
//!   └────────┴───────────┴───────────┴──────────────┴──────────▶ ERROR
//! ```
//!
//! An empty retrieval jumps straight to COMPLETE with a fixed not-found answer
//! and never calls the generator. No stage is retried.
//!
//! Writes for one document (ingest, removal) are serialized through a
//! per-document async lock; writes for different documents and all reads run
//! concurrently.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::{Arc, Mutex};

use futures::lock::{Mutex as AsyncMutex, OwnedMutexGuard};
use futures::stream::{BoxStream, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::chunk::{chunk_document, ChunkingConfig};
use crate::context::{assemble, ContextWindow};
use crate::embedding::Embedder;
use crate::error::{RagError, Result};
use crate::generation::{build_messages, sources_for, AnswerResponse, GenerationEvent, Generator};
use crate::index::{IndexedChunk, VectorIndex};
use crate::models::{Document, RetrievalResult};
use crate::retrieval::{RetrievalEngine, RetrievalStrategy};

/// Tunables for a [`RagService`].
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalStrategy,
    /// Results retrieved per query when the caller does not specify `k`.
    pub k: usize,
    /// Maximum rendered context length, in characters.
    pub context_budget: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            chunking: ChunkingConfig::default(),
            retrieval: RetrievalStrategy::default(),
            k: 5,
            context_budget: 12_000,
        }
    }
}

impl ServiceConfig {
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        if self.k == 0 {
            return Err(RagError::InvalidConfig("k must be at least 1".into()));
        }
        if self.context_budget == 0 {
            return Err(RagError::InvalidConfig("context_budget must be > 0".into()));
        }
        if let Some(threshold) = &self.retrieval.threshold {
            for (name, value) in [
                ("cutoff", threshold.cutoff),
                ("fallback_cutoff", threshold.fallback_cutoff),
            ] {
                if !(0.0..=1.0).contains(&value) {
                    return Err(RagError::InvalidConfig(format!(
                        "threshold.{name} must be in [0, 1], got {value}"
                    )));
                }
            }
            if threshold.fallback_cutoff > threshold.cutoff {
                return Err(RagError::InvalidConfig(
                    "threshold.fallback_cutoff must not exceed threshold.cutoff".into(),
                ));
            }
        }
        if let Some(boost) = &self.retrieval.keyword_boost {
            if !(0.0..=1.0).contains(&boost.weight) {
                return Err(RagError::InvalidConfig(format!(
                    "keyword_boost.weight must be in [0, 1], got {}",
                    boost.weight
                )));
            }
        }
        for rule in &self.retrieval.must_include {
            if rule.phrase.is_empty() {
                return Err(RagError::InvalidConfig(
                    "must_include rules need a non-empty phrase".into(),
                ));
            }
            if let Some(threshold) = &self.retrieval.threshold {
                if rule.injected_score < threshold.fallback_cutoff {
                    return Err(RagError::InvalidConfig(format!(
                        "must_include injected_score {} is below threshold.fallback_cutoff {}",
                        rule.injected_score, threshold.fallback_cutoff
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Request lifecycle stages, logged as the `stage` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Retrieve,
    Assemble,
    Generate,
    StreamTokens,
    Complete,
    Error,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Init => "INIT",
            Stage::Retrieve => "RETRIEVE",
            Stage::Assemble => "ASSEMBLE",
            Stage::Generate => "GENERATE",
            Stage::StreamTokens => "STREAM_TOKENS",
            Stage::Complete => "COMPLETE",
            Stage::Error => "ERROR",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub document_hash: String,
    pub file_name: String,
    pub chunks_written: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IndexStats {
    pub total_chunks: usize,
    pub unique_files: usize,
    pub files: Vec<String>,
}

/// What is stored for one file name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub file_name: String,
    pub source_path: String,
    /// More than one when several versions share a file name.
    pub document_hashes: Vec<String>,
    pub total_chunks: usize,
    /// Distinct section headers in chunk order.
    pub sections: Vec<String>,
    /// First [`SUMMARY_PREVIEW_CHARS`] characters of the chunk texts.
    pub text_preview: String,
}

pub const SUMMARY_PREVIEW_CHARS: usize = 500;

fn summary_preview(text: &str) -> String {
    match text.char_indices().nth(SUMMARY_PREVIEW_CHARS) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// Retrieval output plus the window built from it.
struct Prepared {
    found: usize,
    window: ContextWindow,
}

#[derive(Clone)]
pub struct RagService {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    engine: RetrievalEngine,
    config: Arc<ServiceConfig>,
    locks: Arc<DocumentLocks>,
}

impl RagService {
    /// Build a service from its capabilities. Fails if `config` is invalid.
    pub fn new(
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
        config: ServiceConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            engine: RetrievalEngine::new(index.clone(), embedder.clone()),
            index,
            embedder,
            generator,
            config: Arc::new(config),
            locks: Arc::new(DocumentLocks::default()),
        })
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    // ── Ingest ────────────────────────────────────────────────────────────

    /// Chunk, embed, and index `text` as the content of `document`.
    ///
    /// Any chunks previously stored for the same document hash are replaced
    /// in one index call. Chunking and embedding complete before the index is
    /// touched, so a failure anywhere leaves the previous chunks in place.
    pub async fn ingest(&self, document: &Document, text: &str) -> Result<IngestReport> {
        let chunks = chunk_document(document, text, &self.config.chunking)?;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.embedder.embed_batch(&texts).await?;
        if embeddings.len() != chunks.len() {
            return Err(RagError::EmbeddingFailure(format!(
                "expected {} embeddings, got {}",
                chunks.len(),
                embeddings.len()
            )));
        }

        let batch: Vec<IndexedChunk> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| IndexedChunk { chunk, embedding })
            .collect();

        let _guard = self.locks.acquire(&document.hash).await?;
        self.index.replace_document(&document.hash, &batch).await?;

        info!(
            file = %document.file_name,
            hash = %document.hash,
            chunks = batch.len(),
            "document indexed"
        );
        Ok(IngestReport {
            document_hash: document.hash.clone(),
            file_name: document.file_name.clone(),
            chunks_written: batch.len(),
        })
    }

    /// Delete every chunk of a document. Returns whether anything was removed.
    pub async fn remove_document(&self, document_hash: &str) -> Result<bool> {
        let _guard = self.locks.acquire(document_hash).await?;
        let removed = self.index.delete_by_document(document_hash).await?;
        info!(hash = %document_hash, removed, "document removal");
        Ok(removed)
    }

    /// Delete every document stored under `file_name`. Returns the hashes
    /// that were removed.
    pub async fn remove_file(&self, file_name: &str) -> Result<Vec<String>> {
        let chunks = self.index.chunks_for_file(file_name).await?;
        let hashes: BTreeSet<String> = chunks.into_iter().map(|c| c.document_hash).collect();

        let mut removed = Vec::with_capacity(hashes.len());
        for hash in hashes {
            if self.remove_document(&hash).await? {
                removed.push(hash);
            }
        }
        Ok(removed)
    }

    /// Drop every chunk from the index. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let removed = self.index.clear().await?;
        info!(chunks = removed, "index cleared");
        Ok(removed)
    }

    /// Overview of one stored file, or `None` if nothing is indexed under
    /// `file_name`.
    pub async fn document_summary(&self, file_name: &str) -> Result<Option<DocumentSummary>> {
        let chunks = self.index.chunks_for_file(file_name).await?;
        let Some(first) = chunks.first() else {
            return Ok(None);
        };

        let mut document_hashes: Vec<String> = Vec::new();
        let mut sections: Vec<String> = Vec::new();
        for chunk in &chunks {
            if !document_hashes.contains(&chunk.document_hash) {
                document_hashes.push(chunk.document_hash.clone());
            }
            for header in &chunk.section_headers {
                if !sections.contains(header) {
                    sections.push(header.clone());
                }
            }
        }

        let full_text = chunks
            .iter()
            .map(|c| c.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        Ok(Some(DocumentSummary {
            file_name: first.file_name.clone(),
            source_path: first.source_path.clone(),
            document_hashes,
            total_chunks: chunks.len(),
            sections,
            text_preview: summary_preview(&full_text),
        }))
    }

    pub async fn stats(&self) -> Result<IndexStats> {
        let total_chunks = self.index.count().await?;
        let files = self.index.list_unique_documents().await?;
        Ok(IndexStats {
            total_chunks,
            unique_files: files.len(),
            files,
        })
    }

    // ── Query ─────────────────────────────────────────────────────────────

    /// Ranked retrieval results without generation.
    pub async fn retrieve(&self, query: &str, k: Option<usize>) -> Result<Vec<RetrievalResult>> {
        validate_query(query)?;
        let k = k.unwrap_or(self.config.k);
        self.engine.retrieve(query, k, &self.config.retrieval).await
    }

    /// Answer `query` in one shot. Failures are reported inside the response.
    pub async fn answer(&self, query: &str, k: Option<usize>) -> AnswerResponse {
        match self.try_answer(query, k).await {
            Ok(response) => response,
            Err(e) => {
                error!(stage = %Stage::Error, kind = ?e.kind(), error = %e, "request failed");
                AnswerResponse::failed(&e)
            }
        }
    }

    async fn try_answer(&self, query: &str, k: Option<usize>) -> Result<AnswerResponse> {
        let prepared = self.prepare(query, k).await?;
        if prepared.window.is_empty() {
            debug!(stage = %Stage::Complete, "no relevant context");
            return Ok(AnswerResponse::not_found());
        }

        debug!(stage = %Stage::Generate, "calling generator");
        let messages = build_messages(&prepared.window, query);
        let answer = self.generator.complete(&messages).await?;

        debug!(stage = %Stage::Complete, answer_chars = answer.len(), "answer generated");
        Ok(AnswerResponse {
            answer,
            sources: sources_for(&prepared.window),
            confidence: prepared.window.confidence(),
            total_sources_found: prepared.found,
            error: None,
        })
    }

    /// Answer `query` as a stream of [`GenerationEvent`]s.
    ///
    /// The stream always opens with one `sources` event and always ends with
    /// one `complete` or `error` event. Dropping it cancels the request.
    pub fn answer_stream(&self, query: &str, k: Option<usize>) -> BoxStream<'static, GenerationEvent> {
        let service = self.clone();
        let query = query.to_string();

        Box::pin(async_stream::stream! {
            let prepared = match service.prepare(&query, k).await {
                Ok(prepared) => prepared,
                Err(e) => {
                    error!(stage = %Stage::Error, kind = ?e.kind(), error = %e, "request failed");
                    yield empty_sources();
                    yield GenerationEvent::failed(&e);
                    return;
                }
            };

            if prepared.window.is_empty() {
                debug!(stage = %Stage::Complete, "no relevant context");
                let not_found = AnswerResponse::not_found();
                yield empty_sources();
                yield GenerationEvent::Complete {
                    answer: not_found.answer,
                    sources: Vec::new(),
                    confidence: 0.0,
                };
                return;
            }

            let sources = sources_for(&prepared.window);
            let confidence = prepared.window.confidence();
            yield GenerationEvent::Sources {
                sources: sources.clone(),
                confidence,
            };

            debug!(stage = %Stage::Generate, "opening generation stream");
            let messages = build_messages(&prepared.window, &query);
            let mut tokens = match service.generator.stream(&messages).await {
                Ok(tokens) => tokens,
                Err(e) => {
                    error!(stage = %Stage::Error, kind = ?e.kind(), error = %e, "request failed");
                    yield GenerationEvent::failed(&e);
                    return;
                }
            };

            debug!(stage = %Stage::StreamTokens, "streaming tokens");
            let mut answer = String::new();
            while let Some(item) = tokens.next().await {
                match item {
                    Ok(fragment) => {
                        if fragment.is_empty() {
                            continue;
                        }
                        answer.push_str(&fragment);
                        yield GenerationEvent::Token { content: fragment };
                    }
                    Err(e) => {
                        error!(stage = %Stage::Error, kind = ?e.kind(), error = %e, "stream failed");
                        yield GenerationEvent::failed(&e);
                        return;
                    }
                }
            }

            debug!(stage = %Stage::Complete, answer_chars = answer.len(), "stream finished");
            yield GenerationEvent::Complete {
                answer,
                sources,
                confidence,
            };
        })
    }

    /// INIT → RETRIEVE → ASSEMBLE.
    async fn prepare(&self, query: &str, k: Option<usize>) -> Result<Prepared> {
        debug!(stage = %Stage::Init, query, "request received");
        validate_query(query)?;
        let k = k.unwrap_or(self.config.k);

        debug!(stage = %Stage::Retrieve, k, "retrieving");
        let results = self.engine.retrieve(query, k, &self.config.retrieval).await?;

        debug!(stage = %Stage::Assemble, results = results.len(), "assembling context");
        let window = assemble(&results, self.config.context_budget);
        if window.len() < results.len() {
            warn!(
                included = window.len(),
                retrieved = results.len(),
                budget = self.config.context_budget,
                "context budget reached"
            );
        }
        Ok(Prepared {
            found: results.len(),
            window,
        })
    }
}

fn validate_query(query: &str) -> Result<()> {
    if query.trim().is_empty() {
        return Err(RagError::InvalidQuery("query is empty".into()));
    }
    Ok(())
}

fn empty_sources() -> GenerationEvent {
    GenerationEvent::Sources {
        sources: Vec::new(),
        confidence: 0.0,
    }
}

// ── Per-document write locks ──────────────────────────────────────────────

/// Async locks keyed by document hash. Entries are dropped once no task holds
/// or waits on them.
#[derive(Default)]
struct DocumentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl DocumentLocks {
    async fn acquire(&self, key: &str) -> Result<DocumentGuard<'_>> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| RagError::IndexUnavailable("document lock table poisoned".into()))?;
            locks
                .entry(key.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = lock.lock_owned().await;
        Ok(DocumentGuard {
            guard: Some(guard),
            key: key.to_string(),
            owner: self,
        })
    }

    fn len(&self) -> usize {
        self.locks.lock().map(|l| l.len()).unwrap_or(0)
    }
}

struct DocumentGuard<'a> {
    guard: Option<OwnedMutexGuard<()>>,
    key: String,
    owner: &'a DocumentLocks,
}

impl Drop for DocumentGuard<'_> {
    fn drop(&mut self) {
        self.guard.take();
        if let Ok(mut locks) = self.owner.locks.lock() {
            if locks.get(&self.key).is_some_and(|l| Arc::strong_count(l) == 1) {
                locks.remove(&self.key);
            }
        }
    }
}
