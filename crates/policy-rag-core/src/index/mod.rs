//! Vector index contract for the RAG pipeline.
//!
//! The [`VectorIndex`] trait is the only way the core touches stored chunks.
//! The engine behind it (an in-process map, Chroma, anything else) is
//! external; the core relies on three promises from every implementation:
//!
//! - **Batch atomicity.** A failed [`add`](VectorIndex::add) leaves nothing
//!   from that batch visible. A concurrent reader sees the whole batch or
//!   none of it. A failed
//!   [`replace_document`](VectorIndex::replace_document) leaves the
//!   document's previous chunks searchable.
//! - **Normalized scores.** [`search_with_score`](VectorIndex::search_with_score)
//!   returns similarities in `[0.0, 1.0]`, sorted descending. Engines that
//!   report distances convert them with [`distance_to_similarity`] before
//!   returning.
//! - **Honest failures.** Any call may fail with
//!   [`RagError::IndexUnavailable`](crate::RagError::IndexUnavailable); the
//!   core surfaces it and never retries.
//!
//! # Operations
//!
//! | Method | Purpose |
//! |--------|---------|
//! | [`add`](VectorIndex::add) | Insert a batch of embedded chunks |
//! | [`replace_document`](VectorIndex::replace_document) | Swap a document's chunk set for a new batch |
//! | [`search_with_score`](VectorIndex::search_with_score) | Top-k chunks by similarity |
//! | [`delete_by_document`](VectorIndex::delete_by_document) | Remove every chunk of a document |
//! | [`count`](VectorIndex::count) | Number of stored chunks |
//! | [`list_unique_documents`](VectorIndex::list_unique_documents) | Distinct file names |
//! | [`chunks_for_file`](VectorIndex::chunks_for_file) | Every chunk stored under a file name |
//! | [`clear`](VectorIndex::clear) | Remove everything |

pub mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::Chunk;

pub use memory::InMemoryIndex;

/// A chunk paired with its embedding, ready to be written to the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexedChunk {
    pub chunk: Chunk,
    pub embedding: Vec<f32>,
}

/// A chunk returned from a similarity search.
#[derive(Debug, Clone)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Similarity in `[0.0, 1.0]`.
    pub score: f64,
}

#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert a batch. Either every entry becomes visible or none does.
    async fn add(&self, entries: &[IndexedChunk]) -> Result<()>;

    /// Make `entries` the complete chunk set of `document_hash`.
    ///
    /// Readers never observe the document with no chunks: they see the old
    /// set or the new one. On failure the old set stays searchable.
    async fn replace_document(&self, document_hash: &str, entries: &[IndexedChunk]) -> Result<()>;

    /// Return up to `k` chunks ordered by descending similarity to `query`.
    async fn search_with_score(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>>;

    /// Remove all chunks belonging to a document.
    ///
    /// Returns `true` if anything was removed.
    async fn delete_by_document(&self, document_hash: &str) -> Result<bool>;

    /// Total number of stored chunks.
    async fn count(&self) -> Result<usize>;

    /// Distinct file names of the stored documents, sorted.
    async fn list_unique_documents(&self) -> Result<Vec<String>>;

    /// Chunks whose file name equals `file_name`, ordered by document hash
    /// then chunk index.
    async fn chunks_for_file(&self, file_name: &str) -> Result<Vec<Chunk>>;

    /// Remove every chunk. Returns how many were removed.
    async fn clear(&self) -> Result<usize>;
}

/// Distance function reported by an index engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Squared or plain euclidean distance, `[0, ∞)`.
    L2,
    /// Cosine distance `1 - cos`, `[0, 2]`.
    Cosine,
    /// Negated inner product, as reported by engines that minimize distance.
    Ip,
}

/// Convert an engine distance into a similarity in `[0.0, 1.0]`.
pub fn distance_to_similarity(distance: f64, metric: DistanceMetric) -> f64 {
    let similarity = match metric {
        DistanceMetric::L2 => 1.0 / (1.0 + distance.max(0.0)),
        DistanceMetric::Cosine => 1.0 - distance / 2.0,
        DistanceMetric::Ip => 1.0 - distance,
    };
    clamp_unit(similarity)
}

/// Order chunks by document hash, then chunk index.
pub fn sort_by_position(chunks: &mut [Chunk]) {
    chunks.sort_by(|a, b| {
        a.document_hash
            .cmp(&b.document_hash)
            .then_with(|| a.chunk_index.cmp(&b.chunk_index))
    });
}

/// Clamp a score into `[0.0, 1.0]`, mapping NaN to `0.0`.
pub fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l2_zero_distance_is_one() {
        assert!((distance_to_similarity(0.0, DistanceMetric::L2) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_l2_decreases_with_distance() {
        let near = distance_to_similarity(0.2, DistanceMetric::L2);
        let far = distance_to_similarity(1.5, DistanceMetric::L2);
        assert!(near > far);
        assert!(far > 0.0);
    }

    #[test]
    fn test_cosine_distance_bounds() {
        assert!((distance_to_similarity(0.0, DistanceMetric::Cosine) - 1.0).abs() < 1e-12);
        assert!(distance_to_similarity(2.0, DistanceMetric::Cosine).abs() < 1e-12);
        assert!((distance_to_similarity(1.0, DistanceMetric::Cosine) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_scores_always_in_unit() {
        for d in [-3.0, 0.0, 0.7, 1.9, 5.0, 1e9] {
            for m in [DistanceMetric::L2, DistanceMetric::Cosine, DistanceMetric::Ip] {
                let s = distance_to_similarity(d, m);
                assert!((0.0..=1.0).contains(&s), "{:?} {} -> {}", m, d, s);
            }
        }
        assert_eq!(clamp_unit(f64::NAN), 0.0);
    }
}
