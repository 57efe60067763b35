//! In-memory [`VectorIndex`] implementation.
//!
//! Entries live in a `Vec` behind `std::sync::RwLock`. Search is brute-force
//! cosine similarity clamped to `[0, 1]`. Every write holds the write lock
//! for the whole batch, which is what makes batches atomic to readers.
//!
//! The index can be snapshotted to a JSON file and reloaded, so a CLI process
//! can keep its corpus between invocations.

use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::embedding::cosine_similarity;
use crate::error::{RagError, Result};
use crate::models::Chunk;

use super::{clamp_unit, sort_by_position, IndexedChunk, ScoredChunk, VectorIndex};

#[derive(Serialize, Deserialize)]
struct Snapshot {
    entries: Vec<IndexedChunk>,
}

/// In-memory vector index for tests, local runs, and small corpora.
pub struct InMemoryIndex {
    entries: RwLock<Vec<IndexedChunk>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
        }
    }

    /// Load a snapshot written by [`save_to`](Self::save_to). A missing file
    /// yields an empty index.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }
        let content = std::fs::read_to_string(path).map_err(|e| {
            RagError::IndexUnavailable(format!("failed to read {}: {}", path.display(), e))
        })?;
        let snapshot: Snapshot = serde_json::from_str(&content).map_err(|e| {
            RagError::IndexUnavailable(format!("corrupt snapshot {}: {}", path.display(), e))
        })?;
        debug!(path = %path.display(), entries = snapshot.entries.len(), "loaded index snapshot");
        Ok(Self {
            entries: RwLock::new(snapshot.entries),
        })
    }

    /// Write the full index to `path` as JSON.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        let json = {
            let entries = self.read()?;
            serde_json::to_string(&SnapshotRef { entries: &entries })
                .map_err(|e| RagError::IndexUnavailable(format!("snapshot encode: {}", e)))?
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RagError::IndexUnavailable(format!("create {}: {}", parent.display(), e))
                })?;
            }
        }
        std::fs::write(path, json).map_err(|e| {
            RagError::IndexUnavailable(format!("failed to write {}: {}", path.display(), e))
        })
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Vec<IndexedChunk>>> {
        self.entries
            .read()
            .map_err(|_| RagError::IndexUnavailable("index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Vec<IndexedChunk>>> {
        self.entries
            .write()
            .map_err(|_| RagError::IndexUnavailable("index lock poisoned".into()))
    }
}

impl Default for InMemoryIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    entries: &'a [IndexedChunk],
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn add(&self, batch: &[IndexedChunk]) -> Result<()> {
        let mut entries = self.write()?;
        check_dims(entries.iter(), batch)?;

        let ids: HashSet<&str> = batch.iter().map(|e| e.chunk.id.as_str()).collect();
        entries.retain(|e| !ids.contains(e.chunk.id.as_str()));
        entries.extend(batch.iter().cloned());
        Ok(())
    }

    async fn replace_document(&self, document_hash: &str, batch: &[IndexedChunk]) -> Result<()> {
        let mut entries = self.write()?;
        check_dims(
            entries.iter().filter(|e| e.chunk.document_hash != document_hash),
            batch,
        )?;

        let ids: HashSet<&str> = batch.iter().map(|e| e.chunk.id.as_str()).collect();
        entries.retain(|e| {
            e.chunk.document_hash != document_hash && !ids.contains(e.chunk.id.as_str())
        });
        entries.extend(batch.iter().cloned());
        Ok(())
    }

    async fn search_with_score(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let entries = self.read()?;
        let mut scored: Vec<ScoredChunk> = entries
            .iter()
            .map(|e| ScoredChunk {
                chunk: e.chunk.clone(),
                score: clamp_unit(cosine_similarity(query, &e.embedding) as f64),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk.document_hash.cmp(&b.chunk.document_hash))
                .then_with(|| a.chunk.chunk_index.cmp(&b.chunk.chunk_index))
        });
        scored.truncate(k);
        Ok(scored)
    }

    async fn delete_by_document(&self, document_hash: &str) -> Result<bool> {
        let mut entries = self.write()?;
        let before = entries.len();
        entries.retain(|e| e.chunk.document_hash != document_hash);
        Ok(entries.len() < before)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.len())
    }

    async fn list_unique_documents(&self) -> Result<Vec<String>> {
        let entries = self.read()?;
        let names: BTreeSet<&str> = entries.iter().map(|e| e.chunk.file_name.as_str()).collect();
        Ok(names.into_iter().map(str::to_string).collect())
    }

    async fn chunks_for_file(&self, file_name: &str) -> Result<Vec<Chunk>> {
        let mut chunks: Vec<Chunk> = self
            .read()?
            .iter()
            .filter(|e| e.chunk.file_name == file_name)
            .map(|e| e.chunk.clone())
            .collect();
        sort_by_position(&mut chunks);
        Ok(chunks)
    }

    async fn clear(&self) -> Result<usize> {
        let mut entries = self.write()?;
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

/// Reject a batch whose embeddings disagree with each other or with the
/// entries already stored.
fn check_dims<'a>(
    mut existing: impl Iterator<Item = &'a IndexedChunk>,
    batch: &[IndexedChunk],
) -> Result<()> {
    let expected = existing
        .next()
        .map(|e| e.embedding.len())
        .or_else(|| batch.first().map(|e| e.embedding.len()));
    let Some(dims) = expected else {
        return Ok(());
    };
    match batch.iter().find(|e| e.embedding.len() != dims) {
        Some(bad) => Err(RagError::IndexUnavailable(format!(
            "embedding for chunk {} has {} dims, index expects {}",
            bad.chunk.id,
            bad.embedding.len(),
            dims
        ))),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(doc: &str, file: &str, index: usize, embedding: Vec<f32>) -> IndexedChunk {
        IndexedChunk {
            chunk: Chunk {
                id: format!("{doc}-{index}"),
                document_hash: doc.to_string(),
                file_name: file.to_string(),
                source_path: format!("/docs/{file}"),
                chunk_index: index,
                total_chunks: 2,
                text: format!("text of {doc} {index}"),
                section_headers: Vec::new(),
                preview: String::new(),
            },
            embedding,
        }
    }

    #[tokio::test]
    async fn test_search_sorted_and_truncated() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d1", "a.txt", 1, vec![0.7, 0.7]),
                entry("d2", "b.txt", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let results = index.search_with_score(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].chunk.id, "d1-0");
        assert_eq!(results[1].chunk.id, "d1-1");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_negative_similarity_clamped() {
        let index = InMemoryIndex::new();
        index.add(&[entry("d1", "a.txt", 0, vec![-1.0, 0.0])]).await.unwrap();
        let results = index.search_with_score(&[1.0, 0.0], 5).await.unwrap();
        assert_eq!(results[0].score, 0.0);
    }

    #[tokio::test]
    async fn test_delete_by_document_cascades() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d1", "a.txt", 1, vec![0.0, 1.0]),
                entry("d2", "b.txt", 0, vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        assert!(index.delete_by_document("d1").await.unwrap());
        assert_eq!(index.count().await.unwrap(), 1);
        assert!(!index.delete_by_document("d1").await.unwrap());
        assert_eq!(index.list_unique_documents().await.unwrap(), vec!["b.txt"]);
    }

    #[tokio::test]
    async fn test_mismatched_batch_rejected_whole() {
        let index = InMemoryIndex::new();
        index.add(&[entry("d1", "a.txt", 0, vec![1.0, 0.0])]).await.unwrap();

        let err = index
            .add(&[
                entry("d2", "b.txt", 0, vec![1.0, 0.0]),
                entry("d2", "b.txt", 1, vec![1.0, 0.0, 0.0]),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_readd_same_chunk_replaces() {
        let index = InMemoryIndex::new();
        index.add(&[entry("d1", "a.txt", 0, vec![1.0, 0.0])]).await.unwrap();
        index.add(&[entry("d1", "a.txt", 0, vec![0.0, 1.0])]).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_roundtrip() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("index.json");

        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d2", "b.txt", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        index.save_to(&path).unwrap();

        let restored = InMemoryIndex::load_from(&path).unwrap();
        assert_eq!(restored.count().await.unwrap(), 2);
        let hit = restored.search_with_score(&[0.0, 1.0], 1).await.unwrap();
        assert_eq!(hit[0].chunk.id, "d2-0");
    }

    #[test]
    fn test_missing_snapshot_is_empty() {
        let tmp = tempfile::TempDir::new().unwrap();
        let index = InMemoryIndex::load_from(&tmp.path().join("absent.json")).unwrap();
        assert_eq!(index.read().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn test_replace_document_swaps_chunk_set() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d1", "a.txt", 1, vec![0.0, 1.0]),
                entry("d2", "b.txt", 0, vec![1.0, 1.0]),
            ])
            .await
            .unwrap();

        index
            .replace_document("d1", &[entry("d1", "a.txt", 0, vec![0.5, 0.5])])
            .await
            .unwrap();

        assert_eq!(index.count().await.unwrap(), 2);
        let chunks = index.chunks_for_file("a.txt").await.unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].id, "d1-0");
    }

    #[tokio::test]
    async fn test_failed_replace_keeps_previous_chunks() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d2", "b.txt", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();

        let err = index
            .replace_document("d1", &[entry("d1", "a.txt", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::IndexUnavailable(_)));
        assert_eq!(index.chunks_for_file("a.txt").await.unwrap().len(), 1);
        assert_eq!(index.count().await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_replace_only_document_may_change_dims() {
        let index = InMemoryIndex::new();
        index.add(&[entry("d1", "a.txt", 0, vec![1.0, 0.0])]).await.unwrap();
        index
            .replace_document("d1", &[entry("d1", "a.txt", 0, vec![1.0, 0.0, 0.0])])
            .await
            .unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_chunks_for_file_ordered() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d2", "a.txt", 1, vec![1.0, 0.0]),
                entry("d1", "a.txt", 1, vec![1.0, 0.0]),
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d3", "b.txt", 0, vec![1.0, 0.0]),
            ])
            .await
            .unwrap();

        let ids: Vec<String> = index
            .chunks_for_file("a.txt")
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec!["d1-0", "d1-1", "d2-1"]);
        assert!(index.chunks_for_file("missing.txt").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_reports_removed() {
        let index = InMemoryIndex::new();
        index
            .add(&[
                entry("d1", "a.txt", 0, vec![1.0, 0.0]),
                entry("d2", "b.txt", 0, vec![0.0, 1.0]),
            ])
            .await
            .unwrap();
        assert_eq!(index.clear().await.unwrap(), 2);
        assert_eq!(index.count().await.unwrap(), 0);
        assert_eq!(index.clear().await.unwrap(), 0);
    }
}
