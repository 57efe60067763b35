//! Core data models for the RAG pipeline.
//!
//! [`Document`], [`Chunk`], and the embedding vector are created together at
//! ingest and deleted together when a document is removed. [`RetrievalResult`]
//! and everything derived from it exist only for the duration of one query.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// An ingested source document.
///
/// Identity is the SHA-256 of the raw bytes, so re-uploading changed content
/// produces a new `Document` rather than mutating the old one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    /// Hex SHA-256 of the original bytes.
    pub hash: String,
    /// Original file name (e.g. `Budgets & Reimbursements.pdf`).
    pub file_name: String,
    /// Path the document was ingested from.
    pub source_path: String,
    /// Length of the original bytes.
    pub byte_len: u64,
}

impl Document {
    /// Fingerprint raw bytes and build a document identity for them.
    pub fn from_bytes(
        file_name: impl Into<String>,
        source_path: impl Into<String>,
        bytes: &[u8],
    ) -> Self {
        Self {
            hash: sha256_hex(bytes),
            file_name: file_name.into(),
            source_path: source_path.into(),
            byte_len: bytes.len() as u64,
        }
    }
}

/// A bounded, overlapping slice of a document's text.
///
/// Invariant: `chunk_index < total_chunks`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from the document hash and index.
    pub id: String,
    pub document_hash: String,
    pub file_name: String,
    pub source_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
    /// Heuristically detected headings, at most two.
    pub section_headers: Vec<String>,
    /// First `preview_chars` characters of `text`.
    pub preview: String,
}

impl Chunk {
    /// Project this chunk into the flat metadata record attached to it in the
    /// vector index.
    pub fn metadata(&self) -> ChunkMetadata {
        ChunkMetadata {
            document_hash: self.document_hash.clone(),
            filename: self.file_name.clone(),
            source_path: self.source_path.clone(),
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
            section_headers: self.section_headers.join(HEADER_SEPARATOR),
            preview: self.preview.clone(),
        }
    }

    /// Rebuild a chunk from an index record.
    pub fn from_metadata(id: impl Into<String>, text: impl Into<String>, meta: ChunkMetadata) -> Self {
        let section_headers = meta
            .section_headers
            .split(HEADER_SEPARATOR)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();

        Self {
            id: id.into(),
            document_hash: meta.document_hash,
            file_name: meta.filename,
            source_path: meta.source_path,
            chunk_index: meta.chunk_index,
            total_chunks: meta.total_chunks,
            text: text.into(),
            section_headers,
            preview: meta.preview,
        }
    }

    pub fn source_info(&self) -> SourceInfo {
        SourceInfo {
            file_name: self.file_name.clone(),
            file_path: self.source_path.clone(),
            section_headers: self.section_headers.clone(),
            chunk_index: self.chunk_index,
            total_chunks: self.total_chunks,
        }
    }
}

/// Joins section headers in [`ChunkMetadata::section_headers`]. Headers are
/// single lines, so they never contain it.
pub const HEADER_SEPARATOR: &str = "\n";

/// Flat metadata record persisted alongside each chunk in the vector index.
///
/// Index engines typically accept only scalar metadata values, so section
/// headers are stored as one [`HEADER_SEPARATOR`]-joined string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub document_hash: String,
    pub filename: String,
    #[serde(default)]
    pub source_path: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    #[serde(default)]
    pub section_headers: String,
    #[serde(default)]
    pub preview: String,
}

/// Source attribution for a retrieved chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceInfo {
    pub file_name: String,
    pub file_path: String,
    pub section_headers: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
}

/// A chunk matched by a query, with its relevance score.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    /// Normalized relevance in `[0.0, 1.0]`, higher is better.
    pub similarity_score: f64,
    pub source_info: SourceInfo,
}

impl RetrievalResult {
    pub fn new(chunk: Chunk, similarity_score: f64) -> Self {
        let source_info = chunk.source_info();
        Self {
            chunk,
            similarity_score,
            source_info,
        }
    }

    pub fn text(&self) -> &str {
        &self.chunk.text
    }
}

pub(crate) fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_chunk() -> Chunk {
        Chunk {
            id: "abc".to_string(),
            document_hash: "d1".to_string(),
            file_name: "travel.txt".to_string(),
            source_path: "/policies/travel.txt".to_string(),
            chunk_index: 1,
            total_chunks: 3,
            text: "TRAVEL POLICY:\nEconomy class only.".to_string(),
            section_headers: vec!["TRAVEL POLICY:".to_string(), "Section 2".to_string()],
            preview: "TRAVEL POLICY:".to_string(),
        }
    }

    #[test]
    fn test_document_hash_is_stable() {
        let a = Document::from_bytes("a.txt", "/a.txt", b"same bytes");
        let b = Document::from_bytes("b.txt", "/b.txt", b"same bytes");
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.hash.len(), 64);
        assert_eq!(a.byte_len, 10);
    }

    #[test]
    fn test_changed_bytes_change_identity() {
        let a = Document::from_bytes("a.txt", "/a.txt", b"version one");
        let b = Document::from_bytes("a.txt", "/a.txt", b"version two");
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_metadata_roundtrip_preserves_headers() {
        let chunk = sample_chunk();
        let meta = chunk.metadata();
        assert_eq!(meta.section_headers, "TRAVEL POLICY:\nSection 2");

        let rebuilt = Chunk::from_metadata(chunk.id.clone(), chunk.text.clone(), meta);
        assert_eq!(rebuilt, chunk);
    }

    #[test]
    fn test_header_with_comma_survives_roundtrip() {
        let mut chunk = sample_chunk();
        chunk.section_headers = vec!["Section 4, Travel:".to_string(), "MEALS".to_string()];
        let rebuilt = Chunk::from_metadata("abc", chunk.text.clone(), chunk.metadata());
        assert_eq!(rebuilt.section_headers, chunk.section_headers);
    }

    #[test]
    fn test_empty_headers_metadata() {
        let mut chunk = sample_chunk();
        chunk.section_headers.clear();
        let rebuilt = Chunk::from_metadata("abc", chunk.text.clone(), chunk.metadata());
        assert!(rebuilt.section_headers.is_empty());
    }
}
