//! Recursive-separator text chunker with overlap.
//!
//! Splits extracted document text into [`Chunk`]s of roughly `chunk_size`
//! characters, where consecutive chunks share up to `chunk_overlap`
//! characters of context.
//!
//! # Algorithm
//!
//! 1. Pick the first separator from `["\n\n", "\n", " ", ""]` that occurs in
//!    the text (`""` always matches and splits into single characters).
//! 2. Split on it. Pieces shorter than `chunk_size` are collected; a piece
//!    that is too long is recursed into with the remaining separators.
//! 3. Collected pieces are merged greedily, re-joined with the separator,
//!    until adding the next piece would exceed `chunk_size`. The merged text
//!    is emitted and pieces are dropped from the front until at most
//!    `chunk_overlap` characters remain, which seed the next chunk.
//!
//! Lengths are counted in characters, never bytes, so a split can never land
//! inside a multi-byte character.
//!
//! # Example
//!
//! ```rust
//! use policy_rag_core::chunk::{chunk_document, ChunkingConfig};
//! use policy_rag_core::models::Document;
//!
//! let text = "Expense Policy:\nReceipts are required for every claim.";
//! let doc = Document::from_bytes("expenses.txt", "/docs/expenses.txt", text.as_bytes());
//! let chunks = chunk_document(&doc, text, &ChunkingConfig::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!(chunks[0].section_headers, vec!["Expense Policy:"]);
//! ```

use std::collections::VecDeque;

use serde::Deserialize;

use crate::error::{RagError, Result};
use crate::models::{sha256_hex, Chunk, Document};

/// Separators tried in priority order: paragraph, line, word, character.
const SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Chunking parameters. Sizes are in characters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    /// Length of [`Chunk::preview`].
    pub preview_chars: usize,
    /// How many leading lines of a chunk are scanned for headings.
    pub header_scan_lines: usize,
    pub max_section_headers: usize,
    /// A line containing any of these (case-insensitive) is a heading candidate.
    pub header_keywords: Vec<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            chunk_overlap: 100,
            preview_chars: 200,
            header_scan_lines: 5,
            max_section_headers: 2,
            header_keywords: ["section", "chapter", "policy", "procedure"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(RagError::InvalidConfig(
                "chunking.chunk_size must be > 0".into(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(RagError::InvalidConfig(format!(
                "chunking.chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Split a document's extracted text into indexed, metadata-tagged chunks.
///
/// # Errors
///
/// - [`RagError::EmptyContent`] if `text` is empty or whitespace-only. No
///   chunks are produced in that case.
/// - [`RagError::InvalidConfig`] if the config fails validation.
///
/// # Guarantees
///
/// - Chunk indices are dense: `0, 1, …, N-1`, and every chunk carries
///   `total_chunks == N`.
/// - Identical input and config produce identical output, ids included.
pub fn chunk_document(
    document: &Document,
    text: &str,
    config: &ChunkingConfig,
) -> Result<Vec<Chunk>> {
    config.validate()?;

    if text.trim().is_empty() {
        return Err(RagError::EmptyContent(document.file_name.clone()));
    }

    let pieces = split_text(text, config.chunk_size, config.chunk_overlap);
    if pieces.is_empty() {
        return Err(RagError::EmptyContent(document.file_name.clone()));
    }

    let total_chunks = pieces.len();
    let chunks = pieces
        .into_iter()
        .enumerate()
        .map(|(chunk_index, text)| Chunk {
            id: chunk_id(&document.hash, chunk_index),
            document_hash: document.hash.clone(),
            file_name: document.file_name.clone(),
            source_path: document.source_path.clone(),
            chunk_index,
            total_chunks,
            section_headers: detect_section_headers(&text, config),
            preview: text.chars().take(config.preview_chars).collect(),
            text,
        })
        .collect();

    Ok(chunks)
}

/// Split raw text into overlapping pieces of at most `chunk_size` characters.
///
/// A single run of characters with no separator longer than `chunk_size`
/// can only happen at the character level, which always fits, so every
/// returned piece respects the size limit.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    let mut out = Vec::new();
    split_recursive(text, &SEPARATORS, chunk_size, chunk_overlap, &mut out);
    out
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    chunk_overlap: usize,
    out: &mut Vec<String>,
) {
    let (separator, remaining) = pick_separator(text, separators);

    let splits: Vec<&str> = if separator.is_empty() {
        text.char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect()
    } else {
        text.split(separator).filter(|s| !s.is_empty()).collect()
    };

    let mut fitting: Vec<&str> = Vec::new();
    for piece in splits {
        if char_len(piece) < chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            out.extend(merge_splits(&fitting, separator, chunk_size, chunk_overlap));
            fitting.clear();
        }

        if remaining.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                out.push(trimmed.to_string());
            }
        } else {
            split_recursive(piece, remaining, chunk_size, chunk_overlap, out);
        }
    }

    if !fitting.is_empty() {
        out.extend(merge_splits(&fitting, separator, chunk_size, chunk_overlap));
    }
}

/// Choose the highest-priority separator present in `text`, returning it with
/// the lower-priority separators left for recursion.
fn pick_separator<'s>(text: &str, separators: &'s [&'s str]) -> (&'s str, &'s [&'s str]) {
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return (sep, &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    ("", &[])
}

/// Greedily merge small pieces into chunks, carrying an overlap tail forward.
fn merge_splits(
    splits: &[&str],
    separator: &str,
    chunk_size: usize,
    chunk_overlap: usize,
) -> Vec<String> {
    let sep_len = char_len(separator);
    let mut docs = Vec::new();
    let mut current: VecDeque<&str> = VecDeque::new();
    let mut total = 0usize;

    for &piece in splits {
        let len = char_len(piece);
        let joiner = if current.is_empty() { 0 } else { sep_len };

        if total + len + joiner > chunk_size && !current.is_empty() {
            if let Some(doc) = join_pieces(&current, separator) {
                docs.push(doc);
            }

            // Drop from the front until only the overlap tail remains and the
            // next piece fits.
            loop {
                let joiner = if current.is_empty() { 0 } else { sep_len };
                let must_shrink =
                    total > chunk_overlap || (total + len + joiner > chunk_size && total > 0);
                if !must_shrink {
                    break;
                }
                let Some(first) = current.pop_front() else {
                    break;
                };
                let dropped_joiner = if current.is_empty() { 0 } else { sep_len };
                total = total.saturating_sub(char_len(first) + dropped_joiner);
            }
        }

        let joiner = if current.is_empty() { 0 } else { sep_len };
        current.push_back(piece);
        total += len + joiner;
    }

    if let Some(doc) = join_pieces(&current, separator) {
        docs.push(doc);
    }

    docs
}

fn join_pieces(pieces: &VecDeque<&str>, separator: &str) -> Option<String> {
    let joined = pieces.iter().copied().collect::<Vec<_>>().join(separator);
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Scan the first lines of a chunk for heading-like lines.
///
/// A line qualifies if it is fully upper-case, ends with a colon, or mentions
/// one of the configured structural keywords.
pub fn detect_section_headers(text: &str, config: &ChunkingConfig) -> Vec<String> {
    text.lines()
        .take(config.header_scan_lines)
        .map(str::trim)
        .filter(|line| !line.is_empty() && is_header_candidate(line, &config.header_keywords))
        .take(config.max_section_headers)
        .map(str::to_string)
        .collect()
}

fn is_header_candidate(line: &str, keywords: &[String]) -> bool {
    if is_upper_case(line) || line.ends_with(':') {
        return true;
    }
    let lower = line.to_lowercase();
    keywords.iter().any(|k| lower.contains(&k.to_lowercase()))
}

/// True when the line has at least one cased letter and none are lower-case.
fn is_upper_case(line: &str) -> bool {
    line.chars().any(char::is_uppercase) && !line.chars().any(char::is_lowercase)
}

fn chunk_id(document_hash: &str, chunk_index: usize) -> String {
    sha256_hex(format!("{document_hash}:{chunk_index}").as_bytes())
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}
