//! `policy-rag search`: retrieval without generation.
//!
//! Runs the configured retrieval strategy and prints the ranked chunks as a
//! JSON array, one [`SearchHit`] per result.

use std::io::Write;

use anyhow::Result;
use policy_rag_core::models::RetrievalResult;
use policy_rag_core::RagService;
use serde::Serialize;

/// One ranked row of `policy-rag search` output.
#[derive(Debug, Serialize)]
pub struct SearchHit {
    pub rank: usize,
    pub score: f64,
    pub document_hash: String,
    pub file_name: String,
    pub file_path: String,
    pub section_headers: Vec<String>,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub text: String,
}

impl SearchHit {
    fn new(rank: usize, result: &RetrievalResult) -> Self {
        Self {
            rank,
            score: result.similarity_score,
            document_hash: result.chunk.document_hash.clone(),
            file_name: result.source_info.file_name.clone(),
            file_path: result.source_info.file_path.clone(),
            section_headers: result.source_info.section_headers.clone(),
            chunk_index: result.source_info.chunk_index,
            total_chunks: result.source_info.total_chunks,
            text: result.text().to_string(),
        }
    }
}

/// Run retrieval only and print the ranked chunks as a JSON array.
pub async fn run_search<W: Write>(
    service: &RagService,
    query: &str,
    k: Option<usize>,
    out: &mut W,
) -> Result<()> {
    let results = service.retrieve(query, k).await?;
    let hits: Vec<SearchHit> = results
        .iter()
        .enumerate()
        .map(|(i, r)| SearchHit::new(i + 1, r))
        .collect();
    writeln!(out, "{}", serde_json::to_string_pretty(&hits)?)?;
    Ok(())
}
