//! Index overview and document management.
//!
//! `policy-rag stats` prints what is indexed: chunk count, distinct files,
//! and where the index lives. `policy-rag show` summarizes one file.
//! `policy-rag remove` deletes a document by content hash or every document
//! stored under a file name, and `policy-rag clear` empties the index.

use std::io::Write;

use anyhow::{bail, Result};
use policy_rag_core::RagService;

use crate::config::Config;

pub async fn run_stats<W: Write>(config: &Config, service: &RagService, out: &mut W) -> Result<()> {
    let stats = service.stats().await?;

    writeln!(out, "Policy RAG Index Stats")?;
    writeln!(out, "======================")?;
    writeln!(out)?;
    match config.index.backend.as_str() {
        "chroma" => writeln!(
            out,
            "  Index:       chroma {} ({})",
            config.index.chroma.url, config.index.chroma.collection
        )?,
        _ => writeln!(
            out,
            "  Index:       {}",
            config.index.snapshot_path.display()
        )?,
    }
    writeln!(out, "  Embedding:   {}", config.embedding.model_or_default())?;
    writeln!(out)?;
    writeln!(out, "  Documents:   {}", stats.unique_files)?;
    writeln!(out, "  Chunks:      {}", stats.total_chunks)?;

    if !stats.files.is_empty() {
        writeln!(out)?;
        writeln!(out, "  Files:")?;
        for file in &stats.files {
            writeln!(out, "    {}", file)?;
        }
    }

    Ok(())
}

/// Returns whether anything was removed.
pub async fn run_remove<W: Write>(service: &RagService, hash: &str, out: &mut W) -> Result<bool> {
    let removed = service.remove_document(hash).await?;
    if removed {
        writeln!(out, "Removed document {}", hash)?;
    } else {
        writeln!(out, "No document with hash {}", hash)?;
    }
    Ok(removed)
}

/// Remove every document stored under `file_name`. Returns whether anything
/// was removed.
pub async fn run_remove_file<W: Write>(
    service: &RagService,
    file_name: &str,
    out: &mut W,
) -> Result<bool> {
    let removed = service.remove_file(file_name).await?;
    if removed.is_empty() {
        writeln!(out, "No document named {}", file_name)?;
    }
    for hash in &removed {
        writeln!(out, "Removed document {} ({})", hash, file_name)?;
    }
    Ok(!removed.is_empty())
}

/// Returns the number of chunks removed.
pub async fn run_clear<W: Write>(service: &RagService, out: &mut W) -> Result<usize> {
    let removed = service.clear().await?;
    writeln!(out, "Cleared {} chunks", removed)?;
    Ok(removed)
}

pub async fn run_show<W: Write>(service: &RagService, file_name: &str, out: &mut W) -> Result<()> {
    let Some(summary) = service.document_summary(file_name).await? else {
        bail!("No document named {}", file_name);
    };

    writeln!(out, "{}", summary.file_name)?;
    writeln!(out, "{}", "=".repeat(summary.file_name.chars().count()))?;
    writeln!(out)?;
    writeln!(out, "  Path:        {}", summary.source_path)?;
    for hash in &summary.document_hashes {
        writeln!(out, "  Hash:        {}", hash)?;
    }
    writeln!(out, "  Chunks:      {}", summary.total_chunks)?;

    if !summary.sections.is_empty() {
        writeln!(out)?;
        writeln!(out, "  Sections:")?;
        for section in &summary.sections {
            writeln!(out, "    {}", section)?;
        }
    }

    writeln!(out)?;
    writeln!(out, "  Preview:")?;
    for line in summary.text_preview.lines() {
        writeln!(out, "    {}", line)?;
    }
    Ok(())
}
