//! `policy-rag ingest`: scan, extract, and index files.
//!
//! Each file is handled on its own. A file that cannot be read, is too
//! large, has an unsupported type, or fails inside the core is reported and
//! skipped; the rest of the batch continues.

use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use policy_rag_core::models::Document;
use policy_rag_core::service::IngestReport;
use policy_rag_core::RagService;
use tracing::{info, warn};

use crate::config::IngestConfig;
use crate::extract::extract_text;
use crate::scan::scan_paths;

/// What happened to one input file.
#[derive(Debug)]
pub enum FileOutcome {
    Ingested(IngestReport),
    Failed { path: PathBuf, reason: String },
}

#[derive(Debug, Default)]
pub struct IngestSummary {
    pub outcomes: Vec<FileOutcome>,
}

impl IngestSummary {
    pub fn ingested(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, FileOutcome::Ingested(_)))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.ingested()
    }

    pub fn chunks_written(&self) -> usize {
        self.outcomes
            .iter()
            .map(|o| match o {
                FileOutcome::Ingested(report) => report.chunks_written,
                FileOutcome::Failed { .. } => 0,
            })
            .sum()
    }
}

pub async fn ingest_paths(
    service: &RagService,
    config: &IngestConfig,
    paths: &[PathBuf],
) -> Result<IngestSummary> {
    let files = scan_paths(paths, config)?;
    let mut summary = IngestSummary::default();

    for path in files {
        let outcome = match ingest_file(service, config, &path).await {
            Ok(report) => {
                info!(
                    file = %report.file_name,
                    hash = %report.document_hash,
                    chunks = report.chunks_written,
                    "ingested document"
                );
                FileOutcome::Ingested(report)
            }
            Err(e) => {
                let reason = format!("{:#}", e);
                warn!(path = %path.display(), %reason, "skipping file");
                FileOutcome::Failed { path, reason }
            }
        };
        summary.outcomes.push(outcome);
    }

    Ok(summary)
}

async fn ingest_file(
    service: &RagService,
    config: &IngestConfig,
    path: &Path,
) -> Result<IngestReport> {
    let size = std::fs::metadata(path).context("cannot stat file")?.len();
    if size > config.max_file_bytes {
        bail!("file is {} bytes, limit is {}", size, config.max_file_bytes);
    }

    let bytes = std::fs::read(path).context("cannot read file")?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let document = Document::from_bytes(file_name, path.display().to_string(), &bytes);

    let text = extract_text(path, &bytes)?;
    Ok(service.ingest(&document, &text).await?)
}

/// Print the per-file results and totals to stdout.
pub fn print_summary(summary: &IngestSummary) {
    for outcome in &summary.outcomes {
        match outcome {
            FileOutcome::Ingested(report) => println!(
                "  ok      {}  {} chunks  {}",
                report.file_name, report.chunks_written, report.document_hash
            ),
            FileOutcome::Failed { path, reason } => {
                println!("  failed  {}  {}", path.display(), reason)
            }
        }
    }
    println!("ingest");
    println!("  files: {}", summary.outcomes.len());
    println!("  ingested: {}", summary.ingested());
    println!("  failed: {}", summary.failed());
    println!("  chunks written: {}", summary.chunks_written());
}
