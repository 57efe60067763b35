//! Input discovery for `policy-rag ingest`.
//!
//! Directories are walked recursively and filtered with the `[ingest]`
//! include and exclude globs. `.git`, `target`, and `node_modules` are
//! always skipped.

use anyhow::{bail, Result};
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;

const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// Expand the ingest arguments into a sorted, de-duplicated list of files.
///
/// A file argument is taken as-is; the extractor rejects it later if its
/// type is unsupported. A directory is walked and filtered by the include
/// and exclude globs, matched against paths relative to that directory.
pub fn scan_paths(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for root in paths {
        if root.is_file() {
            files.push(root.clone());
            continue;
        }
        if !root.is_dir() {
            bail!("Path does not exist: {}", root.display());
        }
        files.extend(walk_dir(root, config.follow_symlinks, &include_set, &exclude_set)?);
    }

    files.sort();
    files.dedup();
    Ok(files)
}

fn walk_dir(
    root: &Path,
    follow_symlinks: bool,
    include_set: &GlobSet,
    exclude_set: &GlobSet,
) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).follow_links(follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let rel_str = relative.to_string_lossy();

        if exclude_set.is_match(rel_str.as_ref()) || !include_set.is_match(rel_str.as_ref()) {
            continue;
        }
        files.push(path.to_path_buf());
    }
    Ok(files)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(GlobBuilder::new(pattern).case_insensitive(true).build()?);
    }
    Ok(builder.build()?)
}
