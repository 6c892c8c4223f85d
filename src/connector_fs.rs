//! Filesystem scan feeding the ingestion pipeline.
//!
//! Walks a directory, keeps files matching the include globs and not the
//! exclude globs, and reads each one into a [`FileItem`] whose `doc_id` is
//! the path relative to the root with `/` separators.

use anyhow::{bail, Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Patterns always skipped regardless of configuration.
const DEFAULT_EXCLUDES: &[&str] = &["**/.git/**", "**/target/**", "**/node_modules/**"];

/// One file read from disk.
#[derive(Debug, Clone)]
pub struct FileItem {
    pub doc_id: String,
    pub source_path: PathBuf,
    pub bytes: Vec<u8>,
}

pub fn scan_directory(
    root: &Path,
    include_globs: &[String],
    exclude_globs: &[String],
) -> Result<Vec<FileItem>> {
    if !root.is_dir() {
        bail!("Sync root is not a directory: {}", root.display());
    }

    let include_set = build_globset(include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(exclude_globs.iter().cloned());
    let exclude_set = build_globset(&excludes)?;

    let mut items = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let doc_id = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");

        if exclude_set.is_match(&doc_id) || !include_set.is_match(&doc_id) {
            continue;
        }

        items.push(read_item(path, doc_id)?);
    }

    items.sort_by(|a, b| a.doc_id.cmp(&b.doc_id));
    tracing::debug!(root = %root.display(), files = items.len(), "scanned directory");
    Ok(items)
}

fn read_item(path: &Path, doc_id: String) -> Result<FileItem> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(FileItem {
        doc_id,
        source_path: path.to_path_buf(),
        bytes,
    })
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern).with_context(|| format!("Invalid glob: {pattern}"))?);
    }
    Ok(builder.build()?)
}
