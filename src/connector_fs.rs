//! Filesystem scanning for `hrag ingest <path>`.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;
use crate::extract::content_type_for;

const DEFAULT_EXCLUDES: [&str; 3] = ["**/.git/**", "**/target/**", "**/node_modules/**"];

/// A file selected for ingestion.
#[derive(Debug, Clone, PartialEq)]
pub struct FileEntry {
    pub path: PathBuf,
    /// Path relative to the scan root, used as the document filename.
    pub relative: String,
    pub content_type: &'static str,
    pub size_bytes: u64,
}

/// Walk `root` and return supported files matching the include globs,
/// sorted by relative path. A file path is accepted as its own root.
pub fn scan(root: &Path, config: &IngestConfig) -> Result<Vec<FileEntry>> {
    if !root.exists() {
        bail!("path does not exist: {}", root.display());
    }

    if root.is_file() {
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        return Ok(entry_for(root, name, config)?.into_iter().collect());
    }

    let include = build_globset(&config.include_globs)?;
    let mut excludes: Vec<String> = DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect();
    excludes.extend(config.exclude_globs.iter().cloned());
    let exclude = build_globset(&excludes)?;

    let mut entries = Vec::new();
    for entry in WalkDir::new(root).follow_links(config.follow_symlinks) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path
            .strip_prefix(root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if exclude.is_match(&relative) || !include.is_match(&relative) {
            continue;
        }
        if let Some(file) = entry_for(path, relative, config)? {
            entries.push(file);
        }
    }

    entries.sort_by(|a, b| a.relative.cmp(&b.relative));
    tracing::debug!(root = %root.display(), files = entries.len(), "scanned directory");
    Ok(entries)
}

fn entry_for(path: &Path, relative: String, config: &IngestConfig) -> Result<Option<FileEntry>> {
    let content_type = match content_type_for(path) {
        Some(ct) => ct,
        None => {
            tracing::debug!(path = %path.display(), "skipping unsupported file type");
            return Ok(None);
        }
    };
    let size_bytes = std::fs::metadata(path)?.len();
    if size_bytes > config.max_file_bytes {
        tracing::warn!(
            path = %path.display(),
            size_bytes,
            limit = config.max_file_bytes,
            "skipping oversized file"
        );
        return Ok(None);
    }
    Ok(Some(FileEntry {
        path: path.to_path_buf(),
        relative,
        content_type,
        size_bytes,
    }))
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
