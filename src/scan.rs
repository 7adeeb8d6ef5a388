//! Resolve CLI ingest arguments into document files.
//!
//! A file argument is taken as-is. A directory argument is walked
//! recursively and filtered through `[ingest] include_globs` and
//! `exclude_globs`, matched against paths relative to that directory.

use anyhow::{bail, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::config::IngestConfig;

pub fn collect_documents(paths: &[PathBuf], config: &IngestConfig) -> Result<Vec<PathBuf>> {
    let include_set = build_globset(&config.include_globs)?;

    let mut excludes = vec!["**/.git/**".to_string(), "**/.*".to_string()];
    excludes.extend(config.exclude_globs.clone());
    let exclude_set = build_globset(&excludes)?;

    let mut files = Vec::new();
    for path in paths {
        if path.is_file() {
            files.push(path.clone());
        } else if path.is_dir() {
            files.extend(scan_dir(path, &include_set, &exclude_set)?);
        } else {
            bail!("No such file or directory: {}", path.display());
        }
    }
    Ok(files)
}

fn scan_dir(root: &Path, include: &GlobSet, exclude: &GlobSet) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        if exclude.is_match(relative) || !include.is_match(relative) {
            continue;
        }
        found.push(path.to_path_buf());
    }
    found.sort();
    Ok(found)
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}
