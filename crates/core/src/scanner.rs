//! Scans the filesystem for files the extraction service supports.
//!
//! Enumeration only: hashing happens later, inside each pipeline instance.

use crate::models::ScannedFile;
use globset::{Glob, GlobSet, GlobSetBuilder};
use providers::FileType;
use std::path::{Path, PathBuf};
use tracing::info;
use walkdir::WalkDir;

pub fn scan(
    roots: &[PathBuf],
    excludes: &[String],
    extensions: &[String],
) -> anyhow::Result<Vec<ScannedFile>> {
    let exclude_set = build_globset(excludes)?;
    let mut scanned = Vec::new();

    for root in roots {
        for entry in WalkDir::new(root)
            .follow_links(true)
            .into_iter()
            // depth 0 is the root itself, which the caller chose explicitly
            .filter_entry(|e| e.depth() == 0 || should_descend(e.path(), &exclude_set))
        {
            let entry = match entry {
                Ok(e) => e,
                Err(_) => continue,
            };
            let path = entry.path();
            if !entry.file_type().is_file() || is_excluded(path, &exclude_set) || is_hidden(path) {
                continue;
            }

            let ext = match path.extension().and_then(|s| s.to_str()) {
                Some(e) => e.to_lowercase(),
                None => continue,
            };
            if !extensions.iter().any(|allowed| allowed == &ext) {
                continue;
            }
            let Some(file_type) = FileType::from_extension(&ext) else {
                continue;
            };

            scanned.push(ScannedFile {
                path: path.to_path_buf(),
                file_type,
            });
        }
    }

    scanned.sort_by(|a, b| a.path.cmp(&b.path));
    info!(roots = roots.len(), files = scanned.len(), "scan complete");
    Ok(scanned)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in patterns {
        builder.add(Glob::new(pat)?);
    }
    Ok(builder.build()?)
}

fn should_descend(path: &Path, excludes: &GlobSet) -> bool {
    // Hidden directories include .trash and .archive, so a rescan never
    // picks up files a previous run moved aside.
    !is_excluded(path, excludes) && !is_hidden(path)
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

fn is_excluded(path: &Path, excludes: &GlobSet) -> bool {
    excludes.is_match(path)
}
