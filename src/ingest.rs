//! Directory ingestion
//!
//! Picks up `*.md` reports and `*.txt` fetched web content, skips anything
//! the store already holds before embedding, then saves.

use crate::error::{Result, TierStoreError};
use crate::store::VectorStore;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Outcome of one refresh
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub files_found: usize,
    pub duplicates_skipped: usize,
    pub added: usize,
    pub total_vectors: usize,
}

/// Files in `dir` with the given extension, sorted by path.
/// A missing directory yields nothing.
pub fn discover(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        debug!("Skipping missing directory {}", dir.display());
        return Ok(Vec::new());
    }

    let entries = fs::read_dir(dir)
        .map_err(|e| TierStoreError::io(e, format!("Failed to list {}", dir.display())))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry =
            entry.map_err(|e| TierStoreError::io(e, format!("Failed to list {}", dir.display())))?;
        let path = entry.path();
        if path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(extension) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Ingest every report and web content file not yet in `store`, then save
pub fn refresh_store(
    store: &VectorStore,
    reports_dir: &Path,
    web_content_dir: &Path,
) -> Result<IngestReport> {
    let mut files = discover(reports_dir, "md")?;
    files.extend(discover(web_content_dir, "txt")?);

    let mut report = IngestReport {
        files_found: files.len(),
        total_vectors: store.total_vectors(),
        ..IngestReport::default()
    };

    if files.is_empty() {
        info!("No reports or web content files found");
        return Ok(report);
    }

    let mut new_docs = Vec::new();
    for path in &files {
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                warn!("Skipping non UTF-8 file {}", path.display());
                continue;
            }
            Err(e) => {
                return Err(TierStoreError::io(e, format!("Failed to read {}", path.display())))
            }
        };
        if store.is_duplicate(&text) {
            report.duplicates_skipped += 1;
            continue;
        }
        new_docs.push(text);
    }

    if new_docs.is_empty() {
        info!("No new unique documents to ingest");
        return Ok(report);
    }

    report.added = store.add_documents(&new_docs)?;
    store.save()?;
    report.total_vectors = store.total_vectors();

    info!(
        "Added {} new docs, store now holds {} vectors",
        report.added, report.total_vectors
    );
    Ok(report)
}
