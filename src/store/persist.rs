//! On-disk artifact pair
//!
//! `<base>.index` holds the postcard-encoded, zstd-compressed [`IndexBlob`];
//! `<base>.meta` holds the JSON [`MetaBlob`]. Each file is written to a
//! temporary sibling, synced, then renamed into place.

use super::documents::Document;
use super::query::QueryLogEntry;
use crate::error::{Result, TierStoreError};
use crate::index::{IndexSnapshot, Topology};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const FORMAT_VERSION: u32 = 1;

const COMPRESSION_LEVEL: i32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexBlob {
    pub format_version: u32,
    pub model: String,
    pub dimension: usize,
    pub topology: Topology,
    pub snapshot: IndexSnapshot,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaBlob {
    pub format_version: u32,
    pub documents: Vec<Document>,
    #[serde(default)]
    pub query_log: Vec<QueryLogEntry>,
}

/// Locations of the two artifacts sharing one base path
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub index: PathBuf,
    pub meta: PathBuf,
}

impl StorePaths {
    pub fn new(base: &Path) -> Self {
        Self {
            index: with_suffix(base, ".index"),
            meta: with_suffix(base, ".meta"),
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = OsString::from(path.as_os_str());
    name.push(suffix);
    PathBuf::from(name)
}

/// Write both artifacts; a crash mid-save leaves each file either old or new
pub fn write_artifacts(paths: &StorePaths, index: &IndexBlob, meta: &MetaBlob) -> Result<()> {
    let encoded = postcard::to_stdvec(index)
        .map_err(|e| TierStoreError::Other(anyhow::anyhow!("Failed to encode index: {}", e)))?;
    let compressed = zstd::encode_all(encoded.as_slice(), COMPRESSION_LEVEL)
        .map_err(|e| TierStoreError::io(e, "Failed to compress index"))?;
    let meta_json = serde_json::to_vec(meta).map_err(|e| TierStoreError::Json {
        source: e,
        context: "Failed to encode store metadata".to_string(),
    })?;

    let index_tmp = with_suffix(&paths.index, ".tmp");
    let meta_tmp = with_suffix(&paths.meta, ".tmp");
    write_synced(&index_tmp, &compressed)?;
    write_synced(&meta_tmp, &meta_json)?;

    rename(&index_tmp, &paths.index)?;
    rename(&meta_tmp, &paths.meta)?;

    debug!(
        "Saved {} vectors ({} compressed bytes) to {}",
        index.snapshot.len(),
        compressed.len(),
        paths.index.display()
    );
    Ok(())
}

/// Read both artifacts, `None` when neither exists
pub fn read_artifacts(paths: &StorePaths) -> Result<Option<(IndexBlob, MetaBlob)>> {
    match (paths.index.exists(), paths.meta.exists()) {
        (false, false) => return Ok(None),
        (true, false) => {
            return Err(TierStoreError::corrupt(
                &paths.meta,
                "metadata file missing while index file exists",
            ))
        }
        (false, true) => {
            return Err(TierStoreError::corrupt(
                &paths.index,
                "index file missing while metadata file exists",
            ))
        }
        (true, true) => {}
    }

    let compressed = read_file(&paths.index)?;
    let encoded = zstd::decode_all(compressed.as_slice())
        .map_err(|e| TierStoreError::corrupt(&paths.index, format!("decompression failed: {}", e)))?;
    let index: IndexBlob = postcard::from_bytes(&encoded)
        .map_err(|e| TierStoreError::corrupt(&paths.index, format!("decode failed: {}", e)))?;

    let meta_bytes = read_file(&paths.meta)?;
    let meta: MetaBlob = serde_json::from_slice(&meta_bytes)
        .map_err(|e| TierStoreError::corrupt(&paths.meta, format!("decode failed: {}", e)))?;

    for (path, version) in [(&paths.index, index.format_version), (&paths.meta, meta.format_version)] {
        if version != FORMAT_VERSION {
            return Err(TierStoreError::corrupt(
                path,
                format!("unsupported format version {}", version),
            ));
        }
    }

    if index.snapshot.topology() != index.topology {
        return Err(TierStoreError::corrupt(
            &paths.index,
            format!(
                "header topology {} disagrees with snapshot topology {}",
                index.topology,
                index.snapshot.topology()
            ),
        ));
    }

    Ok(Some((index, meta)))
}

fn write_synced(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| {
            TierStoreError::io(e, format!("Failed to create directory: {}", parent.display()))
        })?;
    }

    let mut file = fs::File::create(path)
        .map_err(|e| TierStoreError::io(e, format!("Failed to create {}", path.display())))?;
    file.write_all(data)
        .map_err(|e| TierStoreError::io(e, format!("Failed to write {}", path.display())))?;
    file.sync_all()
        .map_err(|e| TierStoreError::io(e, format!("Failed to sync {}", path.display())))?;
    Ok(())
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to).map_err(|e| {
        TierStoreError::io(
            e,
            format!("Failed to rename {} -> {}", from.display(), to.display()),
        )
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| TierStoreError::io(e, format!("Failed to read {}", path.display())))
}
