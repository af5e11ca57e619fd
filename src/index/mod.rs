//! Approximate nearest neighbor backends
//!
//! Architecture:
//! - `IndexBackend` trait: one implementation per [`Topology`]
//! - `GraphIndex`: HNSW graph over exact vectors (small corpora)
//! - `IvfIndex`: inverted file + product quantization, with or without an exact
//!   refine stage (medium and very large corpora)
//! - `TierPolicy`: pure corpus size -> topology selection
//!
//! All backends score by inner product; callers only ever insert
//! unit-normalized vectors, so similarity equals cosine similarity.

mod graph;
mod ivf;
mod kmeans;
mod pq;
mod tier;

pub use graph::{GraphIndex, GraphSnapshot};
pub use ivf::{IvfIndex, IvfSnapshot};
pub use tier::{TierPolicy, Topology};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Invalid dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("Index must be trained before vectors can be added")]
    NotTrained,

    #[error("Not enough training data: need at least {needed}, got {got}")]
    NotEnoughTrainingData { needed: usize, got: usize },

    #[error("Vector at position {position} is not finite")]
    NonFiniteVector { position: usize },

    #[error("Vector count {vectors} does not match id count {ids}")]
    LengthMismatch { vectors: usize, ids: usize },

    #[error("Duplicate id: {0}")]
    DuplicateId(u64),

    #[error("Id not present in index: {0}")]
    MissingId(u64),

    #[error("Invalid index parameters: {0}")]
    InvalidParameters(String),
}

/// Search result with ID and similarity score
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    /// Document id
    pub id: u64,
    /// Inner product with the query (cosine on unit vectors)
    pub similarity: f32,
}

/// Precision/latency knob for partitioned topologies
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    /// Balanced default scan breadth
    #[default]
    Auto,
    /// Probe more partitions for recall
    Breadth,
    /// Probe a single partition for latency
    Depth,
}

impl SearchMode {
    /// Number of inverted lists to probe for a backend with `nlist` lists
    pub fn nprobe(self, params: &IndexParams, nlist: usize) -> usize {
        let wanted = match self {
            SearchMode::Auto => params.nprobe_auto,
            SearchMode::Breadth => params.nprobe_breadth,
            SearchMode::Depth => 1,
        };
        wanted.clamp(1, nlist.max(1))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Auto => "auto",
            SearchMode::Breadth => "breadth",
            SearchMode::Depth => "depth",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(SearchMode::Auto),
            "breadth" => Ok(SearchMode::Breadth),
            "depth" => Ok(SearchMode::Depth),
            other => Err(format!(
                "Unknown search mode: {}. Supported: auto, breadth, depth",
                other
            )),
        }
    }
}

/// Backend construction parameters shared by every topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexParams {
    /// HNSW M parameter (number of connections per layer)
    pub hnsw_m: usize,
    /// HNSW construction parameter (higher = better recall, slower build)
    pub hnsw_ef_construction: usize,
    /// HNSW search parameter
    pub hnsw_ef_search: usize,
    /// Inverted lists for the refine tier
    pub nlist_refine: usize,
    /// Inverted lists for the compressed tier
    pub nlist_compressed: usize,
    /// Product quantizer sub-spaces (must divide the dimension)
    pub pq_m: usize,
    /// Lloyd iterations for coarse and sub-space k-means
    pub kmeans_iterations: usize,
    /// Approximate candidates per requested result in the refine tier
    pub refine_factor: usize,
    /// Lists probed in `auto` mode
    pub nprobe_auto: usize,
    /// Lists probed in `breadth` mode
    pub nprobe_breadth: usize,
    /// Upper bound on vectors drawn for training
    pub train_sample_cap: usize,
    /// Seed for training sample selection and k-means initialisation
    pub seed: u64,
}

impl Default for IndexParams {
    fn default() -> Self {
        Self {
            hnsw_m: 32,
            hnsw_ef_construction: 200,
            hnsw_ef_search: 64,
            nlist_refine: 4096,
            nlist_compressed: 16384,
            pq_m: 96,
            kmeans_iterations: 20,
            refine_factor: 4,
            nprobe_auto: 16,
            nprobe_breadth: 64,
            train_sample_cap: 250_000,
            seed: 0x7133_5eed,
        }
    }
}

/// Serializable backend state, one variant per backend implementation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum IndexSnapshot {
    Graph(GraphSnapshot),
    Ivf(IvfSnapshot),
}

impl IndexSnapshot {
    pub fn topology(&self) -> Topology {
        match self {
            IndexSnapshot::Graph(_) => Topology::Graph,
            IndexSnapshot::Ivf(s) => s.topology,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            IndexSnapshot::Graph(s) => s.ids.len(),
            IndexSnapshot::Ivf(s) => s.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Capability set of one ANN topology
pub trait IndexBackend: Send + Sync {
    fn topology(&self) -> Topology;

    fn dimension(&self) -> usize;

    /// Number of stored vectors
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_trained(&self) -> bool;

    /// Fit internal parameters on a sample; a no-op for untrained topologies
    fn train(&mut self, samples: &[Vec<f32>]) -> Result<(), IndexError>;

    /// Add a batch. The whole batch is validated before anything is stored,
    /// so an error leaves the index unchanged.
    fn add_with_ids(&mut self, vectors: &[Vec<f32>], ids: &[u64]) -> Result<(), IndexError>;

    /// Up to `k` neighbors by descending similarity, ties by ascending id
    fn search(&self, query: &[f32], k: usize, mode: SearchMode)
        -> Result<Vec<Neighbor>, IndexError>;

    /// Vectors for ids `start..start + count`, in id order
    fn reconstruct_range(&self, start: u64, count: usize) -> Result<Vec<Vec<f32>>, IndexError>;

    /// Number of internal partitions; one for a non-empty unpartitioned backend
    fn group_count(&self) -> usize;

    /// Ids stored in partition `group`, empty when out of range
    fn group_members(&self, group: usize) -> &[u64];

    /// Partitions holding at least one id, ascending
    fn non_empty_groups(&self) -> Vec<usize> {
        (0..self.group_count())
            .filter(|&group| !self.group_members(group).is_empty())
            .collect()
    }

    fn snapshot(&self) -> IndexSnapshot;
}

/// Create an empty backend for `topology`
pub fn build_backend(
    topology: Topology,
    dimension: usize,
    params: &IndexParams,
) -> Result<Box<dyn IndexBackend>, IndexError> {
    if dimension == 0 {
        return Err(IndexError::InvalidParameters(
            "dimension must be greater than 0".to_string(),
        ));
    }
    match topology {
        Topology::Graph => Ok(Box::new(GraphIndex::new(dimension, params))),
        Topology::IvfRefine | Topology::IvfCompressed => {
            Ok(Box::new(IvfIndex::new(topology, dimension, params)?))
        }
    }
}

/// Rebuild a live backend from persisted state
pub fn restore_backend(
    snapshot: IndexSnapshot,
    params: &IndexParams,
) -> Result<Box<dyn IndexBackend>, IndexError> {
    match snapshot {
        IndexSnapshot::Graph(s) => Ok(Box::new(GraphIndex::restore(s, params)?)),
        IndexSnapshot::Ivf(s) => Ok(Box::new(IvfIndex::restore(s, params)?)),
    }
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Scale to unit length in place; zero vectors are left untouched
pub fn normalize(vector: &mut [f32]) {
    let norm = dot(vector, vector).sqrt();
    if norm > 0.0 && norm.is_finite() {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

pub fn normalize_all(vectors: &mut [Vec<f32>]) {
    for v in vectors.iter_mut() {
        normalize(v);
    }
}

/// Sort by descending similarity, ascending id on ties, and keep `k`
pub(crate) fn rank_neighbors(mut neighbors: Vec<Neighbor>, k: usize) -> Vec<Neighbor> {
    neighbors.sort_by(|a, b| match b.similarity.total_cmp(&a.similarity) {
        Ordering::Equal => a.id.cmp(&b.id),
        other => other,
    });
    neighbors.truncate(k);
    neighbors
}

/// Shape checks applied to every batch before a backend mutates
pub(crate) fn validate_batch(
    dimension: usize,
    vectors: &[Vec<f32>],
    ids: &[u64],
    contains: impl Fn(u64) -> bool,
) -> Result<(), IndexError> {
    if vectors.len() != ids.len() {
        return Err(IndexError::LengthMismatch {
            vectors: vectors.len(),
            ids: ids.len(),
        });
    }
    let mut seen = std::collections::HashSet::with_capacity(ids.len());
    for (position, (vector, &id)) in vectors.iter().zip(ids).enumerate() {
        validate_vector(dimension, vector, position)?;
        if contains(id) || !seen.insert(id) {
            return Err(IndexError::DuplicateId(id));
        }
    }
    Ok(())
}

pub(crate) fn validate_vector(
    dimension: usize,
    vector: &[f32],
    position: usize,
) -> Result<(), IndexError> {
    if vector.len() != dimension {
        return Err(IndexError::InvalidDimension {
            expected: dimension,
            actual: vector.len(),
        });
    }
    if vector.iter().any(|v| !v.is_finite()) {
        return Err(IndexError::NonFiniteVector { position });
    }
    Ok(())
}
