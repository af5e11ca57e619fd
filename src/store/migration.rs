//! Rebuilding the index under a new topology
//!
//! A rebuild runs in two halves so the caller can choose what lock each half
//! runs under: [`reconstruct_all`] reads the live backend, [`rebuild`] builds
//! a brand new backend from owned vectors and never touches the live one.

use crate::index::{
    build_backend, normalize_all, IndexBackend, IndexError, IndexParams, Topology,
};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::fmt;
use tracing::{debug, info};

/// Lifecycle of the active index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MigrationPhase {
    Stable { topology: Topology },
    Migrating { from: Topology, to: Topology },
}

impl MigrationPhase {
    pub fn is_migrating(&self) -> bool {
        matches!(self, MigrationPhase::Migrating { .. })
    }
}

impl fmt::Display for MigrationPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MigrationPhase::Stable { topology } => write!(f, "stable ({})", topology),
            MigrationPhase::Migrating { from, to } => write!(f, "migrating ({} -> {})", from, to),
        }
    }
}

/// Every stored vector in id order `0..len`
pub fn reconstruct_all(index: &dyn IndexBackend) -> Result<Vec<Vec<f32>>, IndexError> {
    let count = index.len();
    if count == 0 {
        return Ok(Vec::new());
    }
    index.reconstruct_range(0, count)
}

/// Build a populated backend of topology `to` holding `existing` followed by `incoming`.
///
/// Ids are assigned densely from 0 in concatenation order. The combined set
/// is normalized once, and training (when the topology needs it) sees a
/// seeded sample of at most `train_sample_cap` vectors.
pub fn rebuild(
    mut existing: Vec<Vec<f32>>,
    incoming: Vec<Vec<f32>>,
    to: Topology,
    dimension: usize,
    params: &IndexParams,
) -> Result<Box<dyn IndexBackend>, IndexError> {
    existing.extend(incoming);
    let mut vectors = existing;
    normalize_all(&mut vectors);

    let mut index = build_backend(to, dimension, params)?;

    if to.requires_training() {
        let sample = training_sample(&vectors, params.train_sample_cap, params.seed);
        info!(
            "Training {} index on {} of {} vectors",
            to,
            sample.len(),
            vectors.len()
        );
        index.train(&sample)?;
    }

    let ids: Vec<u64> = (0..vectors.len() as u64).collect();
    index.add_with_ids(&vectors, &ids)?;
    debug!("Bulk-added {} vectors into {} index", ids.len(), to);

    Ok(index)
}

/// Seeded uniform sample without replacement, kept in id order
pub fn training_sample(vectors: &[Vec<f32>], cap: usize, seed: u64) -> Vec<Vec<f32>> {
    if vectors.len() <= cap {
        return vectors.to_vec();
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = rand::seq::index::sample(&mut rng, vectors.len(), cap).into_vec();
    picked.sort_unstable();
    picked.into_iter().map(|i| vectors[i].clone()).collect()
}
