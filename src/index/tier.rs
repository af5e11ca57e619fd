//! Corpus size to index topology mapping

use serde::{Deserialize, Serialize};
use std::fmt;

/// Concrete index configuration bound to a size tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topology {
    /// HNSW graph over exact stored vectors, no training
    Graph,
    /// Inverted file + product quantization, re-ranked against raw vectors
    IvfRefine,
    /// Inverted file + product quantization, codes only
    IvfCompressed,
}

impl Topology {
    /// Whether a fresh backend of this topology must be trained before adds
    pub fn requires_training(self) -> bool {
        !matches!(self, Topology::Graph)
    }

    /// Whether the scan-breadth knob has any effect
    pub fn is_partitioned(self) -> bool {
        !matches!(self, Topology::Graph)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Topology::Graph => "graph",
            Topology::IvfRefine => "ivf_refine",
            Topology::IvfCompressed => "ivf_compressed",
        }
    }
}

impl fmt::Display for Topology {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Size thresholds separating the three tiers
///
/// `n < small_max` selects [`Topology::Graph`], `n < medium_max` selects
/// [`Topology::IvfRefine`], anything larger selects [`Topology::IvfCompressed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierPolicy {
    pub small_max: usize,
    pub medium_max: usize,
}

impl TierPolicy {
    pub fn new(small_max: usize, medium_max: usize) -> Self {
        Self {
            small_max,
            medium_max,
        }
    }

    pub fn tier_for(&self, n: usize) -> Topology {
        if n < self.small_max {
            Topology::Graph
        } else if n < self.medium_max {
            Topology::IvfRefine
        } else {
            Topology::IvfCompressed
        }
    }

    /// Topology an empty store starts in
    pub fn smallest(&self) -> Topology {
        self.tier_for(0)
    }

    /// Returns the destination topology when growing from `current` to `new_total`
    /// leaves the current tier, `None` when the tier is unchanged.
    pub fn crossing(&self, current: usize, new_total: usize) -> Option<Topology> {
        let to = self.tier_for(new_total);
        (to != self.tier_for(current)).then_some(to)
    }
}

impl Default for TierPolicy {
    fn default() -> Self {
        Self::new(1_000_000, 30_000_000)
    }
}
