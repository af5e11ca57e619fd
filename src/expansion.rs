//! Gap analysis
//!
//! Turns coverage holes in a store into search topics for a crawler or an
//! agent to pursue. Three scans feed the output:
//! - taxonomy labels with no document nearby
//! - groups whose documents-per-day rate is below `coverage_alpha`
//! - logged queries whose best hit was weak

use crate::config::ExpansionConfig;
use crate::error::{Result, TierStoreError};
use crate::store::VectorStore;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info};

pub struct ExpansionGenerator<'a> {
    store: &'a VectorStore,
    settings: ExpansionConfig,
    labels: Vec<String>,
    label_vectors: Vec<Vec<f32>>,
}

/// One line per label, surrounding whitespace trimmed, blank lines skipped
pub fn parse_taxonomy(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

impl<'a> ExpansionGenerator<'a> {
    pub fn new(store: &'a VectorStore, labels: Vec<String>, settings: ExpansionConfig) -> Result<Self> {
        let label_vectors = if labels.is_empty() {
            Vec::new()
        } else {
            store.embed(&labels)?
        };
        debug!("Loaded {} taxonomy labels", labels.len());
        Ok(Self {
            store,
            settings,
            labels,
            label_vectors,
        })
    }

    pub fn from_taxonomy_file(
        store: &'a VectorStore,
        path: &Path,
        settings: ExpansionConfig,
    ) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            TierStoreError::io(e, format!("Failed to read taxonomy: {}", path.display()))
        })?;
        Self::new(store, parse_taxonomy(&content), settings)
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Labels whose nearest stored document is below `gap_threshold`.
    /// Every label is a gap in an empty store.
    pub fn taxonomy_gaps(&self) -> Result<BTreeSet<String>> {
        let mut missing = BTreeSet::new();
        for (label, vector) in self.labels.iter().zip(&self.label_vectors) {
            let nearest = self.store.nearest_similarity(vector)?;
            if nearest.map_or(true, |s| s < self.settings.gap_threshold) {
                missing.insert(label.clone());
            }
        }
        Ok(missing)
    }

    /// "Deep dive on <keyword>" for each group covered at fewer than
    /// `coverage_alpha` documents per day of age
    pub fn shallow_groups(&self) -> BTreeSet<String> {
        self.store
            .all_group_stats()
            .into_iter()
            .filter(|stats| {
                (stats.doc_count as f32 / stats.age_days.max(1) as f32) < self.settings.coverage_alpha
            })
            .map(|stats| {
                let topic = stats
                    .keyword
                    .unwrap_or_else(|| format!("group {}", stats.group_id));
                format!("Deep dive on {}", topic)
            })
            .collect()
    }

    pub fn unmet_queries(&self) -> BTreeSet<String> {
        self.store
            .low_similarity_queries(self.settings.min_similarity)
            .into_iter()
            .collect()
    }

    /// Sorted union of all three scans, at most `top_n` entries
    pub fn suggestions(&self) -> Result<Vec<String>> {
        let missing = self.taxonomy_gaps()?;
        let shallow = self.shallow_groups();
        let unmet = self.unmet_queries();
        info!(
            "Gap scan: {} taxonomy gaps, {} shallow groups, {} unmet queries",
            missing.len(),
            shallow.len(),
            unmet.len()
        );

        let mut all: BTreeSet<String> = missing;
        all.extend(shallow);
        all.extend(unmet);
        Ok(all.into_iter().take(self.settings.top_n).collect())
    }
}
