//! Read-only views over groups, coverage and the query log

use super::{StoreState, VectorStore};
use crate::error::Result;
use crate::index::SearchMode;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};

const STOPWORDS: &[&str] = &[
    "about", "after", "also", "been", "before", "being", "between", "both", "could", "does",
    "each", "from", "have", "into", "more", "most", "only", "other", "over", "same", "should",
    "some", "such", "than", "that", "their", "them", "then", "there", "these", "they", "this",
    "those", "through", "under", "very", "were", "what", "when", "where", "which", "while",
    "with", "would", "your",
];

/// Coverage summary for one index partition
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupStats {
    pub group_id: usize,
    pub doc_count: usize,
    /// Whole days since the oldest member was added, at least 1
    pub age_days: i64,
    /// Most frequent content word across members
    pub keyword: Option<String>,
}

impl VectorStore {
    /// Ids of non-empty groups
    pub fn list_groups(&self) -> Vec<usize> {
        self.state.read().index.non_empty_groups()
    }

    pub fn group_stats(&self, group_id: usize) -> Option<GroupStats> {
        let state = self.state.read();
        summarize_group(&state, group_id, Utc::now())
    }

    /// Stats for every non-empty group, read under one lock
    pub fn all_group_stats(&self) -> Vec<GroupStats> {
        let state = self.state.read();
        let now = Utc::now();
        state
            .index
            .non_empty_groups()
            .into_iter()
            .filter_map(|group| summarize_group(&state, group, now))
            .collect()
    }

    /// Best similarity between `probe` and any stored document, `None` when empty.
    ///
    /// Probes use the widest scan and are not recorded in the query log.
    pub fn nearest_similarity(&self, probe: &[f32]) -> Result<Option<f32>> {
        if self.total_vectors() == 0 {
            return Ok(None);
        }
        let probe = self.prepare_probe(probe)?;
        let hits = self.search_normalized(&probe, 1, SearchMode::Breadth)?;
        Ok(hits.first().map(|hit| hit.similarity))
    }

    /// Embed `text` and probe with it
    pub fn nearest_similarity_text(&self, text: &str) -> Result<Option<f32>> {
        if self.total_vectors() == 0 {
            return Ok(None);
        }
        let probe = self.embedder.encode_one(text)?;
        self.nearest_similarity(&probe)
    }

    /// Distinct logged query texts whose best hit fell below `min_similarity`
    /// or that matched nothing, sorted.
    pub fn low_similarity_queries(&self, min_similarity: f32) -> Vec<String> {
        let log = self.query_log.lock();
        log.iter()
            .filter(|entry| entry.top_similarity.map_or(true, |s| s < min_similarity))
            .filter_map(|entry| entry.query.clone())
            .filter(|query| !query.trim().is_empty())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }
}

fn summarize_group(state: &StoreState, group_id: usize, now: DateTime<Utc>) -> Option<GroupStats> {
    let members = state.index.group_members(group_id);
    let documents: Vec<_> = members
        .iter()
        .filter_map(|&id| state.documents.get(id))
        .collect();
    let oldest = documents.iter().map(|d| d.added_at).min()?;

    Some(GroupStats {
        group_id,
        doc_count: documents.len(),
        age_days: (now - oldest).num_days().max(1),
        keyword: top_keyword(documents.iter().map(|d| d.text.as_str())),
    })
}

/// Most frequent lowercase word longer than three letters, ties to the
/// alphabetically first
fn top_keyword<'a>(texts: impl IntoIterator<Item = &'a str>) -> Option<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.chars().count() > 3)
            .map(str::to_lowercase)
            .filter(|w| !STOPWORDS.contains(&w.as_str()) && !w.chars().all(|c| c.is_numeric()))
        {
            *counts.entry(word).or_insert(0) += 1;
        }
    }

    counts
        .into_iter()
        .max_by(|(wa, ca), (wb, cb)| ca.cmp(cb).then_with(|| wb.cmp(wa)))
        .map(|(word, _)| word)
}
