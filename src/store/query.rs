//! Query results and the bounded query log

use super::documents::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// One ranked query result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub document: Document,
    /// Cosine similarity with the query
    pub similarity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryLogEntry {
    pub timestamp: DateTime<Utc>,
    /// Query text, absent for raw-vector queries
    pub query: Option<String>,
    pub vector: Vec<f32>,
    pub result_ids: Vec<u64>,
    /// Similarity of the best hit, absent when nothing matched
    pub top_similarity: Option<f32>,
}

/// Fixed-capacity ring buffer, oldest entry evicted first
#[derive(Debug)]
pub struct QueryLog {
    capacity: usize,
    entries: VecDeque<QueryLogEntry>,
}

impl QueryLog {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Restore persisted entries, keeping only the newest `capacity`
    pub fn restore(capacity: usize, entries: Vec<QueryLogEntry>) -> Self {
        let mut log = Self::new(capacity);
        for entry in entries {
            log.push(entry);
        }
        log
    }

    pub fn push(&mut self, entry: QueryLogEntry) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &QueryLogEntry> {
        self.entries.iter()
    }

    pub fn to_vec(&self) -> Vec<QueryLogEntry> {
        self.entries.iter().cloned().collect()
    }
}
