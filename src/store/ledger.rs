//! Content-digest dedup ledger

use std::collections::{HashMap, HashSet};
use std::fmt;

/// BLAKE3 digest of a document's UTF-8 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentDigest([u8; 32]);

impl ContentDigest {
    pub fn of(text: &str) -> Self {
        Self(*blake3::hash(text.as_bytes()).as_bytes())
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A candidate that survived dedup filtering
#[derive(Debug, Clone)]
pub struct Candidate {
    pub text: String,
    pub digest: ContentDigest,
}

/// Digest -> document id, first occurrence wins
#[derive(Debug, Default)]
pub struct DedupLedger {
    ids: HashMap<ContentDigest, u64>,
}

impl DedupLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rehash restored documents in id order.
    ///
    /// Returns the id of the first document whose digest was already taken,
    /// which can only happen if the persisted documents are corrupt.
    pub fn rebuild<'a>(texts: impl IntoIterator<Item = &'a str>) -> Result<Self, u64> {
        let mut ledger = Self::new();
        for (id, text) in texts.into_iter().enumerate() {
            if !ledger.insert(ContentDigest::of(text), id as u64) {
                return Err(id as u64);
            }
        }
        Ok(ledger)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, digest: &ContentDigest) -> bool {
        self.ids.contains_key(digest)
    }

    pub fn get(&self, digest: &ContentDigest) -> Option<u64> {
        self.ids.get(digest).copied()
    }

    pub fn is_duplicate(&self, text: &str) -> bool {
        self.contains(&ContentDigest::of(text))
    }

    /// Record a digest; returns false and leaves the ledger unchanged if it is known
    pub fn insert(&mut self, digest: ContentDigest, id: u64) -> bool {
        match self.ids.entry(digest) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(id);
                true
            }
        }
    }

    /// Drop texts already in the ledger and repeats within `texts`, keeping order
    pub fn filter_new(&self, texts: &[String]) -> Vec<Candidate> {
        let mut batch_seen = HashSet::new();
        texts
            .iter()
            .filter_map(|text| {
                let digest = ContentDigest::of(text);
                (!self.contains(&digest) && batch_seen.insert(digest)).then(|| Candidate {
                    text: text.clone(),
                    digest,
                })
            })
            .collect()
    }
}
