//! Append-only document store with dense ids

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An ingested document; `id` is its insertion position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: u64,
    pub text: String,
    pub added_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct DocumentStore {
    documents: Vec<Document>,
}

impl DocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adopt restored documents, rejecting any gap or reordering in ids
    pub fn from_documents(documents: Vec<Document>) -> Result<Self, String> {
        if let Some((position, doc)) = documents
            .iter()
            .enumerate()
            .find(|(position, doc)| doc.id != *position as u64)
        {
            return Err(format!(
                "document at position {} carries id {}",
                position, doc.id
            ));
        }
        Ok(Self { documents })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Id the next appended document will receive
    pub fn next_id(&self) -> u64 {
        self.documents.len() as u64
    }

    pub fn get(&self, id: u64) -> Option<&Document> {
        usize::try_from(id).ok().and_then(|i| self.documents.get(i))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    pub fn as_slice(&self) -> &[Document] {
        &self.documents
    }

    /// Append texts with consecutive ids, returning the first id assigned
    pub fn extend(&mut self, texts: impl IntoIterator<Item = String>, added_at: DateTime<Utc>) -> u64 {
        let first = self.next_id();
        for text in texts {
            let id = self.next_id();
            self.documents.push(Document { id, text, added_at });
        }
        first
    }
}
