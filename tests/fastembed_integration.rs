//! End-to-end store test against the real MiniLM model
//!
//! Requires a model download (~90MB); run with: cargo test -- --ignored
#![cfg(feature = "fastembed")]

use std::sync::Arc;
use tempfile::TempDir;
use tierstore::embedding::FastEmbedProvider;
use tierstore::index::SearchMode;
use tierstore::store::{StoreOptions, VectorStore};

#[test]
#[ignore] // Requires model download (~90MB)
fn test_semantic_queries_with_minilm() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(
        FastEmbedProvider::with_default_model().expect("Failed to initialize embedding provider"),
    );
    let mut options = StoreOptions::new(temp.path().join("index"), 384);
    options.auto_save = false;
    let store = VectorStore::open(options, provider).unwrap();

    let docs = vec![
        "Nmap scan revealed SSH on port 22 and HTTP on port 80".to_string(),
        "SQL injection in the login form allowed authentication bypass".to_string(),
        "Kerberoasting yielded a crackable service account ticket".to_string(),
    ];
    assert_eq!(store.add_documents(&docs).unwrap(), 3);

    let hits = store
        .search("open ports found by network scanning", 1, SearchMode::Auto)
        .unwrap();
    assert_eq!(hits[0].document.id, 0);

    let hits = store
        .search("database injection vulnerability", 1, SearchMode::Auto)
        .unwrap();
    assert_eq!(hits[0].document.id, 1);
}
