//! tierstore - tiered, auto-migrating vector store
//!
//! Deduplicates and embeds documents, keeps them in an approximate nearest
//! neighbor index whose topology is picked by corpus size, and rebuilds that
//! index when the corpus crosses a size tier. Gap analysis and directory
//! ingestion sit on top of the store.

pub mod cli;
pub mod config;
pub mod embedding;
pub mod error;
pub mod expansion;
pub mod index;
pub mod ingest;
pub mod store;

pub use error::{Result, TierStoreError};
