//! Tiered vector store
//!
//! Architecture:
//! - `VectorStore`: the handle callers share; owns the embedder, the index,
//!   the documents and the dedup ledger
//! - `ledger`: content digest -> document id
//! - `documents`: append-only texts with dense ids
//! - `migration`: rebuild into a new topology when a tier boundary is crossed
//! - `query`: search results and the bounded query log
//! - `persist`: the `.index` / `.meta` artifact pair
//! - `analytics`: read-only views used by gap analysis
//!
//! Locking: queries take `state` for reading. Ingestion and migration are
//! serialized by `writer`; a migration reconstructs under the read lock,
//! builds with no state lock held, and swaps under the write lock.

mod analytics;
mod documents;
mod ledger;
mod migration;
mod persist;
mod query;

pub use analytics::GroupStats;
pub use documents::{Document, DocumentStore};
pub use ledger::{Candidate, ContentDigest, DedupLedger};
pub use migration::MigrationPhase;
pub use persist::{IndexBlob, MetaBlob, StorePaths, FORMAT_VERSION};
pub use query::{QueryLog, QueryLogEntry, SearchHit};

use crate::embedding::{BatchEmbedder, EmbeddingProvider};
use crate::error::{Result, TierStoreError};
use crate::index::{
    build_backend, normalize, restore_backend, IndexBackend, IndexError, IndexParams, SearchMode,
    TierPolicy, Topology,
};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Everything needed to open a store besides the embedder
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Artifacts live at `<base_path>.index` and `<base_path>.meta`
    pub base_path: PathBuf,
    /// Embedding dimension the store is configured for
    pub dimension: usize,
    pub tiers: TierPolicy,
    pub index: IndexParams,
    pub batch_size: usize,
    pub query_log_capacity: usize,
    /// Persist after every migration
    pub auto_save: bool,
}

impl StoreOptions {
    pub fn new(base_path: impl Into<PathBuf>, dimension: usize) -> Self {
        Self {
            base_path: base_path.into(),
            dimension,
            tiers: TierPolicy::default(),
            index: IndexParams::default(),
            batch_size: 32,
            query_log_capacity: 1000,
            auto_save: true,
        }
    }
}

/// Snapshot of store health
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_vectors: usize,
    pub total_documents: usize,
    pub topology: Topology,
    pub phase: MigrationPhase,
    pub migrations: u64,
    pub groups: usize,
    pub query_log_len: usize,
    pub model: String,
    pub dimension: usize,
}

/// Output of [`VectorStore::prepare_batch`]: novel texts and their vectors
#[derive(Debug, Default)]
pub struct PreparedBatch {
    candidates: Vec<Candidate>,
    vectors: Vec<Vec<f32>>,
}

impl PreparedBatch {
    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.candidates.iter().map(|c| c.text.as_str())
    }
}

struct StoreState {
    index: Box<dyn IndexBackend>,
    documents: DocumentStore,
    ledger: DedupLedger,
}

impl StoreState {
    fn empty(topology: Topology, dimension: usize, params: &IndexParams) -> Result<Self> {
        Ok(Self {
            index: build_backend(topology, dimension, params)?,
            documents: DocumentStore::new(),
            ledger: DedupLedger::new(),
        })
    }

    fn append(&mut self, candidates: Vec<Candidate>) {
        let first = self.documents.next_id();
        let (texts, digests): (Vec<String>, Vec<ContentDigest>) = candidates
            .into_iter()
            .map(|c| (c.text, c.digest))
            .unzip();
        self.documents.extend(texts, Utc::now());
        for (offset, digest) in digests.into_iter().enumerate() {
            self.ledger.insert(digest, first + offset as u64);
        }
    }
}

pub struct VectorStore {
    options: StoreOptions,
    paths: StorePaths,
    embedder: BatchEmbedder,
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    persist: Mutex<()>,
    query_log: Mutex<QueryLog>,
    phase: Mutex<MigrationPhase>,
    migrations: AtomicU64,
}

impl VectorStore {
    /// Open the store at `options.base_path`, starting empty when no
    /// artifacts exist there.
    ///
    /// A persisted index whose topology no longer matches the active tier
    /// thresholds is migrated before this returns.
    pub fn open(options: StoreOptions, provider: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        if provider.dimension() != options.dimension {
            return Err(TierStoreError::ConfigMismatch {
                field: "dimension",
                stored: options.dimension.to_string(),
                active: provider.dimension().to_string(),
            });
        }

        let paths = StorePaths::new(&options.base_path);
        let embedder = BatchEmbedder::new(provider, options.batch_size);

        let (state, log) = match persist::read_artifacts(&paths)? {
            Some((index_blob, meta_blob)) => {
                Self::restore_state(&paths, &options, embedder.model_name(), index_blob, meta_blob)?
            }
            None => {
                debug!("No artifacts at {}, starting empty", options.base_path.display());
                let topology = options.tiers.smallest();
                (
                    StoreState::empty(topology, options.dimension, &options.index)?,
                    QueryLog::new(options.query_log_capacity),
                )
            }
        };

        let topology = state.index.topology();
        let store = Self {
            paths,
            embedder,
            state: RwLock::new(state),
            writer: Mutex::new(()),
            persist: Mutex::new(()),
            query_log: Mutex::new(log),
            phase: Mutex::new(MigrationPhase::Stable { topology }),
            migrations: AtomicU64::new(0),
            options,
        };

        let total = store.total_vectors();
        let expected = store.options.tiers.tier_for(total);
        if expected != topology {
            info!(
                "Stored topology {} does not match tier {} for {} vectors, migrating",
                topology, expected, total
            );
            let _writer = store.writer.lock();
            store.migrate(PreparedBatch::default(), topology, expected)?;
        }

        info!(
            "Opened store at {} ({} vectors, {})",
            store.options.base_path.display(),
            total,
            store.active_topology()
        );
        Ok(store)
    }

    fn restore_state(
        paths: &StorePaths,
        options: &StoreOptions,
        model: &str,
        index_blob: IndexBlob,
        meta_blob: MetaBlob,
    ) -> Result<(StoreState, QueryLog)> {
        if index_blob.model != model {
            return Err(TierStoreError::ConfigMismatch {
                field: "model",
                stored: index_blob.model,
                active: model.to_string(),
            });
        }
        if index_blob.dimension != options.dimension {
            return Err(TierStoreError::ConfigMismatch {
                field: "dimension",
                stored: index_blob.dimension.to_string(),
                active: options.dimension.to_string(),
            });
        }
        if index_blob.snapshot.len() != meta_blob.documents.len() {
            return Err(TierStoreError::corrupt(
                &paths.meta,
                format!(
                    "{} documents but {} vectors",
                    meta_blob.documents.len(),
                    index_blob.snapshot.len()
                ),
            ));
        }

        let index = restore_backend(index_blob.snapshot, &options.index)
            .map_err(|e| TierStoreError::corrupt(&paths.index, e.to_string()))?;
        if index.dimension() != options.dimension {
            return Err(TierStoreError::corrupt(
                &paths.index,
                format!(
                    "snapshot dimension {} disagrees with header dimension {}",
                    index.dimension(),
                    options.dimension
                ),
            ));
        }
        // Ids are unique and as many as the documents, so bounding them
        // by the document count pins them to exactly 0..N.
        let total = meta_blob.documents.len() as u64;
        let stray = (0..index.group_count())
            .flat_map(|group| index.group_members(group).iter().copied())
            .find(|&id| id >= total);
        if let Some(id) = stray {
            return Err(TierStoreError::corrupt(
                &paths.index,
                format!("vector id {} has no document ({} documents)", id, total),
            ));
        }

        let documents = DocumentStore::from_documents(meta_blob.documents)
            .map_err(|message| TierStoreError::corrupt(&paths.meta, message))?;
        let ledger = DedupLedger::rebuild(documents.iter().map(|d| d.text.as_str()))
            .map_err(|id| {
                TierStoreError::corrupt(&paths.meta, format!("document {} is a duplicate", id))
            })?;

        let log = QueryLog::restore(options.query_log_capacity, meta_blob.query_log);
        Ok((
            StoreState {
                index,
                documents,
                ledger,
            },
            log,
        ))
    }

    pub fn base_path(&self) -> &Path {
        &self.options.base_path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    pub fn dimension(&self) -> usize {
        self.options.dimension
    }

    pub fn model_name(&self) -> &str {
        self.embedder.model_name()
    }

    pub fn total_vectors(&self) -> usize {
        self.state.read().index.len()
    }

    pub fn active_topology(&self) -> Topology {
        self.state.read().index.topology()
    }

    pub fn phase(&self) -> MigrationPhase {
        *self.phase.lock()
    }

    pub fn migrations(&self) -> u64 {
        self.migrations.load(Ordering::Relaxed)
    }

    pub fn is_duplicate(&self, text: &str) -> bool {
        self.state.read().ledger.is_duplicate(text)
    }

    pub fn document(&self, id: u64) -> Option<Document> {
        self.state.read().documents.get(id).cloned()
    }

    /// Embed texts with the store's embedder, normalized, without storing them
    pub fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(self.embedder.encode(texts)?)
    }

    /// Add novel texts, returning how many were stored
    pub fn add_documents(&self, texts: &[String]) -> Result<usize> {
        let batch = self.prepare_batch(texts)?;
        self.commit_batch(batch)
    }

    /// Filter against the ledger and embed the survivors. Does not mutate the store.
    pub fn prepare_batch(&self, texts: &[String]) -> Result<PreparedBatch> {
        let candidates = self.state.read().ledger.filter_new(texts);
        if candidates.is_empty() {
            debug!("All {} texts already stored", texts.len());
            return Ok(PreparedBatch::default());
        }

        let novel: Vec<String> = candidates.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embedder.encode(&novel)?;
        debug!(
            "Embedded {} of {} texts ({} duplicates skipped)",
            novel.len(),
            texts.len(),
            texts.len() - novel.len()
        );
        Ok(PreparedBatch {
            candidates,
            vectors,
        })
    }

    /// Store a prepared batch, migrating first if it crosses a tier boundary.
    ///
    /// Texts committed by someone else since the batch was prepared are
    /// dropped again here. On error nothing from the batch is stored.
    pub fn commit_batch(&self, mut batch: PreparedBatch) -> Result<usize> {
        if batch.is_empty() {
            return Ok(0);
        }

        let _writer = self.writer.lock();

        let (current, active, trained) = {
            let state = self.state.read();
            let (candidates, vectors): (Vec<Candidate>, Vec<Vec<f32>>) = batch
                .candidates
                .into_iter()
                .zip(batch.vectors)
                .filter(|(c, _)| !state.ledger.contains(&c.digest))
                .unzip();
            batch = PreparedBatch {
                candidates,
                vectors,
            };
            (
                state.documents.len(),
                state.index.topology(),
                state.index.is_trained(),
            )
        };

        let added = batch.len();
        if added == 0 {
            return Ok(0);
        }

        let target = self.options.tiers.tier_for(current + added);
        if target != active || !trained {
            self.migrate(batch, active, target)?;
        } else {
            let mut state = self.state.write();
            let first = state.documents.next_id();
            let ids: Vec<u64> = (first..first + added as u64).collect();
            state.index.add_with_ids(&batch.vectors, &ids)?;
            state.append(batch.candidates);
            debug!("Appended {} vectors to {} index", added, active);
        }

        Ok(added)
    }

    /// Like [`add_documents`](Self::add_documents) with a deadline on embedding.
    ///
    /// On expiry the prepared batch is discarded and nothing is stored.
    pub async fn add_documents_timeout(
        self: &Arc<Self>,
        texts: Vec<String>,
        timeout: Duration,
    ) -> Result<usize> {
        let started = Instant::now();
        let store = Arc::clone(self);
        let prepare = tokio::task::spawn_blocking(move || store.prepare_batch(&texts));

        let batch = match tokio::time::timeout(timeout, prepare).await {
            Ok(joined) => joined.map_err(|e| anyhow::anyhow!("embedding task failed: {}", e))??,
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                warn!("Embedding timed out after {}ms, batch discarded", elapsed_ms);
                return Err(TierStoreError::EmbeddingTimeout { elapsed_ms });
            }
        };

        let store = Arc::clone(self);
        tokio::task::spawn_blocking(move || store.commit_batch(batch))
            .await
            .map_err(|e| anyhow::anyhow!("commit task failed: {}", e))?
    }

    /// Rebuild into `to` with `batch` appended. Caller holds the writer lock.
    fn migrate(&self, batch: PreparedBatch, from: Topology, to: Topology) -> Result<()> {
        let started = Instant::now();
        let PreparedBatch {
            candidates,
            vectors,
        } = batch;
        let incoming = candidates.len();
        *self.phase.lock() = MigrationPhase::Migrating { from, to };
        info!("Migrating index {} -> {} (+{} vectors)", from, to, incoming);

        let failed = |source: IndexError| {
            *self.phase.lock() = MigrationPhase::Stable { topology: from };
            warn!("Migration {} -> {} failed: {}", from, to, source);
            TierStoreError::Migration { from, to, source }
        };

        let existing = {
            let state = self.state.read();
            migration::reconstruct_all(state.index.as_ref()).map_err(&failed)?
        };
        let expected = existing.len() + incoming;

        let index = migration::rebuild(
            existing,
            vectors,
            to,
            self.options.dimension,
            &self.options.index,
        )
        .map_err(&failed)?;

        if index.len() != expected {
            return Err(failed(IndexError::InvalidParameters(format!(
                "rebuilt index holds {} vectors, expected {}",
                index.len(),
                expected
            ))));
        }

        {
            let mut state = self.state.write();
            state.index = index;
            state.append(candidates);
        }
        *self.phase.lock() = MigrationPhase::Stable { topology: to };
        self.migrations.fetch_add(1, Ordering::Relaxed);

        info!(
            "Migrated {} -> {} with {} vectors in {:.2?}",
            from,
            to,
            expected,
            started.elapsed()
        );

        // The batch is committed at this point; a failed save only leaves
        // the on-disk copy behind, and the next save catches it up.
        if self.options.auto_save {
            if let Err(e) = self.save() {
                warn!("Auto-save after migration to {} failed: {}", to, e);
            }
        }
        Ok(())
    }

    /// Top `k` documents for `text`
    pub fn query(&self, text: &str, k: usize, mode: SearchMode) -> Result<Vec<Document>> {
        Ok(self
            .search(text, k, mode)?
            .into_iter()
            .map(|hit| hit.document)
            .collect())
    }

    /// Top `k` documents for `text` with similarities
    pub fn search(&self, text: &str, k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        if k == 0 || self.total_vectors() == 0 {
            return Ok(Vec::new());
        }
        let vector = self.embedder.encode_one(text)?;
        let hits = self.search_normalized(&vector, k, mode)?;
        self.log_query(Some(text.to_string()), vector, &hits);
        Ok(hits)
    }

    /// Top `k` documents for a raw query vector
    pub fn search_vector(&self, vector: &[f32], k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        if k == 0 || self.total_vectors() == 0 {
            return Ok(Vec::new());
        }
        let vector = self.prepare_probe(vector)?;
        let hits = self.search_normalized(&vector, k, mode)?;
        self.log_query(None, vector, &hits);
        Ok(hits)
    }

    fn prepare_probe(&self, vector: &[f32]) -> Result<Vec<f32>> {
        if vector.len() != self.options.dimension {
            return Err(IndexError::InvalidDimension {
                expected: self.options.dimension,
                actual: vector.len(),
            }
            .into());
        }
        let mut vector = vector.to_vec();
        normalize(&mut vector);
        Ok(vector)
    }

    fn search_normalized(&self, vector: &[f32], k: usize, mode: SearchMode) -> Result<Vec<SearchHit>> {
        let state = self.state.read();
        let total = state.documents.len() as u64;
        let hits = state
            .index
            .search(vector, k, mode)?
            .into_iter()
            .filter(|n| n.id < total)
            .filter_map(|n| {
                state.documents.get(n.id).map(|document| SearchHit {
                    document: document.clone(),
                    similarity: n.similarity,
                })
            })
            .collect();
        Ok(hits)
    }

    fn log_query(&self, query: Option<String>, vector: Vec<f32>, hits: &[SearchHit]) {
        self.query_log.lock().push(QueryLogEntry {
            timestamp: Utc::now(),
            query,
            vector,
            result_ids: hits.iter().map(|h| h.document.id).collect(),
            top_similarity: hits.first().map(|h| h.similarity),
        });
    }

    pub fn query_log(&self) -> Vec<QueryLogEntry> {
        self.query_log.lock().to_vec()
    }

    /// Write both artifacts atomically
    pub fn save(&self) -> Result<()> {
        let _persist = self.persist.lock();
        let (index_blob, meta_blob) = {
            let state = self.state.read();
            let log = self.query_log.lock();
            (
                IndexBlob {
                    format_version: FORMAT_VERSION,
                    model: self.embedder.model_name().to_string(),
                    dimension: self.options.dimension,
                    topology: state.index.topology(),
                    snapshot: state.index.snapshot(),
                },
                MetaBlob {
                    format_version: FORMAT_VERSION,
                    documents: state.documents.as_slice().to_vec(),
                    query_log: log.to_vec(),
                },
            )
        };
        persist::write_artifacts(&self.paths, &index_blob, &meta_blob)?;
        info!(
            "Saved {} documents to {}",
            meta_blob.documents.len(),
            self.options.base_path.display()
        );
        Ok(())
    }

    pub fn stats(&self) -> StoreStats {
        let (total_vectors, total_documents, topology, groups) = {
            let state = self.state.read();
            (
                state.index.len(),
                state.documents.len(),
                state.index.topology(),
                state.index.non_empty_groups().len(),
            )
        };
        StoreStats {
            total_vectors,
            total_documents,
            topology,
            phase: self.phase(),
            migrations: self.migrations(),
            groups,
            query_log_len: self.query_log.lock().len(),
            model: self.embedder.model_name().to_string(),
            dimension: self.options.dimension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use tempfile::TempDir;

    const DIM: usize = 16;

    fn options(temp: &TempDir) -> StoreOptions {
        let mut options = StoreOptions::new(temp.path().join("store"), DIM);
        options.tiers = TierPolicy::new(4, 12);
        options.index.nlist_refine = 2;
        options.index.nlist_compressed = 2;
        options.index.pq_m = 4;
        options.index.kmeans_iterations = 5;
        options.auto_save = false;
        options
    }

    fn open(temp: &TempDir) -> VectorStore {
        let provider = Arc::new(HashingProvider::new(DIM).unwrap());
        VectorStore::open(options(temp), provider).unwrap()
    }

    fn texts(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_empty_store() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        assert_eq!(store.total_vectors(), 0);
        assert_eq!(store.active_topology(), Topology::Graph);
        assert!(store.query("anything", 5, SearchMode::Auto).unwrap().is_empty());
        assert_eq!(store.add_documents(&[]).unwrap(), 0);
    }

    #[test]
    fn test_stray_vector_id_is_corrupt() {
        let temp = TempDir::new().unwrap();
        {
            let store = open(&temp);
            store.add_documents(&texts(&["ntlm relay", "asrep roast"])).unwrap();
            store.save().unwrap();
        }

        let paths = StorePaths::new(&options(&temp).base_path);
        let (mut index_blob, meta_blob) = persist::read_artifacts(&paths).unwrap().unwrap();
        match &mut index_blob.snapshot {
            crate::index::IndexSnapshot::Graph(snapshot) => snapshot.ids[1] = 5,
            other => panic!("expected a graph snapshot, got {:?}", other.topology()),
        }
        persist::write_artifacts(&paths, &index_blob, &meta_blob).unwrap();

        let provider = Arc::new(HashingProvider::new(DIM).unwrap());
        let result = VectorStore::open(options(&temp), provider);
        assert!(matches!(result, Err(TierStoreError::CorruptStore { .. })));
    }

    #[test]
    fn test_dimension_mismatch_rejected() {
        let temp = TempDir::new().unwrap();
        let provider = Arc::new(HashingProvider::new(DIM * 2).unwrap());
        let result = VectorStore::open(options(&temp), provider);
        assert!(matches!(
            result,
            Err(TierStoreError::ConfigMismatch { field: "dimension", .. })
        ));
    }

    #[test]
    fn test_prepare_does_not_mutate() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let batch = store.prepare_batch(&texts(&["one", "two", "one"])).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(store.total_vectors(), 0);
        assert!(!store.is_duplicate("one"));

        assert_eq!(store.commit_batch(batch).unwrap(), 2);
        assert!(store.is_duplicate("one"));
    }

    #[test]
    fn test_commit_refilters_stale_batch() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let first = store.prepare_batch(&texts(&["shared", "mine"])).unwrap();
        let second = store.prepare_batch(&texts(&["shared"])).unwrap();

        assert_eq!(store.commit_batch(second).unwrap(), 1);
        assert_eq!(store.commit_batch(first).unwrap(), 1);
        assert_eq!(store.total_vectors(), 2);
        assert_eq!(store.document(1).map(|d| d.text), Some("mine".to_string()));
    }

    #[test]
    fn test_query_logs_entries() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.add_documents(&texts(&["alpha report", "beta report"])).unwrap();

        let hits = store.search("alpha report", 1, SearchMode::Auto).unwrap();
        assert_eq!(hits[0].document.text, "alpha report");

        let log = store.query_log();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].query.as_deref(), Some("alpha report"));
        assert_eq!(log[0].result_ids, vec![0]);
    }

    #[test]
    fn test_search_vector_checks_dimension() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        store.add_documents(&texts(&["alpha"])).unwrap();
        assert!(store.search_vector(&[1.0; 3], 1, SearchMode::Auto).is_err());
    }

    #[test]
    fn test_stats_track_migrations() {
        let temp = TempDir::new().unwrap();
        let store = open(&temp);
        let docs: Vec<String> = (0..5).map(|i| format!("document number {i}")).collect();
        store.add_documents(&docs).unwrap();

        let stats = store.stats();
        assert_eq!(stats.total_vectors, 5);
        assert_eq!(stats.topology, Topology::IvfRefine);
        assert_eq!(stats.migrations, 1);
        assert_eq!(stats.phase, MigrationPhase::Stable { topology: Topology::IvfRefine });
    }
}
