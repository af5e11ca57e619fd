/// Store integration tests: dedup, tier migration, persistence and failure atomicity
///
/// All tests use the offline hashing embedder so they run without model downloads.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tierstore::embedding::{EmbeddingError, EmbeddingProvider, HashingProvider, HASHING_MODEL_NAME};
use tierstore::index::{SearchMode, TierPolicy, Topology};
use tierstore::store::{MigrationPhase, StoreOptions, VectorStore};
use tierstore::TierStoreError;

const DIM: usize = 32;

fn options(temp: &TempDir) -> StoreOptions {
    let mut options = StoreOptions::new(temp.path().join("rag/index"), DIM);
    options.tiers = TierPolicy::new(4, 12);
    options.index.nlist_refine = 2;
    options.index.nlist_compressed = 2;
    options.index.pq_m = 4;
    options.index.kmeans_iterations = 8;
    options.auto_save = false;
    options
}

fn hashing() -> Arc<dyn EmbeddingProvider> {
    Arc::new(HashingProvider::new(DIM).unwrap())
}

fn open(temp: &TempDir) -> VectorStore {
    VectorStore::open(options(temp), hashing()).unwrap()
}

fn texts(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn corpus(range: std::ops::Range<usize>) -> Vec<String> {
    range
        .map(|i| format!("finding {i}: service {} exposed on port {}", i * 7, 1000 + i))
        .collect()
}

/// Wraps the hashing embedder, counting texts and failing on demand
struct InstrumentedProvider {
    inner: HashingProvider,
    embedded: AtomicUsize,
    delay: Duration,
    model: String,
}

impl InstrumentedProvider {
    fn new() -> Self {
        Self {
            inner: HashingProvider::new(DIM).unwrap(),
            embedded: AtomicUsize::new(0),
            delay: Duration::ZERO,
            model: HASHING_MODEL_NAME.to_string(),
        }
    }

    fn slow(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::new()
        }
    }

    fn named(model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..Self::new()
        }
    }
}

impl EmbeddingProvider for InstrumentedProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.embed_batch(&[text.to_string()]).map(|mut v| v.remove(0))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if texts.iter().any(|t| t.contains("poison")) {
            return Err(EmbeddingError::GenerationError("upstream refused".to_string()));
        }
        self.embedded.fetch_add(texts.len(), Ordering::SeqCst);
        self.inner.embed_batch(texts)
    }

    fn dimension(&self) -> usize {
        DIM
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

#[test]
fn test_duplicate_texts_are_stored_once() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);

    let added = store
        .add_documents(&texts(&["Alpha text", "Beta text", "Alpha text"]))
        .unwrap();

    assert_eq!(added, 2);
    assert_eq!(store.total_vectors(), 2);
    assert!(store.is_duplicate("Alpha text"));
    assert!(!store.is_duplicate("Gamma text"));
}

#[test]
fn test_only_novel_texts_are_embedded() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(InstrumentedProvider::new());
    let store = VectorStore::open(options(&temp), provider.clone()).unwrap();

    store.add_documents(&texts(&["one", "two"])).unwrap();
    assert_eq!(provider.embedded.load(Ordering::SeqCst), 2);

    assert_eq!(store.add_documents(&texts(&["two", "one", "two"])).unwrap(), 0);
    assert_eq!(provider.embedded.load(Ordering::SeqCst), 2);

    store.add_documents(&texts(&["three", "one"])).unwrap();
    assert_eq!(provider.embedded.load(Ordering::SeqCst), 3);
}

#[test]
fn test_total_is_independent_of_batching() {
    let docs = corpus(0..15);
    let mut resubmitted = docs.clone();
    resubmitted.extend(docs[..5].iter().cloned());

    let one_shot_dir = TempDir::new().unwrap();
    let one_shot = open(&one_shot_dir);
    one_shot.add_documents(&resubmitted).unwrap();

    let chunked_dir = TempDir::new().unwrap();
    let chunked = open(&chunked_dir);
    for chunk in resubmitted.chunks(3) {
        chunked.add_documents(chunk).unwrap();
    }

    assert_eq!(one_shot.total_vectors(), 15);
    assert_eq!(chunked.total_vectors(), 15);
    assert_eq!(one_shot.active_topology(), Topology::IvfCompressed);
    assert_eq!(chunked.active_topology(), Topology::IvfCompressed);
}

#[test]
fn test_resubmission_leaves_results_unchanged() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    let docs = corpus(0..3);
    store.add_documents(&docs).unwrap();

    let before = store.query(&docs[1], 3, SearchMode::Auto).unwrap();
    assert_eq!(store.add_documents(&docs).unwrap(), 0);
    let after = store.query(&docs[1], 3, SearchMode::Auto).unwrap();

    assert_eq!(store.total_vectors(), 3);
    assert_eq!(before, after);
}

#[test]
fn test_empty_store_query_is_empty() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    assert!(store.query("anything", 5, SearchMode::Auto).unwrap().is_empty());
    assert_eq!(store.active_topology(), Topology::Graph);
}

#[test]
fn test_modes_equivalent_on_graph() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    store.add_documents(&corpus(0..3)).unwrap();
    assert_eq!(store.active_topology(), Topology::Graph);

    let auto = store.query("service exposed on port", 3, SearchMode::Auto).unwrap();
    let breadth = store.query("service exposed on port", 3, SearchMode::Breadth).unwrap();
    let depth = store.query("service exposed on port", 3, SearchMode::Depth).unwrap();

    assert_eq!(auto.len(), 3);
    assert_eq!(auto, breadth);
    assert_eq!(auto, depth);
}

#[test]
fn test_tier_crossing_migrates_once() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    let policy = store.options().tiers;

    store.add_documents(&corpus(0..3)).unwrap();
    assert_eq!(store.active_topology(), Topology::Graph);
    assert_eq!(store.migrations(), 0);

    store.add_documents(&corpus(3..5)).unwrap();
    assert_eq!(store.migrations(), 1);
    assert_eq!(store.active_topology(), policy.tier_for(store.total_vectors()));
    assert_eq!(store.active_topology(), Topology::IvfRefine);
    assert_eq!(
        store.phase(),
        MigrationPhase::Stable {
            topology: Topology::IvfRefine
        }
    );

    for (id, text) in corpus(0..5).iter().enumerate() {
        let hits = store.search(text, 1, SearchMode::Breadth).unwrap();
        assert_eq!(hits[0].document.id, id as u64);
        assert!((hits[0].similarity - 1.0).abs() < 1e-4);
    }

    // one batch that jumps straight over the middle tier's upper bound
    store.add_documents(&corpus(5..13)).unwrap();
    assert_eq!(store.migrations(), 2);
    assert_eq!(store.active_topology(), Topology::IvfCompressed);

    for (id, text) in corpus(0..13).iter().enumerate() {
        let hits = store.search(text, 1, SearchMode::Breadth).unwrap();
        assert_eq!(hits[0].document.id, id as u64, "document {id} lost in migration");
    }
}

#[test]
fn test_self_query_by_vector() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    let docs = corpus(0..6);
    store.add_documents(&docs).unwrap();

    let vectors = store.embed(&docs).unwrap();
    for (id, vector) in vectors.iter().enumerate() {
        let hits = store.search_vector(vector, 1, SearchMode::Depth).unwrap();
        assert_eq!(hits[0].document.id, id as u64);
        assert!((hits[0].similarity - 1.0).abs() < 1e-4);
    }
}

#[test]
fn test_save_and_load_roundtrip() {
    let temp = TempDir::new().unwrap();
    let docs = corpus(0..8);
    let expected: Vec<Vec<u64>> = {
        let store = open(&temp);
        store.add_documents(&docs).unwrap();
        store.search("port scan", 2, SearchMode::Auto).unwrap();
        store.save().unwrap();
        docs.iter()
            .map(|text| {
                store
                    .query(text, 3, SearchMode::Auto)
                    .unwrap()
                    .into_iter()
                    .map(|d| d.id)
                    .collect()
            })
            .collect()
    };

    let reopened = open(&temp);
    assert_eq!(reopened.total_vectors(), 8);
    assert_eq!(reopened.active_topology(), Topology::IvfRefine);
    assert_eq!(reopened.migrations(), 0);
    assert!(reopened.is_duplicate(&docs[4]));
    assert_eq!(reopened.query_log().len(), 1);

    for (text, ids) in docs.iter().zip(&expected) {
        let got: Vec<u64> = reopened
            .query(text, 3, SearchMode::Auto)
            .unwrap()
            .into_iter()
            .map(|d| d.id)
            .collect();
        assert_eq!(&got, ids);
    }
    for (id, text) in docs.iter().enumerate() {
        assert_eq!(reopened.document(id as u64).map(|d| d.text), Some(text.clone()));
    }
}

#[test]
fn test_open_migrates_when_thresholds_change() {
    let temp = TempDir::new().unwrap();
    {
        let store = open(&temp);
        store.add_documents(&corpus(0..6)).unwrap();
        store.save().unwrap();
        assert_eq!(store.active_topology(), Topology::IvfRefine);
    }

    let mut raised = options(&temp);
    raised.tiers = TierPolicy::new(10, 20);
    let store = VectorStore::open(raised, hashing()).unwrap();
    assert_eq!(store.active_topology(), Topology::Graph);
    assert_eq!(store.total_vectors(), 6);
    assert_eq!(store.migrations(), 1);
}

#[test]
fn test_count_mismatch_is_corrupt() {
    let temp = TempDir::new().unwrap();
    {
        let store = open(&temp);
        store.add_documents(&corpus(0..3)).unwrap();
        store.save().unwrap();
    }

    let meta_path = temp.path().join("rag/index.meta");
    let mut meta: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&meta_path).unwrap()).unwrap();
    meta["documents"].as_array_mut().unwrap().pop();
    std::fs::write(&meta_path, serde_json::to_string(&meta).unwrap()).unwrap();

    let result = VectorStore::open(options(&temp), hashing());
    assert!(matches!(result, Err(TierStoreError::CorruptStore { .. })));
}

#[test]
fn test_lone_artifact_is_corrupt() {
    let temp = TempDir::new().unwrap();
    {
        let store = open(&temp);
        store.add_documents(&corpus(0..2)).unwrap();
        store.save().unwrap();
    }
    std::fs::remove_file(temp.path().join("rag/index.index")).unwrap();

    let result = VectorStore::open(options(&temp), hashing());
    assert!(matches!(result, Err(TierStoreError::CorruptStore { .. })));
}

#[test]
fn test_model_mismatch_on_load() {
    let temp = TempDir::new().unwrap();
    {
        let store = open(&temp);
        store.add_documents(&corpus(0..2)).unwrap();
        store.save().unwrap();
    }

    let other = Arc::new(InstrumentedProvider::named("some-other-model"));
    let result = VectorStore::open(options(&temp), other);
    assert!(matches!(
        result,
        Err(TierStoreError::ConfigMismatch { field: "model", .. })
    ));
}

#[test]
fn test_failed_migration_keeps_previous_state() {
    let temp = TempDir::new().unwrap();
    let mut broken = options(&temp);
    // 32 is not divisible into 5 sub-spaces, so building any IVF index fails
    broken.index.pq_m = 5;
    let store = VectorStore::open(broken, hashing()).unwrap();

    store.add_documents(&corpus(0..3)).unwrap();
    let before = store.query(&corpus(0..3)[0], 3, SearchMode::Auto).unwrap();

    for _ in 0..2 {
        let result = store.add_documents(&corpus(3..6));
        assert!(matches!(
            result,
            Err(TierStoreError::Migration {
                from: Topology::Graph,
                to: Topology::IvfRefine,
                ..
            })
        ));
        assert_eq!(store.total_vectors(), 3);
        assert_eq!(store.active_topology(), Topology::Graph);
        assert_eq!(
            store.phase(),
            MigrationPhase::Stable {
                topology: Topology::Graph
            }
        );
        assert!(!store.is_duplicate(&corpus(3..6)[0]));
        assert_eq!(store.migrations(), 0);
    }

    let after = store.query(&corpus(0..3)[0], 3, SearchMode::Auto).unwrap();
    assert_eq!(before, after);
}

#[test]
fn test_failed_auto_save_still_reports_commit() {
    let temp = TempDir::new().unwrap();
    let blocker = temp.path().join("not-a-dir");
    std::fs::write(&blocker, "plain file").unwrap();

    let mut unwritable = options(&temp);
    unwritable.base_path = blocker.join("rag/index");
    unwritable.auto_save = true;
    let store = VectorStore::open(unwritable, hashing()).unwrap();

    assert_eq!(store.add_documents(&corpus(0..3)).unwrap(), 3);
    // crosses into the refine tier, which saves after migrating
    assert_eq!(store.add_documents(&corpus(3..6)).unwrap(), 3);
    assert_eq!(store.total_vectors(), 6);
    assert_eq!(store.active_topology(), Topology::IvfRefine);
    assert!(store.is_duplicate(&corpus(3..6)[0]));

    assert!(matches!(store.save(), Err(TierStoreError::Io { .. })));
}

#[test]
fn test_embedding_failure_aborts_batch() {
    let temp = TempDir::new().unwrap();
    let store = VectorStore::open(options(&temp), Arc::new(InstrumentedProvider::new())).unwrap();
    store.add_documents(&texts(&["clean"])).unwrap();

    let result = store.add_documents(&texts(&["fresh", "poison pill"]));
    assert!(matches!(result, Err(TierStoreError::Embedding(_))));
    assert_eq!(store.total_vectors(), 1);
    assert!(!store.is_duplicate("fresh"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_embedding_timeout_discards_batch() {
    let temp = TempDir::new().unwrap();
    let provider = Arc::new(InstrumentedProvider::slow(Duration::from_millis(400)));
    let store = Arc::new(VectorStore::open(options(&temp), provider).unwrap());

    let result = store
        .add_documents_timeout(texts(&["late one", "late two"]), Duration::from_millis(20))
        .await;
    assert!(matches!(result, Err(TierStoreError::EmbeddingTimeout { .. })));

    // let the abandoned embedding finish; it must not land in the store
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(store.total_vectors(), 0);
    assert!(!store.is_duplicate("late one"));

    let added = store
        .add_documents_timeout(texts(&["late one", "late two"]), Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(added, 2);
    assert_eq!(store.total_vectors(), 2);
}

#[test]
fn test_queries_during_ingestion_see_whole_batches() {
    let temp = TempDir::new().unwrap();
    let store = open(&temp);
    let batches: Vec<Vec<String>> = corpus(0..20).chunks(5).map(|c| c.to_vec()).collect();

    std::thread::scope(|scope| {
        scope.spawn(|| {
            for batch in &batches {
                store.add_documents(batch).unwrap();
            }
        });

        for _ in 0..2 {
            scope.spawn(|| {
                for _ in 0..50 {
                    let total = store.total_vectors();
                    assert_eq!(total % 5, 0, "observed a partial batch");
                    let hits = store.search("service exposed", 20, SearchMode::Auto).unwrap();
                    assert!(hits.len() <= 20);
                    for hit in hits {
                        assert!(store.document(hit.document.id).is_some());
                    }
                }
            });
        }
    });

    assert_eq!(store.total_vectors(), 20);
    assert_eq!(store.active_topology(), Topology::IvfCompressed);
}
