/// Ingest a reports/web_content tree, persist it, and run gap analysis on the reopened store
use std::fs;
use tempfile::TempDir;
use tierstore::config::{Config, EmbeddingConfig};
use tierstore::embedding::create_provider;
use tierstore::expansion::ExpansionGenerator;
use tierstore::index::SearchMode;
use tierstore::ingest::refresh_store;
use tierstore::store::VectorStore;

fn offline_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().join("data");
    config.embedding = EmbeddingConfig {
        model: "hashing".to_string(),
        dimension: 64,
        batch_size: 4,
    };
    config.indexing.pq_m = 8;
    config.ingest.reports_dir = temp.path().join("reports");
    config.ingest.web_content_dir = temp.path().join("web_content");
    config
}

fn open(config: &Config) -> VectorStore {
    let provider = create_provider(&config.embedding).unwrap();
    VectorStore::open(config.store_options().unwrap(), provider).unwrap()
}

#[test]
fn test_ingest_then_expand() {
    let temp = TempDir::new().unwrap();
    let config = offline_config(&temp);

    fs::create_dir_all(&config.ingest.reports_dir).unwrap();
    fs::create_dir_all(&config.ingest.web_content_dir).unwrap();
    fs::write(
        config.ingest.reports_dir.join("01-recon.md"),
        "# Recon\nSubdomain enumeration found staging hosts. Subdomain takeover possible.",
    )
    .unwrap();
    fs::write(
        config.ingest.reports_dir.join("02-web.md"),
        "# Web\nReflected XSS in search parameter, subdomain staging affected.",
    )
    .unwrap();
    fs::write(
        config.ingest.web_content_dir.join("article.txt"),
        "Subdomain takeover explained: dangling CNAME records.",
    )
    .unwrap();
    fs::write(config.ingest.web_content_dir.join("notes.log"), "ignored").unwrap();

    {
        let store = open(&config);
        let report = refresh_store(
            &store,
            &config.ingest.reports_dir,
            &config.ingest.web_content_dir,
        )
        .unwrap();
        assert_eq!(report.files_found, 3);
        assert_eq!(report.added, 3);

        store.search("kubernetes rbac escalation", 3, SearchMode::Auto).unwrap();
        store.save().unwrap();
    }

    // a second process picks up the persisted store and its query log
    let store = open(&config);
    assert_eq!(store.total_vectors(), 3);
    assert_eq!(store.query_log().len(), 1);

    let taxonomy = temp.path().join("taxonomy.txt");
    fs::write(
        &taxonomy,
        "Subdomain takeover explained: dangling CNAME records.\n\nzzzz qqqq vvvv\n",
    )
    .unwrap();

    let mut settings = config.expansion.clone();
    settings.min_similarity = 0.95;
    let generator = ExpansionGenerator::from_taxonomy_file(&store, &taxonomy, settings).unwrap();
    assert_eq!(generator.labels().len(), 2);

    let gaps = generator.taxonomy_gaps().unwrap();
    assert!(!gaps.contains("Subdomain takeover explained: dangling CNAME records."));

    let suggestions = generator.suggestions().unwrap();
    assert!(suggestions.contains(&"Deep dive on subdomain".to_string()));
    assert!(suggestions.contains(&"kubernetes rbac escalation".to_string()));
    assert!(suggestions.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_refresh_without_sources() {
    let temp = TempDir::new().unwrap();
    let config = offline_config(&temp);
    let store = open(&config);

    let report = refresh_store(
        &store,
        &config.ingest.reports_dir,
        &config.ingest.web_content_dir,
    )
    .unwrap();
    assert_eq!(report.files_found, 0);
    assert_eq!(report.added, 0);
    assert!(!config.store_options().unwrap().base_path.with_extension("index").exists());
}
