use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tierstore::cli::{Cli, Commands, ConfigAction};
use tierstore::config::Config;
use tierstore::embedding::create_provider;
use tierstore::error::{Result, TierStoreError};
use tierstore::expansion::ExpansionGenerator;
use tierstore::index::SearchMode;
use tierstore::ingest::refresh_store;
use tierstore::store::VectorStore;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse_args();

    // Initialize logging
    init_logging(cli.verbose);

    match cli.command {
        Commands::Ingest { reports, web } => {
            cmd_ingest(cli.config, cli.profile, reports, web)?;
        }
        Commands::Add {
            texts,
            files,
            timeout,
        } => {
            cmd_add(cli.config, cli.profile, texts, files, timeout)?;
        }
        Commands::Query {
            query,
            top_k,
            mode,
            json,
        } => {
            cmd_query(cli.config, cli.profile, &query, top_k, mode, json)?;
        }
        Commands::Stats { groups, json } => {
            cmd_stats(cli.config, cli.profile, groups, json)?;
        }
        Commands::Expand { taxonomy, top_n } => {
            cmd_expand(cli.config, cli.profile, taxonomy, top_n)?;
        }
        Commands::Config { action } => {
            cmd_config(cli.config, cli.profile, action)?;
        }
    }

    Ok(())
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default = if verbose { "tierstore=debug" } else { "tierstore=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    fmt().with_env_filter(filter).with_target(false).init();
}

fn cmd_ingest(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    reports: Option<PathBuf>,
    web: Option<PathBuf>,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let store = open_store(&config)?;

    let reports = reports.unwrap_or_else(|| config.ingest.reports_dir.clone());
    let web = web.unwrap_or_else(|| config.ingest.web_content_dir.clone());
    let report = refresh_store(&store, &reports, &web)?;

    if report.files_found == 0 {
        println!("No reports or web content files found.");
    } else if report.added == 0 {
        println!("No new unique documents to ingest.");
    } else {
        println!(
            "✓ Added {} new docs. Store now holds {} vectors.",
            report.added, report.total_vectors
        );
    }
    if report.duplicates_skipped > 0 {
        println!("  Skipped {} duplicates", report.duplicates_skipped);
    }
    Ok(())
}

fn cmd_add(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    mut texts: Vec<String>,
    files: Vec<PathBuf>,
    timeout: Option<u64>,
) -> Result<()> {
    for path in &files {
        let text = std::fs::read_to_string(path).map_err(|e| TierStoreError::Io {
            source: e,
            context: format!("Failed to read document: {}", path.display()),
        })?;
        texts.push(text);
    }
    if texts.is_empty() {
        println!("Nothing to add. Pass document texts or --file paths.");
        return Ok(());
    }

    let config = load_config(config_path, profile)?;
    let store = open_store(&config)?;

    let added = match timeout {
        Some(secs) => {
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| TierStoreError::Io {
                    source: e,
                    context: "Failed to start async runtime".to_string(),
                })?;
            runtime.block_on(store.add_documents_timeout(texts.clone(), Duration::from_secs(secs)))?
        }
        None => store.add_documents(&texts)?,
    };
    store.save()?;

    println!(
        "✓ Added {} of {} documents ({} total, {})",
        added,
        texts.len(),
        store.total_vectors(),
        store.active_topology()
    );
    Ok(())
}

fn cmd_query(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    query: &str,
    top_k: Option<usize>,
    mode: Option<SearchMode>,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let store = open_store(&config)?;

    let k = top_k.unwrap_or(config.query.default_top_k);
    let mode = mode.unwrap_or(config.query.default_mode);
    let hits = store.search(query, k, mode)?;
    // keep the query log for gap analysis
    store.save()?;

    if json {
        println!("{}", to_json(&hits, "Failed to serialize results")?);
        return Ok(());
    }

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (rank, hit) in hits.iter().enumerate() {
        println!(
            "{:>2}. [{:.3}] #{} {}",
            rank + 1,
            hit.similarity,
            hit.document.id,
            preview(&hit.document.text, 100)
        );
    }
    Ok(())
}

fn cmd_stats(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    groups: bool,
    json: bool,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let store = open_store(&config)?;
    let stats = store.stats();
    let group_stats = if groups {
        store.all_group_stats()
    } else {
        Vec::new()
    };

    if json {
        let value = serde_json::json!({ "store": stats, "groups": group_stats });
        println!("{}", to_json(&value, "Failed to serialize stats")?);
        return Ok(());
    }

    println!("tierstore Status");
    println!("================");
    println!("\nStore: {}", store.base_path().display());
    println!("  Vectors: {}", stats.total_vectors);
    println!("  Topology: {}", stats.topology);
    println!("  Phase: {}", stats.phase);
    println!("  Migrations this session: {}", stats.migrations);
    println!("  Groups: {}", stats.groups);
    println!("  Logged queries: {}", stats.query_log_len);
    println!("  Model: {} ({} dims)", stats.model, stats.dimension);

    if groups && !group_stats.is_empty() {
        println!("\nGroups:");
        for group in &group_stats {
            println!(
                "  {:>5}  {:>6} docs  {:>4} days  {}",
                group.group_id,
                group.doc_count,
                group.age_days,
                group.keyword.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

fn cmd_expand(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    taxonomy: Option<PathBuf>,
    top_n: Option<usize>,
) -> Result<()> {
    let config = load_config(config_path, profile)?;
    let store = open_store(&config)?;

    let mut settings = config.expansion.clone();
    if let Some(top_n) = top_n {
        settings.top_n = top_n;
    }

    let generator = match taxonomy {
        Some(path) => ExpansionGenerator::from_taxonomy_file(&store, &path, settings)?,
        None => ExpansionGenerator::new(&store, Vec::new(), settings)?,
    };

    for topic in generator.suggestions()? {
        println!("{}", topic);
    }
    Ok(())
}

fn cmd_config(
    config_path: Option<PathBuf>,
    profile: Option<String>,
    action: ConfigAction,
) -> Result<()> {
    match action {
        ConfigAction::Show { section } => {
            let config = load_config(config_path, profile)?;
            let value = serde_json::to_value(&config).map_err(|e| TierStoreError::Json {
                source: e,
                context: "Failed to serialize config".to_string(),
            })?;

            let shown = match section {
                Some(section) => value.get(&section).cloned().ok_or_else(|| {
                    TierStoreError::Config(format!("Unknown config section: {}", section))
                })?,
                None => value,
            };
            println!("{}", to_json(&shown, "Failed to serialize config")?);
        }
        ConfigAction::Validate { file } => {
            let path = match file.or(config_path) {
                Some(path) => path,
                None => Config::default_path()?,
            };
            let config = Config::load(&path)?;
            println!("✓ Configuration is valid");
            println!("  Schema version: {}", config.meta.schema_version);
        }
        ConfigAction::Init { force } => {
            let path = match config_path {
                Some(path) => path,
                None => Config::default_path()?,
            };

            if path.exists() && !force {
                println!("Configuration file already exists at: {}", path.display());
                println!("Use --force to overwrite");
                return Ok(());
            }

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| TierStoreError::Io {
                    source: e,
                    context: format!("Failed to create config directory: {:?}", parent),
                })?;
            }

            let mut config = Config::default();
            config.storage.data_dir = Config::default_data_dir()?;
            config.save(&path)?;

            println!("✓ Configuration initialized at: {}", path.display());
        }
    }

    Ok(())
}

fn load_config(config_path: Option<PathBuf>, profile: Option<String>) -> Result<Config> {
    let path = match config_path {
        Some(path) => path,
        None => Config::default_path()?,
    };

    if !path.exists() {
        tracing::warn!(
            "Config file not found, using defaults. Run 'tierstore config init' to create one."
        );
        let mut config = Config::default();
        if let Some(profile) = profile {
            config.apply_profile(&profile)?;
        }
        return Ok(config);
    }

    match profile {
        Some(profile) => Config::load_with_profile(&path, &profile),
        None => Config::load(&path),
    }
}

fn open_store(config: &Config) -> Result<Arc<VectorStore>> {
    let provider = create_provider(&config.embedding)?;
    let store = VectorStore::open(config.store_options()?, provider)?;
    Ok(Arc::new(store))
}

fn to_json<T: serde::Serialize>(value: &T, context: &str) -> Result<String> {
    serde_json::to_string_pretty(value).map_err(|e| TierStoreError::Json {
        source: e,
        context: context.to_string(),
    })
}

fn preview(text: &str, max_chars: usize) -> String {
    let flat: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        flat
    } else {
        let cut: String = flat.chars().take(max_chars).collect();
        format!("{}…", cut)
    }
}
