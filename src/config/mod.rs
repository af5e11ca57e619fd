//! Configuration management for tierstore
//!
//! Loading, validation, profile and environment overrides for the TOML
//! configuration file, plus conversion into [`StoreOptions`].

use crate::error::{Result, TierStoreError};
use crate::index::{IndexParams, SearchMode, TierPolicy};
use crate::store::StoreOptions;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

mod validator;

pub use validator::ConfigValidator;

pub const SCHEMA_VERSION: &str = "1.0.0";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "_meta")]
    pub meta: MetaConfig,
    pub storage: StorageConfig,
    pub embedding: EmbeddingConfig,
    pub tiers: TierPolicy,
    pub indexing: IndexParams,
    pub query: QueryConfig,
    pub ingest: IngestConfig,
    pub expansion: ExpansionConfig,
    #[serde(default)]
    pub profiles: HashMap<String, ProfileOverrides>,
}

/// Metadata about the configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetaConfig {
    pub schema_version: String,
    #[serde(default = "current_timestamp")]
    pub created_at: String,
    #[serde(default = "current_timestamp")]
    pub last_modified: String,
}

fn current_timestamp() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    /// Base name of the artifact pair inside `data_dir`
    pub index_name: String,
    /// Persist after every migration
    pub auto_save: bool,
}

/// Embedding configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Model name (e.g., "all-MiniLM-L6-v2", or "hashing" for offline vectors)
    pub model: String,
    /// Embedding dimension (384 for MiniLM)
    pub dimension: usize,
    /// Batch size for processing
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            model: "all-MiniLM-L6-v2".to_string(),
            dimension: 384,
            batch_size: 32,
        }
    }
}

/// Query engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    pub log_capacity: usize,
    pub default_top_k: usize,
    pub default_mode: SearchMode,
}

/// Directories scanned by `tierstore ingest`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    pub reports_dir: PathBuf,
    pub web_content_dir: PathBuf,
}

/// Gap analysis thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpansionConfig {
    /// Taxonomy labels whose nearest document is below this similarity are gaps
    pub gap_threshold: f32,
    /// Minimum documents per day of age before a group counts as covered
    pub coverage_alpha: f32,
    /// Logged queries whose best hit is below this similarity are unmet
    pub min_similarity: f32,
    pub top_n: usize,
}

/// Profile-specific configuration overrides
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding_model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_save: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_mode: Option<SearchMode>,
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(TierStoreError::ConfigNotFound {
                path: path.to_path_buf(),
            });
        }

        let content = std::fs::read_to_string(path).map_err(|e| TierStoreError::Io {
            source: e,
            context: format!("Failed to read config file: {:?}", path),
        })?;
        let mut config: Config = toml::from_str(&content)?;

        config.apply_env_overrides();

        ConfigValidator::validate(&config)?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|e| TierStoreError::Io {
            source: e,
            context: format!("Failed to write config file: {:?}", path),
        })?;
        Ok(())
    }

    /// Load configuration with a specific profile applied
    pub fn load_with_profile(path: &Path, profile: &str) -> Result<Self> {
        let mut config = Self::load(path)?;
        config.apply_profile(profile)?;
        Ok(config)
    }

    /// Apply a profile's overrides to the configuration
    pub fn apply_profile(&mut self, profile: &str) -> Result<()> {
        let overrides = self
            .profiles
            .get(profile)
            .cloned()
            .ok_or_else(|| TierStoreError::Config(format!("Unknown profile: {}", profile)))?;

        if let Some(model) = overrides.embedding_model {
            self.embedding.model = model;
        }
        if let Some(auto_save) = overrides.auto_save {
            self.storage.auto_save = auto_save;
        }
        if let Some(mode) = overrides.default_mode {
            self.query.default_mode = mode;
        }
        Ok(())
    }

    /// Apply environment variable overrides
    /// Environment variables in format: TIERSTORE_SECTION__KEY=value
    pub fn apply_env_overrides(&mut self) {
        for (key, value) in std::env::vars() {
            if let Some(config_key) = key.strip_prefix("TIERSTORE_") {
                if let Err(e) = self.set_value_from_env(config_key, &value) {
                    tracing::warn!("Failed to apply env override {}: {}", key, e);
                }
            }
        }
    }

    fn set_value_from_env(&mut self, path: &str, value: &str) -> Result<()> {
        match path {
            "STORAGE__DATA_DIR" => {
                self.storage.data_dir = PathBuf::from(value);
            }
            "STORAGE__AUTO_SAVE" => {
                self.storage.auto_save = parse_env(path, value)?;
            }
            "EMBEDDING__MODEL" => {
                self.embedding.model = value.to_string();
            }
            "EMBEDDING__DIMENSION" => {
                self.embedding.dimension = parse_env(path, value)?;
            }
            "TIERS__SMALL_MAX" => {
                self.tiers.small_max = parse_env(path, value)?;
            }
            "TIERS__MEDIUM_MAX" => {
                self.tiers.medium_max = parse_env(path, value)?;
            }
            "QUERY__DEFAULT_MODE" => {
                self.query.default_mode =
                    value
                        .parse()
                        .map_err(|e: String| TierStoreError::InvalidConfigValue {
                            path: path.to_string(),
                            message: e,
                        })?;
            }
            _ => {
                tracing::debug!("Unknown env config key: {}", path);
            }
        }
        Ok(())
    }

    /// Options for opening the store described by this configuration
    pub fn store_options(&self) -> Result<StoreOptions> {
        let data_dir = expand_path(&self.storage.data_dir)?;
        Ok(StoreOptions {
            base_path: data_dir.join(&self.storage.index_name),
            dimension: self.embedding.dimension,
            tiers: self.tiers,
            index: self.indexing.clone(),
            batch_size: self.embedding.batch_size,
            query_log_capacity: self.query.log_capacity,
            auto_save: self.storage.auto_save,
        })
    }

    /// Get the default configuration file path
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().ok_or_else(|| {
            TierStoreError::Config("Cannot determine config directory".to_string())
        })?;

        Ok(config_dir.join("tierstore").join("config.toml"))
    }

    /// Get the default data directory
    pub fn default_data_dir() -> Result<PathBuf> {
        let home_dir = dirs::home_dir()
            .ok_or_else(|| TierStoreError::Config("Cannot determine home directory".to_string()))?;

        Ok(home_dir.join(".tierstore"))
    }
}

fn parse_env<T: std::str::FromStr>(path: &str, value: &str) -> Result<T> {
    value.parse().map_err(|_| TierStoreError::InvalidConfigValue {
        path: path.to_string(),
        message: format!("Cannot parse '{}'", value),
    })
}

/// Expand a leading `~/` to the home directory
pub fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path
        .to_str()
        .ok_or_else(|| TierStoreError::Config("Invalid path encoding".to_string()))?;

    if let Some(stripped) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| TierStoreError::Config("Cannot determine home directory".to_string()))?;
        Ok(home.join(stripped))
    } else {
        Ok(path.to_path_buf())
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("~/.tierstore");

        Self {
            meta: MetaConfig {
                schema_version: SCHEMA_VERSION.to_string(),
                created_at: current_timestamp(),
                last_modified: current_timestamp(),
            },
            storage: StorageConfig {
                data_dir: data_dir.clone(),
                index_name: "rag/index".to_string(),
                auto_save: true,
            },
            embedding: EmbeddingConfig::default(),
            tiers: TierPolicy::default(),
            indexing: IndexParams::default(),
            query: QueryConfig {
                log_capacity: 1000,
                default_top_k: 5,
                default_mode: SearchMode::Auto,
            },
            ingest: IngestConfig {
                reports_dir: PathBuf::from("reports"),
                web_content_dir: PathBuf::from("web_content"),
            },
            expansion: ExpansionConfig {
                gap_threshold: 0.25,
                coverage_alpha: 10.0,
                min_similarity: 0.3,
                top_n: 25,
            },
            profiles: HashMap::new(),
        }
    }
}
