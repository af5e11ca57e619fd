use crate::config::{Config, SCHEMA_VERSION};
use crate::error::{Result, TierStoreError, ValidationError};

/// Configuration validator
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration, collecting every problem found
    pub fn validate(config: &Config) -> Result<()> {
        let mut errors = Vec::new();

        Self::validate_schema_version(config, &mut errors);
        Self::validate_storage(config, &mut errors);
        Self::validate_embedding(config, &mut errors);
        Self::validate_tiers(config, &mut errors);
        Self::validate_indexing(config, &mut errors);
        Self::validate_query(config, &mut errors);
        Self::validate_expansion(config, &mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TierStoreError::ConfigValidation { errors })
        }
    }

    fn validate_schema_version(config: &Config, errors: &mut Vec<ValidationError>) {
        let version = &config.meta.schema_version;
        if version != SCHEMA_VERSION {
            errors.push(ValidationError::new(
                "_meta.schema_version",
                format!("Unsupported schema version: {}", version),
            ));
        }
    }

    fn validate_storage(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.storage.data_dir.as_os_str().is_empty() {
            errors.push(ValidationError::new(
                "storage.data_dir",
                "Data directory cannot be empty",
            ));
        }

        if config.storage.index_name.trim().is_empty() {
            errors.push(ValidationError::new(
                "storage.index_name",
                "Index name cannot be empty",
            ));
        }
    }

    fn validate_embedding(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.embedding.batch_size == 0 {
            errors.push(ValidationError::new(
                "embedding.batch_size",
                "Batch size must be greater than 0",
            ));
        }

        if config.embedding.model.is_empty() {
            errors.push(ValidationError::new(
                "embedding.model",
                "Model name cannot be empty",
            ));
        }

        if config.embedding.dimension == 0 {
            errors.push(ValidationError::new(
                "embedding.dimension",
                "Embedding dimension must be greater than 0",
            ));
        }
    }

    fn validate_tiers(config: &Config, errors: &mut Vec<ValidationError>) {
        let tiers = &config.tiers;
        if tiers.small_max == 0 {
            errors.push(ValidationError::new(
                "tiers.small_max",
                "Smallest tier must admit at least one document",
            ));
        }

        if tiers.medium_max <= tiers.small_max {
            errors.push(ValidationError::new(
                "tiers.medium_max",
                format!(
                    "Tier thresholds must increase: small_max {} >= medium_max {}",
                    tiers.small_max, tiers.medium_max
                ),
            ));
        }
    }

    fn validate_indexing(config: &Config, errors: &mut Vec<ValidationError>) {
        let indexing = &config.indexing;
        let positive = [
            ("indexing.hnsw_m", indexing.hnsw_m),
            ("indexing.hnsw_ef_construction", indexing.hnsw_ef_construction),
            ("indexing.hnsw_ef_search", indexing.hnsw_ef_search),
            ("indexing.nlist_refine", indexing.nlist_refine),
            ("indexing.nlist_compressed", indexing.nlist_compressed),
            ("indexing.pq_m", indexing.pq_m),
            ("indexing.kmeans_iterations", indexing.kmeans_iterations),
            ("indexing.refine_factor", indexing.refine_factor),
            ("indexing.nprobe_auto", indexing.nprobe_auto),
            ("indexing.train_sample_cap", indexing.train_sample_cap),
        ];
        for (path, value) in positive {
            if value == 0 {
                errors.push(ValidationError::new(path, "Must be greater than 0"));
            }
        }

        if indexing.pq_m > 0 && config.embedding.dimension % indexing.pq_m != 0 {
            errors.push(ValidationError::new(
                "indexing.pq_m",
                format!(
                    "pq_m {} must divide embedding dimension {}",
                    indexing.pq_m, config.embedding.dimension
                ),
            ));
        }

        if indexing.nprobe_breadth < indexing.nprobe_auto {
            errors.push(ValidationError::new(
                "indexing.nprobe_breadth",
                format!(
                    "Breadth probes ({}) cannot be fewer than auto probes ({})",
                    indexing.nprobe_breadth, indexing.nprobe_auto
                ),
            ));
        }
    }

    fn validate_query(config: &Config, errors: &mut Vec<ValidationError>) {
        if config.query.log_capacity == 0 {
            errors.push(ValidationError::new(
                "query.log_capacity",
                "Query log capacity must be greater than 0",
            ));
        }

        if config.query.default_top_k == 0 {
            errors.push(ValidationError::new(
                "query.default_top_k",
                "Default top_k must be greater than 0",
            ));
        }
    }

    fn validate_expansion(config: &Config, errors: &mut Vec<ValidationError>) {
        let expansion = &config.expansion;
        for (path, value) in [
            ("expansion.gap_threshold", expansion.gap_threshold),
            ("expansion.min_similarity", expansion.min_similarity),
        ] {
            if !(-1.0..=1.0).contains(&value) {
                errors.push(ValidationError::new(
                    path,
                    format!("Similarity threshold must be between -1.0 and 1.0, got {}", value),
                ));
            }
        }

        if expansion.coverage_alpha < 0.0 {
            errors.push(ValidationError::new(
                "expansion.coverage_alpha",
                "Coverage alpha cannot be negative",
            ));
        }
    }
}
