//! Repository configuration.
//!
//! One immutable value handed to every repository at construction.

use std::env;
use std::str::FromStr;

use domain::{
    DEFAULT_BASE_BACKOFF_MS, DEFAULT_CONTAINER_NAME, DEFAULT_DATABASE_NAME,
    DEFAULT_DATABASE_THROUGHPUT, DEFAULT_MAX_CONCURRENCY, DEFAULT_MAX_RETRIES,
    DEFAULT_PARTITION_KEY_PATHS, DEFAULT_QUERY_PAGE_SIZE,
};
use serde::{Deserialize, Serialize};
use tracing::warn;
use validator::Validate;

use crate::error::{RepoError, RepoResult};

/// Settings for one logical container shared by several discriminators.
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
pub struct RepositoryConfig {
    #[validate(length(min = 1, message = "database name must not be empty"))]
    pub database_name: String,
    #[validate(length(min = 1, message = "container name must not be empty"))]
    pub container_name: String,
    /// Comma-separated key paths, e.g. `/pk,/discriminator`
    #[validate(length(min = 1, message = "partition key path spec must not be empty"))]
    pub partition_key_paths: String,
    /// Use (owner, discriminator) keys when the path spec has two segments
    pub hierarchical_partition_key: bool,
    /// Create the database/container when missing
    pub provision: bool,
    #[validate(range(min = 400))]
    pub database_throughput: u32,
    #[validate(range(min = 1))]
    pub max_concurrency: usize,
    pub max_retries: u32,
    #[validate(range(min = 1))]
    pub base_backoff_ms: u64,
    #[validate(range(min = 1))]
    pub query_page_size: usize,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            database_name: DEFAULT_DATABASE_NAME.to_string(),
            container_name: DEFAULT_CONTAINER_NAME.to_string(),
            partition_key_paths: DEFAULT_PARTITION_KEY_PATHS.to_string(),
            hierarchical_partition_key: true,
            provision: true,
            database_throughput: DEFAULT_DATABASE_THROUGHPUT,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            max_retries: DEFAULT_MAX_RETRIES,
            base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
            query_page_size: DEFAULT_QUERY_PAGE_SIZE,
        }
    }
}

impl RepositoryConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let defaults = Self::default();

        Self {
            database_name: env::var("DOCREPO_DATABASE").unwrap_or(defaults.database_name),
            container_name: env::var("DOCREPO_CONTAINER").unwrap_or(defaults.container_name),
            partition_key_paths: env::var("DOCREPO_PARTITION_KEY_PATHS")
                .unwrap_or(defaults.partition_key_paths),
            hierarchical_partition_key: env_or(
                "DOCREPO_HIERARCHICAL_PARTITION_KEY",
                defaults.hierarchical_partition_key,
            ),
            provision: env_or("DOCREPO_PROVISION", defaults.provision),
            database_throughput: env_or("DOCREPO_DATABASE_THROUGHPUT", defaults.database_throughput),
            max_concurrency: env_or("DOCREPO_MAX_CONCURRENCY", defaults.max_concurrency),
            max_retries: env_or("DOCREPO_MAX_RETRIES", defaults.max_retries),
            base_backoff_ms: env_or("DOCREPO_BASE_BACKOFF_MS", defaults.base_backoff_ms),
            query_page_size: env_or("DOCREPO_QUERY_PAGE_SIZE", defaults.query_page_size),
        }
    }

    /// Validate field constraints, reporting failures as configuration errors.
    pub fn validate_config(&self) -> RepoResult<()> {
        self.validate().map_err(|errors| {
            let fields: Vec<String> = errors
                .field_errors()
                .iter()
                .map(|(field, errs)| {
                    let detail = errs
                        .first()
                        .and_then(|e| e.message.as_ref())
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| "invalid value".to_string());
                    format!("{}: {}", field, detail)
                })
                .collect();
            RepoError::configuration(fields.join(", "))
        })
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!(key, value = %raw, "Unparseable environment value, using default");
            default
        }),
        Err(_) => default,
    }
}
