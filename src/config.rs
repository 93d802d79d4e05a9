use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub collector: CollectorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CacheConfig {
    /// Ruling precedent is slow-changing, so the default is a week.
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_seconds: default_cache_ttl(),
        }
    }
}

fn default_cache_ttl() -> u64 {
    7 * 24 * 3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// Fixed for the lifetime of an index; changing it invalidates the
    /// existing index.
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
        }
    }
}

fn default_dimension() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
        }
    }
}

fn default_top_k() -> usize {
    5
}

#[derive(Debug, Deserialize, Clone)]
pub struct CollectorConfig {
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    /// Name of the environment variable holding the search API key.
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Authoritative ruling domains; results outside these are discarded.
    #[serde(default = "default_include_domains")]
    pub include_domains: Vec<String>,
    #[serde(default = "default_collection_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            include_domains: default_include_domains(),
            timeout_seconds: default_collection_timeout(),
            max_results: default_max_results(),
        }
    }
}

fn default_endpoint() -> String {
    "https://api.tavily.com/search".to_string()
}
fn default_api_key_env() -> String {
    "SEARCH_API_KEY".to_string()
}
fn default_include_domains() -> Vec<String> {
    vec!["rulings.cbp.gov".to_string()]
}
fn default_collection_timeout() -> u64 {
    20
}
fn default_max_results() -> usize {
    10
}

/// Retry policy applied by the orchestrator around collection.
///
/// `max_attempts` counts total attempts; 1 means no retry. The collector
/// itself never retries.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_seconds")]
    pub backoff_seconds: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_seconds: default_backoff_seconds(),
        }
    }
}

fn default_max_attempts() -> u32 {
    1
}
fn default_backoff_seconds() -> u64 {
    1
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.dimension == 0 {
        anyhow::bail!("embedding.dimension must be > 0");
    }
    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if config.cache.ttl_seconds == 0 {
        anyhow::bail!("cache.ttl_seconds must be > 0");
    }
    if config.collector.timeout_seconds == 0 {
        anyhow::bail!("collector.timeout_seconds must be > 0");
    }
    if config.collector.include_domains.is_empty() {
        anyhow::bail!("collector.include_domains must not be empty");
    }
    if config.retry.max_attempts == 0 {
        anyhow::bail!("retry.max_attempts must be >= 1");
    }
    Ok(())
}

impl Config {
    /// Config rooted at a database path with defaults everywhere else.
    /// Used by tests and embedding callers that construct the engine
    /// directly.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Config {
            db: DbConfig { path: path.into() },
            cache: CacheConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            collector: CollectorConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}
