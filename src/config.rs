/// Configuration management using figment
///
/// Loads configuration with this precedence (highest wins):
/// 1. Defaults (hardcoded)
/// 2. TOML file: newscore.toml (in working directory)
/// 3. Environment variable: REDIS_URL (standard convention)
/// 4. Environment variables: prefixed NEWSCORE_ (e.g., NEWSCORE_LOG_LEVEL=debug)

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::errors::NewscoreError;

/// Configuration for the embedding provider subsystem.
///
/// Provider selection is explicit — having an API key does NOT auto-switch
/// from local. Nested env var overrides use double underscores:
///   NEWSCORE_EMBEDDING__PROVIDER=gemini
///   NEWSCORE_EMBEDDING__GEMINI_API_KEY=...
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Which provider to use: "local" (feature hashing) or "gemini"
    /// Default: "local" — no API key required for self-hosted deployments
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// Gemini API key — only required when provider = "gemini"
    #[serde(default)]
    pub gemini_api_key: Option<String>,

    /// Embedding model identifier (gemini provider only)
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Vector dimension the search index is created with.
    /// put_article rejects vectors of any other length — changing this
    /// requires recreate_index().
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

fn default_embedding_provider() -> String {
    "local".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-004".to_string()
}

fn default_dimension() -> usize {
    768
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig {
            provider: default_embedding_provider(),
            gemini_api_key: None,
            model: default_embedding_model(),
            dimension: default_dimension(),
        }
    }
}

/// TTLs and bounds for the cache namespaces, all in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// TTL for similar-article payloads and sidecars
    #[serde(default = "default_similar_ttl")]
    pub similar_ttl_secs: u64,

    /// TTL for personalized feed payloads
    #[serde(default = "default_personalized_ttl")]
    pub personalized_ttl_secs: u64,

    /// TTL for personalized search payloads
    #[serde(default = "default_personalized_search_ttl")]
    pub personalized_search_ttl_secs: u64,

    /// TTL for the all-articles list cache
    #[serde(default = "default_all_articles_ttl")]
    pub all_articles_ttl_secs: u64,

    /// TTL for per-user read records
    #[serde(default = "default_read_ttl")]
    pub read_ttl_secs: u64,

    /// Maximum population of each LRU sorted set
    #[serde(default = "default_lru_max")]
    pub lru_max: usize,
}

fn default_similar_ttl() -> u64 {
    3600
}

fn default_personalized_ttl() -> u64 {
    1800
}

fn default_personalized_search_ttl() -> u64 {
    900
}

fn default_all_articles_ttl() -> u64 {
    300
}

fn default_read_ttl() -> u64 {
    7200
}

fn default_lru_max() -> usize {
    1000
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            similar_ttl_secs: default_similar_ttl(),
            personalized_ttl_secs: default_personalized_ttl(),
            personalized_search_ttl_secs: default_personalized_search_ttl(),
            all_articles_ttl_secs: default_all_articles_ttl(),
            read_ttl_secs: default_read_ttl(),
            lru_max: default_lru_max(),
        }
    }
}

/// Thresholds and buffer sizes for the retrieval engines.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Minimum cosine similarity for the vector similar-articles path
    #[serde(default = "default_vector_threshold")]
    pub vector_similarity_threshold: f64,

    /// Minimum cosine similarity for per-preference personalization queries
    #[serde(default = "default_personalization_threshold")]
    pub personalization_threshold: f64,

    /// Minimum similarity for query re-ranking in personalized search
    #[serde(default = "default_search_threshold")]
    pub search_threshold: f64,

    /// Extra candidates requested beyond limit + offset on every KNN query
    #[serde(default = "default_knn_overshoot")]
    pub knn_overshoot: usize,

    /// Per-operation timeout for outbound embed and index calls
    #[serde(default = "default_op_timeout")]
    pub op_timeout_secs: u64,
}

fn default_vector_threshold() -> f64 {
    0.5
}

fn default_personalization_threshold() -> f64 {
    0.4
}

fn default_search_threshold() -> f64 {
    0.3
}

fn default_knn_overshoot() -> usize {
    20
}

fn default_op_timeout() -> u64 {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            vector_similarity_threshold: default_vector_threshold(),
            personalization_threshold: default_personalization_threshold(),
            search_threshold: default_search_threshold(),
            knn_overshoot: default_knn_overshoot(),
            op_timeout_secs: default_op_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Log level: trace, debug, info, warn, error
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Optional file path for log output (in addition to stderr)
    #[serde(default)]
    pub log_file: Option<String>,

    /// Redis connection URL.
    /// Configurable via REDIS_URL or NEWSCORE_REDIS_URL env var, or redis_url
    /// in newscore.toml.
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Port the (external) HTTP layer binds to; carried here so one config
    /// document serves the whole deployment.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Embedding provider configuration.
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Cache namespace TTLs and bounds.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Retrieval thresholds.
    #[serde(default)]
    pub search: SearchConfig,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for Config {
    fn default() -> Self {
        Config {
            log_level: default_log_level(),
            log_file: None,
            redis_url: default_redis_url(),
            port: default_port(),
            embedding: EmbeddingConfig::default(),
            cache: CacheConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from defaults, TOML file, and environment variables
    ///
    /// Environment variables override TOML file values.
    /// REDIS_URL is checked first (standard convention), then
    /// NEWSCORE_REDIS_URL, then redis_url in newscore.toml.
    pub fn load() -> Result<Config, NewscoreError> {
        Figment::new()
            .merge(Serialized::defaults(Config::default()))
            .merge(Toml::file("newscore.toml"))
            // Standard env vars (highest priority for their keys)
            .merge(Env::raw().only(&["REDIS_URL"]).map(|_| "redis_url".into()))
            .merge(Env::raw().only(&["PORT"]).map(|_| "port".into()))
            .merge(
                Env::raw()
                    .only(&["GEMINI_API_KEY"])
                    .map(|_| "embedding.gemini_api_key".into()),
            )
            // NEWSCORE_-prefixed env vars (includes NEWSCORE_REDIS_URL, NEWSCORE_LOG_LEVEL, etc.)
            // Double underscore handles nested: NEWSCORE_EMBEDDING__PROVIDER=gemini
            .merge(Env::prefixed("NEWSCORE_").split("__"))
            .extract()
            .map_err(|e| NewscoreError::Config(format!("Failed to load config: {}", e)))
    }
}
