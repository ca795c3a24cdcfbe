//! Configuration management for RagForge
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml)
//! - Default values
//!
//! Every tuning constant of the ranking pipeline lives here so the engine
//! can be exercised under varied settings.

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::RetrievalStrategy;

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Retrieval defaults
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// Rank fusion tuning
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Reranking tuning
    #[serde(default)]
    pub rerank: RerankConfig,

    /// Context assembly limits
    #[serde(default)]
    pub context: ContextConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// LLM provider configuration
    #[serde(default)]
    pub llm: LlmConfig,

    /// Limits applied to every external call
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    /// Strategy used when a caller does not pick one
    #[serde(default)]
    pub default_strategy: RetrievalStrategy,

    /// Number of results returned to the caller
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Each retriever is asked for `top_k * candidate_multiplier` results
    /// when fusing so fusion has material to reorder
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_multiplier: usize,

    /// Minimum final score (None disables the filter)
    #[serde(default)]
    pub min_score: Option<f32>,
}

/// How two ranked lists are combined
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionMode {
    /// Reciprocal Rank Fusion; only ranks matter
    #[default]
    Rrf,
    /// Weighted sum of native similarity scores
    Weighted,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FusionConfig {
    #[serde(default)]
    pub mode: FusionMode,

    /// RRF damping constant
    #[serde(default = "default_rrf_k")]
    pub k: f32,

    /// Weight for the vector list (renormalised against keyword_weight)
    #[serde(default = "default_vector_weight")]
    pub vector_weight: f32,

    /// Weight for the keyword list
    #[serde(default = "default_keyword_weight")]
    pub keyword_weight: f32,
}

/// Reranking strategy selected at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RerankStrategyKind {
    /// Additive metadata boosts
    #[default]
    Relevance,
    /// Similarity-threshold filter
    Diversity,
    /// Maximal Marginal Relevance
    Mmr,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RerankConfig {
    /// Rerank by default when a caller does not say otherwise
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub strategy: RerankStrategyKind,

    /// Retrieval asks for `top_k * candidate_pool_multiplier` results
    /// when reranking so the reranker has something to choose from
    #[serde(default = "default_candidate_multiplier")]
    pub candidate_pool_multiplier: usize,

    #[serde(default = "default_title_boost")]
    pub title_boost: f32,

    #[serde(default = "default_heading_boost")]
    pub heading_boost: f32,

    #[serde(default = "default_position_boost")]
    pub position_boost: f32,

    /// Minimum query term length considered for metadata boosts
    #[serde(default = "default_min_term_len")]
    pub min_term_len: usize,

    /// Candidates at or above this similarity to an admitted one are dropped
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    /// Bonus for the first candidate seen from each source
    #[serde(default = "default_source_bonus")]
    pub source_bonus: f32,

    /// MMR relevance/diversity balance (1.0 = relevance only)
    #[serde(default = "default_mmr_lambda")]
    pub mmr_lambda: f32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ContextConfig {
    /// Maximum candidates rendered into the prompt
    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,

    /// Token budget for the rendered context block
    #[serde(default = "default_max_context_tokens")]
    pub max_tokens: usize,

    /// Prompt template: default, concise, code, comparison, tutorial
    #[serde(default = "default_template")]
    pub template: String,

    /// Render a `[Source: ...]` header above each block
    #[serde(default = "default_true")]
    pub include_metadata: bool,

    /// Tokenizer encoding used for budgeting (cl100k_base, o200k_base, estimate)
    #[serde(default = "default_encoding")]
    pub encoding: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, hashing
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,

    /// Retries after the first failed attempt
    #[serde(default = "default_embedding_retries")]
    pub max_retries: u32,

    /// First backoff delay; doubles on each retry
    #[serde(default = "default_retry_base_delay")]
    pub retry_base_delay_ms: u64,

    /// Maximum texts per embedding request
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// LLM provider: openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    pub api_key: Option<String>,

    /// Chat completions base URL
    pub api_base: Option<String>,

    #[serde(default = "default_llm_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum output tokens
    #[serde(default = "default_llm_max_tokens")]
    pub max_tokens: usize,

    /// HTTP request timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Deadline for each embedding, vector-store, and LLM call (0 disables)
    #[serde(default)]
    pub timeout_secs: u64,

    /// Capacity of the streaming delta channel
    #[serde(default = "default_stream_buffer")]
    pub stream_buffer: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error) or a full EnvFilter directive
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logging: bool,

    /// Service name for tracing
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_true() -> bool { true }
fn default_top_k() -> usize { 5 }
fn default_candidate_multiplier() -> usize { 2 }
fn default_rrf_k() -> f32 { 60.0 }
fn default_vector_weight() -> f32 { 0.6 }
fn default_keyword_weight() -> f32 { 0.4 }
fn default_title_boost() -> f32 { 0.2 }
fn default_heading_boost() -> f32 { 0.1 }
fn default_position_boost() -> f32 { 0.05 }
fn default_min_term_len() -> usize { 3 }
fn default_similarity_threshold() -> f32 { 0.7 }
fn default_source_bonus() -> f32 { 0.1 }
fn default_mmr_lambda() -> f32 { 0.5 }
fn default_max_candidates() -> usize { 10 }
fn default_max_context_tokens() -> usize { 3000 }
fn default_template() -> String { "default".to_string() }
fn default_encoding() -> String { "cl100k_base".to_string() }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { "text-embedding-3-small".to_string() }
fn default_embedding_dimension() -> usize { 1536 }
fn default_http_timeout() -> u64 { 30 }
fn default_embedding_retries() -> u32 { 3 }
fn default_retry_base_delay() -> u64 { 1000 }
fn default_batch_size() -> usize { 100 }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_model() -> String { "gpt-4o-mini".to_string() }
fn default_temperature() -> f32 { 0.2 }
fn default_llm_max_tokens() -> usize { 1024 }
fn default_llm_timeout() -> u64 { 60 }
fn default_stream_buffer() -> usize { 64 }
fn default_log_level() -> String { "info".to_string() }
fn default_service_name() -> String { "ragforge".to_string() }

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            default_strategy: RetrievalStrategy::default(),
            top_k: default_top_k(),
            candidate_multiplier: default_candidate_multiplier(),
            min_score: None,
        }
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            mode: FusionMode::default(),
            k: default_rrf_k(),
            vector_weight: default_vector_weight(),
            keyword_weight: default_keyword_weight(),
        }
    }
}

impl Default for RerankConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: RerankStrategyKind::default(),
            candidate_pool_multiplier: default_candidate_multiplier(),
            title_boost: default_title_boost(),
            heading_boost: default_heading_boost(),
            position_boost: default_position_boost(),
            min_term_len: default_min_term_len(),
            similarity_threshold: default_similarity_threshold(),
            source_bonus: default_source_bonus(),
            mmr_lambda: default_mmr_lambda(),
        }
    }
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_candidates: default_max_candidates(),
            max_tokens: default_max_context_tokens(),
            template: default_template(),
            include_metadata: true,
            encoding: default_encoding(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            timeout_secs: default_http_timeout(),
            max_retries: default_embedding_retries(),
            retry_base_delay_ms: default_retry_base_delay(),
            batch_size: default_batch_size(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            model: default_llm_model(),
            temperature: default_temperature(),
            max_tokens: default_llm_max_tokens(),
            timeout_secs: default_llm_timeout(),
        }
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 0,
            stream_buffer: default_stream_buffer(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: false,
            service_name: default_service_name(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__FUSION__K=30
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Per-call upstream deadline, if one is configured
    pub fn upstream_timeout(&self) -> Option<Duration> {
        (self.upstream.timeout_secs > 0).then(|| Duration::from_secs(self.upstream.timeout_secs))
    }
}

impl EmbeddingConfig {
    /// Get the first retry delay as Duration
    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }
}
