//! RagForge Common Library
//!
//! Shared code for the RagForge retrieval engine including:
//! - Candidate data model
//! - Error types and handling
//! - Configuration management
//! - Embedding and LLM provider abstractions
//! - Token counting
//! - Cancellation and upstream deadlines
//! - Metrics and tracing setup

pub mod cancellation;
pub mod config;
pub mod embeddings;
pub mod errors;
pub mod llm;
pub mod metrics;
pub mod telemetry;
pub mod tokens;
pub mod types;

// Re-export commonly used types
pub use cancellation::{CancellationToken, UpstreamGuard};
pub use config::AppConfig;
pub use embeddings::EmbeddingProvider;
pub use errors::{AppError, Result};
pub use llm::LlmProvider;
pub use tokens::TokenCounter;
pub use types::{Candidate, CandidateMetadata, RetrievalStrategy, SearchFilter, SourceType};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
