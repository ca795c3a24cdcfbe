//! RagForge Search
//!
//! Retrieval and ranking for the RagForge pipeline:
//! - Keyword search over an in-memory TF-IDF index
//! - Vector search through an embedding provider and a vector store
//! - Rank fusion (RRF or weighted) for hybrid queries
//! - Re-ranking (relevance boosts, diversity, MMR)

pub mod rerank;
pub mod retrieval;

pub use rerank::{RerankStrategy, RerankedCandidate, Reranker};
pub use retrieval::{
    FusionCombiner, HybridSearch, InMemoryVectorStore, KeywordRetriever, SearchOptions,
    SearchOutcome, VectorRetriever, VectorStore,
};
