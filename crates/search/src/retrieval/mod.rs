//! Multi-modal retrieval system
//!
//! Provides three retrieval modes:
//! - Vector search (semantic similarity via embeddings)
//! - Keyword search (in-memory TF-IDF index)
//! - Hybrid search (fusion of vector + keyword)

mod fusion;
mod hybrid;
mod keyword;
mod store;
mod vector;

pub use fusion::{FusedCandidate, FusionCombiner, FusionWeights};
pub use hybrid::{HybridSearch, SearchMetrics, SearchOptions, SearchOutcome};
pub use keyword::KeywordRetriever;
pub use store::InMemoryVectorStore;
pub use vector::{VectorMatch, VectorRecord, VectorRetriever, VectorStore};

use ragforge_common::errors::Result;
use ragforge_common::types::{Candidate, SearchFilter};
use ragforge_common::UpstreamGuard;

/// Parameters for a single retriever call
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    /// Query text
    pub query: String,

    /// Maximum results to return
    pub top_k: usize,

    /// Metadata filter (optional)
    pub filter: Option<SearchFilter>,

    /// Deadline and cancellation applied to external calls
    pub guard: UpstreamGuard,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, top_k: usize) -> Self {
        Self {
            query: query.into(),
            top_k,
            filter: None,
            guard: UpstreamGuard::unbounded(),
        }
    }
}

/// Common trait for all retrievers
#[async_trait::async_trait]
pub trait Retriever: Send + Sync {
    /// Retrieve candidates ranked best-first
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Candidate>>;
}
