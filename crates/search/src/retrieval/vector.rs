//! Vector similarity search
//!
//! Embeds the query through the configured embedding provider and asks the
//! vector store for nearest neighbours. Failures of either collaborator are
//! surfaced as upstream errors; there is no local fallback.

use super::{RetrievalRequest, Retriever};
use ragforge_common::embeddings::EmbeddingProvider;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::types::{Candidate, CandidateMetadata, SearchFilter};
use ragforge_common::UpstreamGuard;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Nearest-neighbour hit returned by a vector store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    pub id: String,
    /// Store-native similarity, higher is better
    pub score: f32,
    pub content: String,
    pub metadata: CandidateMetadata,
}

/// Stored embedding with the fragment it represents
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorRecord {
    pub id: String,
    pub vector: Vec<f32>,
    pub content: String,
    pub metadata: CandidateMetadata,
}

/// Nearest-neighbour storage
#[async_trait::async_trait]
pub trait VectorStore: Send + Sync {
    /// Most similar records first
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorMatch>>;

    /// Insert or replace records by id
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Number of stored records
    async fn len(&self) -> Result<usize>;
}

/// Vector retriever over an embedding provider and a vector store
#[derive(Clone)]
pub struct VectorRetriever {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<dyn VectorStore>,
}

impl VectorRetriever {
    /// Create a new vector retriever
    pub fn new(embedder: Arc<dyn EmbeddingProvider>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// Embed and store a corpus so it becomes searchable
    #[instrument(skip_all, fields(documents = corpus.len()))]
    pub async fn index(&self, corpus: &[Candidate]) -> Result<usize> {
        if corpus.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = corpus.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .embedder
            .embed_batch(&texts)
            .await
            .map_err(|e| as_upstream("embedding", e))?;

        let records: Vec<VectorRecord> = corpus
            .iter()
            .zip(vectors)
            .map(|(candidate, vector)| VectorRecord {
                id: candidate.id.clone(),
                vector,
                content: candidate.content.clone(),
                metadata: candidate.metadata.clone(),
            })
            .collect();

        let stored = records.len();
        self.store
            .upsert(records)
            .await
            .map_err(|e| as_upstream("vector_store", e))?;

        info!(stored, model = self.embedder.model_name(), "Vector index updated");
        Ok(stored)
    }

    /// Search for the `top_k` nearest fragments
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
        guard: &UpstreamGuard,
    ) -> Result<Vec<Candidate>> {
        let embedding = guard
            .run("embedding", self.embedder.embed(query))
            .await
            .map_err(|e| as_upstream("embedding", e))?;

        let mut matches = guard
            .run("vector_store", self.store.query(&embedding, top_k, filter))
            .await
            .map_err(|e| as_upstream("vector_store", e))?;

        // Stores promise descending order; enforce it so ranks are meaningful
        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);

        debug!(results = matches.len(), top_k, "Vector search complete");

        Ok(matches
            .into_iter()
            .map(|m| Candidate {
                id: m.id,
                content: m.content,
                score: m.score,
                metadata: m.metadata,
            })
            .collect())
    }
}

/// Collaborator failures surface as upstream errors; input, deadline, and
/// cancellation errors keep their own identity
fn as_upstream(service: &str, err: AppError) -> AppError {
    match err {
        AppError::Upstream { .. }
        | AppError::EmptyInput { .. }
        | AppError::Timeout { .. }
        | AppError::Cancelled => err,
        other => AppError::upstream(service, other.to_string()),
    }
}

#[async_trait::async_trait]
impl Retriever for VectorRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Candidate>> {
        self.search(
            &request.query,
            request.top_k,
            request.filter.as_ref(),
            &request.guard,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::InMemoryVectorStore;
    use ragforge_common::embeddings::HashingEmbedder;
    use ragforge_common::CancellationToken;

    struct FailingEmbedder;

    #[async_trait::async_trait]
    impl EmbeddingProvider for FailingEmbedder {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>> {
            Err(AppError::Internal {
                message: "socket closed".into(),
            })
        }

        async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Err(AppError::Internal {
                message: "socket closed".into(),
            })
        }

        fn model_name(&self) -> &str {
            "failing"
        }

        fn dimension(&self) -> usize {
            4
        }
    }

    fn corpus() -> Vec<Candidate> {
        vec![
            Candidate::new("a", "rust async runtime scheduling", "a.md"),
            Candidate::new("b", "vector database nearest neighbour search", "b.md"),
            Candidate::new("c", "baking sourdough bread at home", "c.md"),
        ]
    }

    async fn retriever() -> VectorRetriever {
        let retriever = VectorRetriever::new(
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(InMemoryVectorStore::new()),
        );
        retriever.index(&corpus()).await.unwrap();
        retriever
    }

    #[tokio::test]
    async fn test_returns_nearest_first() {
        let retriever = retriever().await;
        let results = retriever
            .search("nearest neighbour vector search", 2, None, &UpstreamGuard::unbounded())
            .await
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id, "b");
        assert!(results[0].score >= results[1].score);
    }

    #[tokio::test]
    async fn test_embedding_failure_is_upstream() {
        let retriever = VectorRetriever::new(
            Arc::new(FailingEmbedder),
            Arc::new(InMemoryVectorStore::new()),
        );
        let err = retriever
            .search("anything", 3, None, &UpstreamGuard::unbounded())
            .await
            .unwrap_err();
        match err {
            AppError::Upstream { service, .. } => assert_eq!(service, "embedding"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_query_is_empty_input() {
        let retriever = retriever().await;
        let err = retriever
            .search("   ", 3, None, &UpstreamGuard::unbounded())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::EmptyInput { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_guard_stops_search() {
        let retriever = retriever().await;
        let token = CancellationToken::new();
        token.cancel();
        let err = retriever
            .search("rust", 3, None, &UpstreamGuard::new(None, Some(token)))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }
}
