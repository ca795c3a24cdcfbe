//! In-process vector store with brute-force cosine search

use super::vector::{VectorMatch, VectorRecord, VectorStore};
use ragforge_common::embeddings::cosine_similarity;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::types::SearchFilter;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct StoreState {
    records: Vec<VectorRecord>,
    positions: HashMap<String, usize>,
}

/// Vector store kept entirely in memory
#[derive(Default)]
pub struct InMemoryVectorStore {
    state: RwLock<StoreState>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn query(
        &self,
        vector: &[f32],
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<VectorMatch>> {
        let state = self.state.read().await;

        if let Some(record) = state.records.first() {
            if record.vector.len() != vector.len() {
                return Err(AppError::validation(
                    format!(
                        "query dimension {} does not match stored dimension {}",
                        vector.len(),
                        record.vector.len()
                    ),
                    Some("vector"),
                ));
            }
        }

        let mut matches: Vec<VectorMatch> = state
            .records
            .iter()
            .filter(|r| filter.map_or(true, |f| f.matches(&r.metadata)))
            .map(|r| VectorMatch {
                id: r.id.clone(),
                score: cosine_similarity(vector, &r.vector),
                content: r.content.clone(),
                metadata: r.metadata.clone(),
            })
            .collect();

        matches.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut state = self.state.write().await;
        for record in records {
            match state.positions.get(&record.id).copied() {
                Some(pos) => state.records[pos] = record,
                None => {
                    let pos = state.records.len();
                    state.positions.insert(record.id.clone(), pos);
                    state.records.push(record);
                }
            }
        }
        Ok(())
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_common::types::{CandidateMetadata, SourceType};

    fn record(id: &str, vector: Vec<f32>, source_type: SourceType) -> VectorRecord {
        let mut metadata = CandidateMetadata::new(format!("{id}.md"));
        metadata.source_type = source_type;
        VectorRecord {
            id: id.to_string(),
            vector,
            content: format!("content of {id}"),
            metadata,
        }
    }

    #[tokio::test]
    async fn test_query_orders_by_cosine() {
        let store = InMemoryVectorStore::new();
        store
            .upsert(vec![
                record("x", vec![1.0, 0.0], SourceType::Text),
                record("y", vec![0.7, 0.7], SourceType::Text),
                record("z", vec![0.0, 1.0], SourceType::Code),
            ])
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.1], 3, None).await.unwrap();
        let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["x", "y", "z"]);

        let filter = SearchFilter {
            sources: None,
            source_types: Some(vec![SourceType::Code]),
        };
        let hits = store.query(&[1.0, 0.1], 3, Some(&filter)).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "z");
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_id() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![record("x", vec![1.0, 0.0], SourceType::Text)]).await.unwrap();
        store.upsert(vec![record("x", vec![0.0, 1.0], SourceType::Text)]).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);

        let hits = store.query(&[0.0, 1.0], 1, None).await.unwrap();
        assert!((hits[0].score - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_rejected() {
        let store = InMemoryVectorStore::new();
        store.upsert(vec![record("x", vec![1.0, 0.0], SourceType::Text)]).await.unwrap();
        assert!(store.query(&[1.0, 0.0, 0.0], 1, None).await.is_err());
    }
}
