//! Hybrid retrieval combining vector and keyword search
//!
//! `HybridSearch` is the single search entry point. It dispatches on the
//! requested strategy, runs both retrievers concurrently for hybrid queries
//! and fuses their lists. Either side failing fails the whole search.

use super::{
    fusion::{FusionCombiner, FusionWeights},
    keyword::KeywordRetriever,
    RetrievalRequest, Retriever,
};
use ragforge_common::config::{AppConfig, FusionMode};
use ragforge_common::errors::{AppError, Result};
use ragforge_common::metrics;
use ragforge_common::types::{Candidate, RetrievalStrategy, SearchFilter};
use ragforge_common::UpstreamGuard;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, instrument};
use validator::Validate;

/// Per-call search options
#[derive(Debug, Clone, Validate)]
pub struct SearchOptions {
    /// Results returned after fusion and score filtering
    #[validate(range(min = 1, max = 200))]
    pub top_k: usize,

    /// Drop final results scoring below this
    pub min_score: Option<f32>,

    /// Metadata filter applied by both retrievers
    pub filter: Option<SearchFilter>,

    /// Deadline and cancellation for external calls
    pub guard: UpstreamGuard,
}

impl SearchOptions {
    pub fn new(top_k: usize) -> Self {
        Self {
            top_k,
            min_score: None,
            filter: None,
            guard: UpstreamGuard::unbounded(),
        }
    }
}

/// Counts and timings for one search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchMetrics {
    pub strategy: RetrievalStrategy,
    pub vector_count: usize,
    pub keyword_count: usize,
    pub fused_count: usize,
    pub vector_ms: Option<u64>,
    pub keyword_ms: Option<u64>,
    pub fusion_ms: Option<u64>,
    pub total_ms: u64,
    /// Present only when fusion ran
    pub weights: Option<FusionWeights>,
    pub fusion_mode: Option<FusionMode>,
}

impl SearchMetrics {
    fn new(strategy: RetrievalStrategy) -> Self {
        Self {
            strategy,
            vector_count: 0,
            keyword_count: 0,
            fused_count: 0,
            vector_ms: None,
            keyword_ms: None,
            fusion_ms: None,
            total_ms: 0,
            weights: None,
            fusion_mode: None,
        }
    }
}

/// Ranked results plus the metrics describing how they were produced
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Vec<Candidate>,
    pub metrics: SearchMetrics,
}

/// Strategy dispatcher over the vector and keyword retrievers
pub struct HybridSearch {
    vector: Arc<dyn Retriever>,
    keyword: Arc<KeywordRetriever>,
    fusion: FusionCombiner,
    candidate_multiplier: usize,
}

impl HybridSearch {
    /// Create a new hybrid search
    pub fn new(
        vector: Arc<dyn Retriever>,
        keyword: Arc<KeywordRetriever>,
        fusion: FusionCombiner,
        candidate_multiplier: usize,
    ) -> Self {
        Self {
            vector,
            keyword,
            fusion,
            candidate_multiplier: candidate_multiplier.max(1),
        }
    }

    /// Create from application configuration
    pub fn from_config(
        vector: Arc<dyn Retriever>,
        keyword: Arc<KeywordRetriever>,
        config: &AppConfig,
    ) -> Result<Self> {
        Ok(Self::new(
            vector,
            keyword,
            FusionCombiner::new(&config.fusion)?,
            config.retrieval.candidate_multiplier,
        ))
    }

    /// Run a search with the given strategy
    #[instrument(skip_all, fields(strategy = %strategy, top_k = options.top_k))]
    pub async fn search(
        &self,
        query: &str,
        strategy: RetrievalStrategy,
        options: SearchOptions,
    ) -> Result<SearchOutcome> {
        options.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: Some("top_k".to_string()),
        })?;

        if query.trim().is_empty() {
            return Err(AppError::validation("query must not be empty", Some("query")));
        }

        if strategy.needs_keyword_index() && !self.keyword.is_indexed().await {
            return Err(AppError::NotIndexed {
                retriever: "keyword".to_string(),
            });
        }

        let start = Instant::now();
        let mut search_metrics = SearchMetrics::new(strategy);

        let request = RetrievalRequest {
            query: query.to_string(),
            top_k: options.top_k,
            filter: options.filter.clone(),
            guard: options.guard.clone(),
        };

        let mut results = match strategy {
            RetrievalStrategy::Vector => {
                let (results, ms) = timed(self.vector.retrieve(&request)).await;
                let results = results?;
                search_metrics.vector_count = results.len();
                search_metrics.vector_ms = Some(ms);
                results
            }
            RetrievalStrategy::Keyword => {
                let (results, ms) = timed(self.keyword.retrieve(&request)).await;
                let results = results?;
                search_metrics.keyword_count = results.len();
                search_metrics.keyword_ms = Some(ms);
                results
            }
            RetrievalStrategy::Hybrid => {
                // Fetch more results from each retriever for better fusion
                let mut expanded = request.clone();
                expanded.top_k = options.top_k.saturating_mul(self.candidate_multiplier);

                let ((vector_results, vector_ms), (keyword_results, keyword_ms)) = tokio::join!(
                    timed(self.vector.retrieve(&expanded)),
                    timed(self.keyword.retrieve(&expanded))
                );
                let vector_results = vector_results?;
                let keyword_results = keyword_results?;

                search_metrics.vector_count = vector_results.len();
                search_metrics.keyword_count = keyword_results.len();
                search_metrics.vector_ms = Some(vector_ms);
                search_metrics.keyword_ms = Some(keyword_ms);

                let fusion_start = Instant::now();
                let fused = self
                    .fusion
                    .fuse_candidates(vector_results, keyword_results, options.top_k);
                search_metrics.fusion_ms = Some(fusion_start.elapsed().as_millis() as u64);
                search_metrics.fused_count = fused.len();
                search_metrics.weights = Some(self.fusion.weights());
                search_metrics.fusion_mode = Some(self.fusion.mode());

                debug!(
                    vector = search_metrics.vector_count,
                    keyword = search_metrics.keyword_count,
                    fused = search_metrics.fused_count,
                    "Fusion complete"
                );
                fused
            }
        };

        // Apply min_score filter if specified
        if let Some(min_score) = options.min_score {
            results.retain(|c| c.score >= min_score);
        }
        results.truncate(options.top_k);

        let elapsed = start.elapsed();
        search_metrics.total_ms = elapsed.as_millis() as u64;

        metrics::record_search(elapsed.as_secs_f64(), strategy.as_str(), results.len());

        info!(
            strategy = %strategy,
            results = results.len(),
            latency_ms = search_metrics.total_ms,
            "Search completed"
        );

        Ok(SearchOutcome {
            results,
            metrics: search_metrics,
        })
    }
}

async fn timed<F, T>(fut: F) -> (T, u64)
where
    F: Future<Output = T>,
{
    let start = Instant::now();
    let output = fut.await;
    (output, start.elapsed().as_millis() as u64)
}
