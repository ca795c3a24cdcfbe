//! Result re-ranking
//!
//! One strategy is selected at construction from `RerankConfig`:
//! - Relevance: additive metadata boosts (title, heading, position)
//! - Diversity: greedy near-duplicate suppression with a per-source bonus
//! - MMR: Maximal Marginal Relevance selection

mod diversity;
mod mmr;
mod relevance;
mod similarity;

pub use diversity::DiversityReranker;
pub use mmr::MmrReranker;
pub use relevance::RelevanceReranker;
pub use similarity::{jaccard, word_set};

use ragforge_common::config::{RerankConfig, RerankStrategyKind};
use ragforge_common::errors::{AppError, Result};
use ragforge_common::metrics;
use ragforge_common::types::Candidate;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::debug;

/// Candidate after re-ranking
///
/// `candidate.score` always equals `reranked_score`; `original_score` keeps
/// whatever the retrieval stage produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankedCandidate {
    #[serde(flatten)]
    pub candidate: Candidate,
    pub original_score: f32,
    pub reranked_score: f32,
    /// Human-readable account of the adjustment
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl RerankedCandidate {
    pub(crate) fn new(
        mut candidate: Candidate,
        reranked_score: f32,
        reason: Option<String>,
    ) -> Self {
        let original_score = candidate.score;
        candidate.score = reranked_score;
        Self {
            candidate,
            original_score,
            reranked_score,
            reason,
        }
    }
}

/// A re-ranking algorithm
pub trait RerankStrategy: Send + Sync {
    /// Re-order `candidates`, returning at most `top_k` of them
    fn rerank(
        &self,
        candidates: Vec<Candidate>,
        query: &str,
        top_k: Option<usize>,
    ) -> Vec<RerankedCandidate>;

    fn name(&self) -> &'static str;
}

/// Configured re-ranker
pub struct Reranker {
    strategy: Box<dyn RerankStrategy>,
}

impl Reranker {
    /// Build the strategy named by `config`
    pub fn new(config: &RerankConfig) -> Result<Self> {
        validate(config)?;

        let strategy: Box<dyn RerankStrategy> = match config.strategy {
            RerankStrategyKind::Relevance => Box::new(RelevanceReranker::new(config)),
            RerankStrategyKind::Diversity => Box::new(DiversityReranker::new(config)),
            RerankStrategyKind::Mmr => Box::new(MmrReranker::new(config.mmr_lambda)),
        };

        Ok(Self { strategy })
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    pub fn rerank(
        &self,
        candidates: Vec<Candidate>,
        query: &str,
        top_k: Option<usize>,
    ) -> Vec<RerankedCandidate> {
        let start = Instant::now();
        let input = candidates.len();

        let reranked = self.strategy.rerank(candidates, query, top_k);

        metrics::record_rerank(start.elapsed().as_secs_f64(), self.strategy.name());
        debug!(
            strategy = self.strategy.name(),
            input,
            output = reranked.len(),
            "Rerank complete"
        );

        reranked
    }
}

fn validate(config: &RerankConfig) -> Result<()> {
    let unit = |name: &str, value: f32| {
        if (0.0..=1.0).contains(&value) {
            Ok(())
        } else {
            Err(AppError::Configuration {
                message: format!("rerank.{name} must be within [0, 1], got {value}"),
            })
        }
    };
    unit("similarity_threshold", config.similarity_threshold)?;
    unit("mmr_lambda", config.mmr_lambda)?;

    for (name, value) in [
        ("title_boost", config.title_boost),
        ("heading_boost", config.heading_boost),
        ("position_boost", config.position_boost),
        ("source_bonus", config.source_bonus),
    ] {
        if !value.is_finite() || value < 0.0 {
            return Err(AppError::Configuration {
                message: format!("rerank.{name} must be finite and non-negative, got {value}"),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(strategy: RerankStrategyKind) -> RerankConfig {
        RerankConfig {
            strategy,
            ..RerankConfig::default()
        }
    }

    #[test]
    fn test_facade_selects_strategy() {
        for (kind, name) in [
            (RerankStrategyKind::Relevance, "relevance"),
            (RerankStrategyKind::Diversity, "diversity"),
            (RerankStrategyKind::Mmr, "mmr"),
        ] {
            assert_eq!(Reranker::new(&config(kind)).unwrap().strategy_name(), name);
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut bad = config(RerankStrategyKind::Mmr);
        bad.mmr_lambda = 1.5;
        assert!(matches!(Reranker::new(&bad), Err(AppError::Configuration { .. })));

        let mut bad = config(RerankStrategyKind::Relevance);
        bad.title_boost = -0.1;
        assert!(Reranker::new(&bad).is_err());
    }

    #[test]
    fn test_reranked_candidate_keeps_original_score() {
        let candidate = Candidate::new("a", "text", "a.md").with_score(0.4);
        let reranked = RerankedCandidate::new(candidate, 0.65, None);
        assert_eq!(reranked.original_score, 0.4);
        assert_eq!(reranked.reranked_score, 0.65);
        assert_eq!(reranked.candidate.score, 0.65);

        let json = serde_json::to_value(&reranked).unwrap();
        assert_eq!(json["id"], "a");
        assert!(json.get("reason").is_none());
    }
}
