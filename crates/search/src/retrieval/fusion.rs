//! Rank fusion for combining vector and keyword results
//!
//! Two modes share one entry point:
//! - Reciprocal Rank Fusion (RRF): only positions matter, so the lists'
//!   incompatible score scales never meet
//! - Weighted: a linear blend of the retrievers' native scores
//!
//! Weights are renormalised to sum to 1.0 at construction.

use ragforge_common::config::{FusionConfig, FusionMode};
use ragforge_common::errors::{AppError, Result};
use ragforge_common::types::Candidate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Effective fusion weights, always summing to 1.0
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FusionWeights {
    pub vector: f32,
    pub keyword: f32,
}

impl FusionWeights {
    /// Validate and renormalise a raw weight pair
    pub fn normalized(vector: f32, keyword: f32) -> Result<Self> {
        if !vector.is_finite() || !keyword.is_finite() || vector < 0.0 || keyword < 0.0 {
            return Err(AppError::Configuration {
                message: format!(
                    "fusion weights must be finite and non-negative (vector={vector}, keyword={keyword})"
                ),
            });
        }

        let sum = vector + keyword;
        if sum <= 0.0 {
            return Err(AppError::Configuration {
                message: "fusion weights must not both be zero".to_string(),
            });
        }

        Ok(Self {
            vector: vector / sum,
            keyword: keyword / sum,
        })
    }
}

/// One fused entry with its provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedCandidate {
    /// Candidate whose `score` is the fused score
    pub candidate: Candidate,
    /// 0-based rank in the vector list
    pub vector_rank: Option<usize>,
    /// 0-based rank in the keyword list
    pub keyword_rank: Option<usize>,
    pub vector_score: Option<f32>,
    pub keyword_score: Option<f32>,
    pub fused_score: f32,
}

/// Fusion parameters
#[derive(Debug, Clone)]
pub struct FusionCombiner {
    mode: FusionMode,
    k: f32,
    weights: FusionWeights,
}

impl FusionCombiner {
    /// Build from configuration, rejecting unusable weights or `k`
    pub fn new(config: &FusionConfig) -> Result<Self> {
        if !config.k.is_finite() || config.k < 0.0 {
            return Err(AppError::Configuration {
                message: format!("fusion k must be finite and non-negative, got {}", config.k),
            });
        }

        Ok(Self {
            mode: config.mode,
            k: config.k,
            weights: FusionWeights::normalized(config.vector_weight, config.keyword_weight)?,
        })
    }

    pub fn weights(&self) -> FusionWeights {
        self.weights
    }

    pub fn mode(&self) -> FusionMode {
        self.mode
    }

    /// Fuse a vector-ranked list with a keyword-ranked list
    pub fn fuse(
        &self,
        vector_results: Vec<Candidate>,
        keyword_results: Vec<Candidate>,
        top_k: usize,
    ) -> Vec<FusedCandidate> {
        // Insertion order doubles as the tie-break: vector list first, then
        // keyword-only entries in their own order
        let mut entries: Vec<FusedCandidate> =
            Vec::with_capacity(vector_results.len() + keyword_results.len());
        let mut positions: HashMap<String, usize> = HashMap::new();

        for (rank, candidate) in vector_results.into_iter().enumerate() {
            if positions.contains_key(&candidate.id) {
                continue;
            }
            positions.insert(candidate.id.clone(), entries.len());
            entries.push(FusedCandidate {
                vector_rank: Some(rank),
                keyword_rank: None,
                vector_score: Some(candidate.score),
                keyword_score: None,
                fused_score: 0.0,
                candidate,
            });
        }

        for (rank, candidate) in keyword_results.into_iter().enumerate() {
            match positions.get(&candidate.id) {
                Some(&pos) => {
                    let entry = &mut entries[pos];
                    if entry.keyword_rank.is_none() {
                        entry.keyword_rank = Some(rank);
                        entry.keyword_score = Some(candidate.score);
                    }
                }
                None => {
                    positions.insert(candidate.id.clone(), entries.len());
                    entries.push(FusedCandidate {
                        vector_rank: None,
                        keyword_rank: Some(rank),
                        vector_score: None,
                        keyword_score: Some(candidate.score),
                        fused_score: 0.0,
                        candidate,
                    });
                }
            }
        }

        for entry in &mut entries {
            entry.fused_score = self.score(entry);
            entry.candidate.score = entry.fused_score;
        }

        // Vec::sort_by is stable, so equal scores keep first-appearance order
        entries.sort_by(|a, b| {
            b.fused_score
                .partial_cmp(&a.fused_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        entries.truncate(top_k);

        entries
    }

    /// Fuse and return only the ranked candidates
    pub fn fuse_candidates(
        &self,
        vector_results: Vec<Candidate>,
        keyword_results: Vec<Candidate>,
        top_k: usize,
    ) -> Vec<Candidate> {
        self.fuse(vector_results, keyword_results, top_k)
            .into_iter()
            .map(|f| f.candidate)
            .collect()
    }

    fn score(&self, entry: &FusedCandidate) -> f32 {
        match self.mode {
            FusionMode::Rrf => {
                let partial = |rank: Option<usize>, weight: f32| {
                    rank.map(|r| weight / (self.k + r as f32 + 1.0)).unwrap_or(0.0)
                };
                partial(entry.vector_rank, self.weights.vector)
                    + partial(entry.keyword_rank, self.weights.keyword)
            }
            FusionMode::Weighted => {
                self.weights.vector * entry.vector_score.unwrap_or(0.0)
                    + self.weights.keyword * entry.keyword_score.unwrap_or(0.0)
            }
        }
    }
}
