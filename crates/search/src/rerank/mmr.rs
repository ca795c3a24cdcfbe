//! Maximal Marginal Relevance
//!
//! Each pick maximises `λ·relevance − (1−λ)·max_similarity(selected)`.
//! λ = 1.0 is pure relevance; λ = 0.0 is pure novelty.

use super::similarity::{jaccard, word_set};
use super::{RerankStrategy, RerankedCandidate};
use ragforge_common::types::Candidate;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct MmrReranker {
    lambda: f32,
}

impl MmrReranker {
    pub fn new(lambda: f32) -> Self {
        Self {
            lambda: lambda.clamp(0.0, 1.0),
        }
    }
}

impl RerankStrategy for MmrReranker {
    fn rerank(
        &self,
        candidates: Vec<Candidate>,
        _query: &str,
        top_k: Option<usize>,
    ) -> Vec<RerankedCandidate> {
        let limit = top_k.unwrap_or(candidates.len()).min(candidates.len());
        if limit == 0 {
            return Vec::new();
        }

        let words: Vec<HashSet<String>> = candidates.iter().map(|c| word_set(&c.content)).collect();
        let scores: Vec<f32> = candidates.iter().map(|c| c.score).collect();
        let mut pool: Vec<Option<Candidate>> = candidates.into_iter().map(Some).collect();

        let mut selected: Vec<usize> = Vec::with_capacity(limit);
        let mut output = Vec::with_capacity(limit);

        // The top-ranked input always goes first
        if let Some(first) = pool[0].take() {
            let value = self.lambda * scores[0];
            selected.push(0);
            output.push(RerankedCandidate::new(first, value, Some(format!("mmr {value:.3}"))));
        }

        while output.len() < limit {
            let mut best: Option<(usize, f32)> = None;

            for (idx, slot) in pool.iter().enumerate() {
                if slot.is_none() {
                    continue;
                }
                let redundancy = selected
                    .iter()
                    .map(|&s| jaccard(&words[idx], &words[s]))
                    .fold(0.0_f32, f32::max);
                let value = self.lambda * scores[idx] - (1.0 - self.lambda) * redundancy;

                // Strict comparison keeps the earliest input on ties
                if best.map_or(true, |(_, v)| value > v) {
                    best = Some((idx, value));
                }
            }

            let Some((idx, value)) = best else {
                break;
            };
            let Some(candidate) = pool[idx].take() else {
                break;
            };
            selected.push(idx);
            output.push(RerankedCandidate::new(candidate, value, Some(format!("mmr {value:.3}"))));
        }

        output
    }

    fn name(&self) -> &'static str {
        "mmr"
    }
}
