use super::similarity::{jaccard, same_fragment, word_set};
use super::{RerankStrategy, RerankedCandidate};
use ragforge_common::config::RerankConfig;
use ragforge_common::types::Candidate;
use std::collections::HashSet;

/// Greedy near-duplicate filter
///
/// Walks candidates in their incoming order and admits one only if it is
/// less similar than the threshold to everything admitted so far. The
/// first admitted candidate from each source earns a small bonus.
#[derive(Debug, Clone)]
pub struct DiversityReranker {
    similarity_threshold: f32,
    source_bonus: f32,
}

impl DiversityReranker {
    pub fn new(config: &RerankConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            source_bonus: config.source_bonus,
        }
    }
}

impl RerankStrategy for DiversityReranker {
    fn rerank(
        &self,
        candidates: Vec<Candidate>,
        _query: &str,
        top_k: Option<usize>,
    ) -> Vec<RerankedCandidate> {
        let limit = top_k.unwrap_or(candidates.len());
        let mut admitted: Vec<(RerankedCandidate, HashSet<String>)> = Vec::new();
        let mut seen_sources: HashSet<String> = HashSet::new();

        for candidate in candidates {
            if admitted.len() >= limit {
                break;
            }

            let words = word_set(&candidate.content);
            let duplicate = admitted.iter().any(|(kept, kept_words)| {
                let similarity = if same_fragment(&kept.candidate, &candidate) {
                    1.0
                } else {
                    jaccard(kept_words, &words)
                };
                similarity >= self.similarity_threshold
            });
            if duplicate {
                continue;
            }

            let (score, reason) = if seen_sources.insert(candidate.metadata.source.clone()) {
                (
                    candidate.score + self.source_bonus,
                    Some(format!("new source +{:.3}", self.source_bonus)),
                )
            } else {
                (candidate.score, None)
            };

            admitted.push((RerankedCandidate::new(candidate, score, reason), words));
        }

        admitted.into_iter().map(|(c, _)| c).collect()
    }

    fn name(&self) -> &'static str {
        "diversity"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, content: &str, source: &str, score: f32) -> Candidate {
        Candidate::new(id, content, source).with_score(score)
    }

    fn reranker() -> DiversityReranker {
        DiversityReranker::new(&RerankConfig::default())
    }

    fn ids(out: &[RerankedCandidate]) -> Vec<&str> {
        out.iter().map(|r| r.candidate.id.as_str()).collect()
    }

    #[test]
    fn test_near_duplicates_dropped() {
        let out = reranker().rerank(
            vec![
                candidate("a", "tokio schedules async tasks on worker threads", "a.md", 0.9),
                candidate("b", "tokio schedules async tasks on worker threads", "b.md", 0.8),
                candidate("c", "serde derives serialize and deserialize", "c.md", 0.7),
            ],
            "",
            None,
        );
        assert_eq!(ids(&out), vec!["a", "c"]);
    }

    #[test]
    fn test_same_fragment_counts_as_duplicate() {
        let mut a = candidate("a", "first wording", "doc.md", 0.9);
        a.metadata.chunk_index = Some(4);
        let mut b = candidate("b", "entirely different words", "doc.md", 0.8);
        b.metadata.chunk_index = Some(4);

        let out = reranker().rerank(vec![a, b], "", None);
        assert_eq!(ids(&out), vec!["a"]);
    }

    #[test]
    fn test_source_bonus_once_per_source() {
        let out = reranker().rerank(
            vec![
                candidate("a1", "alpha one", "a.md", 0.5),
                candidate("a2", "beta two", "a.md", 0.6),
                candidate("b1", "gamma three", "b.md", 0.4),
            ],
            "",
            None,
        );

        // Admission order is preserved even though a2 now outranks a1
        assert_eq!(ids(&out), vec!["a1", "a2", "b1"]);
        assert!((out[0].reranked_score - 0.6).abs() < 1e-6);
        assert_eq!(out[1].reranked_score, 0.6);
        assert!(out[1].reason.is_none());
        assert!((out[2].reranked_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_stops_at_top_k() {
        let out = reranker().rerank(
            vec![
                candidate("a", "one", "a.md", 0.9),
                candidate("b", "two", "b.md", 0.8),
                candidate("c", "three", "c.md", 0.7),
            ],
            "",
            Some(2),
        );
        assert_eq!(ids(&out), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_texts_are_not_duplicates() {
        let out = reranker().rerank(
            vec![candidate("a", "", "a.md", 0.9), candidate("b", "", "b.md", 0.8)],
            "",
            None,
        );
        assert_eq!(out.len(), 2);
    }
}
