use super::{RerankStrategy, RerankedCandidate};
use ragforge_common::config::RerankConfig;
use ragforge_common::types::Candidate;

/// Boosts candidates whose title or heading mention the query, and
/// earlier fragments of a document
#[derive(Debug, Clone)]
pub struct RelevanceReranker {
    title_boost: f32,
    heading_boost: f32,
    position_boost: f32,
    min_term_len: usize,
}

impl RelevanceReranker {
    pub fn new(config: &RerankConfig) -> Self {
        Self {
            title_boost: config.title_boost,
            heading_boost: config.heading_boost,
            position_boost: config.position_boost,
            min_term_len: config.min_term_len,
        }
    }

    fn query_terms(&self, query: &str) -> Vec<String> {
        let mut terms: Vec<String> = Vec::new();
        for word in query.split_whitespace() {
            let term = word
                .trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase();
            if term.chars().count() >= self.min_term_len && !terms.contains(&term) {
                terms.push(term);
            }
        }
        terms
    }

    fn boost(&self, candidate: &Candidate, terms: &[String]) -> (f32, Vec<String>) {
        let mut total = 0.0;
        let mut parts = Vec::new();

        let title = self.title_boost * match_ratio(terms, candidate.metadata.title.as_deref());
        if title > 0.0 {
            total += title;
            parts.push(format!("title +{title:.3}"));
        }

        let heading =
            self.heading_boost * match_ratio(terms, candidate.metadata.heading.as_deref());
        if heading > 0.0 {
            total += heading;
            parts.push(format!("heading +{heading:.3}"));
        }

        if let Some(index) = candidate.metadata.chunk_index {
            let position = self.position_boost / (1.0 + index as f32 * 0.1);
            if position > 0.0 {
                total += position;
                parts.push(format!("position +{position:.3}"));
            }
        }

        (total, parts)
    }
}

/// Fraction of terms appearing in `text`
fn match_ratio(terms: &[String], text: Option<&str>) -> f32 {
    let Some(text) = text else {
        return 0.0;
    };
    if terms.is_empty() {
        return 0.0;
    }

    let text = text.to_lowercase();
    let matched = terms.iter().filter(|t| text.contains(t.as_str())).count();
    matched as f32 / terms.len() as f32
}

impl RerankStrategy for RelevanceReranker {
    fn rerank(
        &self,
        candidates: Vec<Candidate>,
        query: &str,
        top_k: Option<usize>,
    ) -> Vec<RerankedCandidate> {
        let terms = self.query_terms(query);

        let mut reranked: Vec<RerankedCandidate> = candidates
            .into_iter()
            .map(|candidate| {
                let (boost, parts) = self.boost(&candidate, &terms);
                let score = candidate.score + boost;
                let reason = (!parts.is_empty()).then(|| parts.join(", "));
                RerankedCandidate::new(candidate, score, reason)
            })
            .collect();

        reranked.sort_by(|a, b| {
            b.reranked_score
                .partial_cmp(&a.reranked_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        if let Some(k) = top_k {
            reranked.truncate(k);
        }
        reranked
    }

    fn name(&self) -> &'static str {
        "relevance"
    }
}
