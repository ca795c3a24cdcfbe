//! Lexical similarity between candidates

use ragforge_common::types::Candidate;
use std::collections::HashSet;

/// Lowercased whitespace-delimited words
pub fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace().map(|w| w.to_lowercase()).collect()
}

/// Jaccard index of two word sets; 0.0 when both are empty
pub fn jaccard(a: &HashSet<String>, b: &HashSet<String>) -> f32 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }

    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;

    intersection as f32 / union as f32
}

/// Same fragment of the same document, regardless of text
pub(crate) fn same_fragment(a: &Candidate, b: &Candidate) -> bool {
    a.metadata.source == b.metadata.source
        && a.metadata.chunk_index.is_some()
        && a.metadata.chunk_index == b.metadata.chunk_index
}
