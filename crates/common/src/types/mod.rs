//! Core data model shared by retrieval, ranking, and context assembly

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::AppError;

/// A retrieved document fragment with a relevance score and citation metadata
///
/// `score` is specific to the method that produced the candidate and is not
/// comparable across methods until the lists have been fused.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    /// Unique within one retrieval call
    pub id: String,

    /// Raw fragment text
    pub content: String,

    /// Method-specific relevance score
    #[serde(default)]
    pub score: f32,

    /// Citation metadata
    pub metadata: CandidateMetadata,
}

impl Candidate {
    /// Create a candidate with default metadata for the given source
    pub fn new(
        id: impl Into<String>,
        content: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            score: 0.0,
            metadata: CandidateMetadata::new(source),
        }
    }

    /// Builder-style score setter
    pub fn with_score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }
}

/// Metadata carried by every candidate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateMetadata {
    /// Document path; stable identifier for citation grouping
    pub source: String,

    #[serde(default)]
    pub source_type: SourceType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heading: Option<String>,

    /// Ordinal position within the parent document
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_line: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_count: Option<u32>,
}

impl CandidateMetadata {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }
}

/// Kind of document a candidate was chunked from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceType {
    Markdown,
    #[default]
    Text,
    Pdf,
    Code,
    Html,
    Other,
}

/// Retrieval strategy requested by a caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalStrategy {
    /// Semantic similarity search only
    Vector,
    /// Term-frequency search only
    Keyword,
    /// Both, fused
    #[default]
    Hybrid,
}

impl RetrievalStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalStrategy::Vector => "vector",
            RetrievalStrategy::Keyword => "keyword",
            RetrievalStrategy::Hybrid => "hybrid",
        }
    }

    /// Whether this strategy reads the keyword index
    pub fn needs_keyword_index(&self) -> bool {
        matches!(self, RetrievalStrategy::Keyword | RetrievalStrategy::Hybrid)
    }
}

impl fmt::Display for RetrievalStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalStrategy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "vector" | "semantic" => Ok(RetrievalStrategy::Vector),
            "keyword" | "bm25" | "lexical" => Ok(RetrievalStrategy::Keyword),
            "hybrid" => Ok(RetrievalStrategy::Hybrid),
            other => Err(AppError::validation(
                format!("unknown retrieval strategy '{other}'"),
                Some("strategy"),
            )),
        }
    }
}

/// Metadata filter applied to retrieval results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchFilter {
    /// Restrict to these document paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<String>>,

    /// Restrict to these document kinds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_types: Option<Vec<SourceType>>,
}

impl SearchFilter {
    /// Check whether metadata passes every configured constraint
    pub fn matches(&self, metadata: &CandidateMetadata) -> bool {
        let source_ok = self
            .sources
            .as_ref()
            .map_or(true, |sources| sources.iter().any(|s| s == &metadata.source));
        let type_ok = self
            .source_types
            .as_ref()
            .map_or(true, |types| types.contains(&metadata.source_type));
        source_ok && type_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_parsing() {
        assert_eq!("hybrid".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::Hybrid);
        assert_eq!("BM25".parse::<RetrievalStrategy>().unwrap(), RetrievalStrategy::Keyword);
        assert!("graph".parse::<RetrievalStrategy>().is_err());
        assert!(RetrievalStrategy::Hybrid.needs_keyword_index());
        assert!(!RetrievalStrategy::Vector.needs_keyword_index());
    }

    #[test]
    fn test_filter_matching() {
        let mut meta = CandidateMetadata::new("docs/install.md");
        meta.source_type = SourceType::Markdown;

        assert!(SearchFilter::default().matches(&meta));

        let by_source = SearchFilter {
            sources: Some(vec!["docs/install.md".into()]),
            source_types: None,
        };
        assert!(by_source.matches(&meta));

        let by_type = SearchFilter {
            sources: None,
            source_types: Some(vec![SourceType::Code]),
        };
        assert!(!by_type.matches(&meta));
    }

    #[test]
    fn test_candidate_deserializes_camel_case_metadata() {
        let json = r#"{
            "id": "c1",
            "content": "hello",
            "metadata": {"source": "a.md", "sourceType": "markdown", "chunkIndex": 2, "startLine": 10}
        }"#;
        let candidate: Candidate = serde_json::from_str(json).unwrap();
        assert_eq!(candidate.score, 0.0);
        assert_eq!(candidate.metadata.source_type, SourceType::Markdown);
        assert_eq!(candidate.metadata.chunk_index, Some(2));
        assert_eq!(candidate.metadata.start_line, Some(10));
    }
}
