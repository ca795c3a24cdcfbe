//! Keyword search over an in-memory TF-IDF index
//!
//! The index is an immutable value behind a shared reference. Rebuilding
//! constructs a fresh index off to the side and publishes it with a single
//! swap, so searches already holding the old index finish against a
//! complete, consistent snapshot.

use super::{RetrievalRequest, Retriever};
use ragforge_common::errors::{AppError, Result};
use ragforge_common::types::{Candidate, SearchFilter};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

/// Repetitions of structural metadata in the scored text
const TITLE_REPEAT: usize = 3;
const HEADING_REPEAT: usize = 2;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "how",
    "i", "if", "in", "into", "is", "it", "its", "of", "on", "or", "so", "that", "the", "their",
    "then", "there", "these", "this", "to", "was", "we", "were", "what", "when", "where", "which",
    "who", "why", "will", "with", "you", "your",
];

/// Lowercase alphanumeric terms with stop words removed
fn analyze(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty() && !STOP_WORDS.contains(t))
        .map(str::to_string)
        .collect()
}

struct IndexedDocument {
    candidate: Candidate,
    term_frequency: HashMap<String, u32>,
}

/// Immutable corpus snapshot
struct KeywordIndex {
    documents: Vec<IndexedDocument>,
    document_frequency: HashMap<String, usize>,
}

impl KeywordIndex {
    fn build(corpus: Vec<Candidate>) -> Self {
        let mut seen = HashSet::with_capacity(corpus.len());
        let mut documents = Vec::with_capacity(corpus.len());
        let mut document_frequency: HashMap<String, usize> = HashMap::new();

        for candidate in corpus {
            if !seen.insert(candidate.id.clone()) {
                warn!(id = %candidate.id, "Duplicate candidate id in corpus, keeping first");
                continue;
            }

            let mut term_frequency: HashMap<String, u32> = HashMap::new();
            for term in analyze(&scored_text(&candidate)) {
                *term_frequency.entry(term).or_default() += 1;
            }
            for term in term_frequency.keys() {
                *document_frequency.entry(term.clone()).or_default() += 1;
            }

            documents.push(IndexedDocument {
                candidate,
                term_frequency,
            });
        }

        Self {
            documents,
            document_frequency,
        }
    }

    fn idf(&self, term: &str) -> f64 {
        let n = self.documents.len() as f64;
        let df = self.document_frequency.get(term).copied().unwrap_or(0) as f64;
        1.0 + (n / (1.0 + df)).ln()
    }

    fn raw_score(&self, document: &IndexedDocument, terms: &[(String, f64)]) -> f64 {
        terms
            .iter()
            .map(|(term, idf)| {
                let tf = document.term_frequency.get(term).copied().unwrap_or(0) as f64;
                tf * idf
            })
            .sum()
    }

    /// Rank documents for the query, best first, ties in insertion order
    fn search(&self, query: &str, top_k: usize, filter: Option<&SearchFilter>) -> Vec<Candidate> {
        let mut unique = HashSet::new();
        let terms: Vec<(String, f64)> = analyze(query)
            .into_iter()
            .filter(|t| unique.insert(t.clone()))
            .map(|t| {
                let idf = self.idf(&t);
                (t, idf)
            })
            .collect();

        if terms.is_empty() {
            return Vec::new();
        }

        let mut scored: Vec<(&IndexedDocument, f64)> = self
            .documents
            .iter()
            .filter(|doc| filter.map_or(true, |f| f.matches(&doc.candidate.metadata)))
            .filter_map(|doc| {
                let raw = self.raw_score(doc, &terms);
                (raw > 0.0).then_some((doc, raw))
            })
            .collect();

        // Stable: equal scores keep corpus order
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        scored
            .into_iter()
            .map(|(doc, raw)| {
                let mut candidate = doc.candidate.clone();
                candidate.score = normalize_score(raw);
                candidate
            })
            .collect()
    }
}

/// Content plus repeated title and heading
fn scored_text(candidate: &Candidate) -> String {
    let mut text = candidate.content.clone();
    if let Some(title) = candidate.metadata.title.as_deref() {
        for _ in 0..TITLE_REPEAT {
            text.push(' ');
            text.push_str(title);
        }
    }
    if let Some(heading) = candidate.metadata.heading.as_deref() {
        for _ in 0..HEADING_REPEAT {
            text.push(' ');
            text.push_str(heading);
        }
    }
    text
}

/// Logistic squashing of a raw TF-IDF score into (0, 1)
fn normalize_score(raw: f64) -> f32 {
    (1.0 / (1.0 + (-raw / 2.0).exp())) as f32
}

/// Keyword retriever over an atomically swappable index
#[derive(Default)]
pub struct KeywordRetriever {
    index: RwLock<Option<Arc<KeywordIndex>>>,
}

impl KeywordRetriever {
    /// Create an empty, un-indexed retriever
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the index with one built from `corpus`
    #[instrument(skip_all, fields(documents = corpus.len()))]
    pub async fn index(&self, corpus: Vec<Candidate>) {
        // Build outside the lock so readers are never blocked on indexing
        let fresh = Arc::new(KeywordIndex::build(corpus));
        let documents = fresh.documents.len();
        let terms = fresh.document_frequency.len();

        *self.index.write().await = Some(fresh);

        info!(documents, terms, "Keyword index published");
    }

    /// Drop the index; searches fail until the next `index` call
    pub async fn clear(&self) {
        *self.index.write().await = None;
    }

    pub async fn is_indexed(&self) -> bool {
        self.index.read().await.is_some()
    }

    /// Number of documents in the current index (0 when un-indexed)
    pub async fn document_count(&self) -> usize {
        self.index
            .read()
            .await
            .as_ref()
            .map_or(0, |index| index.documents.len())
    }

    /// Search the current index
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<Candidate>> {
        self.search_filtered(query, top_k, None).await
    }

    /// Search the current index, keeping only hits that pass `filter`
    pub async fn search_filtered(
        &self,
        query: &str,
        top_k: usize,
        filter: Option<&SearchFilter>,
    ) -> Result<Vec<Candidate>> {
        let index = self.snapshot().await?;
        let results = index.search(query, top_k, filter);
        debug!(results = results.len(), top_k, "Keyword search complete");
        Ok(results)
    }

    /// Clone the current index reference; the lock is held only for the clone
    async fn snapshot(&self) -> Result<Arc<KeywordIndex>> {
        self.index
            .read()
            .await
            .clone()
            .ok_or_else(|| AppError::NotIndexed {
                retriever: "keyword".to_string(),
            })
    }
}

#[async_trait::async_trait]
impl Retriever for KeywordRetriever {
    async fn retrieve(&self, request: &RetrievalRequest) -> Result<Vec<Candidate>> {
        self.search_filtered(&request.query, request.top_k, request.filter.as_ref())
            .await
    }
}
