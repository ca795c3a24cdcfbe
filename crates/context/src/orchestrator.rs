//! Query Orchestrator - End-to-end question answering
//!
//! Pipeline for one question:
//! 1. Retrieval through `HybridSearch` (over-fetching when reranking)
//! 2. Optional re-ranking, truncated to `top_k`
//! 3. Context assembly under the token budget
//! 4. Generation, blocking or streamed through a bounded channel
//!
//! Every external call runs under an `UpstreamGuard` so callers can cancel
//! a query or bound it with the configured timeout.

use crate::assembler::{
    extract_citations, Citation, ContextAssembler, ContextOptions, GeneratedContext,
    PromptTemplate,
};
use futures::StreamExt;
use ragforge_common::config::AppConfig;
use ragforge_common::errors::{AppError, Result};
use ragforge_common::llm::{FinishReason, Generation, LlmProvider, StreamChunk, TokenUsage};
use ragforge_common::metrics;
use ragforge_common::types::{Candidate, RetrievalStrategy, SearchFilter};
use ragforge_common::{CancellationToken, TokenCounter, UpstreamGuard};
use ragforge_search::{HybridSearch, Reranker, SearchOptions};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, field, info, instrument, Span};
use uuid::Uuid;
use validator::Validate;

/// Largest request `HybridSearch` accepts
const MAX_SEARCH_TOP_K: usize = 200;

/// Options for a single question
#[derive(Debug, Clone, Validate)]
pub struct AskOptions {
    pub strategy: RetrievalStrategy,

    /// Re-rank retrieved candidates before assembly
    pub use_reranking: bool,

    /// Candidates kept for the context
    #[validate(range(min = 1, max = 100))]
    pub top_k: usize,

    /// Override the configured prompt template
    pub template: Option<PromptTemplate>,

    pub filter: Option<SearchFilter>,

    pub min_score: Option<f32>,

    /// Caller-owned cancellation for every upstream call of this query
    pub cancellation: Option<CancellationToken>,
}

impl Default for AskOptions {
    fn default() -> Self {
        Self {
            strategy: RetrievalStrategy::Hybrid,
            use_reranking: true,
            top_k: 5,
            template: None,
            filter: None,
            min_score: None,
            cancellation: None,
        }
    }
}

impl AskOptions {
    /// Defaults taken from configuration
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            strategy: config.retrieval.default_strategy,
            use_reranking: config.rerank.enabled,
            top_k: config.retrieval.top_k,
            min_score: config.retrieval.min_score,
            ..Self::default()
        }
    }
}

/// Per-stage wall-clock timing in milliseconds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timing {
    pub retrieval_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rerank_ms: Option<u64>,
    pub generation_ms: u64,
    pub total_ms: u64,
}

/// Answer with provenance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    pub query_id: String,
    pub question: String,
    pub answer: String,
    /// Sources of the candidates that were placed in the prompt
    pub citations: Vec<Citation>,
    /// Final post-rerank candidates
    pub candidates: Vec<Candidate>,
    pub timing: Timing,
    pub token_usage: TokenUsage,
    pub finish_reason: FinishReason,
    pub model_name: String,
    pub strategy: RetrievalStrategy,
    /// Some candidates did not fit the context
    pub truncated: bool,
}

/// Event delivered to a streaming consumer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Delta { text: String },
    Done { finish_reason: FinishReason },
}

/// Everything produced before generation
struct Prepared {
    query_id: String,
    candidates: Vec<Candidate>,
    context: GeneratedContext,
    retrieval_ms: u64,
    rerank_ms: Option<u64>,
    guard: UpstreamGuard,
    started: Instant,
}

/// Question-answering pipeline
pub struct QueryOrchestrator {
    search: Arc<HybridSearch>,
    reranker: Reranker,
    assembler: ContextAssembler,
    llm: Arc<dyn LlmProvider>,
    context_options: ContextOptions,
    pool_multiplier: usize,
    upstream_timeout: Option<Duration>,
    stream_buffer: usize,
}

impl QueryOrchestrator {
    /// Create a new orchestrator
    pub fn new(
        search: Arc<HybridSearch>,
        llm: Arc<dyn LlmProvider>,
        counter: Arc<dyn TokenCounter>,
        config: &AppConfig,
    ) -> Result<Self> {
        Ok(Self {
            search,
            reranker: Reranker::new(&config.rerank)?,
            assembler: ContextAssembler::new(counter),
            llm,
            context_options: ContextOptions::from_config(&config.context)?,
            pool_multiplier: config.rerank.candidate_pool_multiplier.max(1),
            upstream_timeout: config.upstream_timeout(),
            stream_buffer: config.upstream.stream_buffer.max(1),
        })
    }

    /// Bounded channel sized from `upstream.stream_buffer`
    pub fn stream_channel(&self) -> (mpsc::Sender<StreamEvent>, mpsc::Receiver<StreamEvent>) {
        mpsc::channel(self.stream_buffer)
    }

    /// Answer a question
    #[instrument(
        skip_all,
        fields(query_id = field::Empty, strategy = %options.strategy, top_k = options.top_k)
    )]
    pub async fn ask(&self, query: &str, options: AskOptions) -> Result<QueryResult> {
        let prepared = self.prepare(query, &options).await?;

        let generation_start = Instant::now();
        let generation = prepared
            .guard
            .run(
                "llm",
                self.llm
                    .generate(&prepared.context.system_prompt, &prepared.context.user_prompt),
            )
            .await
            .map_err(|e| as_upstream("llm", e))?;
        let generation_time = generation_start.elapsed();

        debug!(finish_reason = ?generation.finish_reason, "Generation complete");

        Ok(self.finish(
            query,
            options.strategy,
            prepared,
            generation,
            generation_time,
        ))
    }

    /// Answer a question, forwarding text deltas to `sender` as they arrive
    ///
    /// A dropped receiver stops forwarding; generation still completes and
    /// the full result is returned. The closing `Done` event carries the
    /// finish reason the provider reported, `Stop` when it reported none.
    #[instrument(
        skip_all,
        fields(query_id = field::Empty, strategy = %options.strategy, top_k = options.top_k)
    )]
    pub async fn ask_streaming(
        &self,
        query: &str,
        options: AskOptions,
        sender: mpsc::Sender<StreamEvent>,
    ) -> Result<QueryResult> {
        let prepared = self.prepare(query, &options).await?;
        let guard = prepared.guard.clone();

        let generation_start = Instant::now();
        let mut stream = guard
            .run(
                "llm",
                self.llm.generate_stream(
                    &prepared.context.system_prompt,
                    &prepared.context.user_prompt,
                ),
            )
            .await
            .map_err(|e| as_upstream("llm", e))?;

        let mut answer = String::new();
        let mut finish_reason = None;
        let mut receiver_open = true;

        loop {
            let next = guard
                .run("llm", async { Ok(stream.next().await) })
                .await?;
            let Some(chunk) = next else {
                break;
            };

            let delta = match chunk.map_err(|e| as_upstream("llm", e))? {
                StreamChunk::Delta(delta) => delta,
                StreamChunk::Finish(reason) => {
                    finish_reason = Some(reason);
                    continue;
                }
            };
            answer.push_str(&delta);

            if receiver_open && sender.send(StreamEvent::Delta { text: delta }).await.is_err() {
                debug!("Stream receiver dropped, continuing without forwarding");
                receiver_open = false;
            }
        }

        let finish_reason = finish_reason.unwrap_or_default();
        if receiver_open {
            let _ = sender.send(StreamEvent::Done { finish_reason }).await;
        }

        let generation = Generation {
            token_usage: TokenUsage::estimated_from_output(&answer),
            text: answer,
            finish_reason,
        };
        let generation_time = generation_start.elapsed();

        Ok(self.finish(query, options.strategy, prepared, generation, generation_time))
    }

    /// Validate, retrieve, rerank, and assemble
    async fn prepare(&self, query: &str, options: &AskOptions) -> Result<Prepared> {
        let started = Instant::now();
        let query_id = Uuid::new_v4().to_string();
        Span::current().record("query_id", query_id.as_str());

        options.validate().map_err(|e| AppError::Validation {
            message: e.to_string(),
            field: Some("top_k".to_string()),
        })?;
        if query.trim().is_empty() {
            return Err(AppError::validation("question must not be empty", Some("query")));
        }

        let guard = UpstreamGuard::new(self.upstream_timeout, options.cancellation.clone());

        let fetch = if options.use_reranking {
            options
                .top_k
                .saturating_mul(self.pool_multiplier)
                .min(MAX_SEARCH_TOP_K)
        } else {
            options.top_k
        };

        let outcome = self
            .search
            .search(
                query,
                options.strategy,
                SearchOptions {
                    top_k: fetch,
                    min_score: options.min_score,
                    filter: options.filter.clone(),
                    guard: guard.clone(),
                },
            )
            .await?;
        let retrieval_ms = started.elapsed().as_millis() as u64;
        let retrieved = outcome.results.len();

        let (candidates, rerank_ms) = if options.use_reranking {
            let rerank_start = Instant::now();
            let reranked = self
                .reranker
                .rerank(outcome.results, query, Some(options.top_k));
            let candidates: Vec<Candidate> = reranked.into_iter().map(|r| r.candidate).collect();
            (candidates, Some(rerank_start.elapsed().as_millis() as u64))
        } else {
            let mut candidates = outcome.results;
            candidates.truncate(options.top_k);
            (candidates, None)
        };

        let context_options = match &options.template {
            Some(template) => ContextOptions {
                template: template.clone(),
                ..self.context_options.clone()
            },
            None => self.context_options.clone(),
        };
        let context = self.assembler.build(query, &candidates, &context_options);

        debug!(
            retrieved,
            kept = candidates.len(),
            used = context.candidates_used.len(),
            context_tokens = context.context_tokens,
            "Context ready"
        );

        Ok(Prepared {
            query_id,
            candidates,
            context,
            retrieval_ms,
            rerank_ms,
            guard,
            started,
        })
    }

    fn finish(
        &self,
        query: &str,
        strategy: RetrievalStrategy,
        prepared: Prepared,
        generation: Generation,
        generation_time: Duration,
    ) -> QueryResult {
        let token_usage = generation.token_usage;
        metrics::record_generation(
            generation_time.as_secs_f64(),
            self.llm.model_name(),
            token_usage.prompt_tokens,
            token_usage.completion_tokens,
        );

        let timing = Timing {
            retrieval_ms: prepared.retrieval_ms,
            rerank_ms: prepared.rerank_ms,
            generation_ms: generation_time.as_millis() as u64,
            total_ms: prepared.started.elapsed().as_millis() as u64,
        };

        info!(
            query_id = %prepared.query_id,
            candidates = prepared.candidates.len(),
            cited = prepared.context.candidates_used.len(),
            truncated = prepared.context.truncated,
            total_ms = timing.total_ms,
            "Question answered"
        );

        QueryResult {
            query_id: prepared.query_id,
            question: query.to_string(),
            answer: generation.text,
            citations: extract_citations(&prepared.context.candidates_used),
            candidates: prepared.candidates,
            timing,
            token_usage,
            finish_reason: generation.finish_reason,
            model_name: self.llm.model_name().to_string(),
            strategy,
            truncated: prepared.context.truncated,
        }
    }
}

/// LLM failures surface as upstream errors; cancellation and deadlines
/// keep their own identity
fn as_upstream(service: &str, err: AppError) -> AppError {
    match err {
        AppError::Upstream { .. } | AppError::Timeout { .. } | AppError::Cancelled => err,
        other => AppError::upstream(service, other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragforge_common::embeddings::HashingEmbedder;
    use async_trait::async_trait;
    use futures::stream;
    use ragforge_common::llm::{DeltaStream, MockLlm};
    use ragforge_common::tokens::EstimateCounter;
    use ragforge_search::{InMemoryVectorStore, KeywordRetriever, VectorRetriever};

    struct BrokenLlm;

    #[async_trait]
    impl LlmProvider for BrokenLlm {
        async fn generate(&self, _system: &str, _user: &str) -> Result<Generation> {
            Err(AppError::Internal {
                message: "503 from provider".into(),
            })
        }

        async fn generate_stream(&self, _system: &str, _user: &str) -> Result<DeltaStream> {
            Err(AppError::Internal {
                message: "503 from provider".into(),
            })
        }

        fn model_name(&self) -> &str {
            "broken"
        }
    }

    /// Streams a reply that the provider cut off at its token limit
    struct TruncatingLlm;

    #[async_trait]
    impl LlmProvider for TruncatingLlm {
        async fn generate(&self, _system: &str, _user: &str) -> Result<Generation> {
            Ok(Generation {
                text: "partial answer".into(),
                token_usage: TokenUsage::new(10, 2),
                finish_reason: FinishReason::Length,
            })
        }

        async fn generate_stream(&self, _system: &str, _user: &str) -> Result<DeltaStream> {
            let chunks: Vec<Result<StreamChunk>> = vec![
                Ok(StreamChunk::Delta("partial ".into())),
                Ok(StreamChunk::Delta("answer".into())),
                Ok(StreamChunk::Finish(FinishReason::Length)),
            ];
            Ok(stream::iter(chunks).boxed())
        }

        fn model_name(&self) -> &str {
            "truncating"
        }
    }

    fn corpus() -> Vec<Candidate> {
        let mut docs: Vec<Candidate> = [
            (
                "rt-1",
                "tokio is an async runtime that schedules tasks on worker threads",
                "runtime.md",
            ),
            (
                "rt-2",
                "blocking work should move to spawn_blocking so the tokio runtime stays responsive",
                "runtime.md",
            ),
            ("serde-1", "serde derives serialize and deserialize for rust structs", "serde.md"),
            ("axum-1", "axum routes requests to handlers and runs on the tokio runtime", "axum.md"),
            ("bread-1", "sourdough bread needs flour water salt and a starter", "bread.md"),
            ("bread-2", "bake the loaf in a hot dutch oven for forty minutes", "bread.md"),
        ]
        .into_iter()
        .map(|(id, content, source)| Candidate::new(id, content, source))
        .collect();
        docs[0].metadata.title = Some("Tokio Runtime".into());
        docs[0].metadata.chunk_index = Some(0);
        docs[1].metadata.chunk_index = Some(1);
        docs
    }

    async fn orchestrator_with(
        llm: Arc<dyn LlmProvider>,
        index_keyword: bool,
    ) -> QueryOrchestrator {
        let config = AppConfig::default();

        let vector = VectorRetriever::new(
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(InMemoryVectorStore::new()),
        );
        vector.index(&corpus()).await.unwrap();

        let keyword = Arc::new(KeywordRetriever::new());
        if index_keyword {
            keyword.index(corpus()).await;
        }

        let search = HybridSearch::from_config(Arc::new(vector), keyword, &config).unwrap();
        QueryOrchestrator::new(Arc::new(search), llm, Arc::new(EstimateCounter), &config).unwrap()
    }

    async fn orchestrator() -> QueryOrchestrator {
        orchestrator_with(Arc::new(MockLlm::new()), true).await
    }

    #[tokio::test]
    async fn test_ask_end_to_end() {
        let orchestrator = orchestrator().await;
        let options = AskOptions {
            top_k: 3,
            ..AskOptions::default()
        };

        let result = orchestrator
            .ask("How does the tokio runtime schedule tasks?", options)
            .await
            .unwrap();

        assert!(result.answer.contains("How does the tokio runtime schedule tasks?"));
        assert!(!result.candidates.is_empty());
        assert!(result.candidates.len() <= 3);
        assert!(result.citations.len() <= result.candidates.len());
        assert!(result.citations.iter().any(|c| c.source == "runtime.md"));
        assert!(result.timing.rerank_ms.is_some());
        assert_eq!(result.model_name, "mock-llm");
        assert_eq!(result.finish_reason, FinishReason::Stop);
        assert_eq!(result.strategy, RetrievalStrategy::Hybrid);
        assert!(result.token_usage.prompt_tokens > 0);
        assert!(!result.query_id.is_empty());
    }

    #[tokio::test]
    async fn test_without_reranking_truncates_to_top_k() {
        let orchestrator = orchestrator().await;
        let options = AskOptions {
            top_k: 2,
            use_reranking: false,
            strategy: RetrievalStrategy::Vector,
            ..AskOptions::default()
        };

        let result = orchestrator.ask("tokio runtime", options).await.unwrap();
        assert!(result.candidates.len() <= 2);
        assert!(result.timing.rerank_ms.is_none());
    }

    #[tokio::test]
    async fn test_validation_before_retrieval() {
        let orchestrator = orchestrator_with(Arc::new(BrokenLlm), false).await;

        let err = orchestrator.ask("   ", AskOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::Validation { .. }));

        for top_k in [0, 101] {
            let options = AskOptions {
                top_k,
                ..AskOptions::default()
            };
            let err = orchestrator.ask("tokio", options).await.unwrap_err();
            assert!(matches!(err, AppError::Validation { .. }));
        }
    }

    #[tokio::test]
    async fn test_hybrid_before_index_is_not_indexed() {
        let orchestrator = orchestrator_with(Arc::new(MockLlm::new()), false).await;

        let err = orchestrator.ask("tokio", AskOptions::default()).await.unwrap_err();
        assert!(matches!(err, AppError::NotIndexed { .. }));
    }

    #[tokio::test]
    async fn test_llm_failure_is_upstream() {
        let orchestrator = orchestrator_with(Arc::new(BrokenLlm), true).await;

        let err = orchestrator.ask("tokio", AskOptions::default()).await.unwrap_err();
        match err {
            AppError::Upstream { service, .. } => assert_eq!(service, "llm"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_streaming_forwards_deltas_in_order() {
        let orchestrator = orchestrator().await;
        let (tx, mut rx) = orchestrator.stream_channel();

        let collector = tokio::spawn(async move {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        });

        let result = orchestrator
            .ask_streaming("what is serde?", AskOptions::default(), tx)
            .await
            .unwrap();
        let events = collector.await.unwrap();

        let (last, deltas) = events.split_last().unwrap();
        assert_eq!(
            *last,
            StreamEvent::Done {
                finish_reason: FinishReason::Stop
            }
        );

        let streamed: String = deltas
            .iter()
            .map(|e| match e {
                StreamEvent::Delta { text } => text.as_str(),
                StreamEvent::Done { .. } => panic!("done before the end"),
            })
            .collect();
        assert_eq!(streamed, result.answer);
        assert_eq!(result.token_usage.prompt_tokens, 0);
        assert_eq!(
            result.token_usage.completion_tokens,
            result.answer.chars().count().div_ceil(4)
        );
    }

    #[tokio::test]
    async fn test_streaming_forwards_provider_finish_reason() {
        let orchestrator = orchestrator_with(Arc::new(TruncatingLlm), true).await;
        let (tx, mut rx) = orchestrator.stream_channel();

        let result = orchestrator
            .ask_streaming("what is serde?", AskOptions::default(), tx)
            .await
            .unwrap();

        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }

        assert_eq!(
            events.last(),
            Some(&StreamEvent::Done {
                finish_reason: FinishReason::Length
            })
        );
        assert_eq!(events.len(), 3);
        assert_eq!(result.answer, "partial answer");
        assert_eq!(result.finish_reason, FinishReason::Length);
    }

    #[tokio::test]
    async fn test_pool_multiplier_does_not_overflow() {
        let mut config = AppConfig::default();
        config.rerank.candidate_pool_multiplier = usize::MAX;

        let vector = VectorRetriever::new(
            Arc::new(HashingEmbedder::new(256)),
            Arc::new(InMemoryVectorStore::new()),
        );
        vector.index(&corpus()).await.unwrap();
        let keyword = Arc::new(KeywordRetriever::new());
        keyword.index(corpus()).await;

        let search = HybridSearch::from_config(Arc::new(vector), keyword, &config).unwrap();
        let orchestrator = QueryOrchestrator::new(
            Arc::new(search),
            Arc::new(MockLlm::new()),
            Arc::new(EstimateCounter),
            &config,
        )
        .unwrap();

        let options = AskOptions {
            top_k: 3,
            ..AskOptions::default()
        };
        let result = orchestrator.ask("tokio runtime", options).await.unwrap();
        assert!(result.candidates.len() <= 3);
    }

    #[tokio::test]
    async fn test_streaming_survives_dropped_receiver() {
        let orchestrator = orchestrator().await;
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let result = orchestrator
            .ask_streaming("what is serde?", AskOptions::default(), tx)
            .await
            .unwrap();
        assert!(!result.answer.is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_query() {
        let orchestrator = orchestrator().await;
        let token = CancellationToken::new();
        token.cancel();

        let options = AskOptions {
            cancellation: Some(token),
            strategy: RetrievalStrategy::Vector,
            ..AskOptions::default()
        };
        let err = orchestrator.ask("tokio", options).await.unwrap_err();
        assert!(matches!(err, AppError::Cancelled));
    }

    #[tokio::test]
    async fn test_template_override() {
        let orchestrator = orchestrator().await;
        let options = AskOptions {
            template: Some(PromptTemplate::Custom {
                system: "custom system".into(),
                user: "{{QUERY}}\n{{CONTEXT}}".into(),
            }),
            ..AskOptions::default()
        };

        let result = orchestrator.ask("explain axum routing", options).await.unwrap();
        // MockLlm echoes the first line of the user prompt, which is now the bare query
        assert!(result.answer.contains(": explain axum routing"));
    }
}
