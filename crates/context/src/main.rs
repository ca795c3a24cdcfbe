//! RagForge `ask`
//!
//! Indexes a JSON array of candidates and answers one question over it:
//!
//! ```text
//! ask [--stream] <corpus.json> <question...>
//! ```

use anyhow::Context;
use ragforge_common::{
    config::AppConfig, embeddings::create_embedder, llm::create_llm, metrics, telemetry,
    tokens::create_token_counter, Candidate, VERSION,
};
use ragforge_context::{format_citations, AskOptions, QueryOrchestrator, StreamEvent};
use ragforge_search::{HybridSearch, InMemoryVectorStore, KeywordRetriever, VectorRetriever};
use std::io::Write;
use std::sync::Arc;
use tracing::{info, warn};

const USAGE: &str = "usage: ask [--stream] <corpus.json> <question...>";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let stream = match args.iter().position(|a| a == "--stream") {
        Some(pos) => {
            args.remove(pos);
            true
        }
        None => false,
    };
    if args.len() < 2 {
        anyhow::bail!(USAGE);
    }
    let corpus_path = args.remove(0);
    let question = args.join(" ");

    // Load configuration
    let mut config = AppConfig::load().context("failed to load configuration")?;

    telemetry::init_tracing(&config.observability)?;
    metrics::register_metrics();

    info!("Starting RagForge ask v{}", VERSION);

    // Without credentials fall back to the offline providers
    if config.embedding.provider == "openai" && config.embedding.api_key.is_none() {
        warn!("No embedding API key configured, using the hashing embedder");
        config.embedding.provider = "hashing".to_string();
    }
    if config.llm.provider == "openai" && config.llm.api_key.is_none() {
        warn!("No LLM API key configured, using the mock provider");
        config.llm.provider = "mock".to_string();
    }

    let raw = tokio::fs::read_to_string(&corpus_path)
        .await
        .with_context(|| format!("failed to read corpus {corpus_path}"))?;
    let corpus: Vec<Candidate> =
        serde_json::from_str(&raw).with_context(|| format!("invalid corpus {corpus_path}"))?;

    // Build both indexes
    let keyword = Arc::new(KeywordRetriever::new());
    keyword.index(corpus.clone()).await;

    let vector = VectorRetriever::new(
        create_embedder(&config.embedding)?,
        Arc::new(InMemoryVectorStore::new()),
    );
    let stored = vector.index(&corpus).await?;

    info!(
        documents = keyword.document_count().await,
        vectors = stored,
        "Corpus indexed"
    );

    let search = Arc::new(HybridSearch::from_config(Arc::new(vector), keyword, &config)?);
    let orchestrator = QueryOrchestrator::new(
        search,
        create_llm(&config.llm)?,
        create_token_counter(&config.context.encoding)?,
        &config,
    )?;

    let options = AskOptions::from_config(&config);

    if stream {
        let (tx, mut rx) = orchestrator.stream_channel();
        let printer = tokio::spawn(async move {
            let mut stdout = std::io::stdout();
            while let Some(event) = rx.recv().await {
                if let StreamEvent::Delta { text } = event {
                    let _ = write!(stdout, "{text}");
                    let _ = stdout.flush();
                }
            }
        });

        let result = orchestrator.ask_streaming(&question, options, tx).await?;
        printer.await?;

        println!("\n\nSources:\n{}", format_citations(&result.citations));
    } else {
        let result = orchestrator.ask(&question, options).await?;
        println!("{}", serde_json::to_string_pretty(&result)?);
    }

    Ok(())
}
