//! RagForge Context Engine
//!
//! Turns ranked candidates into answers:
//! - Token-budgeted context assembly with citations
//! - Prompt templates
//! - End-to-end query orchestration (retrieve, rerank, assemble, generate)

pub mod assembler;
pub mod orchestrator;

pub use assembler::{
    extract_citations, format_citations, Citation, ContextAssembler, ContextOptions,
    GeneratedContext, PromptTemplate,
};
pub use orchestrator::{AskOptions, QueryOrchestrator, QueryResult, StreamEvent, Timing};
