//! Context Assembler - Builds token-budgeted prompts from ranked candidates
//!
//! Provides:
//! - Source-labelled context blocks
//! - Token budget enforcement with truncation reporting
//! - Prompt templates
//! - Citation extraction

mod citations;
mod templates;

pub use citations::{extract_citations, format_citations, Citation};
pub use templates::PromptTemplate;

use ragforge_common::config::ContextConfig;
use ragforge_common::errors::Result;
use ragforge_common::metrics;
use ragforge_common::tokens::TokenCounter;
use ragforge_common::types::Candidate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::debug;

/// Separator placed between context blocks
pub const BLOCK_SEPARATOR: &str = "\n\n---\n\n";

/// Context used when retrieval found nothing
pub const NO_CONTEXT_MARKER: &str = "[No relevant context was found for this question.]";

/// Assembly options
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// Maximum candidates rendered
    pub max_candidates: usize,

    /// Token budget for the context block
    pub max_tokens: usize,

    pub template: PromptTemplate,

    /// Render a source header above each block
    pub include_metadata: bool,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            max_candidates: 10,
            max_tokens: 3000,
            template: PromptTemplate::Default,
            include_metadata: true,
        }
    }
}

impl ContextOptions {
    pub fn from_config(config: &ContextConfig) -> Result<Self> {
        Ok(Self {
            max_candidates: config.max_candidates,
            max_tokens: config.max_tokens,
            template: config.template.parse()?,
            include_metadata: config.include_metadata,
        })
    }
}

/// Prompt pair ready for generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneratedContext {
    pub system_prompt: String,
    pub user_prompt: String,

    /// Candidates that made it into the context, in order
    pub candidates_used: Vec<Candidate>,

    /// Tokens in the rendered context block; never above the budget
    pub context_tokens: usize,

    /// Tokens in system plus user prompt
    pub total_tokens: usize,

    /// At least one offered candidate was left out
    pub truncated: bool,
}

/// Context assembler
pub struct ContextAssembler {
    counter: Arc<dyn TokenCounter>,
}

impl ContextAssembler {
    /// Create a new context assembler
    pub fn new(counter: Arc<dyn TokenCounter>) -> Self {
        Self { counter }
    }

    /// Build the prompts for `query` from candidates in rank order
    pub fn build(
        &self,
        query: &str,
        candidates: &[Candidate],
        options: &ContextOptions,
    ) -> GeneratedContext {
        let separator_tokens = self.counter.count(BLOCK_SEPARATOR);

        let mut blocks: Vec<String> = Vec::new();
        let mut used: Vec<Candidate> = Vec::new();
        let mut context_tokens = 0;
        let mut truncated = false;

        for candidate in candidates {
            if used.len() >= options.max_candidates {
                truncated = true;
                break;
            }

            let block = render_block(candidate, options.include_metadata);
            let mut cost = self.counter.count(&block);
            if !blocks.is_empty() {
                cost += separator_tokens;
            }

            // Check token budget
            if context_tokens + cost > options.max_tokens {
                truncated = true;
                break;
            }

            context_tokens += cost;
            blocks.push(block);
            used.push(candidate.clone());
        }

        let context = if blocks.is_empty() {
            NO_CONTEXT_MARKER.to_string()
        } else {
            blocks.join(BLOCK_SEPARATOR)
        };

        let system_prompt = options.template.system_prompt().to_string();
        let user_prompt = options.template.render_user(query, &context);
        let total_tokens = self.counter.count(&system_prompt) + self.counter.count(&user_prompt);

        if truncated {
            metrics::record_context_truncation(options.template.name());
        }

        debug!(
            offered = candidates.len(),
            used = used.len(),
            context_tokens,
            budget = options.max_tokens,
            truncated,
            counter = self.counter.name(),
            "Context assembled"
        );

        GeneratedContext {
            system_prompt,
            user_prompt,
            candidates_used: used,
            context_tokens,
            total_tokens,
            truncated,
        }
    }
}

/// Header line plus raw content
fn render_block(candidate: &Candidate, include_metadata: bool) -> String {
    if !include_metadata {
        return candidate.content.clone();
    }

    let m = &candidate.metadata;
    let mut fields = vec![format!("Source: {}", m.source)];
    if let Some(title) = &m.title {
        fields.push(format!("Title: {title}"));
    }
    if let Some(heading) = &m.heading {
        fields.push(format!("Section: {heading}"));
    }

    format!("[{}]\n{}", fields.join(" | "), candidate.content)
}
