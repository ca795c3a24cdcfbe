//! Prompt templates
//!
//! User templates carry two placeholders, `{{QUERY}}` and `{{CONTEXT}}`.

use ragforge_common::errors::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const QUERY_PLACEHOLDER: &str = "{{QUERY}}";
const CONTEXT_PLACEHOLDER: &str = "{{CONTEXT}}";

const DEFAULT_SYSTEM: &str = "You are a helpful assistant that answers questions using only the \
provided context. Cite the sources you rely on by their [Source: ...] labels. If the context does \
not contain the answer, say that you do not know.";

const DEFAULT_USER: &str = "Question: {{QUERY}}\n\nContext:\n{{CONTEXT}}\n\n\
Answer the question using the context above.";

const CONCISE_SYSTEM: &str = "You answer briefly and precisely, using only the provided context. \
Prefer one or two sentences. If the context is insufficient, say so.";

const CONCISE_USER: &str = "Question: {{QUERY}}\n\nContext:\n{{CONTEXT}}\n\nShort answer:";

const CODE_SYSTEM: &str = "You are a senior software engineer. Answer using only the provided \
context, quote relevant code in fenced blocks, and name the file each snippet comes from.";

const CODE_USER: &str = "Question: {{QUERY}}\n\nRelevant code and documentation:\n{{CONTEXT}}\n\n\
Explain the answer with reference to the code above.";

const COMPARISON_SYSTEM: &str = "You compare options objectively using only the provided context. \
Lay out similarities and differences, and note where the sources disagree.";

const COMPARISON_USER: &str = "Question: {{QUERY}}\n\nContext:\n{{CONTEXT}}\n\n\
Compare the relevant options, then give a recommendation if the context supports one.";

const TUTORIAL_SYSTEM: &str = "You are a patient tutor. Using only the provided context, explain \
step by step and define terms the reader may not know.";

const TUTORIAL_USER: &str = "Question: {{QUERY}}\n\nContext:\n{{CONTEXT}}\n\n\
Walk through the answer as a numbered sequence of steps.";

/// Prompt template family
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PromptTemplate {
    #[default]
    Default,
    Concise,
    CodeFocused,
    Comparison,
    Tutorial,
    /// Caller-supplied prompts
    Custom { system: String, user: String },
}

impl PromptTemplate {
    pub fn name(&self) -> &'static str {
        match self {
            PromptTemplate::Default => "default",
            PromptTemplate::Concise => "concise",
            PromptTemplate::CodeFocused => "code",
            PromptTemplate::Comparison => "comparison",
            PromptTemplate::Tutorial => "tutorial",
            PromptTemplate::Custom { .. } => "custom",
        }
    }

    pub fn system_prompt(&self) -> &str {
        match self {
            PromptTemplate::Default => DEFAULT_SYSTEM,
            PromptTemplate::Concise => CONCISE_SYSTEM,
            PromptTemplate::CodeFocused => CODE_SYSTEM,
            PromptTemplate::Comparison => COMPARISON_SYSTEM,
            PromptTemplate::Tutorial => TUTORIAL_SYSTEM,
            PromptTemplate::Custom { system, .. } => system,
        }
    }

    pub fn user_template(&self) -> &str {
        match self {
            PromptTemplate::Default => DEFAULT_USER,
            PromptTemplate::Concise => CONCISE_USER,
            PromptTemplate::CodeFocused => CODE_USER,
            PromptTemplate::Comparison => COMPARISON_USER,
            PromptTemplate::Tutorial => TUTORIAL_USER,
            PromptTemplate::Custom { user, .. } => user,
        }
    }

    /// Fill the user template with the query and the rendered context
    pub fn render_user(&self, query: &str, context: &str) -> String {
        substitute(self.user_template(), query, context)
    }
}

impl fmt::Display for PromptTemplate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PromptTemplate {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(PromptTemplate::Default),
            "concise" => Ok(PromptTemplate::Concise),
            "code" | "code-focused" | "code_focused" => Ok(PromptTemplate::CodeFocused),
            "comparison" => Ok(PromptTemplate::Comparison),
            "tutorial" => Ok(PromptTemplate::Tutorial),
            other => Err(AppError::validation(
                format!("unknown prompt template '{other}'"),
                Some("template"),
            )),
        }
    }
}

/// Replace placeholders in one left-to-right pass
///
/// Inserted text is never scanned again, so a query containing
/// `{{CONTEXT}}` stays literal.
fn substitute(template: &str, query: &str, context: &str) -> String {
    let mut out = String::with_capacity(template.len() + query.len() + context.len());
    let mut rest = template;

    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        if let Some(after) = tail.strip_prefix(QUERY_PLACEHOLDER) {
            out.push_str(query);
            rest = after;
        } else if let Some(after) = tail.strip_prefix(CONTEXT_PLACEHOLDER) {
            out.push_str(context);
            rest = after;
        } else {
            out.push_str("{{");
            rest = &tail[2..];
        }
    }

    out.push_str(rest);
    out
}
