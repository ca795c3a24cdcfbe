//! LLM provider abstraction
//!
//! Provides:
//! - A provider trait with blocking and streaming generation
//! - An OpenAI-compatible chat completions client (SSE streaming)
//! - A deterministic offline provider for development and tests

use crate::config::LlmConfig;
use crate::errors::{AppError, Result};
use crate::tokens::estimate_tokens;
use async_trait::async_trait;
use futures::stream::{self, BoxStream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Token accounting reported by a provider
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

impl TokenUsage {
    pub fn new(prompt_tokens: usize, completion_tokens: usize) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }

    /// Usage for streamed output: the provider does not report prompt
    /// tokens, so only an estimated completion count is available
    pub fn estimated_from_output(text: &str) -> Self {
        Self::new(0, estimate_tokens(text))
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    #[default]
    Stop,
    Length,
    ContentFilter,
    Unknown,
}

impl FinishReason {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("stop") | None => FinishReason::Stop,
            Some("length") => FinishReason::Length,
            Some("content_filter") => FinishReason::ContentFilter,
            Some(_) => FinishReason::Unknown,
        }
    }
}

/// Completed generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub token_usage: TokenUsage,
    pub finish_reason: FinishReason,
}

/// Item of a streamed generation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamChunk {
    /// Next piece of answer text
    Delta(String),
    /// Provider reported why generation stopped
    Finish(FinishReason),
}

/// Ordered chunks of a streamed generation
pub type DeltaStream = BoxStream<'static, Result<StreamChunk>>;

/// Trait for answer generation
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Generate a complete answer
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<Generation>;

    /// Generate an answer as a stream of text deltas, ending with the
    /// finish reason when the provider reports one
    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<DeltaStream>;

    fn model_name(&self) -> &str;
}

/// OpenAI-compatible chat completions client
pub struct OpenAiChatClient {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: usize,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
    usage: Option<ChatUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatUsage {
    prompt_tokens: usize,
    completion_tokens: usize,
}

#[derive(Deserialize)]
struct ChatChunk {
    choices: Vec<ChatChunkChoice>,
}

#[derive(Deserialize)]
struct ChatChunkChoice {
    #[serde(default)]
    delta: ChatDelta,
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct ChatDelta {
    content: Option<String>,
}

impl OpenAiChatClient {
    /// Create a new chat client
    pub fn new(config: &LlmConfig) -> Result<Self> {
        let api_key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
            message: "llm.api_key is required for the openai provider".to_string(),
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let base = config
            .api_base
            .clone()
            .unwrap_or_else(|| "https://api.openai.com/v1".to_string());

        Ok(Self {
            client,
            api_key,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
        })
    }

    fn request<'a>(
        &'a self,
        system_prompt: &'a str,
        user_prompt: &'a str,
        stream: bool,
    ) -> ChatRequest<'a> {
        ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: user_prompt,
                },
            ],
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            stream,
        }
    }

    async fn send(&self, body: &ChatRequest<'_>) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| AppError::upstream("llm", format!("LLM API request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::upstream(
                "llm",
                format!("LLM API error {}: {}", status, body),
            ));
        }

        Ok(response)
    }
}

#[async_trait]
impl LlmProvider for OpenAiChatClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<Generation> {
        let response = self.send(&self.request(system_prompt, user_prompt, false)).await?;

        let chat: ChatResponse = response.json().await.map_err(|e| {
            AppError::upstream("llm", format!("Failed to parse LLM response: {}", e))
        })?;

        let choice = chat
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| AppError::upstream("llm", "Empty response from LLM"))?;
        let text = choice.message.content.unwrap_or_default();

        let token_usage = chat
            .usage
            .map(|u| TokenUsage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_else(|| TokenUsage::estimated_from_output(&text));

        Ok(Generation {
            finish_reason: FinishReason::parse(choice.finish_reason.as_deref()),
            text,
            token_usage,
        })
    }

    async fn generate_stream(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> Result<DeltaStream> {
        let response = self.send(&self.request(system_prompt, user_prompt, true)).await?;
        Ok(sse_deltas(response.bytes_stream()).boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// One parsed server-sent event line
#[derive(Debug, PartialEq)]
enum SseEvent {
    Chunk(StreamChunk),
    Done,
}

/// Parse a single `data:` line of a chat completions stream
///
/// One line can carry both a final piece of text and the finish reason.
fn parse_sse_line(line: &[u8]) -> Result<Vec<SseEvent>> {
    let line = String::from_utf8_lossy(line);
    let Some(payload) = line.trim().strip_prefix("data:") else {
        return Ok(Vec::new());
    };
    let payload = payload.trim();

    if payload == "[DONE]" {
        return Ok(vec![SseEvent::Done]);
    }

    let chunk: ChatChunk = serde_json::from_str(payload)
        .map_err(|e| AppError::upstream("llm", format!("Malformed stream chunk: {}", e)))?;

    let mut events = Vec::new();
    if let Some(choice) = chunk.choices.into_iter().next() {
        if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
            events.push(SseEvent::Chunk(StreamChunk::Delta(content)));
        }
        if let Some(reason) = choice.finish_reason {
            let reason = FinishReason::parse(Some(&reason));
            events.push(SseEvent::Chunk(StreamChunk::Finish(reason)));
        }
    }
    Ok(events)
}

struct SseState<S> {
    bytes: S,
    buffer: Vec<u8>,
    pending: VecDeque<Result<StreamChunk>>,
    done: bool,
}

impl<S> SseState<S> {
    /// Move every complete line in the buffer into `pending`
    fn drain_lines(&mut self, flush: bool) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.push_line(&line);
        }
        if flush && !self.buffer.is_empty() {
            let line = std::mem::take(&mut self.buffer);
            self.push_line(&line);
        }
    }

    fn push_line(&mut self, line: &[u8]) {
        if self.done {
            return;
        }
        match parse_sse_line(line) {
            Ok(events) => {
                for event in events {
                    match event {
                        SseEvent::Chunk(chunk) => self.pending.push_back(Ok(chunk)),
                        SseEvent::Done => {
                            self.done = true;
                            return;
                        }
                    }
                }
            }
            Err(e) => {
                self.pending.push_back(Err(e));
                self.done = true;
            }
        }
    }
}

/// Turn a raw SSE byte stream into ordered stream chunks
fn sse_deltas<S, B>(bytes: S) -> impl Stream<Item = Result<StreamChunk>>
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    let state = SseState {
        bytes: Box::pin(bytes),
        buffer: Vec::new(),
        pending: VecDeque::new(),
        done: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.bytes.next().await {
                Some(Ok(chunk)) => {
                    state.buffer.extend_from_slice(chunk.as_ref());
                    state.drain_lines(false);
                }
                Some(Err(e)) => {
                    state.done = true;
                    let err = AppError::upstream("llm", format!("Stream failed: {}", e));
                    return Some((Err(err), state));
                }
                None => {
                    state.drain_lines(true);
                    state.done = true;
                }
            }
        }
    })
}

/// Offline provider that answers from the prompt it was given
///
/// Used for development without an API key and in tests.
pub struct MockLlm {
    model: String,
}

impl MockLlm {
    pub fn new() -> Self {
        Self {
            model: "mock-llm".to_string(),
        }
    }

    fn respond(&self, user_prompt: &str) -> String {
        let first_line = user_prompt
            .lines()
            .map(str::trim)
            .find(|l| !l.is_empty())
            .unwrap_or("the question");
        format!(
            "Based on the provided context, here is what the sources say about: {}\n\n\
            [Mock response - LLM API key not configured]",
            first_line
        )
    }
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LlmProvider for MockLlm {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<Generation> {
        let text = self.respond(user_prompt);
        let prompt_tokens = estimate_tokens(system_prompt) + estimate_tokens(user_prompt);
        Ok(Generation {
            token_usage: TokenUsage::new(prompt_tokens, estimate_tokens(&text)),
            text,
            finish_reason: FinishReason::Stop,
        })
    }

    async fn generate_stream(
        &self,
        _system_prompt: &str,
        user_prompt: &str,
    ) -> Result<DeltaStream> {
        let text = self.respond(user_prompt);
        let mut chunks: Vec<Result<StreamChunk>> = text
            .split_inclusive(' ')
            .map(|piece| Ok(StreamChunk::Delta(piece.to_string())))
            .collect();
        chunks.push(Ok(StreamChunk::Finish(FinishReason::Stop)));
        Ok(stream::iter(chunks).boxed())
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create an LLM provider based on configuration
pub fn create_llm(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Arc::new(OpenAiChatClient::new(config)?)),
        "mock" => Ok(Arc::new(MockLlm::new())),
        other => Err(AppError::Configuration {
            message: format!("unknown llm provider '{other}'"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(text: &str) -> StreamChunk {
        StreamChunk::Delta(text.to_string())
    }

    #[test]
    fn test_parse_sse_line() {
        let line = br#"data: {"choices":[{"delta":{"content":"Hel"}}]}"#;
        assert_eq!(parse_sse_line(line).unwrap(), vec![SseEvent::Chunk(delta("Hel"))]);
        assert_eq!(parse_sse_line(b"data: [DONE]").unwrap(), vec![SseEvent::Done]);
        assert!(parse_sse_line(b": keep-alive").unwrap().is_empty());
        assert!(parse_sse_line(br#"data: {"choices":[{"delta":{"role":"assistant"}}]}"#)
            .unwrap()
            .is_empty());
        assert!(parse_sse_line(b"data: {not json").is_err());
    }

    #[test]
    fn test_parse_sse_line_with_finish_reason() {
        let line = br#"data: {"choices":[{"delta":{"content":"end"},"finish_reason":"length"}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            vec![
                SseEvent::Chunk(delta("end")),
                SseEvent::Chunk(StreamChunk::Finish(FinishReason::Length)),
            ]
        );

        let line = br#"data: {"choices":[{"delta":{},"finish_reason":"stop"}]}"#;
        assert_eq!(
            parse_sse_line(line).unwrap(),
            vec![SseEvent::Chunk(StreamChunk::Finish(FinishReason::Stop))]
        );
    }

    #[tokio::test]
    async fn test_sse_stream_reports_length_finish() {
        let raw: [&[u8]; 3] = [
            br#"data: {"choices":[{"delta":{"content":"cut"},"finish_reason":null}]}"#,
            br#"data: {"choices":[{"delta":{},"finish_reason":"length"}]}"#,
            b"data: [DONE]",
        ];
        let chunks: Vec<reqwest::Result<Vec<u8>>> =
            raw.iter().map(|line| Ok([*line, &b"\n\n"[..]].concat())).collect();

        let items: Vec<StreamChunk> = sse_deltas(stream::iter(chunks))
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(items, vec![delta("cut"), StreamChunk::Finish(FinishReason::Length)]);
    }

    #[tokio::test]
    async fn test_sse_deltas_across_chunk_boundaries() {
        let raw: [&[u8]; 3] = [
            b"data: {\"choices\":[{\"delta\":{\"content\":\"Hello\"}}]}\n\ndata: {\"choi",
            b"ces\":[{\"delta\":{\"content\":\" world\"}}]}\n\n",
            b"data: [DONE]\n\ndata: {\"choices\":[{\"delta\":{\"content\":\"ignored\"}}]}\n",
        ];
        let chunks: Vec<reqwest::Result<Vec<u8>>> = raw.iter().map(|c| Ok(c.to_vec())).collect();

        let items: Vec<StreamChunk> = sse_deltas(stream::iter(chunks))
            .map(|d| d.unwrap())
            .collect()
            .await;

        assert_eq!(items, vec![delta("Hello"), delta(" world")]);
    }

    #[test]
    fn test_streaming_usage_estimate() {
        let usage = TokenUsage::estimated_from_output("twelve chars");
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 3);
        assert_eq!(usage.total_tokens, 3);
    }

    #[tokio::test]
    async fn test_mock_stream_matches_generate() {
        let llm = MockLlm::new();
        let full = llm.generate("sys", "What is RRF?").await.unwrap();
        let streamed: Vec<StreamChunk> = llm
            .generate_stream("sys", "What is RRF?")
            .await
            .unwrap()
            .map(|d| d.unwrap())
            .collect()
            .await;

        let (last, deltas) = streamed.split_last().unwrap();
        assert_eq!(*last, StreamChunk::Finish(full.finish_reason));
        let text: String = deltas
            .iter()
            .map(|c| match c {
                StreamChunk::Delta(text) => text.as_str(),
                StreamChunk::Finish(_) => panic!("finish before the end"),
            })
            .collect();
        assert_eq!(text, full.text);
        assert!(full.text.contains("What is RRF?"));
    }

    #[test]
    fn test_finish_reason_parse() {
        assert_eq!(FinishReason::parse(Some("length")), FinishReason::Length);
        assert_eq!(FinishReason::parse(None), FinishReason::Stop);
        assert_eq!(FinishReason::parse(Some("tool_calls")), FinishReason::Unknown);
    }
}
