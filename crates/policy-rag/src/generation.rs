//! OpenAI-compatible chat completion adapter.
//!
//! `complete` posts a normal chat request. `stream` posts with
//! `"stream": true` and decodes the server-sent events:
//!
//! ```text
//! data: {"choices":[{"delta":{"content":"Employees"}}]}
//!
//! data: {"choices":[{"delta":{"content":" may"}}]}
//!
//! data: [DONE]
//! ```
//!
//! Any endpoint speaking this protocol works (OpenAI, Azure deployments
//! behind a proxy, Ollama's `/v1`, vLLM) by changing `generation.base_url`.

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use policy_rag_core::generation::{ChatMessage, Generator, TokenStream};
use policy_rag_core::RagError;
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use crate::config::GenerationConfig;
use crate::http::{build_client, openai_api_key, post_json_with_retry};

type CoreResult<T> = policy_rag_core::Result<T>;

fn generation_failure(message: impl std::fmt::Display) -> RagError {
    RagError::GenerationFailure(format!("{:#}", message))
}

pub struct OpenAiGenerator {
    client: Client,
    url: String,
    model: String,
    temperature: f64,
}

impl OpenAiGenerator {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        Ok(Self {
            client: build_client(config.timeout_secs)?,
            url: format!(
                "{}/chat/completions",
                config.base_url.trim_end_matches('/')
            ),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    fn request_body(&self, messages: &[ChatMessage], stream: bool) -> Value {
        serde_json::json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": stream,
        })
    }

    async fn send(&self, messages: &[ChatMessage], stream: bool) -> CoreResult<reqwest::Response> {
        let api_key = openai_api_key().map_err(generation_failure)?;
        let body = self.request_body(messages, stream);
        // Generation is never retried: a failed call surfaces as-is.
        post_json_with_retry(&self.client, &self.url, Some(&api_key), &body, 0)
            .await
            .map_err(generation_failure)
    }
}

#[async_trait]
impl Generator for OpenAiGenerator {
    async fn complete(&self, messages: &[ChatMessage]) -> CoreResult<String> {
        debug!(model = %self.model, "chat completion");
        let response = self.send(messages, false).await?;
        let json: Value = response
            .json()
            .await
            .map_err(|e| generation_failure(format!("invalid response body: {}", e)))?;
        parse_completion(&json)
    }

    async fn stream(&self, messages: &[ChatMessage]) -> CoreResult<TokenStream> {
        debug!(model = %self.model, "streaming chat completion");
        let response = self.send(messages, true).await?;
        let mut bytes = response.bytes_stream();

        let tokens = async_stream::stream! {
            let mut decoder = SseDecoder::default();
            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(generation_failure(format!("stream interrupted: {}", e)));
                        return;
                    }
                };
                for event in decoder.push(&chunk) {
                    match event {
                        SseEvent::Done => return,
                        SseEvent::Data(payload) => match parse_delta(&payload) {
                            Ok(Some(content)) => yield Ok(content),
                            Ok(None) => {}
                            Err(e) => {
                                yield Err(e);
                                return;
                            }
                        },
                    }
                }
            }
        };
        Ok(tokens.boxed())
    }
}

/// `choices[0].message.content` of a non-streaming completion.
pub fn parse_completion(json: &Value) -> CoreResult<String> {
    if let Some(message) = json.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(generation_failure(message.to_string()));
    }
    json.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(str::to_string)
        .ok_or_else(|| generation_failure("invalid completion response: missing content"))
}

/// `choices[0].delta.content` of a streamed chunk; `None` for role-only or
/// empty deltas.
pub fn parse_delta(payload: &str) -> CoreResult<Option<String>> {
    let json: Value = serde_json::from_str(payload)
        .map_err(|e| generation_failure(format!("invalid stream chunk: {}", e)))?;
    if let Some(message) = json.pointer("/error/message").and_then(|m| m.as_str()) {
        return Err(generation_failure(message.to_string()));
    }
    Ok(json
        .pointer("/choices/0/delta/content")
        .and_then(|c| c.as_str())
        .filter(|c| !c.is_empty())
        .map(str::to_string))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseEvent {
    Data(String),
    Done,
}

/// Incremental decoder for `data:` lines. Network chunks may split a line
/// anywhere, including inside a multi-byte character.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(newline) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=newline).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end_matches(['\r', '\n']);

            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
            } else if !data.is_empty() {
                events.push(SseEvent::Data(data.to_string()));
            }
        }

        events
    }
}
