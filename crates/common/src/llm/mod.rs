//! Generation backend abstraction
//!
//! One provider-agnostic call shape (`complete` / `complete_stream`) with a small
//! closed set of concrete backends selected by configuration:
//! - OpenAI-compatible chat completions over HTTP (with SSE streaming)
//! - An offline extractive backend for running without credentials

use crate::config::GenerationConfig;
use crate::errors::{AppError, Result};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Lazy, finite, non-restartable sequence of answer fragments
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A single completion call
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub prompt: String,
    pub max_tokens: usize,
    pub temperature: f32,
}

impl CompletionRequest {
    pub fn new(prompt: impl Into<String>, max_tokens: usize, temperature: f32) -> Self {
        Self {
            prompt: prompt.into(),
            max_tokens,
            temperature,
        }
    }
}

/// Trait for text generation
#[async_trait]
pub trait GenerationBackend: Send + Sync {
    /// Generate the full completion
    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Generate the completion as a stream of fragments
    ///
    /// Backends without native streaming replay the full completion word by word.
    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let full = self.complete(request).await?;
        Ok(Box::pin(futures::stream::iter(split_words(&full).into_iter().map(Ok))))
    }

    /// Model identifier, used for pricing and tokenization
    fn model_name(&self) -> &str;
}

/// Split text into word fragments, each keeping its trailing whitespace
///
/// The fragments concatenate back to `text` exactly.
fn split_words(text: &str) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut start = 0;
    let mut in_space = false;

    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_space = true;
        } else if in_space {
            fragments.push(text[start..i].to_string());
            start = i;
            in_space = false;
        }
    }
    if start < text.len() {
        fragments.push(text[start..].to_string());
    }
    fragments
}

/// OpenAI-compatible chat completions client
pub struct OpenAICompatibleBackend {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
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
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatStreamChunk {
    choices: Vec<ChatStreamChoice>,
}

#[derive(Deserialize)]
struct ChatStreamChoice {
    delta: ChatDelta,
}

#[derive(Deserialize)]
struct ChatDelta {
    #[serde(default)]
    content: Option<String>,
}

impl OpenAICompatibleBackend {
    pub fn new(
        api_key: String,
        model: String,
        api_base: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Configuration {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        let base = api_base.unwrap_or_else(|| "https://api.openai.com/v1".to_string());
        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", base.trim_end_matches('/')),
            api_key,
            model,
        })
    }

    async fn send(&self, request: &CompletionRequest, stream: bool) -> Result<reqwest::Response> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: &request.prompt,
            }],
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            stream,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::GenerationFailed {
                message: format!("LLM API request failed: {}", e),
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::GenerationFailed {
                message: format!("LLM API error {}: {}", status, body),
            });
        }

        Ok(response)
    }
}

#[async_trait]
impl GenerationBackend for OpenAICompatibleBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let response = self.send(request, false).await?;

        let chat_response: ChatResponse =
            response.json().await.map_err(|e| AppError::GenerationFailed {
                message: format!("Failed to parse LLM response: {}", e),
            })?;

        chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AppError::GenerationFailed {
                message: "Empty response from LLM".to_string(),
            })
    }

    async fn complete_stream(&self, request: &CompletionRequest) -> Result<TextStream> {
        let response = self.send(request, true).await?;

        Ok(sse_fragments(response.bytes_stream()))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Decode an SSE chat-completions body into text fragments
///
/// Events are split on raw bytes so a character cut across network chunks is
/// reassembled before decoding; invalid UTF-8 ends the stream with an error.
fn sse_fragments<S, B, E>(body: S) -> TextStream
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let stream = async_stream::stream! {
        futures::pin_mut!(body);
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = body.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(AppError::GenerationFailed {
                        message: format!("Stream interrupted: {}", e),
                    });
                    return;
                }
            };
            buffer.extend_from_slice(bytes.as_ref());

            while let Some(pos) = buffer.windows(2).position(|w| w == b"\n\n") {
                let raw: Vec<u8> = buffer.drain(..pos + 2).collect();
                let event = match std::str::from_utf8(&raw[..pos]) {
                    Ok(event) => event,
                    Err(e) => {
                        yield Err(AppError::GenerationFailed {
                            message: format!("Stream chunk is not valid UTF-8: {}", e),
                        });
                        return;
                    }
                };

                let Some(data) = event.strip_prefix("data: ") else {
                    continue;
                };
                if data.trim() == "[DONE]" {
                    return;
                }
                match serde_json::from_str::<ChatStreamChunk>(data) {
                    Ok(chunk) => {
                        let text = chunk
                            .choices
                            .into_iter()
                            .next()
                            .and_then(|c| c.delta.content);
                        if let Some(text) = text.filter(|t| !t.is_empty()) {
                            yield Ok(text);
                        }
                    }
                    Err(e) => {
                        yield Err(AppError::GenerationFailed {
                            message: format!("Malformed stream chunk: {}", e),
                        });
                        return;
                    }
                }
            }
        }
    };

    Box::pin(stream)
}

/// Model id reported by [`OfflineBackend`]; it has no price, so answers cost nothing
pub const OFFLINE_MODEL: &str = "offline";

/// Deterministic backend for development without an API key
///
/// Answers generation prompts extractively from the numbered context, citing the
/// entries it quotes. Any other prompt is answered by echoing its subject line.
pub struct OfflineBackend {
    model: String,
}

impl OfflineBackend {
    pub fn new(model: impl Into<String>) -> Self {
        Self { model: model.into() }
    }

    fn respond(&self, prompt: &str) -> String {
        if let Some(context_start) = prompt.find("Context:\n") {
            let body = &prompt[context_start + "Context:\n".len()..];
            let body = body.rfind("\nQuestion:").map(|end| &body[..end]).unwrap_or(body);
            return Self::extractive_answer(body);
        }

        for label in ["Question:", "Original:", "Original Question:", "Complex Question:"] {
            if let Some(line) = prompt.lines().rev().find_map(|l| l.strip_prefix(label)) {
                let subject = line.trim();
                if !subject.is_empty() {
                    return subject.to_string();
                }
            }
        }

        prompt.lines().next().unwrap_or_default().trim().to_string()
    }

    fn extractive_answer(context: &str) -> String {
        let header = regex_lite::Regex::new(r"^\[([1-9][0-9]*)\] ").ok();
        let mut sentences = Vec::new();
        let mut lines = context.lines().peekable();

        while let Some(line) = lines.next() {
            let Some(index) = header
                .as_ref()
                .and_then(|re| re.captures(line))
                .and_then(|c| c.get(1))
                .map(|m| m.as_str().to_string())
            else {
                continue;
            };

            if let Some(content) = lines.next() {
                let first_sentence = content
                    .split_inclusive(['.', '!', '?'])
                    .next()
                    .unwrap_or(content)
                    .trim()
                    .trim_end_matches(['.', '!', '?']);
                if !first_sentence.is_empty() {
                    sentences.push(format!("{} [{}].", first_sentence, index));
                }
            }

            if sentences.len() == 2 {
                break;
            }
        }

        if sentences.is_empty() {
            "The provided context does not contain enough information to answer this question."
                .to_string()
        } else {
            sentences.join(" ")
        }
    }
}

#[async_trait]
impl GenerationBackend for OfflineBackend {
    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        debug!(model = %self.model, "Offline completion");
        Ok(self.respond(&request.prompt))
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Create a generation backend based on configuration
pub fn create_backend(config: &GenerationConfig) -> Result<Arc<dyn GenerationBackend>> {
    match config.provider.as_str() {
        "openai" => {
            let key = config.api_key.clone().ok_or_else(|| AppError::Configuration {
                message: "generation.api_key is required for the openai provider".to_string(),
            })?;
            Ok(Arc::new(OpenAICompatibleBackend::new(
                key,
                config.model.clone(),
                config.api_base.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "offline" => Ok(Arc::new(OfflineBackend::new(OFFLINE_MODEL))),
        other => Err(AppError::Configuration {
            message: format!("Unknown generation provider '{}'", other),
        }),
    }
}
