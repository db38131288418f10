//! OpenAI-compatible provider implementation.
//!
//! Works with OpenAI and any endpoint exposing the chat-completions shape
//! (OpenRouter, Ollama, vLLM, Together AI, ...).
//!
//! Supports:
//! - Chat completions (non-streaming and streaming SSE)
//! - `max_completion_tokens` for reasoning model families

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use typewire_core::message::Message;
use typewire_core::provider::*;
use typewire_core::Result;
use typewire_payment::{PaidHttpClient, check_status};

use crate::{missing_field, read_reply, sse};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Model families that reject `max_tokens` in favor of `max_completion_tokens`.
const COMPLETION_TOKEN_FAMILIES: &[&str] = &["o1", "o3", "o4", "gpt-5"];

/// An OpenAI-compatible LLM provider.
pub struct OpenAiCompatProvider {
    name: String,
    base_url: String,
    api_key: String,
    http: PaidHttpClient,
}

impl OpenAiCompatProvider {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        http: PaidHttpClient,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            http,
        }
    }

    /// Create an OpenAI provider (convenience constructor).
    pub fn openai(api_key: impl Into<String>, http: PaidHttpClient) -> Self {
        Self::new("openai", DEFAULT_BASE_URL, api_key, http)
    }

    fn to_api_messages(messages: &[Message]) -> Vec<ApiMessage<'_>> {
        messages
            .iter()
            .map(|m| ApiMessage {
                role: m.role.as_str(),
                content: &m.content,
            })
            .collect()
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> Value {
        let mut body = json!({
            "model": request.model,
            "messages": Self::to_api_messages(&request.messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        let token_field = if uses_completion_tokens(&request.model) {
            "max_completion_tokens"
        } else {
            "max_tokens"
        };
        body[token_field] = json!(request.max_tokens);
        body
    }

    async fn post(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut builder = self
            .http
            .http()
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&Self::request_body(request, stream));
        if stream {
            builder = builder.header("Accept", "text/event-stream");
        }

        let response = self.http.send(builder, &request.context).await?;
        check_status(response, &request.context).await
    }
}

fn uses_completion_tokens(model: &str) -> bool {
    let model = model.rsplit('/').next().unwrap_or(model);
    COMPLETION_TOKEN_FAMILIES
        .iter()
        .any(|family| model == *family || model.starts_with(&format!("{family}-")))
}

/// Pull the text delta from one streamed chunk.
fn stream_delta(chunk: &Value) -> Option<String> {
    chunk["choices"][0]["delta"]["content"]
        .as_str()
        .map(String::from)
}

#[async_trait]
impl typewire_core::Provider for OpenAiCompatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        debug!(provider = %self.name, model = %request.model, "Sending completion request");

        let response = self.post(&request, false).await?;
        let reply = read_reply(response, &request.context, &self.name).await?;

        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| missing_field(&self.name, &reply))?
            .to_string();

        let usage = reply.get("usage").and_then(|u| {
            Some(Usage {
                prompt_tokens: u["prompt_tokens"].as_u64()? as u32,
                completion_tokens: u["completion_tokens"].as_u64()? as u32,
                total_tokens: u["total_tokens"].as_u64()? as u32,
            })
        });

        Ok(ProviderResponse {
            content,
            model: reply["model"]
                .as_str()
                .map(String::from)
                .unwrap_or(request.model),
            usage,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver> {
        debug!(provider = %self.name, model = %request.model, "Sending streaming request");

        let response = self.post(&request, true).await?;
        Ok(sse::spawn_reader(response, request.context, stream_delta))
    }
}

// --- OpenAI API types (internal) ---

#[derive(Debug, Serialize)]
struct ApiMessage<'a> {
    role: &'static str,
    content: &'a str,
}
