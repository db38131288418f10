//! Anthropic native provider implementation.
//!
//! Uses Anthropic's Messages API directly:
//! - `x-api-key` header authentication (not Bearer)
//! - `anthropic-version` header
//! - System prompt as top-level field
//! - Streaming via SSE with `content_block_delta` events

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{Value, json};
use tracing::debug;
use typewire_core::Result;
use typewire_core::message::{Message, split_system};
use typewire_core::provider::*;
use typewire_payment::{PaidHttpClient, check_status};

use crate::{missing_field, read_reply, sse};

const ANTHROPIC_VERSION: &str = "2023-06-01";
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Anthropic native Messages API provider.
pub struct AnthropicProvider {
    name: String,
    base_url: String,
    api_key: String,
    http: PaidHttpClient,
}

impl AnthropicProvider {
    pub fn new(api_key: impl Into<String>, http: PaidHttpClient) -> Self {
        Self {
            name: "anthropic".into(),
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            http,
        }
    }

    /// Create with a custom base URL (e.g., for testing or proxies).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(request: &ProviderRequest, stream: bool) -> Value {
        let (system, messages) = split_system(&request.messages);

        let mut body = json!({
            "model": request.model,
            "max_tokens": request.max_tokens,
            "messages": to_api_messages(&messages),
            "temperature": request.temperature,
            "stream": stream,
        });

        if let Some(sys) = system {
            body["system"] = json!(sys);
        }
        body
    }

    async fn post(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response> {
        let url = format!("{}/v1/messages", self.base_url);
        let builder = self
            .http
            .http()
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::request_body(request, stream));

        let response = self.http.send(builder, &request.context).await?;
        check_status(response, &request.context).await
    }
}

fn to_api_messages<'a>(messages: &[&'a Message]) -> Vec<AnthropicMessage<'a>> {
    messages
        .iter()
        .map(|m| AnthropicMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

/// Only `content_block_delta` events carry reply text.
fn stream_delta(event: &Value) -> Option<String> {
    if event["type"] != "content_block_delta" {
        return None;
    }
    event["delta"]["text"].as_str().map(String::from)
}

#[async_trait]
impl typewire_core::Provider for AnthropicProvider {
    fn name(&self) -> &str {
        &self.name
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        debug!(model = %request.model, "Sending Anthropic completion request");

        let response = self.post(&request, false).await?;
        let reply = read_reply(response, &request.context, &self.name).await?;

        let content = reply["content"][0]["text"]
            .as_str()
            .ok_or_else(|| missing_field(&self.name, &reply))?
            .to_string();

        let usage = reply.get("usage").and_then(|u| {
            let input = u["input_tokens"].as_u64()? as u32;
            let output = u["output_tokens"].as_u64()? as u32;
            Some(Usage {
                prompt_tokens: input,
                completion_tokens: output,
                total_tokens: input + output,
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
        debug!(model = %request.model, "Sending Anthropic streaming request");

        let response = self.post(&request, true).await?;
        Ok(sse::spawn_reader(response, request.context, stream_delta))
    }
}

// --- Anthropic API types (internal) ---

#[derive(Debug, Serialize)]
struct AnthropicMessage<'a> {
    role: &'static str,
    content: &'a str,
}
