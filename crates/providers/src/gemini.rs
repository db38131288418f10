//! Gemini provider over the Generative Language REST API.
//!
//! The call shape differs from the chat-style vendors: messages become
//! `contents` with `parts`, the assistant role is `model`, sampling settings
//! live under `generationConfig`, and the system prompt is sent out of band
//! as `systemInstruction`.

use async_trait::async_trait;
use serde_json::{Value, json};
use tracing::debug;
use typewire_core::Result;
use typewire_core::message::{Message, Role, split_system};
use typewire_core::provider::*;
use typewire_payment::{PaidHttpClient, check_status};

use crate::{missing_field, read_reply, sse};

pub const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

pub struct GeminiProvider {
    base_url: String,
    api_key: String,
    http: PaidHttpClient,
}

impl GeminiProvider {
    pub fn new(api_key: impl Into<String>, http: PaidHttpClient) -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.into(),
            api_key: api_key.into(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn request_body(request: &ProviderRequest) -> Value {
        let (system, messages) = split_system(&request.messages);

        let mut body = json!({
            "contents": to_contents(&messages),
            "generationConfig": {
                "temperature": request.temperature,
                "maxOutputTokens": request.max_tokens,
            },
        });

        if let Some(sys) = system {
            body["systemInstruction"] = json!({ "parts": [{ "text": sys }] });
        }
        body
    }

    fn endpoint(&self, model: &str, stream: bool) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        if stream {
            format!(
                "{}/v1beta/models/{model}:streamGenerateContent?alt=sse",
                self.base_url
            )
        } else {
            format!("{}/v1beta/models/{model}:generateContent", self.base_url)
        }
    }

    async fn post(&self, request: &ProviderRequest, stream: bool) -> Result<reqwest::Response> {
        let builder = self
            .http
            .http()
            .post(self.endpoint(&request.model, stream))
            .header("x-goog-api-key", &self.api_key)
            .json(&Self::request_body(request));

        let response = self.http.send(builder, &request.context).await?;
        check_status(response, &request.context).await
    }
}

fn to_contents(messages: &[&Message]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::Assistant => "model",
                _ => "user",
            };
            json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect()
}

/// Concatenate the text parts of the first candidate.
///
/// Used for both full replies and streamed chunks, which share a shape.
fn candidate_text(reply: &Value) -> Option<String> {
    let parts = reply["candidates"][0]["content"]["parts"].as_array()?;
    let texts: Vec<&str> = parts.iter().filter_map(|p| p["text"].as_str()).collect();
    if texts.is_empty() {
        None
    } else {
        Some(texts.concat())
    }
}

#[async_trait]
impl typewire_core::Provider for GeminiProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        debug!(model = %request.model, "Sending Gemini generateContent request");

        let response = self.post(&request, false).await?;
        let reply = read_reply(response, &request.context, "gemini").await?;
        let content = candidate_text(&reply).ok_or_else(|| missing_field("gemini", &reply))?;

        let usage = reply.get("usageMetadata").and_then(|u| {
            Some(Usage {
                prompt_tokens: u["promptTokenCount"].as_u64()? as u32,
                completion_tokens: u["candidatesTokenCount"].as_u64().unwrap_or(0) as u32,
                total_tokens: u["totalTokenCount"].as_u64()? as u32,
            })
        });

        Ok(ProviderResponse {
            content,
            model: reply["modelVersion"]
                .as_str()
                .map(String::from)
                .unwrap_or(request.model),
            usage,
        })
    }

    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver> {
        debug!(model = %request.model, "Sending Gemini streaming request");

        let response = self.post(&request, true).await?;
        Ok(sse::spawn_reader(response, request.context, candidate_text))
    }
}
