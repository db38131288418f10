//! Provider trait: the abstraction over LLM vendors.
//!
//! A Provider knows how to send a prompt to a model and get the reply text
//! back, either as a complete string or as a stream of text deltas.
//!
//! Implementations: OpenAI-compatible, Anthropic-compatible, Gemini-style.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::CallContext;
use crate::error::Result;
use crate::message::Message;

/// Default sampling temperature for response generation.
pub const DEFAULT_TEMPERATURE: f32 = 0.7;

/// Default token budget per reply.
pub const DEFAULT_MAX_TOKENS: u32 = 4000;

/// A single model invocation.
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    /// The model to use (e.g., "gpt-4o", "claude-sonnet-4", "gemini-2.0-flash")
    pub model: String,

    /// The prompt messages
    pub messages: Vec<Message>,

    /// Temperature (0.0 = deterministic, 1.0 = creative)
    pub temperature: f32,

    /// Maximum tokens to generate
    pub max_tokens: u32,

    /// Cancellation and progress for this call
    pub context: CallContext,
}

impl ProviderRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            context: CallContext::default(),
        }
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_context(mut self, context: CallContext) -> Self {
        self.context = context;
        self
    }
}

/// A complete (non-streaming) reply from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// The reply text
    pub content: String,

    /// Which model actually responded (may differ from requested)
    pub model: String,

    /// Token usage statistics
    pub usage: Option<Usage>,
}

/// Token usage information.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// A single chunk in a streaming reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Partial content delta
    #[serde(default)]
    pub content: Option<String>,

    /// Whether this is the final chunk
    #[serde(default)]
    pub done: bool,
}

impl StreamChunk {
    pub fn delta(text: impl Into<String>) -> Self {
        Self {
            content: Some(text.into()),
            done: false,
        }
    }

    pub fn finished() -> Self {
        Self {
            content: None,
            done: true,
        }
    }
}

/// Receiving end of a streaming reply.
pub type ChunkReceiver = tokio::sync::mpsc::Receiver<Result<StreamChunk>>;

/// The core Provider trait.
///
/// Every vendor implements this trait; the pipeline calls `complete()` or
/// `stream()` without knowing which vendor is behind it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// A human-readable name for this provider (e.g., "openai", "anthropic").
    fn name(&self) -> &str;

    /// Send a request and get the complete reply.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse>;

    /// Send a request and get a stream of reply deltas.
    ///
    /// Default implementation calls `complete()` and wraps the result as a single chunk.
    async fn stream(&self, request: ProviderRequest) -> Result<ChunkReceiver> {
        let response = self.complete(request).await?;
        let (tx, rx) = tokio::sync::mpsc::channel(2);
        let _ = tx.send(Ok(StreamChunk::delta(response.content))).await;
        let _ = tx.send(Ok(StreamChunk::finished())).await;
        Ok(rx)
    }
}
