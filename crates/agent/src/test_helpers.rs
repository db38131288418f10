//! Shared test helpers: scripted providers and capability clients.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use serde_json::{Value, json};
use typewire_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use typewire_core::tool::{CapabilityClient, CapabilityTool};
use typewire_core::{CallContext, Error, PaymentError, Result, ToolError, TransportError};

enum Scripted {
    Reply(String),
    Fail(String),
}

/// A mock provider that returns a sequence of scripted replies.
///
/// Each call to `complete` returns the next reply in the queue.
/// Panics if more calls are made than replies provided.
pub struct SequentialMockProvider {
    script: Mutex<VecDeque<Scripted>>,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            script: Mutex::new(replies.into_iter().map(|r| Scripted::Reply(r.into())).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Queue a call that fails with an API error.
    pub fn then_fail(self, message: &str) -> Self {
        self.script
            .lock()
            .unwrap()
            .push_back(Scripted::Fail(message.to_string()));
        self
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// The last message of every request, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.messages.last().map(|m| m.content.clone()).unwrap_or_default())
            .collect()
    }

    pub fn temperatures(&self) -> Vec<f32> {
        self.requests.lock().unwrap().iter().map(|r| r.temperature).collect()
    }
}

#[async_trait::async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
        let count = self.call_count();
        self.requests.lock().unwrap().push(request);

        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(Scripted::Reply(text)) => Ok(make_text_response(&text)),
            Some(Scripted::Fail(message)) => Err(TransportError::ApiError {
                status_code: 500,
                message,
            }
            .into()),
            None => panic!("SequentialMockProvider: no more responses (call #{count})"),
        }
    }
}

/// Create a simple text response.
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        content: text.to_string(),
        model: "mock-model".into(),
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
    }
}

/// A tool with a single `city` parameter.
pub fn tool(name: &str) -> CapabilityTool {
    CapabilityTool {
        name: name.to_string(),
        description: format!("The {name} tool"),
        input_schema: json!({"type": "object", "properties": {"city": {"type": "string"}}}),
    }
}

/// In-memory capability servers keyed by URL.
///
/// Unknown URLs fail discovery; tools without a configured result fail
/// invocation with `NotFound`.
#[derive(Default)]
pub struct MockCapabilityClient {
    servers: HashMap<String, Vec<CapabilityTool>>,
    results: HashMap<String, Value>,
    failing: HashSet<String>,
    payment_walls: HashSet<String>,
    calls: Mutex<Vec<(String, String, Value)>>,
}

impl MockCapabilityClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_server(mut self, url: &str, tools: Vec<CapabilityTool>) -> Self {
        self.servers.insert(url.to_string(), tools);
        self
    }

    pub fn with_result(mut self, tool: &str, result: Value) -> Self {
        self.results.insert(tool.to_string(), result);
        self
    }

    pub fn with_failing_tool(mut self, tool: &str) -> Self {
        self.failing.insert(tool.to_string());
        self
    }

    /// Discovery at `url` answers 402 with no wallet to pay it.
    pub fn with_payment_wall(mut self, url: &str) -> Self {
        self.payment_walls.insert(url.to_string());
        self
    }

    /// Every invocation as `(url, tool, params)`.
    pub fn calls(&self) -> Vec<(String, String, Value)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl CapabilityClient for MockCapabilityClient {
    async fn list_tools(&self, server_url: &str, ctx: &CallContext) -> Result<Vec<CapabilityTool>> {
        ctx.check()?;
        if self.payment_walls.contains(server_url) {
            return Err(PaymentError::NoWallet {
                body: r#"{"amount":0.001,"recipient":"Srv111"}"#.into(),
            }
            .into());
        }
        self.servers.get(server_url).cloned().ok_or_else(|| {
            Error::Tool(ToolError::DiscoveryFailed {
                server: server_url.to_string(),
                reason: "connection refused".into(),
            })
        })
    }

    async fn call_tool(
        &self,
        server_url: &str,
        tool_name: &str,
        params: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        ctx.check()?;
        self.calls
            .lock()
            .unwrap()
            .push((server_url.to_string(), tool_name.to_string(), params));

        if self.failing.contains(tool_name) {
            return Err(ToolError::InvocationFailed {
                tool_name: tool_name.to_string(),
                reason: "tool crashed".into(),
            }
            .into());
        }
        self.results
            .get(tool_name)
            .cloned()
            .ok_or_else(|| ToolError::NotFound(tool_name.to_string()).into())
    }
}
