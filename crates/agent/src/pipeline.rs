//! The agent run pipeline.
//!
//! A run is strictly sequential:
//!
//! 1. **Validate** the input against the input schema
//! 2. **Resolve** tool-backed input fields
//! 3. **Gather** tool results from the relevant capability servers
//! 4. **Generate** the response, streaming field updates if asked
//! 5. **Extract** and validate the output
//!
//! The agent itself holds only immutable configuration and can serve any
//! number of concurrent runs.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value, json};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span};
use typewire_config::AppConfig;
use typewire_core::provider::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use typewire_core::tool::{CapabilityClient, CapabilityServer};
use typewire_core::{
    CallContext, Error, OutputSchema, ProgressEvent, ProgressSink, ProgressStage, Provider,
    ProviderRequest, Result, StreamingSink,
};
use typewire_payment::{PaidHttpClient, SolanaWallet};
use typewire_providers::build_provider;
use typewire_tools::HttpCapabilityClient;
use uuid::Uuid;

use crate::input::{InputSchema, ResolvedInput};
use crate::orchestration::ToolOrchestrator;
use crate::stream_parser::TagDemux;
use crate::{output, prompts};

/// Optional observers and cancellation for a single run.
///
/// Observers never change the final output.
#[derive(Clone, Default)]
pub struct RunOptions {
    pub on_progress: Option<ProgressSink>,
    pub on_streaming: Option<StreamingSink>,
    pub cancel: CancellationToken,
}

impl RunOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_progress(mut self, sink: ProgressSink) -> Self {
        self.on_progress = Some(sink);
        self
    }

    pub fn on_streaming(mut self, sink: StreamingSink) -> Self {
        self.on_streaming = Some(sink);
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }
}

impl std::fmt::Debug for RunOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunOptions")
            .field("on_progress", &self.on_progress.is_some())
            .field("on_streaming", &self.on_streaming.is_some())
            .field("cancelled", &self.cancel.is_cancelled())
            .finish()
    }
}

/// Build the HTTP client every outbound call goes through.
///
/// A configured wallet secret enables paying 402 demands.
pub fn paid_http_client(config: &AppConfig) -> Result<PaidHttpClient> {
    let http = PaidHttpClient::new(Duration::from_secs(config.http.timeout_secs))?;

    match config.wallet.secret_key.as_deref().filter(|_| config.wallet.is_configured()) {
        Some(secret) => {
            let wallet = SolanaWallet::from_base58(secret, config.wallet.rpc_url.clone())?
                .with_timeouts(
                    Duration::from_secs(config.wallet.confirm_timeout_secs),
                    Duration::from_millis(config.wallet.poll_interval_ms),
                )
                .with_http(http.http().clone());
            info!(rpc = %config.wallet.rpc_url, "Payment wallet configured");
            Ok(http.with_wallet(Arc::new(wallet)))
        }
        None => Ok(http),
    }
}

/// A schema-typed LLM agent with tool orchestration.
pub struct StructuredAgent {
    provider: Arc<dyn Provider>,
    orchestrator: ToolOrchestrator,
    model: String,
    temperature: f32,
    max_tokens: u32,
    system_prompt: Option<String>,
    input_schema: Option<InputSchema>,
    output_schema: OutputSchema,
    servers: Vec<CapabilityServer>,
}

impl StructuredAgent {
    pub fn new(
        provider: Arc<dyn Provider>,
        client: Arc<dyn CapabilityClient>,
        model: impl Into<String>,
        output_schema: OutputSchema,
    ) -> Self {
        let model = model.into();
        Self {
            orchestrator: ToolOrchestrator::new(provider.clone(), client, model.clone()),
            provider,
            model,
            temperature: DEFAULT_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
            system_prompt: None,
            input_schema: None,
            output_schema,
            servers: Vec::new(),
        }
    }

    /// Wire up vendor, HTTP client and capability client from `config`.
    pub fn from_config(config: &AppConfig, output_schema: OutputSchema) -> Result<Self> {
        let http = paid_http_client(config)?;
        let provider = build_provider(config, http.clone())?;
        let client: Arc<dyn CapabilityClient> = Arc::new(HttpCapabilityClient::new(http));

        let mut agent = Self::new(provider, client, config.model.clone(), output_schema)
            .with_temperature(config.temperature)
            .with_selection_temperature(config.selection_temperature)
            .with_max_tokens(config.max_tokens)
            .with_servers(config.servers.clone());
        if let Some(prompt) = &config.system_prompt {
            agent = agent.with_system_prompt(prompt.clone());
        }
        Ok(agent)
    }

    pub fn with_input_schema(mut self, schema: InputSchema) -> Self {
        self.input_schema = Some(schema);
        self
    }

    pub fn with_servers(mut self, servers: Vec<CapabilityServer>) -> Self {
        self.servers = servers;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// Temperature for response generation.
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Temperature for server, tool and parameter selection.
    pub fn with_selection_temperature(mut self, temperature: f32) -> Self {
        self.orchestrator = self.orchestrator.with_temperature(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = max;
        self.orchestrator = self.orchestrator.with_max_tokens(max);
        self
    }

    pub fn output_schema(&self) -> &OutputSchema {
        &self.output_schema
    }

    pub fn servers(&self) -> &[CapabilityServer] {
        &self.servers
    }

    /// Run the pipeline on `input`.
    ///
    /// Fails only on invalid input, configuration, transport, payment or
    /// cancellation errors. Output that fails validation yields an empty
    /// object.
    pub async fn run(&self, input: &Value, options: RunOptions) -> Result<Map<String, Value>> {
        let run_id = Uuid::new_v4();
        self.run_inner(input, options)
            .instrument(info_span!("run", %run_id))
            .await
    }

    async fn run_inner(&self, input: &Value, options: RunOptions) -> Result<Map<String, Value>> {
        let mut ctx = CallContext::new(options.cancel.clone());
        if let Some(sink) = options.on_progress.clone() {
            ctx = ctx.with_progress(sink);
        }

        if let Some(schema) = &self.input_schema {
            schema.validate(input)?;
        }
        ctx.check()?;

        let resolved = match &self.input_schema {
            Some(schema) if !schema.tool_fields().is_empty() => {
                self.orchestrator
                    .resolve_fields(schema.tool_fields(), input, &ctx)
                    .await?
            }
            _ => ResolvedInput::from_input(input),
        };
        let input = resolved.to_value();

        let tool_results = self.orchestrator.gather(&self.servers, &input, &ctx).await?;
        info!(results = tool_results.len(), "Tool stage complete");

        let messages = prompts::response_generation(
            self.system_prompt.as_deref(),
            &input,
            &self.output_schema,
            &tool_results,
        );
        let request = ProviderRequest::new(&self.model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_context(ctx.clone());

        ctx.emit(
            ProgressEvent::new(ProgressStage::ResponseGeneration, "Generating response")
                .with_data(json!({ "model": self.model, "tool_results": tool_results.len() })),
        );

        let reply = match &options.on_streaming {
            Some(sink) => self.generate_streaming(request, sink, &ctx).await?,
            None => ctx.guard(self.provider.complete(request)).await?.content,
        };
        debug!(chars = reply.len(), "Response received");

        Ok(output::finalize(&reply, &self.output_schema))
    }

    /// Stream the reply through the tag demultiplexer.
    ///
    /// Once the run is cancelled no further update reaches `sink`.
    async fn generate_streaming(
        &self,
        request: ProviderRequest,
        sink: &StreamingSink,
        ctx: &CallContext,
    ) -> Result<String> {
        ctx.emit(
            ProgressEvent::new(ProgressStage::Streaming, "Streaming response")
                .with_data(json!({ "fields": self.output_schema.leaf_paths() })),
        );

        let mut rx = ctx.guard(self.provider.stream(request)).await?;
        let mut demux = TagDemux::new();
        let mut reply = String::new();

        loop {
            let next = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(Error::Cancelled),
                next = rx.recv() => next,
            };
            let Some(chunk) = next else { break };
            let chunk = chunk?;

            if let Some(text) = chunk.content {
                reply.push_str(&text);
                for update in demux.push(&text) {
                    ctx.check()?;
                    sink(&update);
                }
            }
            if chunk.done {
                break;
            }
        }

        ctx.check()?;
        for update in demux.finish() {
            sink(&update);
        }
        Ok(reply)
    }
}

impl std::fmt::Debug for StructuredAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructuredAgent")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("servers", &self.servers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockCapabilityClient, SequentialMockProvider, tool};
    use std::sync::Mutex;
    use typewire_core::provider::{ChunkReceiver, ProviderResponse, StreamChunk};
    use typewire_core::schema::{FieldDecl, SchemaNode};
    use typewire_core::{ProgressEvent, StreamingUpdate};

    fn answer_schema() -> OutputSchema {
        OutputSchema::new(vec![FieldDecl::new("answer", SchemaNode::String)]).unwrap()
    }

    fn agent(provider: Arc<dyn Provider>, client: MockCapabilityClient) -> StructuredAgent {
        StructuredAgent::new(provider, Arc::new(client), "mock-model", answer_schema())
    }

    /// Streams a fixed list of chunks, one per channel message.
    struct ChunkedProvider {
        chunks: Vec<&'static str>,
    }

    #[async_trait::async_trait]
    impl Provider for ChunkedProvider {
        fn name(&self) -> &str {
            "chunked"
        }

        async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse> {
            Ok(ProviderResponse {
                content: self.chunks.concat(),
                model: request.model,
                usage: None,
            })
        }

        async fn stream(&self, _request: ProviderRequest) -> Result<ChunkReceiver> {
            let (tx, rx) = tokio::sync::mpsc::channel(1);
            let chunks = self.chunks.clone();
            tokio::spawn(async move {
                for chunk in chunks {
                    if tx.send(Ok(StreamChunk::delta(chunk))).await.is_err() {
                        return;
                    }
                    tokio::task::yield_now().await;
                }
                let _ = tx.send(Ok(StreamChunk::finished())).await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn plain_schema_round_trip() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<answer>Paris is the capital of France</answer>",
        ]));
        let output = agent(provider.clone(), MockCapabilityClient::new())
            .with_system_prompt("You are a geography tutor.")
            .run(&json!({"question": "What is the capital of France?"}), RunOptions::new())
            .await
            .unwrap();

        assert_eq!(Value::Object(output), json!({"answer": "Paris is the capital of France"}));
        assert_eq!(provider.call_count(), 1);
        assert!((provider.temperatures()[0] - 0.7).abs() < f32::EPSILON);
        assert!(provider.prompts()[0].contains("<answer></answer>"));
    }

    #[tokio::test]
    async fn scalar_input_is_rendered_inside_input_tag() {
        let provider = Arc::new(SequentialMockProvider::new(["<answer>Paris</answer>"]));
        agent(provider.clone(), MockCapabilityClient::new())
            .run(&json!("What is the capital of France?"), RunOptions::new())
            .await
            .unwrap();

        let prompt = &provider.prompts()[0];
        assert!(prompt.starts_with("<input>\nWhat is the capital of France?</input>"));
        assert!(!prompt.contains("<input><input>"));
    }

    #[tokio::test]
    async fn invalid_input_fails_before_any_call() {
        let provider = Arc::new(SequentialMockProvider::new(Vec::<&str>::new()));
        let schema = InputSchema::new(json!({
            "type": "object",
            "properties": {"question": {"type": "string"}},
            "required": ["question"]
        }))
        .unwrap();

        let err = agent(provider.clone(), MockCapabilityClient::new())
            .with_input_schema(schema)
            .run(&json!({"question": 42}), RunOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn empty_tool_results_are_not_shown_to_model() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_tools>forecast</selected_tools>",
            "<parameters>{}</parameters>",
            "<answer>No data</answer>",
        ]));
        let client = MockCapabilityClient::new()
            .with_server("http://weather", vec![tool("forecast")])
            .with_result("forecast", json!(""));

        let output = agent(provider.clone(), client)
            .with_servers(vec![CapabilityServer::new("weather", "Forecasts", "http://weather")])
            .run(&json!({"q": "weather"}), RunOptions::new())
            .await
            .unwrap();

        assert_eq!(output["answer"], "No data");
        let final_prompt = provider.prompts().pop().unwrap();
        assert!(!final_prompt.contains("tool_results"));
    }

    #[tokio::test]
    async fn progress_events_follow_pipeline_order() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_tools>forecast</selected_tools>",
            r#"<parameters>{"city": "Paris"}</parameters>"#,
            "<answer>Sunny</answer>",
        ]));
        let client = MockCapabilityClient::new()
            .with_server("http://weather", vec![tool("forecast")])
            .with_result("forecast", json!({"conditions": "sunny"}));

        let stages = Arc::new(Mutex::new(Vec::new()));
        let seen = stages.clone();
        let options = RunOptions::new().on_progress(Arc::new(move |e: &ProgressEvent| {
            seen.lock().unwrap().push(e.stage);
        }));

        agent(provider.clone(), client)
            .with_servers(vec![CapabilityServer::new("weather", "Forecasts", "http://weather")])
            .run(&json!({"q": "weather in Paris"}), options)
            .await
            .unwrap();

        assert_eq!(
            *stages.lock().unwrap(),
            vec![
                ProgressStage::ServerSelection,
                ProgressStage::ToolDiscovery,
                ProgressStage::ToolInvocation,
                ProgressStage::ResponseGeneration,
            ]
        );
        let final_prompt = provider.prompts().pop().unwrap();
        assert!(final_prompt.contains("<conditions>sunny</conditions>"));
    }

    #[tokio::test]
    async fn streaming_updates_reconstruct_fields_and_match_output() {
        let provider = Arc::new(ChunkedProvider {
            chunks: vec!["<ans", "wer>Paris is", " the cap", "ital</answer>"],
        });
        let updates = Arc::new(Mutex::new(Vec::<StreamingUpdate>::new()));
        let seen = updates.clone();
        let options = RunOptions::new().on_streaming(Arc::new(move |u: &StreamingUpdate| {
            seen.lock().unwrap().push(u.clone());
        }));

        let streamed = agent(provider.clone(), MockCapabilityClient::new())
            .run(&json!({}), options)
            .await
            .unwrap();
        let plain = agent(provider, MockCapabilityClient::new())
            .run(&json!({}), RunOptions::new())
            .await
            .unwrap();

        assert_eq!(streamed, plain);
        assert_eq!(streamed["answer"], "Paris is the capital");

        let text: String = updates.lock().unwrap().iter().map(|u| u.value.as_str()).collect();
        assert_eq!(text, "Paris is the capital");
        assert!(updates.lock().unwrap().iter().all(|u| u.field == "answer"));
    }

    #[tokio::test]
    async fn cancellation_mid_stream_stops_updates() {
        let provider = Arc::new(ChunkedProvider {
            chunks: vec!["<answer>one two", " three four", " five</answer>"],
        });
        let cancel = CancellationToken::new();
        let updates = Arc::new(Mutex::new(Vec::<String>::new()));
        let seen = updates.clone();
        let trigger = cancel.clone();
        let options = RunOptions::new()
            .with_cancel(cancel)
            .on_streaming(Arc::new(move |u: &StreamingUpdate| {
                seen.lock().unwrap().push(u.value.clone());
                trigger.cancel();
            }));

        let err = agent(provider, MockCapabilityClient::new())
            .run(&json!({}), options)
            .await
            .unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(*updates.lock().unwrap(), vec!["one".to_string()]);
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let provider = Arc::new(SequentialMockProvider::new(Vec::<&str>::new()));
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent(provider.clone(), MockCapabilityClient::new())
            .run(&json!({}), RunOptions::new().with_cancel(cancel))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn generation_failure_propagates() {
        let provider = Arc::new(SequentialMockProvider::new(Vec::<&str>::new()).then_fail("overloaded"));
        let err = agent(provider, MockCapabilityClient::new())
            .run(&json!({}), RunOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Transport(_)));
    }

    #[test]
    fn from_config_requires_vendor_key() {
        let config = AppConfig {
            model: "claude-sonnet-4-20250514".into(),
            ..AppConfig::default()
        };
        let err = StructuredAgent::from_config(&config, answer_schema()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));

        let mut config = AppConfig::default();
        config.providers.openai.api_key = Some("sk-test".into());
        let agent = StructuredAgent::from_config(&config, answer_schema()).unwrap();
        assert_eq!(agent.servers().len(), 0);
    }
}
