//! LLM-guided tool orchestration.
//!
//! Selects relevant capability servers, discovers their tools, selects
//! tools, synthesizes parameters and invokes them, collecting results into
//! a [`ToolResults`] bag. Every model-guided step has a fallback so that a
//! malformed reply degrades the run instead of failing it:
//!
//! - server selection fails open to every declared server
//! - tool selection fails closed to the first discovered tool
//! - parameter generation falls back to an empty object

use std::sync::Arc;

use serde_json::{Value, json};
use tracing::{debug, info, warn};
use typewire_core::provider::DEFAULT_MAX_TOKENS;
use typewire_core::tool::{CapabilityClient, CapabilityServer, CapabilityTool, ToolResults, result_key};
use typewire_core::{CallContext, Error, Message, ProgressEvent, ProgressStage, Provider, ProviderRequest, Result};

use crate::prompts;

/// Temperature used for every selection and parameter step.
pub const SELECTION_TEMPERATURE: f32 = 0.3;

/// Runs the selection → discovery → invocation sequence for one run.
pub struct ToolOrchestrator {
    provider: Arc<dyn Provider>,
    client: Arc<dyn CapabilityClient>,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl ToolOrchestrator {
    pub fn new(
        provider: Arc<dyn Provider>,
        client: Arc<dyn CapabilityClient>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            client,
            model: model.into(),
            temperature: SELECTION_TEMPERATURE,
            max_tokens: DEFAULT_MAX_TOKENS,
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

    pub fn client(&self) -> &Arc<dyn CapabilityClient> {
        &self.client
    }

    /// Send one selection prompt.
    ///
    /// Returns `None` when the call failed for any reason other than
    /// cancellation; callers apply their fallback.
    async fn ask(&self, messages: Vec<Message>, ctx: &CallContext) -> Result<Option<String>> {
        ctx.check()?;
        let request = ProviderRequest::new(&self.model, messages)
            .with_temperature(self.temperature)
            .with_max_tokens(self.max_tokens)
            .with_context(ctx.clone());

        match ctx.guard(self.provider.complete(request)).await {
            Ok(response) => Ok(Some(response.content)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(error = %e, "Selection call failed, using fallback");
                Ok(None)
            }
        }
    }

    /// Pick the servers relevant to `input`.
    ///
    /// Zero or one server is used as-is. An unusable reply, or one naming
    /// no known server, selects all of them.
    pub async fn select_servers(
        &self,
        servers: &[CapabilityServer],
        input: &Value,
        ctx: &CallContext,
    ) -> Result<Vec<CapabilityServer>> {
        if servers.len() <= 1 {
            return Ok(servers.to_vec());
        }

        let reply = self
            .ask(prompts::server_selection(servers, input), ctx)
            .await?;
        let names = reply
            .map(|r| prompts::parse_name_list(&r, prompts::SELECTED_SERVERS_TAG))
            .unwrap_or_default();

        let selected: Vec<CapabilityServer> = servers
            .iter()
            .filter(|s| names.iter().any(|n| n.eq_ignore_ascii_case(&s.name)))
            .cloned()
            .collect();

        if selected.is_empty() {
            warn!(declared = servers.len(), "No usable server selection, using all servers");
            return Ok(servers.to_vec());
        }

        debug!(selected = ?selected.iter().map(|s| &s.name).collect::<Vec<_>>(), "Servers selected");
        Ok(selected)
    }

    /// Pick the tools worth invoking on `server`.
    ///
    /// An unusable reply, or one naming no known tool, selects exactly the
    /// first discovered tool.
    pub async fn select_tools(
        &self,
        server: &CapabilityServer,
        tools: &[CapabilityTool],
        input: &Value,
        ctx: &CallContext,
    ) -> Result<Vec<CapabilityTool>> {
        let Some(first) = tools.first() else {
            return Ok(Vec::new());
        };

        let reply = self
            .ask(prompts::tool_selection(server, tools, input), ctx)
            .await?;
        let names = reply
            .map(|r| prompts::parse_name_list(&r, prompts::SELECTED_TOOLS_TAG))
            .unwrap_or_default();

        let selected: Vec<CapabilityTool> = tools
            .iter()
            .filter(|t| names.iter().any(|n| n.eq_ignore_ascii_case(&t.name)))
            .cloned()
            .collect();

        if selected.is_empty() {
            warn!(server = %server.name, tool = %first.name, "No usable tool selection, using first tool");
            return Ok(vec![first.clone()]);
        }
        Ok(selected)
    }

    /// Pick at most one tool to fill an input field.
    pub async fn pick_field_tool(
        &self,
        field: &str,
        hint: &str,
        tools: &[CapabilityTool],
        input: &Value,
        ctx: &CallContext,
    ) -> Result<Option<CapabilityTool>> {
        if tools.is_empty() {
            return Ok(None);
        }

        let reply = self
            .ask(prompts::field_tool_selection(field, hint, tools, input), ctx)
            .await?;
        let choice = reply.and_then(|r| prompts::parse_single_choice(&r));

        Ok(choice.and_then(|name| {
            tools
                .iter()
                .find(|t| t.name.eq_ignore_ascii_case(&name))
                .cloned()
        }))
    }

    /// Synthesize arguments for `tool`; an empty object if the reply is unusable.
    pub async fn generate_parameters(
        &self,
        tool: &CapabilityTool,
        input: &Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let reply = self
            .ask(prompts::parameter_generation(tool, input), ctx)
            .await?;

        match reply.and_then(|r| prompts::parse_parameters(&r)) {
            Some(params) => Ok(Value::Object(params)),
            None => {
                warn!(tool = %tool.name, "No usable parameters, invoking with none");
                Ok(json!({}))
            }
        }
    }

    /// Discover, select, parameterize and invoke tools across `servers`.
    ///
    /// A server whose discovery fails is skipped unless the failure is a
    /// payment failure. A failed invocation is left out of the results
    /// without affecting its siblings.
    pub async fn gather(
        &self,
        servers: &[CapabilityServer],
        input: &Value,
        ctx: &CallContext,
    ) -> Result<ToolResults> {
        let mut results = ToolResults::new();
        if servers.is_empty() {
            return Ok(results);
        }

        ctx.emit(
            ProgressEvent::new(ProgressStage::ServerSelection, "Selecting capability servers")
                .with_data(json!({ "declared": servers.len() })),
        );
        let selected = self.select_servers(servers, input, ctx).await?;
        info!(selected = selected.len(), declared = servers.len(), "Server selection complete");

        for server in &selected {
            ctx.emit(
                ProgressEvent::new(
                    ProgressStage::ToolDiscovery,
                    format!("Discovering tools on {}", server.name),
                )
                .with_data(json!({ "server": server.name })),
            );

            let tools = match self.client.list_tools(&server.url, ctx).await {
                Ok(tools) => tools,
                Err(e @ (Error::Cancelled | Error::Payment(_))) => return Err(e),
                Err(e) => {
                    warn!(server = %server.name, error = %e, "Tool discovery failed, skipping server");
                    continue;
                }
            };
            if tools.is_empty() {
                debug!(server = %server.name, "Server exposes no tools");
                continue;
            }

            let chosen = self.select_tools(server, &tools, input, ctx).await?;
            for tool in &chosen {
                let params = self.generate_parameters(tool, input, ctx).await?;
                let key = result_key(&server.name, &tool.name);

                ctx.emit(
                    ProgressEvent::new(ProgressStage::ToolInvocation, format!("Invoking {key}"))
                        .with_data(json!({ "server": server.name, "tool": tool.name, "params": params })),
                );

                match self.client.call_tool(&server.url, &tool.name, params, ctx).await {
                    Ok(value) => {
                        debug!(%key, "Tool invocation succeeded");
                        results.insert(key, value);
                    }
                    Err(Error::Cancelled) => return Err(Error::Cancelled),
                    Err(e) => {
                        warn!(%key, error = %e, "Tool invocation failed");
                        ctx.emit(
                            ProgressEvent::new(ProgressStage::ToolInvocation, format!("{key} failed"))
                                .with_data(json!({ "error": e.to_string() })),
                        );
                    }
                }
            }
        }

        Ok(results)
    }
}

impl std::fmt::Debug for ToolOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolOrchestrator")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{MockCapabilityClient, SequentialMockProvider, tool};
    use std::sync::Mutex;
    use typewire_core::PaymentError;

    fn servers() -> Vec<CapabilityServer> {
        vec![
            CapabilityServer::new("weather", "Forecasts", "http://weather"),
            CapabilityServer::new("news", "Headlines", "http://news"),
        ]
    }

    fn orchestrator(
        provider: Arc<SequentialMockProvider>,
        client: Arc<MockCapabilityClient>,
    ) -> ToolOrchestrator {
        ToolOrchestrator::new(provider, client, "mock-model")
    }

    #[tokio::test]
    async fn single_server_skips_selection() {
        let provider = Arc::new(SequentialMockProvider::new(Vec::<&str>::new()));
        let orch = orchestrator(provider.clone(), Arc::new(MockCapabilityClient::new()));

        let selected = orch
            .select_servers(&servers()[..1], &json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(selected.len(), 1);
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn server_selection_filters_by_name() {
        let provider = Arc::new(SequentialMockProvider::new(["<selected_servers>News</selected_servers>"]));
        let orch = orchestrator(provider.clone(), Arc::new(MockCapabilityClient::new()));

        let selected = orch
            .select_servers(&servers(), &json!({"q": "headlines"}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(selected, vec![servers()[1].clone()]);
        assert!((provider.temperatures()[0] - 0.3).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn malformed_server_selection_fails_open() {
        for reply in ["I am not sure.", "<selected_servers>sports</selected_servers>"] {
            let provider = Arc::new(SequentialMockProvider::new([reply]));
            let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));
            let selected = orch
                .select_servers(&servers(), &json!({}), &CallContext::default())
                .await
                .unwrap();
            assert_eq!(selected.len(), 2, "reply {reply:?}");
        }

        let provider = Arc::new(SequentialMockProvider::new(Vec::<&str>::new()).then_fail("boom"));
        let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));
        let selected = orch
            .select_servers(&servers(), &json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn malformed_tool_selection_fails_closed_to_first() {
        let provider = Arc::new(SequentialMockProvider::new(["whatever"]));
        let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));
        let tools = vec![tool("forecast"), tool("alerts"), tool("radar")];

        let chosen = orch
            .select_tools(&servers()[0], &tools, &json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(chosen.len(), 1);
        assert_eq!(chosen[0].name, "forecast");
    }

    #[tokio::test]
    async fn tool_selection_ignores_unknown_names() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_tools>radar, teleport, alerts</selected_tools>",
        ]));
        let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));
        let tools = vec![tool("forecast"), tool("alerts"), tool("radar")];

        let chosen = orch
            .select_tools(&servers()[0], &tools, &json!({}), &CallContext::default())
            .await
            .unwrap();
        let names: Vec<&str> = chosen.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alerts", "radar"]);
    }

    #[tokio::test]
    async fn tool_selection_matches_names_case_insensitively() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_tools>Radar, ALERTS</selected_tools>",
        ]));
        let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));
        let tools = vec![tool("forecast"), tool("alerts"), tool("radar")];

        let chosen = orch
            .select_tools(&servers()[0], &tools, &json!({}), &CallContext::default())
            .await
            .unwrap();
        let names: Vec<&str> = chosen.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["alerts", "radar"]);
    }

    #[tokio::test]
    async fn unusable_parameters_become_empty_object() {
        let provider = Arc::new(SequentialMockProvider::new(["<parameters>no idea</parameters>"]));
        let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));

        let params = orch
            .generate_parameters(&tool("forecast"), &json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(params, json!({}));
    }

    #[tokio::test]
    async fn gather_isolates_failing_tools() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_tools>forecast, alerts</selected_tools>",
            r#"<parameters>{"city": "Paris"}</parameters>"#,
            "<parameters>{}</parameters>",
        ]));
        let client = Arc::new(
            MockCapabilityClient::new()
                .with_server("http://weather", vec![tool("forecast"), tool("alerts")])
                .with_result("forecast", json!({"temp": 21}))
                .with_failing_tool("alerts"),
        );
        let orch = orchestrator(provider, client.clone());

        let events = Arc::new(Mutex::new(Vec::new()));
        let seen = events.clone();
        let ctx = CallContext::default().with_progress(Arc::new(move |e: &ProgressEvent| {
            seen.lock().unwrap().push(e.stage);
        }));

        let results = orch
            .gather(&servers()[..1], &json!({"q": "weather in Paris"}), &ctx)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results["weather.forecast"], json!({"temp": 21}));
        assert_eq!(client.calls().len(), 2);
        assert_eq!(client.calls()[0].2, json!({"city": "Paris"}));

        let stages = events.lock().unwrap().clone();
        assert_eq!(stages[0], ProgressStage::ServerSelection);
        assert_eq!(stages[1], ProgressStage::ToolDiscovery);
        assert!(stages[2..].iter().all(|s| *s == ProgressStage::ToolInvocation));
    }

    #[tokio::test]
    async fn discovery_failure_skips_server() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_servers>weather, news</selected_servers>",
            "<selected_tools>headlines</selected_tools>",
            "<parameters>{}</parameters>",
        ]));
        let client = Arc::new(
            MockCapabilityClient::new()
                .with_server("http://news", vec![tool("headlines")])
                .with_result("headlines", json!(["a", "b"])),
        );
        let orch = orchestrator(provider, client);

        let results = orch
            .gather(&servers(), &json!({}), &CallContext::default())
            .await
            .unwrap();
        assert_eq!(results.keys().collect::<Vec<_>>(), vec!["news.headlines"]);
    }

    #[tokio::test]
    async fn discovery_payment_failure_propagates() {
        let provider = Arc::new(SequentialMockProvider::new(Vec::<&str>::new()));
        let client = Arc::new(MockCapabilityClient::new().with_payment_wall("http://weather"));
        let orch = orchestrator(provider, client);

        let err = orch
            .gather(&servers()[..1], &json!({}), &CallContext::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Payment(PaymentError::NoWallet { .. })));
    }

    #[tokio::test]
    async fn cancelled_selection_propagates() {
        let provider = Arc::new(SequentialMockProvider::new(["<selected_servers>news</selected_servers>"]));
        let orch = orchestrator(provider.clone(), Arc::new(MockCapabilityClient::new()));
        let ctx = CallContext::default();
        ctx.cancel.cancel();

        let err = orch.select_servers(&servers(), &json!({}), &ctx).await.unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn field_tool_pick_accepts_none() {
        let provider = Arc::new(SequentialMockProvider::new([
            "<selected_tool>none</selected_tool>",
            "<selected_tool>geo</selected_tool>",
        ]));
        let orch = orchestrator(provider, Arc::new(MockCapabilityClient::new()));
        let tools = vec![tool("geo")];
        let ctx = CallContext::default();

        assert!(orch.pick_field_tool("city", "", &tools, &json!({}), &ctx).await.unwrap().is_none());
        let picked = orch.pick_field_tool("city", "", &tools, &json!({}), &ctx).await.unwrap();
        assert_eq!(picked.unwrap().name, "geo");
    }
}
