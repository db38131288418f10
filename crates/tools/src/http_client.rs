//! HTTP implementation of the capability server contract.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use typewire_core::tool::{CapabilityClient, CapabilityTool};
use typewire_core::{CallContext, Result, ToolError};
use typewire_payment::{PaidHttpClient, check_status, map_reqwest_error};

/// Talks to capability servers over HTTP, paying 402 demands as needed.
///
/// Discovery and invocation are separate `send` calls, so each gets its
/// own one-payment budget.
#[derive(Debug, Clone)]
pub struct HttpCapabilityClient {
    http: PaidHttpClient,
}

#[derive(Serialize)]
struct CallBody<'a> {
    method: &'a str,
    params: Value,
}

impl HttpCapabilityClient {
    pub fn new(http: PaidHttpClient) -> Self {
        Self { http }
    }

    async fn read_text(response: reqwest::Response, ctx: &CallContext) -> Result<String> {
        ctx.guard(async { response.text().await.map_err(map_reqwest_error) })
            .await
    }
}

fn endpoint(server_url: &str, path: &str) -> String {
    format!("{}/{path}", server_url.trim_end_matches('/'))
}

/// Accept a bare array or an object wrapping it under `tools`.
fn parse_tool_list(server_url: &str, body: &str) -> Result<Vec<CapabilityTool>> {
    let value: Value = serde_json::from_str(body).map_err(|e| ToolError::DiscoveryFailed {
        server: server_url.to_string(),
        reason: format!("invalid JSON: {e}"),
    })?;

    let list = match value {
        Value::Object(mut map) => map.remove("tools").unwrap_or(Value::Null),
        other => other,
    };

    serde_json::from_value(list).map_err(|e| {
        ToolError::DiscoveryFailed {
            server: server_url.to_string(),
            reason: format!("unexpected tool list shape: {e}"),
        }
        .into()
    })
}

#[async_trait]
impl CapabilityClient for HttpCapabilityClient {
    async fn list_tools(&self, server_url: &str, ctx: &CallContext) -> Result<Vec<CapabilityTool>> {
        let url = endpoint(server_url, "tools");
        debug!(%url, "Discovering tools");

        let response = self.http.send(self.http.http().get(&url), ctx).await?;
        let response = check_status(response, ctx).await?;
        let body = Self::read_text(response, ctx).await?;

        let tools = parse_tool_list(server_url, &body)?;
        debug!(%url, count = tools.len(), "Tools discovered");
        Ok(tools)
    }

    async fn call_tool(
        &self,
        server_url: &str,
        tool_name: &str,
        params: Value,
        ctx: &CallContext,
    ) -> Result<Value> {
        let url = endpoint(server_url, "call");
        debug!(%url, tool = %tool_name, "Invoking tool");

        let request = self.http.http().post(&url).json(&CallBody {
            method: tool_name,
            params,
        });
        let response = self.http.send(request, ctx).await?;
        let response = check_status(response, ctx).await?;
        let body = Self::read_text(response, ctx).await?;

        // Results are opaque; a non-JSON body is passed through as text.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }
}
