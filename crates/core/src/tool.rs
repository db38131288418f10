//! Capability servers and the tools they expose.
//!
//! Servers are declared statically by the caller; tools are discovered at
//! runtime from a server and re-fetched on every run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::context::CallContext;
use crate::error::Result;

/// A remote server exposing tools over HTTP.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityServer {
    pub name: String,
    pub description: String,
    #[serde(alias = "endpointUrl", alias = "endpoint_url")]
    pub url: String,
}

impl CapabilityServer {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            url: url.into().trim_end_matches('/').to_string(),
        }
    }
}

/// A tool discovered from a capability server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapabilityTool {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Opaque JSON-schema-like description of the tool's parameters
    #[serde(default, rename = "inputSchema", alias = "input_schema")]
    pub input_schema: serde_json::Value,
}

/// Tool results gathered during a run, keyed by `"{server}.{tool}"`.
pub type ToolResults = BTreeMap<String, serde_json::Value>;

/// Key under which a tool's result is stored.
pub fn result_key(server: &str, tool: &str) -> String {
    format!("{server}.{tool}")
}

/// Client for the capability server HTTP contract.
///
/// `list_tools` maps to `GET {url}/tools`, `call_tool` to `POST {url}/call`.
#[async_trait]
pub trait CapabilityClient: Send + Sync {
    /// Discover the tools a server exposes.
    async fn list_tools(&self, server_url: &str, ctx: &CallContext) -> Result<Vec<CapabilityTool>>;

    /// Invoke one tool, returning its result opaquely.
    async fn call_tool(
        &self,
        server_url: &str,
        tool_name: &str,
        params: serde_json::Value,
        ctx: &CallContext,
    ) -> Result<serde_json::Value>;
}
