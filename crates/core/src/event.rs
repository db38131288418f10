//! Progress and streaming events emitted during a run.
//!
//! Both are purely observational: nothing in the pipeline consumes them,
//! and omitting the sinks never changes the final output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Pipeline stage a progress event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStage {
    ServerSelection,
    ToolDiscovery,
    ToolInvocation,
    ResponseGeneration,
    Streaming,
    InputResolution,
    Payment,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ServerSelection => "server_selection",
            Self::ToolDiscovery => "tool_discovery",
            Self::ToolInvocation => "tool_invocation",
            Self::ResponseGeneration => "response_generation",
            Self::Streaming => "streaming",
            Self::InputResolution => "input_resolution",
            Self::Payment => "payment",
        }
    }
}

/// A progress notification at a pipeline transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub stage: ProgressStage,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl ProgressEvent {
    pub fn new(stage: ProgressStage, message: impl Into<String>) -> Self {
        Self {
            stage,
            message: message.into(),
            data: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach structured data to the event.
    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }
}

/// An incremental fragment of one output field.
///
/// Fragments for the same field concatenate, in emission order, to the
/// field's full text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamingUpdate {
    /// `_`-joined path into the output schema (e.g. `analysis_step1`)
    pub field: String,
    pub value: String,
}

impl StreamingUpdate {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Callback receiving progress events.
pub type ProgressSink = Arc<dyn Fn(&ProgressEvent) + Send + Sync>;

/// Callback receiving streaming updates.
pub type StreamingSink = Arc<dyn Fn(&StreamingUpdate) + Send + Sync>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_serializes_snake_case() {
        let event = ProgressEvent::new(ProgressStage::ServerSelection, "Selecting servers");
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains(r#""stage":"server_selection""#));
        assert!(!json.contains("data"));
    }

    #[test]
    fn stage_names_match_serde() {
        for stage in [
            ProgressStage::ServerSelection,
            ProgressStage::ToolDiscovery,
            ProgressStage::ToolInvocation,
            ProgressStage::ResponseGeneration,
            ProgressStage::Streaming,
            ProgressStage::InputResolution,
            ProgressStage::Payment,
        ] {
            let json = serde_json::to_string(&stage).unwrap();
            assert_eq!(json, format!("\"{}\"", stage.as_str()));
        }
    }

    #[test]
    fn event_with_data() {
        let event = ProgressEvent::new(ProgressStage::ToolInvocation, "Invoking")
            .with_data(serde_json::json!({"tool": "weather.lookup"}));
        assert_eq!(event.data.unwrap()["tool"], "weather.lookup");
    }
}
