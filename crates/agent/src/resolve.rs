//! Resolution of tool-backed input fields.

use serde_json::{Value, json};
use tracing::{debug, warn};
use typewire_core::{CallContext, Error, ProgressEvent, ProgressStage, Result};

use crate::input::{ResolvedInput, ToolBackedField};
use crate::orchestration::ToolOrchestrator;

/// Why a field kept its original value.
#[derive(Debug)]
enum Skip {
    NoTools,
    NoChoice,
    Failed(Error),
}

impl ToolOrchestrator {
    /// Fill each tool-backed field from its capability server.
    ///
    /// A field whose resolution fails at any step keeps the caller's value.
    /// Only cancellation aborts.
    pub async fn resolve_fields(
        &self,
        fields: &[ToolBackedField],
        input: &Value,
        ctx: &CallContext,
    ) -> Result<ResolvedInput> {
        let mut resolved = ResolvedInput::from_input(input);

        for field in fields {
            ctx.emit(
                ProgressEvent::new(
                    ProgressStage::InputResolution,
                    format!("Resolving input field {}", field.name),
                )
                .with_data(json!({ "field": field.name, "server": field.server_url })),
            );

            match self.resolve_one(field, &resolved.to_value(), ctx).await {
                Ok(value) => {
                    debug!(field = %field.name, "Input field resolved");
                    resolved.resolve(&field.name, value);
                }
                Err(Skip::Failed(Error::Cancelled)) => return Err(Error::Cancelled),
                Err(reason) => {
                    warn!(field = %field.name, ?reason, "Input field left unresolved");
                }
            }
        }

        Ok(resolved)
    }

    async fn resolve_one(
        &self,
        field: &ToolBackedField,
        input: &Value,
        ctx: &CallContext,
    ) -> std::result::Result<Value, Skip> {
        let tools = self
            .client()
            .list_tools(&field.server_url, ctx)
            .await
            .map_err(Skip::Failed)?;
        if tools.is_empty() {
            return Err(Skip::NoTools);
        }

        let tool = self
            .pick_field_tool(&field.name, &field.hint, &tools, input, ctx)
            .await
            .map_err(Skip::Failed)?
            .ok_or(Skip::NoChoice)?;
        let params = self
            .generate_parameters(&tool, input, ctx)
            .await
            .map_err(Skip::Failed)?;

        self.client()
            .call_tool(&field.server_url, &tool.name, params, ctx)
            .await
            .map_err(Skip::Failed)
    }
}
