//! Input schema: validation and tool-backed field discovery.
//!
//! A top-level property whose description starts with `mcp:` followed by a
//! URL is tool-backed: its value is fetched from the capability server at
//! that URL before the run proceeds.

use jsonschema::{Draft, Validator};
use serde_json::{Value, json};
use typewire_core::{Error, Result};

/// Description prefix marking a tool-backed field.
pub const TOOL_FIELD_MARKER: &str = "mcp:";

/// An input field whose value comes from a capability server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolBackedField {
    pub name: String,
    pub server_url: String,
    /// Whatever follows the URL in the description
    pub hint: String,
}

/// Compiled input schema.
pub struct InputSchema {
    schema: Value,
    validator: Validator,
    tool_fields: Vec<ToolBackedField>,
}

impl InputSchema {
    /// Compile `schema` (JSON Schema draft 2020-12).
    pub fn new(schema: Value) -> Result<Self> {
        let validator = jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .map_err(|e| Error::config(format!("invalid input schema: {e}")))?;
        let tool_fields = find_tool_fields(&schema);

        Ok(Self {
            schema,
            validator,
            tool_fields,
        })
    }

    /// A schema accepting any JSON object.
    pub fn any_object() -> Result<Self> {
        Self::new(json!({ "type": "object" }))
    }

    pub fn schema(&self) -> &Value {
        &self.schema
    }

    pub fn tool_fields(&self) -> &[ToolBackedField] {
        &self.tool_fields
    }

    /// Validate `input`, collecting every violation into one error.
    pub fn validate(&self, input: &Value) -> Result<()> {
        let messages: Vec<String> = self
            .validator
            .iter_errors(input)
            .map(|err| err.to_string())
            .collect();

        if messages.is_empty() {
            Ok(())
        } else {
            Err(Error::validation(messages.join("; ")))
        }
    }
}

impl std::fmt::Debug for InputSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputSchema")
            .field("schema", &self.schema)
            .field("tool_fields", &self.tool_fields)
            .finish()
    }
}

fn find_tool_fields(schema: &Value) -> Vec<ToolBackedField> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return Vec::new();
    };

    properties
        .iter()
        .filter_map(|(name, property)| {
            let description = property.get("description")?.as_str()?;
            parse_marker(description).map(|(server_url, hint)| ToolBackedField {
                name: name.clone(),
                server_url,
                hint,
            })
        })
        .collect()
}

/// Split `mcp:<url> rest` into the URL and the remaining hint.
fn parse_marker(description: &str) -> Option<(String, String)> {
    let rest = description.trim_start().strip_prefix(TOOL_FIELD_MARKER)?.trim_start();
    let (url, hint) = match rest.split_once(char::is_whitespace) {
        Some((url, hint)) => (url, hint.trim()),
        None => (rest, ""),
    };

    if url.starts_with("http://") || url.starts_with("https://") {
        Some((url.trim_end_matches('/').to_string(), hint.to_string()))
    } else {
        None
    }
}

/// The run input after tool-backed fields have been resolved.
///
/// The caller's original value is never modified; this is a fresh copy.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedInput {
    value: Value,
    resolved: Vec<String>,
}

impl ResolvedInput {
    /// Start from the caller's input.
    pub fn from_input(input: &Value) -> Self {
        Self {
            value: input.clone(),
            resolved: Vec::new(),
        }
    }

    /// Replace a field's value with a tool result.
    ///
    /// Non-object input has no fields, so there is nothing to replace.
    pub fn resolve(&mut self, field: &str, value: Value) {
        if let Value::Object(map) = &mut self.value {
            map.insert(field.to_string(), value);
            self.resolved.push(field.to_string());
        }
    }

    /// Names of fields filled in by tools, in resolution order.
    pub fn resolved_fields(&self) -> &[String] {
        &self.resolved
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.value.get(field)
    }

    pub fn to_value(&self) -> Value {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "What the user asked"},
                "city": {"type": "string", "description": "mcp:http://localhost:9100/ The user's current city"},
                "account": {"description": "mcp: https://billing.example.com"},
                "note": {"type": "string", "description": "mcp:not-a-url"}
            },
            "required": ["question"]
        })
    }

    #[test]
    fn finds_tool_backed_fields() {
        let input = InputSchema::new(schema()).unwrap();
        let fields = input.tool_fields();
        assert_eq!(fields.len(), 2);

        let city = fields.iter().find(|f| f.name == "city").unwrap();
        assert_eq!(city.server_url, "http://localhost:9100");
        assert_eq!(city.hint, "The user's current city");

        let account = fields.iter().find(|f| f.name == "account").unwrap();
        assert_eq!(account.server_url, "https://billing.example.com");
        assert!(account.hint.is_empty());
    }

    #[test]
    fn validation_errors_are_reported() {
        let input = InputSchema::new(schema()).unwrap();
        assert!(input.validate(&json!({"question": "Hi"})).is_ok());

        let err = input.validate(&json!({"question": 5})).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));

        assert!(input.validate(&json!({"city": "Paris"})).is_err());
        assert!(input.validate(&json!("not an object")).is_err());
    }

    #[test]
    fn invalid_schema_is_config_error() {
        let err = InputSchema::new(json!({"type": 12})).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn any_object_accepts_objects_only() {
        let input = InputSchema::any_object().unwrap();
        assert!(input.validate(&json!({"anything": [1, 2]})).is_ok());
        assert!(input.validate(&json!([1, 2])).is_err());
        assert!(input.tool_fields().is_empty());
    }

    #[test]
    fn resolved_input_copies_and_overwrites() {
        let original = json!({"question": "Weather?", "city": "unknown"});
        let mut resolved = ResolvedInput::from_input(&original);
        resolved.resolve("city", json!("Paris"));

        assert_eq!(resolved.get("city"), Some(&json!("Paris")));
        assert_eq!(resolved.resolved_fields(), ["city".to_string()]);
        assert_eq!(original["city"], "unknown");
        assert_eq!(resolved.to_value()["question"], "Weather?");
    }

    #[test]
    fn scalar_input_is_kept_as_is() {
        let mut resolved = ResolvedInput::from_input(&json!("What is the capital of France?"));
        resolved.resolve("city", json!("Paris"));

        assert_eq!(resolved.to_value(), json!("What is the capital of France?"));
        assert!(resolved.resolved_fields().is_empty());
        assert_eq!(
            typewire_core::markup::encode(&resolved.to_value()),
            "What is the capital of France?"
        );
    }
}
