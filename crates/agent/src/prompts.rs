//! Prompt builders and reply parsers for every model call in a run.
//!
//! Prompts embed structured data with the markup codec; replies are decoded
//! the same way. Parsers never fail: an unusable reply yields an empty
//! result and the caller applies its fallback.

use serde_json::{Map, Value, json};
use typewire_core::markup::{self, extract_raw};
use typewire_core::message::Message;
use typewire_core::schema::OutputSchema;
use typewire_core::tool::{CapabilityServer, CapabilityTool, ToolResults};

pub const SELECTED_SERVERS_TAG: &str = "selected_servers";
pub const SELECTED_TOOLS_TAG: &str = "selected_tools";
pub const SELECTED_TOOL_TAG: &str = "selected_tool";
pub const PARAMETERS_TAG: &str = "parameters";

/// Reply meaning "no tool fits" in single-tool selection.
const NONE_CHOICE: &str = "none";

fn tagged(tag: &str, body: &str) -> String {
    format!("<{tag}>\n{}</{tag}>\n", body)
}

fn tool_listing(tools: &[CapabilityTool]) -> Value {
    Value::Array(
        tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                })
            })
            .collect(),
    )
}

/// Ask which capability servers are relevant to the input.
pub fn server_selection(servers: &[CapabilityServer], input: &Value) -> Vec<Message> {
    let listing: Vec<Value> = servers
        .iter()
        .map(|s| json!({ "name": s.name, "description": s.description }))
        .collect();

    let prompt = format!(
        "You decide which capability servers can help answer a request.\n\n\
         {}{}\
         Reply with the names of every relevant server, comma-separated, inside \
         <{SELECTED_SERVERS_TAG}></{SELECTED_SERVERS_TAG}> tags. \
         If none are relevant, reply with empty tags.",
        tagged("input", &markup::encode(input)),
        tagged("servers", &markup::encode(&Value::Array(listing))),
    );
    vec![Message::user(prompt)]
}

/// Ask which of one server's tools should be invoked.
pub fn tool_selection(server: &CapabilityServer, tools: &[CapabilityTool], input: &Value) -> Vec<Message> {
    let prompt = format!(
        "The capability server \"{}\" ({}) offers the tools below.\n\n\
         {}{}\
         Reply with the names of the tools worth invoking for this input, comma-separated, \
         inside <{SELECTED_TOOLS_TAG}></{SELECTED_TOOLS_TAG}> tags.",
        server.name,
        server.description,
        tagged("input", &markup::encode(input)),
        tagged("tools", &markup::encode(&tool_listing(tools))),
    );
    vec![Message::user(prompt)]
}

/// Ask for the single best tool to fill one input field, or none.
pub fn field_tool_selection(
    field: &str,
    hint: &str,
    tools: &[CapabilityTool],
    input: &Value,
) -> Vec<Message> {
    let hint = if hint.is_empty() {
        String::new()
    } else {
        format!(" The field is described as: {hint}.")
    };
    let prompt = format!(
        "The input field \"{field}\" must be filled in by calling one tool.{hint}\n\n\
         {}{}\
         Reply with the name of the single best tool inside \
         <{SELECTED_TOOL_TAG}></{SELECTED_TOOL_TAG}> tags, or \
         <{SELECTED_TOOL_TAG}>{NONE_CHOICE}</{SELECTED_TOOL_TAG}> if no tool fits.",
        tagged("input", &markup::encode(input)),
        tagged("tools", &markup::encode(&tool_listing(tools))),
    );
    vec![Message::user(prompt)]
}

/// Ask for the arguments to call `tool` with.
pub fn parameter_generation(tool: &CapabilityTool, input: &Value) -> Vec<Message> {
    let schema = if tool.input_schema.is_null() {
        "{}".to_string()
    } else {
        tool.input_schema.to_string()
    };
    let prompt = format!(
        "Generate the arguments for calling the tool \"{}\" ({}).\n\n\
         {}\
         The tool's parameters are described by this JSON schema:\n{schema}\n\n\
         Reply with a single JSON object inside <{PARAMETERS_TAG}></{PARAMETERS_TAG}> tags.",
        tool.name,
        tool.description,
        tagged("input", &markup::encode(input)),
    );
    vec![Message::user(prompt)]
}

/// Build the final generation prompt.
///
/// The tool results block is included only when `tool_results` holds at
/// least one meaningful value.
pub fn response_generation(
    system_prompt: Option<&str>,
    input: &Value,
    schema: &OutputSchema,
    tool_results: &ToolResults,
) -> Vec<Message> {
    let mut prompt = tagged("input", &markup::encode(input));

    let useful = meaningful_results(tool_results);
    if !useful.is_empty() {
        prompt.push_str("\nResults from tools called on your behalf:\n");
        prompt.push_str(&tagged("tool_results", &markup::encode(&Value::Object(useful))));
    }

    prompt.push_str(
        "\nRespond using exactly this tag structure, filling in every tag. \
         Write plain text inside the tags and nothing outside them:\n",
    );
    prompt.push_str(&markup::encode(&schema.skeleton()));

    let constraints = schema.constraints();
    if !constraints.is_empty() {
        prompt.push_str("\nField requirements:\n");
        for constraint in constraints {
            prompt.push_str(&format!("- {}: {}\n", constraint.path, constraint.text));
        }
    }

    let mut messages = Vec::with_capacity(2);
    if let Some(system) = system_prompt.filter(|s| !s.trim().is_empty()) {
        messages.push(Message::system(system));
    }
    messages.push(Message::user(prompt));
    messages
}

/// Tool results worth showing to the model.
///
/// Drops `null`, `false`, `0`, empty strings, and empty containers.
pub fn meaningful_results(results: &ToolResults) -> Map<String, Value> {
    results
        .iter()
        .filter(|(_, value)| is_meaningful(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

fn is_meaningful(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

/// Parse a comma- or newline-separated list of names under `tag`.
pub fn parse_name_list(reply: &str, tag: &str) -> Vec<String> {
    let decoded = markup::decode(reply);
    let Some(value) = decoded.get(tag) else {
        return Vec::new();
    };

    let mut names = Vec::new();
    collect_names(value, &mut names);
    names
}

fn collect_names(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(s) => out.extend(
            s.split([',', '\n'])
                .map(|n| n.trim().trim_matches(['"', '\'', '`']).trim())
                .filter(|n| !n.is_empty())
                .map(String::from),
        ),
        Value::Object(map) => map.values().for_each(|v| collect_names(v, out)),
        Value::Number(_) | Value::Bool(_) => out.push(value.to_string()),
        Value::Array(items) => items.iter().for_each(|v| collect_names(v, out)),
        Value::Null => {}
    }
}

/// Parse a single-tool choice; `none` or an empty reply means no choice.
pub fn parse_single_choice(reply: &str) -> Option<String> {
    let names = parse_name_list(reply, SELECTED_TOOL_TAG);
    let first = names.into_iter().next()?;
    if first.eq_ignore_ascii_case(NONE_CHOICE) {
        None
    } else {
        Some(first)
    }
}

/// Parse the parameter object from a reply.
///
/// A JSON body inside the tag is preferred; nested tags decoded into an
/// object are accepted too.
pub fn parse_parameters(reply: &str) -> Option<Map<String, Value>> {
    let raw = extract_raw(reply, PARAMETERS_TAG)?;
    let raw = strip_code_fence(&raw);

    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(raw) {
        return Some(map);
    }

    match markup::decode(raw) {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}
