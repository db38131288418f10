//! Turning a model reply into the declared output shape.

use serde_json::{Map, Value};
use tracing::{debug, warn};
use typewire_core::markup::{self, extract_raw};
use typewire_core::schema::{FieldDecl, OutputSchema, SchemaNode};

/// Decode `reply` and copy every declared field into a fresh object.
///
/// Undeclared keys are dropped and missing fields are simply absent. Keys
/// in the result are the declared field names.
pub fn extract(reply: &str, schema: &OutputSchema) -> Map<String, Value> {
    let decoded = match markup::decode(reply) {
        Value::Object(map) => map,
        _ => return Map::new(),
    };
    let source = unwrap_envelope(decoded, schema);
    extract_fields(schema.fields(), &source, reply)
}

/// Extract and validate; a reply that fails validation yields an empty object.
pub fn finalize(reply: &str, schema: &OutputSchema) -> Map<String, Value> {
    let output = extract(reply, schema);
    match schema.validate(&output) {
        Ok(()) => output,
        Err(violations) => {
            warn!(?violations, "Model output failed validation");
            Map::new()
        }
    }
}

/// Models sometimes wrap the whole answer in one outer tag.
fn unwrap_envelope(mut decoded: Map<String, Value>, schema: &OutputSchema) -> Map<String, Value> {
    if decoded.len() != 1 {
        return decoded;
    }
    let Some(key) = decoded.keys().next().cloned() else {
        return decoded;
    };
    if schema.fields().iter().any(|f| f.tag() == key) {
        return decoded;
    }
    match decoded.remove(&key) {
        Some(Value::Object(inner)) => {
            debug!(envelope = %key, "Unwrapping outer tag");
            inner
        }
        Some(other) => {
            decoded.insert(key, other);
            decoded
        }
        None => decoded,
    }
}

fn extract_fields(fields: &[FieldDecl], source: &Map<String, Value>, reply: &str) -> Map<String, Value> {
    let mut out = Map::new();
    for field in fields {
        let tag = field.tag();
        let Some(value) = source.get(&tag) else {
            continue;
        };
        let unwrapped = field.node.unwrap_wrappers();
        if let Some(value) = shape_value(unwrapped.node, unwrapped.nullable, value, &tag, reply) {
            out.insert(field.name.clone(), value);
        }
    }
    out
}

fn shape_value(node: &SchemaNode, nullable: bool, value: &Value, tag: &str, reply: &str) -> Option<Value> {
    if nullable && is_null_text(value) {
        return Some(Value::Null);
    }

    match node {
        SchemaNode::Object(children) => match value {
            Value::Object(map) => Some(Value::Object(extract_fields(children, map, reply))),
            _ => None,
        },
        SchemaNode::String | SchemaNode::Enum(_) => match value {
            Value::String(_) => Some(value.clone()),
            // Unescaped markup inside a text field was decoded as structure.
            Value::Object(_) => extract_raw(reply, tag).map(Value::String),
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        SchemaNode::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .or_else(|| Some(value.clone())),
            _ => Some(value.clone()),
        },
        SchemaNode::Boolean => match value {
            Value::String(s) if s.trim().eq_ignore_ascii_case("true") => Some(Value::Bool(true)),
            Value::String(s) if s.trim().eq_ignore_ascii_case("false") => Some(Value::Bool(false)),
            _ => Some(value.clone()),
        },
        _ => Some(value.clone()),
    }
}

fn is_null_text(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty() || s.eq_ignore_ascii_case("null"),
        _ => false,
    }
}
