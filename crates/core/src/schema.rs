//! Output schemas and their prompt-side introspection.
//!
//! An [`OutputSchema`] is a tree of field declarations. Arrays have no
//! representation in the tag protocol, so construction rejects them eagerly
//! and names the offending dotted path. The derived artifacts (skeleton,
//! constraint text, leaf paths) are used only for prompting and streaming.

use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::markup::sanitize_tag;

/// Separator used for nested field paths in prompts and streaming updates.
pub const PATH_SEPARATOR: &str = "_";

/// The kind of a declared field.
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaNode {
    String,
    Number,
    Boolean,
    Enum(Vec<String>),
    Object(Vec<FieldDecl>),
    /// Only representable so that construction can reject it.
    Array(Box<SchemaNode>),
    Optional(Box<SchemaNode>),
    Nullable(Box<SchemaNode>),
}

impl SchemaNode {
    pub fn enumeration<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        SchemaNode::Enum(values.into_iter().map(Into::into).collect())
    }

    pub fn optional(self) -> Self {
        SchemaNode::Optional(Box::new(self))
    }

    pub fn nullable(self) -> Self {
        SchemaNode::Nullable(Box::new(self))
    }

    /// Strip every optional/nullable wrapper, at any depth.
    pub fn unwrap_wrappers(&self) -> Unwrapped<'_> {
        let mut node = self;
        let mut optional = false;
        let mut nullable = false;
        loop {
            match node {
                SchemaNode::Optional(inner) => {
                    optional = true;
                    node = inner;
                }
                SchemaNode::Nullable(inner) => {
                    nullable = true;
                    node = inner;
                }
                _ => {
                    return Unwrapped {
                        node,
                        optional,
                        nullable,
                    };
                }
            }
        }
    }

    fn is_leaf(&self) -> bool {
        !matches!(self.unwrap_wrappers().node, SchemaNode::Object(_))
    }
}

/// A node with its wrappers removed.
#[derive(Debug, Clone, Copy)]
pub struct Unwrapped<'a> {
    pub node: &'a SchemaNode,
    pub optional: bool,
    pub nullable: bool,
}

/// A named field in an object.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub description: Option<String>,
    pub node: SchemaNode,
}

impl FieldDecl {
    pub fn new(name: impl Into<String>, node: SchemaNode) -> Self {
        Self {
            name: name.into(),
            description: None,
            node,
        }
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Tag name this field is rendered under.
    pub fn tag(&self) -> String {
        sanitize_tag(&self.name)
    }

    /// Whether this field renders as a single tag with text content.
    pub fn is_leaf(&self) -> bool {
        self.node.is_leaf()
    }
}

/// Prompt text describing what a field must contain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldConstraint {
    /// `_`-joined tag path (e.g. `analysis_step1`)
    pub path: String,
    pub text: String,
}

/// The declared shape of a run's output.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputSchema {
    fields: Vec<FieldDecl>,
}

impl OutputSchema {
    /// Build a schema, rejecting arrays at any depth.
    pub fn new(fields: Vec<FieldDecl>) -> Result<Self> {
        reject_arrays(&fields, "")?;
        Ok(Self { fields })
    }

    /// Build a schema from a JSON-Schema object document.
    ///
    /// Properties not listed in `required` become optional; `["T", "null"]`
    /// type unions (or `anyOf` with a null member) become nullable.
    pub fn from_json_schema(schema: &Value) -> Result<Self> {
        let fields = fields_from_json(schema, "")?;
        Self::new(fields)
    }

    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    /// A tree mirroring the schema with every leaf replaced by `""`.
    ///
    /// Encoded with the markup codec it shows the model which tags to fill in.
    pub fn skeleton(&self) -> Value {
        Value::Object(skeleton_of(&self.fields))
    }

    /// Per-field constraint text for the task instruction.
    pub fn constraints(&self) -> Vec<FieldConstraint> {
        let mut out = Vec::new();
        collect_constraints(&self.fields, "", &mut out);
        out
    }

    /// Every leaf field as a `_`-joined tag path.
    pub fn leaf_paths(&self) -> Vec<String> {
        let mut out = Vec::new();
        collect_leaf_paths(&self.fields, "", &mut out);
        out
    }

    /// Check an output object against the schema.
    ///
    /// Returns every violation found, each prefixed with its dotted path.
    pub fn validate(&self, output: &Map<String, Value>) -> std::result::Result<(), Vec<String>> {
        let mut errors = Vec::new();
        validate_fields(&self.fields, output, "", &mut errors);
        if errors.is_empty() { Ok(()) } else { Err(errors) }
    }
}

fn join_path(prefix: &str, name: &str, separator: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}{separator}{name}")
    }
}

fn reject_arrays(fields: &[FieldDecl], prefix: &str) -> Result<()> {
    for field in fields {
        let path = join_path(prefix, &field.name, ".");
        match field.node.unwrap_wrappers().node {
            SchemaNode::Array(_) => {
                return Err(Error::config(format!(
                    "output schema field \"{path}\" is an array; arrays are not supported in output schemas"
                )));
            }
            SchemaNode::Object(children) => reject_arrays(children, &path)?,
            _ => {}
        }
    }
    Ok(())
}

fn fields_from_json(schema: &Value, prefix: &str) -> Result<Vec<FieldDecl>> {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        let at = if prefix.is_empty() { "root" } else { prefix };
        return Err(Error::config(format!(
            "output schema object at {at} has no \"properties\""
        )));
    };

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields = Vec::with_capacity(properties.len());
    for (name, property) in properties {
        let path = join_path(prefix, name, ".");
        let mut node = node_from_json(property, &path)?;
        if !required.contains(&name.as_str()) {
            node = node.optional();
        }
        let description = property
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string);
        fields.push(FieldDecl {
            name: name.clone(),
            description,
            node,
        });
    }
    Ok(fields)
}

fn node_from_json(schema: &Value, path: &str) -> Result<SchemaNode> {
    if let Some(members) = schema.get("anyOf").and_then(Value::as_array) {
        let non_null: Vec<&Value> = members
            .iter()
            .filter(|m| m.get("type").and_then(Value::as_str) != Some("null"))
            .collect();
        if let [single] = non_null.as_slice() {
            let inner = node_from_json(single, path)?;
            return Ok(if non_null.len() < members.len() {
                inner.nullable()
            } else {
                inner
            });
        }
        return Err(Error::config(format!(
            "output schema field \"{path}\" uses an unsupported union"
        )));
    }

    if let Some(values) = schema.get("enum").and_then(Value::as_array) {
        let values = values
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>();
        return Ok(SchemaNode::Enum(values));
    }

    let types: Vec<&str> = match schema.get("type") {
        Some(Value::String(t)) => vec![t.as_str()],
        Some(Value::Array(ts)) => ts.iter().filter_map(Value::as_str).collect(),
        _ if schema.get("properties").is_some() => vec!["object"],
        _ => {
            return Err(Error::config(format!(
                "output schema field \"{path}\" has no type"
            )));
        }
    };

    let nullable = types.contains(&"null");
    let concrete: Vec<&str> = types.into_iter().filter(|t| *t != "null").collect();
    let node = match concrete.as_slice() {
        ["string"] => SchemaNode::String,
        ["number"] | ["integer"] => SchemaNode::Number,
        ["boolean"] => SchemaNode::Boolean,
        ["object"] => SchemaNode::Object(fields_from_json(schema, path)?),
        ["array"] => {
            let item = schema
                .get("items")
                .and_then(|items| node_from_json(items, path).ok())
                .unwrap_or(SchemaNode::String);
            SchemaNode::Array(Box::new(item))
        }
        other => {
            return Err(Error::config(format!(
                "output schema field \"{path}\" has unsupported type {other:?}"
            )));
        }
    };

    Ok(if nullable { node.nullable() } else { node })
}

fn skeleton_of(fields: &[FieldDecl]) -> Map<String, Value> {
    let mut map = Map::new();
    for field in fields {
        let value = match field.node.unwrap_wrappers().node {
            SchemaNode::Object(children) => Value::Object(skeleton_of(children)),
            _ => Value::String(String::new()),
        };
        map.insert(field.tag(), value);
    }
    map
}

fn constraint_for(node: &SchemaNode) -> Option<String> {
    match node {
        SchemaNode::Boolean => Some("must be either true or false".to_string()),
        SchemaNode::Enum(values) => {
            let listed = values
                .iter()
                .map(|v| format!("\"{v}\""))
                .collect::<Vec<_>>()
                .join(", ");
            Some(format!("must be exactly one of these values: {listed}"))
        }
        _ => None,
    }
}

fn collect_constraints(fields: &[FieldDecl], prefix: &str, out: &mut Vec<FieldConstraint>) {
    for field in fields {
        let path = join_path(prefix, &field.tag(), PATH_SEPARATOR);
        let node = field.node.unwrap_wrappers().node;

        if let SchemaNode::Object(children) = node {
            if let Some(description) = &field.description {
                out.push(FieldConstraint {
                    path: path.clone(),
                    text: description.clone(),
                });
            }
            collect_constraints(children, &path, out);
            continue;
        }

        let text = match (&field.description, constraint_for(node)) {
            (Some(description), Some(constraint)) => format!("{description} ({constraint})"),
            (Some(description), None) => description.clone(),
            (None, Some(constraint)) => constraint,
            (None, None) => continue,
        };
        out.push(FieldConstraint { path, text });
    }
}

fn collect_leaf_paths(fields: &[FieldDecl], prefix: &str, out: &mut Vec<String>) {
    for field in fields {
        let path = join_path(prefix, &field.tag(), PATH_SEPARATOR);
        match field.node.unwrap_wrappers().node {
            SchemaNode::Object(children) => collect_leaf_paths(children, &path, out),
            _ => out.push(path),
        }
    }
}

fn validate_fields(
    fields: &[FieldDecl],
    output: &Map<String, Value>,
    prefix: &str,
    errors: &mut Vec<String>,
) {
    for field in fields {
        let path = join_path(prefix, &field.name, ".");
        let unwrapped = field.node.unwrap_wrappers();
        match output.get(&field.name) {
            None => {
                if !unwrapped.optional {
                    errors.push(format!("{path}: required field is missing"));
                }
            }
            Some(Value::Null) => {
                if !unwrapped.nullable && !unwrapped.optional {
                    errors.push(format!("{path}: null is not allowed"));
                }
            }
            Some(value) => validate_value(unwrapped.node, value, &path, errors),
        }
    }
}

fn validate_value(node: &SchemaNode, value: &Value, path: &str, errors: &mut Vec<String>) {
    let ok = match (node, value) {
        (SchemaNode::String, Value::String(_)) => true,
        (SchemaNode::Number, Value::Number(_)) => true,
        (SchemaNode::Boolean, Value::Bool(_)) => true,
        (SchemaNode::Enum(values), Value::String(s)) => {
            if !values.contains(s) {
                errors.push(format!("{path}: \"{s}\" is not one of {values:?}"));
            }
            true
        }
        (SchemaNode::Object(children), Value::Object(map)) => {
            validate_fields(children, map, path, errors);
            true
        }
        _ => false,
    };
    if !ok {
        errors.push(format!("{path}: expected {}, got {value}", kind_name(node)));
    }
}

fn kind_name(node: &SchemaNode) -> &'static str {
    match node {
        SchemaNode::String => "string",
        SchemaNode::Number => "number",
        SchemaNode::Boolean => "boolean",
        SchemaNode::Enum(_) => "enum string",
        SchemaNode::Object(_) => "object",
        SchemaNode::Array(_) => "array",
        SchemaNode::Optional(_) | SchemaNode::Nullable(_) => "value",
    }
}
