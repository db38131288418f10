//! Markup codec: converts JSON trees to and from a simplified tag format.
//!
//! `encode` renders every key as `<key>...</key>`, nesting objects and
//! wrapping array elements in `<item>` tags. `decode` is a best-effort
//! scanner, not a conformant parser: model output is unreliable, so
//! unbalanced markup degrades to partial results or a bare string instead
//! of failing.

use regex_lite::Regex;
use serde_json::{Map, Number, Value};

/// Tag used for each element when encoding arrays.
pub const ITEM_TAG: &str = "item";

/// Render a JSON tree as tagged text.
///
/// Keys with `null` values are omitted entirely. Empty objects and arrays
/// still produce an empty wrapper tag.
pub fn encode(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Make a key usable as a tag name.
///
/// Characters outside `[A-Za-z0-9_]` become `_`; names that do not start
/// with an ASCII letter are prefixed with `tag_`.
pub fn sanitize_tag(key: &str) -> String {
    let cleaned: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    if cleaned.starts_with(|c: char| c.is_ascii_alphabetic()) {
        cleaned
    } else {
        format!("tag_{cleaned}")
    }
}

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                write_tag(&sanitize_tag(key), child, out);
            }
        }
        Value::Array(items) => {
            for item in items {
                write_tag(ITEM_TAG, item, out);
            }
        }
        Value::Null => {}
        scalar => out.push_str(&scalar_text(scalar)),
    }
}

fn write_tag(tag: &str, value: &Value, out: &mut String) {
    match value {
        Value::Null => {}
        Value::Object(map) if map.is_empty() => {
            out.push_str(&format!("<{tag}></{tag}>\n"));
        }
        Value::Array(items) if items.is_empty() => {
            out.push_str(&format!("<{tag}></{tag}>\n"));
        }
        Value::Object(_) | Value::Array(_) => {
            out.push_str(&format!("<{tag}>\n"));
            write_value(value, out);
            out.push_str(&format!("</{tag}>\n"));
        }
        scalar => {
            out.push_str(&format!("<{tag}>{}</{tag}>\n", scalar_text(scalar)));
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Parse tagged text back into a JSON tree.
///
/// Paired `<tag>...</tag>` spans become object keys (a later pair with the
/// same name overwrites an earlier one). Bodies without further `<` are
/// coerced to booleans, numbers, or trimmed strings; bodies with markup are
/// decoded recursively. Text with no tags at all decodes to the trimmed
/// string itself.
pub fn decode(text: &str) -> Value {
    match decode_tags(text) {
        Some(map) => Value::Object(map),
        None => Value::String(text.trim().to_string()),
    }
}

fn decode_tags(text: &str) -> Option<Map<String, Value>> {
    let mut map = Map::new();
    let mut cursor = 0;

    while let Some((name, body_start)) = next_open_tag(text, cursor) {
        let closing = format!("</{name}>");
        match text[body_start..].find(&closing) {
            Some(rel) => {
                let body = &text[body_start..body_start + rel];
                map.insert(name.to_string(), decode_body(body));
                cursor = body_start + rel + closing.len();
            }
            // Unclosed tag: skip the opener and keep scanning.
            None => cursor = body_start,
        }
    }

    if map.is_empty() { None } else { Some(map) }
}

fn decode_body(body: &str) -> Value {
    if body.contains('<') {
        decode(body)
    } else {
        coerce_primitive(body)
    }
}

/// Find the next well-formed opening tag at or after `from`.
///
/// Returns the tag name and the byte offset just past its `>`.
fn next_open_tag(text: &str, from: usize) -> Option<(&str, usize)> {
    let bytes = text.as_bytes();
    let mut search = from;

    while let Some(rel) = text[search..].find('<') {
        let start = search + rel + 1;
        let mut end = start;
        while end < bytes.len() && is_tag_byte(bytes[end], end == start) {
            end += 1;
        }
        if end > start && end < bytes.len() && bytes[end] == b'>' {
            return Some((&text[start..end], end + 1));
        }
        search = start;
    }

    None
}

fn is_tag_byte(b: u8, first: bool) -> bool {
    if first {
        b.is_ascii_alphabetic() || b == b'_'
    } else {
        b.is_ascii_alphanumeric() || matches!(b, b'_' | b'-' | b'.')
    }
}

/// Coerce a leaf body: `true`/`false` to booleans, `\d+(\.\d+)?` to numbers,
/// anything else to the trimmed string.
pub fn coerce_primitive(body: &str) -> Value {
    let trimmed = body.trim();
    match trimmed {
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }

    if is_plain_number(trimmed) {
        if !trimmed.contains('.') {
            if let Ok(n) = trimmed.parse::<u64>() {
                return Value::Number(n.into());
            }
        }
        if let Some(n) = trimmed.parse::<f64>().ok().and_then(Number::from_f64) {
            return Value::Number(n);
        }
    }

    Value::String(trimmed.to_string())
}

fn is_plain_number(s: &str) -> bool {
    let (int, frac) = match s.split_once('.') {
        Some((int, frac)) => (int, Some(frac)),
        None => (s, None),
    };
    let digits = |part: &str| !part.is_empty() && part.bytes().all(|b| b.is_ascii_digit());
    digits(int) && frac.is_none_or(digits)
}

/// Pull the raw text between `<tag>` and `</tag>` straight out of `text`.
///
/// Used when a field that should be plain text contains unescaped markup
/// and the structural decode turned it into an object.
pub fn extract_raw(text: &str, tag: &str) -> Option<String> {
    let escaped = regex_lite::escape(tag);
    let pattern = format!(r"(?s)<{escaped}>(.*?)</{escaped}>");
    let re = Regex::new(&pattern).ok()?;
    re.captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
}
