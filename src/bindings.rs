//! `{{ … }}` segmentation and substitution of raw property values.

use crate::entity::{EntityType, SubstitutionType};
use crate::error::EvalError;
use crate::value::Value;
use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref DYNAMIC_VALUE: Regex = Regex::new(r"\{\{([\s\S]*?)\}\}").unwrap();
}

/// JS object functions and variables hold code rather than `{{ }}` templates.
pub fn is_code_path(entity_type: EntityType, kind: SubstitutionType) -> bool {
    entity_type == EntityType::JsAction && kind == SubstitutionType::SmartSubstitute
}

/// True when the text contains at least one `{{ … }}` binding.
pub fn is_dynamic_value(text: &str) -> bool {
    DYNAMIC_VALUE.is_match(text)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment<'a> {
    Text(&'a str),
    Binding(&'a str),
}

/// Splits a template into literal text and binding code.
///
/// Braces are counted so that object literals inside a binding
/// (`{{ {a: 1} }}`) stay in one segment, and quoted strings are skipped.
/// An unterminated `{{` is kept as text.
pub fn split_segments(text: &str) -> Vec<Segment<'_>> {
    let bytes = text.as_bytes();
    let mut segments = Vec::new();
    let mut literal_start = 0;
    let mut pos = 0;

    while pos + 1 < bytes.len() {
        if bytes[pos] != b'{' || bytes[pos + 1] != b'{' {
            pos += 1;
            continue;
        }
        let Some(close) = binding_end(bytes, pos + 2) else {
            break;
        };
        if pos > literal_start {
            segments.push(Segment::Text(&text[literal_start..pos]));
        }
        segments.push(Segment::Binding(&text[pos + 2..close]));
        pos = close + 2;
        literal_start = pos;
    }
    if literal_start < text.len() {
        segments.push(Segment::Text(&text[literal_start..]));
    }
    segments
}

/// Offset of the `}}` that closes a binding whose code starts at `start`.
fn binding_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<u8> = None;
    let mut pos = start;

    while pos < bytes.len() {
        let c = bytes[pos];
        if let Some(q) = quote {
            if c == b'\\' {
                pos += 1;
            } else if c == q {
                quote = None;
            }
            pos += 1;
            continue;
        }
        match c {
            b'"' | b'\'' | b'`' => quote = Some(c),
            b'{' => depth += 1,
            b'}' if depth > 0 => depth -= 1,
            b'}' if bytes.get(pos + 1) == Some(&b'}') => return Some(pos),
            _ => {}
        }
        pos += 1;
    }
    None
}

/// Code of every binding in a raw value, or the whole text of a code path.
pub fn binding_sources(raw: &Value, is_code: bool) -> Vec<&str> {
    if is_code {
        return code_text(raw).into_iter().collect();
    }
    let Value::String(text) = raw else {
        return Vec::new();
    };
    split_segments(text)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Binding(code) => Some(code),
            Segment::Text(_) => None,
        })
        .collect()
}

/// Source text of a code path: a plain string, or the `body` of a stored JS function.
pub fn code_text(raw: &Value) -> Option<&str> {
    match raw {
        Value::String(text) => Some(text),
        Value::Object(map) => map.get("body").and_then(Value::as_str),
        _ => None,
    }
}

/// Turns a raw value into its evaluated value.
///
/// `eval` runs one piece of binding code. `is_code` marks JS object paths,
/// whose whole raw string is a single expression.
pub fn substitute<F>(raw: &Value, kind: SubstitutionType, is_code: bool, mut eval: F) -> Result<Value, EvalError>
where
    F: FnMut(&str) -> Result<Value, EvalError>,
{
    if kind == SubstitutionType::None {
        return Ok(raw.clone());
    }
    if is_code {
        return match code_text(raw) {
            Some(text) if text.trim().is_empty() => Ok(Value::Undefined),
            Some(text) => eval(text),
            None => Ok(raw.clone()),
        };
    }
    let Value::String(text) = raw else {
        return Ok(raw.clone());
    };

    let segments = split_segments(text);
    if let [Segment::Binding(code)] = segments.as_slice() {
        return eval(code);
    }
    if !segments.iter().any(|s| matches!(s, Segment::Binding(_))) {
        return Ok(raw.clone());
    }

    let mut joined = String::new();
    for segment in segments {
        match segment {
            Segment::Text(literal) => joined.push_str(literal),
            Segment::Binding(code) => joined.push_str(&stringify_binding(&eval(code)?)),
        }
    }

    if kind == SubstitutionType::SmartSubstitute {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&joined) {
            return Ok(Value::from(json));
        }
    }
    Ok(Value::String(joined))
}

fn stringify_binding(value: &Value) -> String {
    match value {
        Value::Undefined => String::new(),
        Value::String(s) => s.clone(),
        Value::Function(_) | Value::Native(_) => value.to_js_string(),
        other => other.to_json_string().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_keep_object_literals_whole() {
        assert_eq!(
            split_segments("a {{ {x: '}}'} }} b"),
            vec![
                Segment::Text("a "),
                Segment::Binding(" {x: '}}'} "),
                Segment::Text(" b")
            ]
        );
    }

    #[test]
    fn unterminated_binding_is_text() {
        assert_eq!(split_segments("{{ a"), vec![Segment::Text("{{ a")]);
        assert!(!is_dynamic_value("{{ a"));
    }
}
