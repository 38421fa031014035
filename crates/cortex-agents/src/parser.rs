//! Structured data extraction from free-form model output.
//!
//! JSON is hunted in order: whole string, ```json fence, any fence, first
//! balanced object, first balanced array. Sister parsers handle markdown /
//! numbered / comma / line lists and "Key: value" blocks.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::schema::{coerce, OutputSchema};

#[derive(Debug, Clone)]
pub struct ParseOutcome {
    pub success: bool,
    pub data: Value,
    pub format: &'static str,
    pub errors: Vec<String>,
}

impl ParseOutcome {
    fn failure(errors: Vec<String>) -> Self {
        Self {
            success: false,
            data: Value::Null,
            format: "none",
            errors,
        }
    }
}

fn json_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```json\s*(.*?)\s*```").unwrap())
}

fn any_fence_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```\s*(.*?)\s*```").unwrap())
}

/// Extract JSON from `text`, optionally coercing it through `schema`.
pub fn parse_json(text: &str, schema: Option<&OutputSchema>) -> ParseOutcome {
    let (data, format) = match extract_json(text) {
        Some(found) => found,
        None => return ParseOutcome::failure(vec!["no JSON found".to_string()]),
    };

    let mut errors = Vec::new();
    let data = match schema {
        Some(schema) if !schema.is_empty() => apply_schema(data, schema, &mut errors),
        _ => data,
    };

    ParseOutcome {
        success: errors.is_empty(),
        data,
        format,
        errors,
    }
}

fn extract_json(text: &str) -> Option<(Value, &'static str)> {
    if let Ok(v) = serde_json::from_str::<Value>(text.trim()) {
        return Some((v, "json_direct"));
    }

    if text.contains("```json") {
        if let Some(caps) = json_fence_re().captures(text) {
            if let Ok(v) = serde_json::from_str::<Value>(&caps[1]) {
                return Some((v, "json_codeblock"));
            }
        }
    }

    if text.contains("```") {
        if let Some(caps) = any_fence_re().captures(text) {
            if let Ok(v) = serde_json::from_str::<Value>(&caps[1]) {
                return Some((v, "json_codeblock"));
            }
        }
    }

    if let Some(block) = balanced_block(text, '{', '}') {
        if let Ok(v) = serde_json::from_str::<Value>(block) {
            return Some((v, "json_embedded"));
        }
    }

    if let Some(block) = balanced_block(text, '[', ']') {
        if let Ok(v) = serde_json::from_str::<Value>(block) {
            return Some((v, "json_array"));
        }
    }

    None
}

/// First balanced `open … close` span, depth-counted from the first opener.
fn balanced_block(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let mut depth = 0usize;
    for (i, ch) in text[start..].char_indices() {
        if ch == open {
            depth += 1;
        } else if ch == close {
            depth -= 1;
            if depth == 0 {
                return Some(&text[start..start + i + ch.len_utf8()]);
            }
        }
    }
    None
}

fn apply_schema(data: Value, schema: &OutputSchema, errors: &mut Vec<String>) -> Value {
    let Value::Object(source) = data else {
        errors.push("data is not an object".to_string());
        return data;
    };

    let mut result = serde_json::Map::new();
    for (field, spec) in &schema.fields {
        let mut value = source.get(field).cloned().filter(|v| !v.is_null());

        if value.is_none() {
            if let Some(default) = &spec.default {
                value = Some(default.clone());
            }
        }

        let Some(value) = value else {
            continue;
        };

        match spec.field_type {
            Some(expected) => match coerce(value, expected, field) {
                Ok(coerced) => {
                    result.insert(field.clone(), coerced);
                }
                Err(message) => {
                    errors.push(message);
                }
            },
            None => {
                result.insert(field.clone(), value);
            }
        }
    }

    // Extra fields ride along untouched.
    for (key, value) in source {
        result.entry(key).or_insert(value);
    }

    Value::Object(result)
}

/// Extract a list from markdown, numbered, comma, or line-separated text.
pub fn parse_list(text: &str) -> ParseOutcome {
    let trimmed = text.trim();

    if trimmed.starts_with('[') {
        if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
            return ParseOutcome {
                success: !items.is_empty(),
                data: Value::Array(items),
                format: "json_array",
                errors: Vec::new(),
            };
        }
    }

    static MD_RE: OnceLock<Regex> = OnceLock::new();
    let md_re = MD_RE.get_or_init(|| Regex::new(r"(?m)^\s*[-*]\s+(.+)$").unwrap());
    let items: Vec<Value> = md_re
        .captures_iter(text)
        .map(|c| Value::String(c[1].trim().to_string()))
        .collect();
    if !items.is_empty() {
        return list_outcome(items, "markdown_list");
    }

    static NUM_RE: OnceLock<Regex> = OnceLock::new();
    let num_re = NUM_RE.get_or_init(|| Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$").unwrap());
    let items: Vec<Value> = num_re
        .captures_iter(text)
        .map(|c| Value::String(c[1].trim().to_string()))
        .collect();
    if !items.is_empty() {
        return list_outcome(items, "numbered_list");
    }

    if trimmed.contains(',') && !trimmed.contains('\n') {
        let items: Vec<Value> = trimmed
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| Value::String(s.to_string()))
            .collect();
        if !items.is_empty() {
            return list_outcome(items, "comma_separated");
        }
    }

    let lines: Vec<Value> = trimmed
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(|l| Value::String(l.to_string()))
        .collect();
    if lines.len() > 1 {
        return list_outcome(lines, "line_separated");
    }

    ParseOutcome::failure(vec!["no list found".to_string()])
}

fn list_outcome(items: Vec<Value>, format: &'static str) -> ParseOutcome {
    ParseOutcome {
        success: true,
        data: Value::Array(items),
        format,
        errors: Vec::new(),
    }
}

/// Extract "Key: value" pairs, stripping markdown and inferring value types.
pub fn parse_key_value(text: &str, separator: char) -> ParseOutcome {
    static BOLD_RE: OnceLock<Regex> = OnceLock::new();
    let bold_re = BOLD_RE.get_or_init(|| Regex::new(r"^\*\*(.+)\*\*$").unwrap());
    static BULLET_RE: OnceLock<Regex> = OnceLock::new();
    let bullet_re = BULLET_RE.get_or_init(|| Regex::new(r"^[-*]\s*").unwrap());

    let mut data = serde_json::Map::new();
    for line in text.trim().lines() {
        let line = line.trim();
        let Some(idx) = line.find(separator) else {
            continue;
        };
        let mut key = line[..idx].trim().to_string();
        let value = line[idx + separator.len_utf8()..].trim();

        key = bold_re.replace(&key, "$1").to_string();
        key = bullet_re.replace(&key, "").to_string();

        if !key.is_empty() {
            data.insert(key, infer_type(value));
        }
    }

    if data.is_empty() {
        ParseOutcome::failure(vec!["no key-value pairs found".to_string()])
    } else {
        ParseOutcome {
            success: true,
            data: Value::Object(data),
            format: "key_value",
            errors: Vec::new(),
        }
    }
}

fn infer_type(value: &str) -> Value {
    let value = value.trim();
    match value.to_lowercase().as_str() {
        "true" | "yes" | "ja" => return Value::Bool(true),
        "false" | "no" | "nein" => return Value::Bool(false),
        "null" | "none" | "" => return Value::Null,
        _ => {}
    }

    if !value.contains('.') {
        if let Ok(i) = value.parse::<i64>() {
            return Value::from(i);
        }
    }
    if let Ok(f) = value.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }

    let unquoted = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
        .unwrap_or(value);
    Value::String(unquoted.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn whole_string_json_wins() {
        let out = parse_json(r#"{"intent": "create"}"#, None);
        assert!(out.success);
        assert_eq!(out.format, "json_direct");
        assert_eq!(out.data["intent"], json!("create"));
    }

    #[test]
    fn fenced_json_is_found() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nDone.";
        let out = parse_json(text, None);
        assert!(out.success);
        assert_eq!(out.format, "json_codeblock");
        assert_eq!(out.data["a"], json!(1));
    }

    #[test]
    fn embedded_object_is_found() {
        let text = "The result is {\"a\": {\"b\": 2}} as requested.";
        let out = parse_json(text, None);
        assert!(out.success);
        assert_eq!(out.format, "json_embedded");
        assert_eq!(out.data["a"]["b"], json!(2));
    }

    #[test]
    fn embedded_array_is_found() {
        let text = "Items: [1, 2, 3] in total.";
        let out = parse_json(text, None);
        assert_eq!(out.format, "json_array");
        assert_eq!(out.data, json!([1, 2, 3]));
    }

    #[test]
    fn plain_prose_fails() {
        let out = parse_json("I could not produce anything useful.", None);
        assert!(!out.success);
        assert_eq!(out.format, "none");
    }

    #[test]
    fn schema_applies_defaults_and_coercion() {
        let schema = OutputSchema::from_json(&json!({
            "confidence": {"type": "number", "default": 0.0},
            "priority": {"type": "integer"},
        }))
        .unwrap();
        let out = parse_json(r#"{"priority": "2"}"#, Some(&schema));
        assert!(out.success);
        assert_eq!(out.data["priority"], json!(2));
        assert_eq!(out.data["confidence"], json!(0.0));
    }

    #[test]
    fn extra_fields_survive_schema() {
        let schema = OutputSchema::from_json(&json!({"a": {"type": "integer"}})).unwrap();
        let out = parse_json(r#"{"a": 1, "reasoning": "because"}"#, Some(&schema));
        assert_eq!(out.data["reasoning"], json!("because"));
    }

    #[test]
    fn markdown_list_is_parsed() {
        let out = parse_list("- eins\n- zwei\n* drei");
        assert!(out.success);
        assert_eq!(out.format, "markdown_list");
        assert_eq!(out.data, json!(["eins", "zwei", "drei"]));
    }

    #[test]
    fn numbered_list_is_parsed() {
        let out = parse_list("1. first\n2) second");
        assert_eq!(out.format, "numbered_list");
        assert_eq!(out.data, json!(["first", "second"]));
    }

    #[test]
    fn single_line_commas_are_split() {
        let out = parse_list("alpha, beta, gamma");
        assert_eq!(out.format, "comma_separated");
        assert_eq!(out.data, json!(["alpha", "beta", "gamma"]));
    }

    #[test]
    fn key_value_infers_types() {
        let out = parse_key_value("Name: Schmidt\nCount: 3\nActive: ja\n**Score**: 0.7", ':');
        assert!(out.success);
        assert_eq!(out.data["Name"], json!("Schmidt"));
        assert_eq!(out.data["Count"], json!(3));
        assert_eq!(out.data["Active"], json!(true));
        assert_eq!(out.data["Score"], json!(0.7));
    }
}
