//! Output schemas for agent responses.
//!
//! Stored in `agent_configs.output_schema` as a JSON-Schema-like map:
//! `{"intent": {"type": "string", "required": true}, "confidence":
//! {"type": "number", "default": 0}}`. Type strings collapse to a small
//! tagged union of primitive codes.

use std::collections::BTreeMap;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

impl FieldType {
    pub fn from_schema_str(s: &str) -> Option<Self> {
        match s {
            "string" | "str" => Some(FieldType::String),
            "integer" | "int" => Some(FieldType::Integer),
            "number" | "float" => Some(FieldType::Number),
            "boolean" | "bool" => Some(FieldType::Boolean),
            "array" | "list" => Some(FieldType::Array),
            "object" | "dict" => Some(FieldType::Object),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FieldType::String => "string",
            FieldType::Integer => "integer",
            FieldType::Number => "number",
            FieldType::Boolean => "boolean",
            FieldType::Array => "array",
            FieldType::Object => "object",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct FieldSpec {
    pub field_type: Option<FieldType>,
    pub required: bool,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Default)]
pub struct OutputSchema {
    pub fields: BTreeMap<String, FieldSpec>,
}

impl OutputSchema {
    /// Parse the stored JSON form. Unknown type strings fall back to no
    /// coercion rather than failing the whole schema.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let mut fields = BTreeMap::new();
        for (name, rules) in obj {
            let mut spec = FieldSpec::default();
            if let Some(rules) = rules.as_object() {
                if let Some(t) = rules.get("type").and_then(Value::as_str) {
                    spec.field_type = FieldType::from_schema_str(t);
                }
                spec.required = rules.get("required").and_then(Value::as_bool).unwrap_or(false);
                spec.default = rules.get("default").cloned();
            }
            fields.insert(name.clone(), spec);
        }
        Some(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Attempt to coerce `value` into `expected`. Returns the coerced value or
/// an error message naming the field.
pub fn coerce(value: Value, expected: FieldType, field: &str) -> std::result::Result<Value, String> {
    let ok = match expected {
        FieldType::String => value.is_string(),
        FieldType::Integer => value.is_i64() || value.is_u64(),
        FieldType::Number => value.is_number(),
        FieldType::Boolean => value.is_boolean(),
        FieldType::Array => value.is_array(),
        FieldType::Object => value.is_object(),
    };
    if ok {
        return Ok(value);
    }

    match expected {
        FieldType::Integer => match &value {
            Value::Number(n) => n
                .as_f64()
                .map(|f| Value::from(f as i64))
                .ok_or_else(|| type_error(field, expected)),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map(|f| Value::from(f as i64))
                .map_err(|_| type_error(field, expected)),
            _ => Err(type_error(field, expected)),
        },
        FieldType::Number => match &value {
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(Value::Number)
                .ok_or_else(|| type_error(field, expected)),
            _ => Err(type_error(field, expected)),
        },
        FieldType::String => match &value {
            Value::Null => Err(type_error(field, expected)),
            other => Ok(Value::String(stringify(other))),
        },
        FieldType::Boolean => match &value {
            Value::String(s) => Ok(Value::Bool(matches!(
                s.to_lowercase().as_str(),
                "true" | "1" | "yes" | "ja"
            ))),
            Value::Number(n) => Ok(Value::Bool(n.as_f64().unwrap_or(0.0) != 0.0)),
            _ => Err(type_error(field, expected)),
        },
        FieldType::Array => match &value {
            Value::String(s) => Ok(Value::Array(
                s.split(',')
                    .map(|part| Value::String(part.trim().to_string()))
                    .collect(),
            )),
            _ => Err(type_error(field, expected)),
        },
        FieldType::Object => Err(type_error(field, expected)),
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn type_error(field: &str, expected: FieldType) -> String {
    format!("{field}: cannot convert to {}", expected.name())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_schema_from_stored_json() {
        let schema = OutputSchema::from_json(&json!({
            "intent": {"type": "string", "required": true},
            "confidence": {"type": "number", "default": 0.0},
            "options": {"type": "array"},
        }))
        .unwrap();

        assert_eq!(schema.fields.len(), 3);
        assert!(schema.fields["intent"].required);
        assert_eq!(schema.fields["intent"].field_type, Some(FieldType::String));
        assert_eq!(schema.fields["confidence"].default, Some(json!(0.0)));
    }

    #[test]
    fn integer_coercion_accepts_float_strings() {
        assert_eq!(coerce(json!("3.0"), FieldType::Integer, "n").unwrap(), json!(3));
        assert_eq!(coerce(json!(2.9), FieldType::Integer, "n").unwrap(), json!(2));
    }

    #[test]
    fn boolean_coercion_understands_german_yes() {
        assert_eq!(coerce(json!("ja"), FieldType::Boolean, "b").unwrap(), json!(true));
        assert_eq!(coerce(json!("nein"), FieldType::Boolean, "b").unwrap(), json!(false));
    }

    #[test]
    fn array_coercion_splits_comma_strings() {
        assert_eq!(
            coerce(json!("a, b,c"), FieldType::Array, "tags").unwrap(),
            json!(["a", "b", "c"])
        );
    }

    #[test]
    fn object_mismatch_is_an_error() {
        assert!(coerce(json!("x"), FieldType::Object, "data").is_err());
    }
}
