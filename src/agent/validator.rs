//! Tool-argument validation against a JSON-schema node.
//!
//! Consumes an already-normalized schema and checks a call's arguments
//! against it, collecting every violation rather than stopping at the
//! first.

use serde_json::Value;
use std::collections::BTreeMap;

/// Validate `arguments` against `schema`, a top-level JSON-Schema object
/// node (`{"type": "object", "properties": {...}, "required": [...]}`).
/// Returns every violation found; an empty vec means the arguments are
/// valid. Nested validation below the top level is not performed.
pub fn validate_arguments(schema: &Value, arguments: &BTreeMap<String, Value>) -> Vec<String> {
    let mut errors = Vec::new();

    let required: Vec<&str> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|a| a.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    for key in &required {
        if !arguments.contains_key(*key) {
            errors.push(format!("Missing required parameter: {key}"));
        }
    }

    let properties = schema.get("properties").and_then(Value::as_object);
    let additional_allowed = schema
        .get("additionalProperties")
        .and_then(Value::as_bool)
        .unwrap_or(true);

    for (key, value) in arguments {
        match properties.and_then(|p| p.get(key)) {
            None => {
                if !additional_allowed {
                    errors.push(format!("Unknown parameter: {key}"));
                }
            }
            Some(prop_schema) => {
                if let Some(expected) = prop_schema.get("type").and_then(Value::as_str) {
                    if !type_matches(expected, value) {
                        errors.push(format!("Parameter '{key}' should be {expected}"));
                    }
                }
            }
        }
    }

    errors
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        "null" => value.is_null(),
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": { "type": "string" },
                "recursive": { "type": "boolean" },
                "depth": { "type": "integer" },
            },
            "required": ["path"],
            "additionalProperties": false,
        })
    }

    fn args(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn missing_required_key_reported() {
        let errors = validate_arguments(&schema(), &args(&[]));
        assert_eq!(errors, vec!["Missing required parameter: path"]);
    }

    #[test]
    fn unknown_key_reported_when_additional_forbidden() {
        let errors = validate_arguments(&schema(), &args(&[("path", json!("/tmp")), ("extra", json!(1))]));
        assert!(errors.contains(&"Unknown parameter: extra".to_string()));
    }

    #[test]
    fn type_mismatch_reported() {
        let errors = validate_arguments(&schema(), &args(&[("path", json!(5)), ("recursive", json!("yes"))]));
        assert!(errors.contains(&"Parameter 'path' should be string".to_string()));
        assert!(errors.contains(&"Parameter 'recursive' should be boolean".to_string()));
    }

    #[test]
    fn errors_are_not_short_circuited() {
        let errors = validate_arguments(&schema(), &args(&[("recursive", json!("yes")), ("bogus", json!(1))]));
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn valid_arguments_produce_no_errors() {
        let errors = validate_arguments(&schema(), &args(&[("path", json!("/tmp")), ("recursive", json!(true))]));
        assert!(errors.is_empty());
    }

    #[test]
    fn integer_accepts_both_signed_and_unsigned_json_numbers() {
        let errors = validate_arguments(&schema(), &args(&[("path", json!("/tmp")), ("depth", json!(3u64))]));
        assert!(errors.is_empty());
    }
}
