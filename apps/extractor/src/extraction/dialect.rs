//! Boundary adapter between the two response dialects the extraction schema is
//! spoken in: camelCase (canonical) and the older snake_case variant.
//!
//! Everything inside the crate works on the canonical camelCase representation.
//! Translation happens exactly twice: on the raw model output before validation,
//! and on the outgoing payload when a caller asks for the snake_case dialect.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemaDialect {
    #[default]
    Camel,
    Snake,
}

const SNAKE_ROOT_KEYS: &[&str] = &["thought_process", "extracted_data", "unmapped_segments"];

/// Detects the dialect of a raw model response from its root keys.
pub fn detect_dialect(value: &Value) -> SchemaDialect {
    match value.as_object() {
        Some(obj) if SNAKE_ROOT_KEYS.iter().any(|k| obj.contains_key(*k)) => SchemaDialect::Snake,
        _ => SchemaDialect::Camel,
    }
}

/// Rewrites a response in `dialect` into the canonical camelCase form.
pub fn to_canonical(value: Value, dialect: SchemaDialect) -> Value {
    match dialect {
        SchemaDialect::Camel => value,
        SchemaDialect::Snake => rename_keys(value, snake_to_camel),
    }
}

/// Rewrites a canonical camelCase payload into `dialect`.
pub fn from_canonical(value: Value, dialect: SchemaDialect) -> Value {
    match dialect {
        SchemaDialect::Camel => value,
        SchemaDialect::Snake => rename_keys(value, camel_to_snake),
    }
}

fn rename_keys(value: Value, rename: fn(&str) -> String) -> Value {
    match value {
        Value::Object(obj) => Value::Object(
            obj.into_iter()
                .map(|(k, v)| (rename(&k), rename_keys(v, rename)))
                .collect::<Map<String, Value>>(),
        ),
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| rename_keys(v, rename)).collect())
        }
        other => other,
    }
}

fn snake_to_camel(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for c in key.chars() {
        if c == '_' {
            upper_next = !out.is_empty();
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn camel_to_snake(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for c in key.chars() {
        if c.is_uppercase() {
            if !out.is_empty() {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_key_conversions() {
        assert_eq!(snake_to_camel("thought_process"), "thoughtProcess");
        assert_eq!(snake_to_camel("field_of_study"), "fieldOfStudy");
        assert_eq!(snake_to_camel("evidence"), "evidence");
        assert_eq!(camel_to_snake("lineReference"), "line_reference");
        assert_eq!(camel_to_snake("page"), "page");
    }

    #[test]
    fn test_detects_snake_dialect() {
        assert_eq!(
            detect_dialect(&json!({"thought_process": "x", "extracted_data": {}})),
            SchemaDialect::Snake
        );
        assert_eq!(
            detect_dialect(&json!({"thoughtProcess": "x"})),
            SchemaDialect::Camel
        );
        assert_eq!(detect_dialect(&json!([1, 2])), SchemaDialect::Camel);
    }

    #[test]
    fn test_snake_response_becomes_canonical() {
        let raw = json!({
            "thought_process": "reasoning",
            "extracted_data": {
                "person": {
                    "first_name": "Max",
                    "evidence": [{"line_id": "p1_l0", "page": 1, "text": "Max Müller"}]
                }
            },
            "unmapped_segments": [{"original_text": "x", "detected_category": "other_stuff"}]
        });
        let canonical = to_canonical(raw, SchemaDialect::Snake);
        assert_eq!(canonical["extractedData"]["person"]["firstName"], "Max");
        assert_eq!(
            canonical["extractedData"]["person"]["evidence"][0]["lineId"],
            "p1_l0"
        );
        // Values are never rewritten, only keys.
        assert_eq!(
            canonical["unmappedSegments"][0]["detectedCategory"],
            "other_stuff"
        );
    }

    #[test]
    fn test_from_canonical_emits_snake_keys() {
        let canonical = json!({"extractedData": {"contact": {"email": null}}, "isDataComplete": true});
        let snake = from_canonical(canonical, SchemaDialect::Snake);
        assert_eq!(snake["is_data_complete"], true);
        assert!(snake["extracted_data"]["contact"].get("email").is_some());
    }
}
