//! Structural shape check for the cognitive response schema.
//!
//! Shape failures cannot be corrected locally: the model has to be re-prompted with
//! the exact error list, so every error carries a JSON path and a readable message.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::extraction::models::CognitiveResponse;

/// Minimum length of the reasoning trace, in characters.
pub const MIN_THOUGHT_PROCESS_CHARS: usize = 50;

const PERSON_FIELDS: &[&str] = &["firstName", "lastName", "dateOfBirth", "nationality"];
const CONTACT_FIELDS: &[&str] = &["email", "phone", "address", "linkedin", "website"];
const LANGUAGE_FIELDS: &[&str] = &["name", "level"];
const SKILL_FIELDS: &[&str] = &["name", "category"];
const EXPERIENCE_FIELDS: &[&str] = &[
    "company",
    "title",
    "location",
    "startDate",
    "endDate",
    "description",
];
const EDUCATION_FIELDS: &[&str] = &[
    "institution",
    "degree",
    "fieldOfStudy",
    "startDate",
    "endDate",
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Checks a canonical (camelCase) response against the schema shape.
/// Returns every violation found, not just the first.
pub fn check_shape(value: &Value) -> Vec<SchemaError> {
    let mut errors = Vec::new();

    let Some(root) = value.as_object() else {
        errors.push(SchemaError::new("$", "expected a JSON object"));
        return errors;
    };

    match root.get("thoughtProcess") {
        None => errors.push(SchemaError::new("thoughtProcess", "required field missing")),
        Some(Value::String(s)) => {
            let len = s.trim().chars().count();
            if len < MIN_THOUGHT_PROCESS_CHARS {
                errors.push(SchemaError::new(
                    "thoughtProcess",
                    format!(
                        "reasoning must be at least {MIN_THOUGHT_PROCESS_CHARS} characters (got {len})"
                    ),
                ));
            }
        }
        Some(_) => errors.push(SchemaError::new("thoughtProcess", "expected a string")),
    }

    match root.get("extractedData") {
        None => errors.push(SchemaError::new("extractedData", "required field missing")),
        Some(Value::Object(data)) => check_extracted_data(data, &mut errors),
        Some(_) => errors.push(SchemaError::new("extractedData", "expected an object")),
    }

    match root.get("unmappedSegments") {
        None => errors.push(SchemaError::new(
            "unmappedSegments",
            "required field missing (use [] when everything was placed)",
        )),
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_segment(&format!("unmappedSegments[{i}]"), item, &mut errors);
            }
        }
        Some(_) => errors.push(SchemaError::new("unmappedSegments", "expected an array")),
    }

    if let Some(meta) = root.get("metadata") {
        if !meta.is_object() && !meta.is_null() {
            errors.push(SchemaError::new("metadata", "expected an object"));
        }
    }

    errors
}

/// Shape check followed by typed deserialization.
pub fn parse_canonical(value: Value) -> Result<CognitiveResponse, Vec<SchemaError>> {
    let errors = check_shape(&value);
    if !errors.is_empty() {
        return Err(errors);
    }
    let mut value = value;
    drop_nulls(&mut value);
    serde_json::from_value(value).map_err(|e| vec![SchemaError::new("$", e.to_string())])
}

/// Removes null-valued object keys so absent and null read the same way.
fn drop_nulls(value: &mut Value) {
    match value {
        Value::Object(obj) => {
            obj.retain(|_, v| !v.is_null());
            obj.values_mut().for_each(drop_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(drop_nulls),
        _ => {}
    }
}

fn check_extracted_data(data: &Map<String, Value>, errors: &mut Vec<SchemaError>) {
    for (key, fields) in [("person", PERSON_FIELDS), ("contact", CONTACT_FIELDS)] {
        let path = format!("extractedData.{key}");
        match data.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Object(obj)) => check_entity(&path, obj, fields, errors),
            Some(_) => errors.push(SchemaError::new(path, "expected an object or null")),
        }
    }

    for (key, fields) in [
        ("languages", LANGUAGE_FIELDS),
        ("skills", SKILL_FIELDS),
        ("experience", EXPERIENCE_FIELDS),
        ("education", EDUCATION_FIELDS),
    ] {
        let path = format!("extractedData.{key}");
        match data.get(key) {
            None | Some(Value::Null) => {}
            Some(Value::Array(items)) => {
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    match item.as_object() {
                        Some(obj) => check_entity(&item_path, obj, fields, errors),
                        None => errors.push(SchemaError::new(item_path, "expected an object")),
                    }
                }
            }
            Some(_) => errors.push(SchemaError::new(path, "expected an array")),
        }
    }
}

fn check_entity(
    path: &str,
    obj: &Map<String, Value>,
    fields: &[&str],
    errors: &mut Vec<SchemaError>,
) {
    for field in fields {
        match obj.get(*field) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => errors.push(SchemaError::new(
                format!("{path}.{field}"),
                "expected a string or null",
            )),
        }
    }

    match obj.get("evidence") {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                check_evidence(&format!("{path}.evidence[{i}]"), item, errors);
            }
        }
        Some(_) => errors.push(SchemaError::new(
            format!("{path}.evidence"),
            "expected an array of evidence objects",
        )),
    }
}

fn check_evidence(path: &str, item: &Value, errors: &mut Vec<SchemaError>) {
    let Some(obj) = item.as_object() else {
        errors.push(SchemaError::new(path, "expected an evidence object"));
        return;
    };
    match obj.get("lineId") {
        Some(Value::String(s)) if !s.trim().is_empty() => {}
        Some(Value::String(_)) => {
            errors.push(SchemaError::new(format!("{path}.lineId"), "must not be empty"))
        }
        None => errors.push(SchemaError::new(
            format!("{path}.lineId"),
            "required field missing",
        )),
        Some(_) => errors.push(SchemaError::new(format!("{path}.lineId"), "expected a string")),
    }
    match obj.get("page") {
        Some(Value::Number(n)) if n.as_u64().is_some_and(|p| p >= 1 && p <= u32::MAX as u64) => {}
        None => errors.push(SchemaError::new(
            format!("{path}.page"),
            "required field missing",
        )),
        Some(_) => errors.push(SchemaError::new(
            format!("{path}.page"),
            "expected a positive integer",
        )),
    }
    match obj.get("text") {
        Some(Value::String(_)) => {}
        None => errors.push(SchemaError::new(
            format!("{path}.text"),
            "required field missing",
        )),
        Some(_) => errors.push(SchemaError::new(format!("{path}.text"), "expected a string")),
    }
}

fn check_segment(path: &str, item: &Value, errors: &mut Vec<SchemaError>) {
    let Some(obj) = item.as_object() else {
        errors.push(SchemaError::new(path, "expected an object"));
        return;
    };
    for key in ["originalText", "detectedCategory", "reason"] {
        match obj.get(key) {
            Some(Value::String(_)) => {}
            None => errors.push(SchemaError::new(
                format!("{path}.{key}"),
                "required field missing",
            )),
            Some(_) => errors.push(SchemaError::new(format!("{path}.{key}"), "expected a string")),
        }
    }
    match obj.get("confidence") {
        Some(Value::Number(n)) if n.as_f64().is_some_and(|c| (0.0..=1.0).contains(&c)) => {}
        None => errors.push(SchemaError::new(
            format!("{path}.confidence"),
            "required field missing",
        )),
        Some(_) => errors.push(SchemaError::new(
            format!("{path}.confidence"),
            "expected a number between 0 and 1",
        )),
    }
    for key in ["suggestedField", "lineReference"] {
        match obj.get(key) {
            None | Some(Value::Null) | Some(Value::String(_)) => {}
            Some(_) => errors.push(SchemaError::new(
                format!("{path}.{key}"),
                "expected a string or null",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REASONING: &str =
        "The first header line is the candidate name, contact data follows in the second block.";

    fn minimal() -> Value {
        json!({
            "thoughtProcess": REASONING,
            "extractedData": {},
            "unmappedSegments": []
        })
    }

    #[test]
    fn test_minimal_response_is_valid() {
        assert!(check_shape(&minimal()).is_empty());
        assert!(parse_canonical(minimal()).is_ok());
    }

    #[test]
    fn test_null_entities_parse_as_empty() {
        let mut v = minimal();
        v["extractedData"] = json!({
            "person": null,
            "contact": {"email": null, "evidence": null},
            "skills": null
        });
        let parsed = parse_canonical(v).unwrap();
        assert!(parsed.extracted_data.person.first_name.is_none());
        assert!(parsed.extracted_data.contact.evidence.is_empty());
        assert!(parsed.extracted_data.skills.is_empty());
    }

    #[test]
    fn test_non_object_root() {
        let errors = check_shape(&json!("nope"));
        assert_eq!(errors, vec![SchemaError::new("$", "expected a JSON object")]);
    }

    #[test]
    fn test_short_reasoning_rejected() {
        let mut v = minimal();
        v["thoughtProcess"] = json!("too short");
        let errors = check_shape(&v);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "thoughtProcess");
        assert!(errors[0].message.contains("at least 50"));
    }

    #[test]
    fn test_missing_required_fields_all_reported() {
        let errors = check_shape(&json!({}));
        let paths: Vec<_> = errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["thoughtProcess", "extractedData", "unmappedSegments"]);
    }

    #[test]
    fn test_malformed_evidence_paths() {
        let mut v = minimal();
        v["extractedData"] = json!({
            "experience": [
                {"company": "ACME", "evidence": [{"lineId": "", "page": 0, "text": 3}]}
            ]
        });
        let errors = check_shape(&v);
        let rendered: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        assert_eq!(
            rendered,
            vec![
                "extractedData.experience[0].evidence[0].lineId: must not be empty",
                "extractedData.experience[0].evidence[0].page: expected a positive integer",
                "extractedData.experience[0].evidence[0].text: expected a string",
            ]
        );
    }

    #[test]
    fn test_scalar_field_must_be_string_or_null() {
        let mut v = minimal();
        v["extractedData"] = json!({"contact": {"phone": 791234567, "email": null}});
        let errors = check_shape(&v);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "extractedData.contact.phone");
    }

    #[test]
    fn test_segment_confidence_range() {
        let mut v = minimal();
        v["unmappedSegments"] = json!([{
            "originalText": "Hobbies",
            "detectedCategory": "hobby",
            "reason": "no field",
            "confidence": 1.5
        }]);
        let errors = check_shape(&v);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "unmappedSegments[0].confidence");
    }
}
