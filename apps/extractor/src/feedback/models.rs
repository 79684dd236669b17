use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A human correction of one extracted field, replayable as a few-shot example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorrectionVector {
    /// The source text the value was (or should have been) extracted from.
    pub source_context: String,
    #[serde(default)]
    pub source_label: Option<String>,
    #[serde(default)]
    pub wrong_extraction: Option<String>,
    pub correct_value: String,
    /// Canonical field path, e.g. `firstName` or `experience.title`.
    pub correct_field: String,
    #[serde(default)]
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CorrectionRow {
    pub id: Uuid,
    pub tenant_id: String,
    pub source_context: String,
    pub source_label: Option<String>,
    pub wrong_extraction: Option<String>,
    pub correct_value: String,
    pub correct_field: String,
    pub reasoning: Option<String>,
    pub context_hash: String,
    pub usage_count: i64,
    pub created_at: DateTime<Utc>,
}

impl CorrectionRow {
    pub fn new(tenant_id: &str, vector: &CorrectionVector, context_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.to_string(),
            source_context: vector.source_context.clone(),
            source_label: vector.source_label.clone(),
            wrong_extraction: vector.wrong_extraction.clone(),
            correct_value: vector.correct_value.clone(),
            correct_field: vector.correct_field.clone(),
            reasoning: vector.reasoning.clone(),
            context_hash,
            usage_count: 0,
            created_at: Utc::now(),
        }
    }
}

/// A manual mapping of an unmapped segment onto a schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SegmentAssignment {
    pub original_text: String,
    pub detected_category: String,
    pub assigned_field: String,
    /// Value to store; defaults to the original text.
    #[serde(default)]
    pub assigned_value: Option<String>,
    #[serde(default)]
    pub line_reference: Option<String>,
    #[serde(default)]
    pub reasoning: Option<String>,
}

impl SegmentAssignment {
    /// The correction this assignment teaches: the text belonged in `assigned_field`.
    pub fn to_correction(&self) -> CorrectionVector {
        CorrectionVector {
            source_context: self.original_text.clone(),
            source_label: Some(self.detected_category.clone()),
            wrong_extraction: None,
            correct_value: self
                .assigned_value
                .clone()
                .unwrap_or_else(|| self.original_text.clone()),
            correct_field: self.assigned_field.clone(),
            reasoning: self.reasoning.clone().or_else(|| {
                Some(format!(
                    "Text left unmapped as '{}' belongs in {}",
                    self.detected_category, self.assigned_field
                ))
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct FieldCounterRow {
    pub field_name: String,
    pub total: i64,
    pub corrected: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldAccuracy {
    pub field: String,
    pub total: i64,
    pub corrected: i64,
    pub accuracy: f64,
}

impl From<FieldCounterRow> for FieldAccuracy {
    fn from(row: FieldCounterRow) -> Self {
        let accuracy = if row.total > 0 {
            (row.total - row.corrected).max(0) as f64 / row.total as f64
        } else {
            1.0
        };
        Self {
            field: row.field_name,
            total: row.total,
            corrected: row.corrected,
            accuracy,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExampleSource {
    Stored,
    BuiltIn,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FewShotExample {
    pub source: ExampleSource,
    pub field: String,
    pub context: String,
    pub wrong_value: Option<String>,
    pub correct_value: String,
    pub reasoning: Option<String>,
}

impl From<&CorrectionRow> for FewShotExample {
    fn from(row: &CorrectionRow) -> Self {
        Self {
            source: ExampleSource::Stored,
            field: row.correct_field.clone(),
            context: row.source_context.clone(),
            wrong_value: row.wrong_extraction.clone(),
            correct_value: row.correct_value.clone(),
            reasoning: row.reasoning.clone(),
        }
    }
}
