//! Feedback / few-shot store.
//!
//! Corrections made by humans become few-shot examples for later extractions,
//! and per-field counters surface the fields the model keeps getting wrong.

use std::collections::HashSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::feedback::cache::AccuracyCache;
use crate::feedback::keywords::{context_hash, keywords, overlap};
use crate::feedback::models::{
    CorrectionRow, CorrectionVector, ExampleSource, FewShotExample, FieldAccuracy,
    SegmentAssignment,
};
use crate::feedback::repository::{FeedbackError, FeedbackRepository};

pub const DEFAULT_CRITICAL_FIELDS: &[&str] = &["firstName", "lastName", "email", "phone"];
pub const PROBLEM_ACCURACY_THRESHOLD: f64 = 0.8;
pub const PROBLEM_MIN_OBSERVATIONS: i64 = 5;
pub const DEFAULT_EXAMPLE_LIMIT: usize = 5;
/// How many recent corrections are scanned for keyword overlap.
const KEYWORD_WINDOW: usize = 200;

/// Built-in examples: (field, context, wrong value, correct value, reasoning).
const BUILTIN_EXAMPLES: &[(&str, &str, Option<&str>, &str, &str)] = &[
    (
        "experience.title",
        "Senior Software Engineer\nMax Müller",
        Some("firstName: Senior Software"),
        "Senior Software Engineer",
        "A job title printed above the name is not the person's name.",
    ),
    (
        "phone",
        "Tel. 079 123 45 67",
        Some("079 123 45 67"),
        "+41791234567",
        "Phone numbers are returned in E.164; national numbers use the document's country.",
    ),
    (
        "email",
        "E-Mail: max.mueller(at)example.ch",
        None,
        "max.mueller@example.ch",
        "An obfuscated '(at)' is still the candidate's email address.",
    ),
    (
        "lastName",
        "MÜLLER Max",
        Some("Max"),
        "Müller",
        "The uppercase token of a name line is usually the surname.",
    ),
    (
        "dateOfBirth",
        "Jahrgang 1985, ledig",
        None,
        "1985",
        "'Jahrgang' gives the birth year; civil status is not a date.",
    ),
];

/// Strips the scalar container prefix so `contact.email` and `email` share counters.
pub fn canonical_field(field: &str) -> String {
    let trimmed = field.trim();
    trimmed
        .strip_prefix("person.")
        .or_else(|| trimmed.strip_prefix("contact."))
        .unwrap_or(trimmed)
        .to_string()
}

pub fn builtin_examples(limit: usize) -> Vec<FewShotExample> {
    BUILTIN_EXAMPLES
        .iter()
        .take(limit)
        .map(|(field, context, wrong, correct, reasoning)| FewShotExample {
            source: ExampleSource::BuiltIn,
            field: field.to_string(),
            context: context.to_string(),
            wrong_value: wrong.map(str::to_string),
            correct_value: correct.to_string(),
            reasoning: Some(reasoning.to_string()),
        })
        .collect()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentReceipt {
    pub assignment_id: Uuid,
    pub correction_id: Uuid,
}

pub struct FeedbackStore {
    repo: Arc<dyn FeedbackRepository>,
    cache: AccuracyCache,
    example_limit: usize,
}

impl FeedbackStore {
    pub fn new(repo: Arc<dyn FeedbackRepository>, example_limit: usize) -> Self {
        Self {
            repo,
            cache: AccuracyCache::default(),
            example_limit,
        }
    }

    pub fn example_limit(&self) -> usize {
        self.example_limit
    }

    /// Persists a correction and counts it against the field's accuracy.
    pub async fn record_correction(
        &self,
        tenant: &str,
        vector: &CorrectionVector,
    ) -> Result<Uuid, FeedbackError> {
        let row = correction_row(tenant, vector)?;
        self.repo.save_correction(&row).await?;
        self.cache.invalidate(tenant);

        info!(
            "Recorded correction {} for tenant {tenant} field {}",
            row.id, row.correct_field
        );
        Ok(row.id)
    }

    /// Persists a manual segment mapping and the correction it implies.
    pub async fn record_segment_assignment(
        &self,
        tenant: &str,
        assignment: &SegmentAssignment,
    ) -> Result<AssignmentReceipt, FeedbackError> {
        if assignment.assigned_field.trim().is_empty() {
            return Err(FeedbackError::Invalid("assignedField must not be empty".into()));
        }
        let row = correction_row(tenant, &assignment.to_correction())?;
        let assignment_id = self.repo.save_segment_assignment(&row, assignment).await?;
        self.cache.invalidate(tenant);

        info!(
            "Recorded segment assignment {assignment_id} for tenant {tenant} field {}",
            row.correct_field
        );
        Ok(AssignmentReceipt {
            assignment_id,
            correction_id: row.id,
        })
    }

    /// Counts fields a reviewer accepted unchanged.
    pub async fn record_confirmed_fields(
        &self,
        tenant: &str,
        fields: &[String],
    ) -> Result<usize, FeedbackError> {
        validate_tenant(tenant)?;
        let fields: Vec<String> = fields
            .iter()
            .map(|f| canonical_field(f))
            .filter(|f| !f.is_empty())
            .collect();
        for field in &fields {
            self.repo.increment_field(tenant, field, false).await?;
        }
        self.cache.invalidate(tenant);
        debug!("Confirmed {} fields for tenant {tenant}", fields.len());
        Ok(fields.len())
    }

    /// Ranked few-shot examples for an extraction over `context`.
    pub async fn get_relevant_examples(
        &self,
        tenant: &str,
        context: &str,
        target_fields: Option<&[String]>,
    ) -> Result<Vec<FewShotExample>, FeedbackError> {
        let limit = self.example_limit;
        let targets: Vec<String> = match target_fields {
            Some(fields) if !fields.is_empty() => fields.iter().map(|f| canonical_field(f)).collect(),
            _ => DEFAULT_CRITICAL_FIELDS.iter().map(|f| f.to_string()).collect(),
        };

        let by_field = self
            .repo
            .corrections_for_fields(tenant, &targets, limit)
            .await?;

        let context_keywords = keywords(context);
        let mut by_keyword: Vec<(usize, CorrectionRow)> = self
            .repo
            .recent_corrections(tenant, KEYWORD_WINDOW)
            .await?
            .into_iter()
            .filter_map(|row| {
                let mut text = row.source_context.clone();
                if let Some(label) = &row.source_label {
                    text.push(' ');
                    text.push_str(label);
                }
                let score = overlap(&context_keywords, &keywords(&text));
                (score > 0).then_some((score, row))
            })
            .collect();
        by_keyword.sort_by(|(sa, a), (sb, b)| sb.cmp(sa).then(b.usage_count.cmp(&a.usage_count)));

        let mut seen_hashes = HashSet::new();
        let mut selected: Vec<CorrectionRow> = Vec::new();
        for row in by_field
            .into_iter()
            .chain(by_keyword.into_iter().map(|(_, row)| row))
        {
            if selected.len() >= limit {
                break;
            }
            if seen_hashes.insert(row.context_hash.clone()) {
                selected.push(row);
            }
        }

        let ids: Vec<Uuid> = selected.iter().map(|r| r.id).collect();
        if let Err(e) = self.repo.increment_usage(&ids).await {
            warn!("Failed to bump few-shot usage counts: {e}");
        }

        let mut examples: Vec<FewShotExample> = selected.iter().map(FewShotExample::from).collect();
        for builtin in builtin_examples(BUILTIN_EXAMPLES.len()) {
            if examples.len() >= limit {
                break;
            }
            if seen_hashes.insert(context_hash(&builtin.context)) {
                examples.push(builtin);
            }
        }

        debug!(
            "Selected {} few-shot examples ({} stored) for tenant {tenant}",
            examples.len(),
            ids.len()
        );
        Ok(examples)
    }

    /// Accuracy aggregates for every observed field, served from the TTL cache.
    pub async fn field_accuracy(&self, tenant: &str) -> Result<Vec<FieldAccuracy>, FeedbackError> {
        if let Some(cached) = self.cache.get(tenant) {
            return Ok(cached);
        }
        let accuracy: Vec<FieldAccuracy> = self
            .repo
            .field_counters(tenant)
            .await?
            .into_iter()
            .map(FieldAccuracy::from)
            .collect();
        self.cache.put(tenant, accuracy.clone());
        Ok(accuracy)
    }

    /// Fields below the accuracy threshold with enough observations, worst first.
    pub async fn get_problematic_fields(
        &self,
        tenant: &str,
    ) -> Result<Vec<FieldAccuracy>, FeedbackError> {
        let mut problems: Vec<FieldAccuracy> = self
            .field_accuracy(tenant)
            .await?
            .into_iter()
            .filter(|a| a.total >= PROBLEM_MIN_OBSERVATIONS && a.accuracy < PROBLEM_ACCURACY_THRESHOLD)
            .collect();
        problems.sort_by(|a, b| a.accuracy.total_cmp(&b.accuracy));
        Ok(problems)
    }
}

fn validate_tenant(tenant: &str) -> Result<(), FeedbackError> {
    if tenant.trim().is_empty() {
        return Err(FeedbackError::Invalid("tenant must not be empty".into()));
    }
    Ok(())
}

/// Validates a correction and builds its row under the canonical field name.
fn correction_row(tenant: &str, vector: &CorrectionVector) -> Result<CorrectionRow, FeedbackError> {
    validate_tenant(tenant)?;
    if vector.correct_field.trim().is_empty() {
        return Err(FeedbackError::Invalid("correctField must not be empty".into()));
    }
    if vector.source_context.trim().is_empty() {
        return Err(FeedbackError::Invalid("sourceContext must not be empty".into()));
    }

    let mut vector = vector.clone();
    vector.correct_field = canonical_field(&vector.correct_field);
    Ok(CorrectionRow::new(
        tenant,
        &vector,
        context_hash(&vector.source_context),
    ))
}
