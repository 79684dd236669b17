//! Cognitive response validator.
//!
//! Rule order:
//! 1. Structural shape (fails the response; caller must re-prompt)
//! 2. Blank values become null; evidence citing lines outside the corpus is dropped
//! 3. Name sanity: job titles and company names demoted out of the person name
//! 4. Evidence presence on person/contact, list entries without evidence removed
//! 5. Email and phone normalization
//!
//! Rules 2–5 never fail validation. Each local fix is recorded as an
//! `AutoCorrection`, and fields a human should look at are `FlaggedField`s.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::extraction::dialect::{detect_dialect, to_canonical};
use crate::extraction::models::{
    AutoCorrection, CognitiveResponse, Evidence, FlagReason, FlaggedField, SegmentCategory,
    UnmappedSegment,
};
use crate::extraction::normalize::{normalize_email, PhoneNormalizer};
use crate::extraction::schema::{parse_canonical, SchemaError};

/// Confidence attached to text demoted out of the person name.
const DEMOTED_NAME_CONFIDENCE: f64 = 0.3;
const MAX_NAME_PART_CHARS: usize = 40;
const MAX_NAME_PART_WORDS: usize = 4;

static SENIORITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(senior|junior|lead|head|chief|principal|staff|leiter(in)?|teamleiter(in)?|geschäftsführer(in)?|sachbearbeiter(in)?|mitarbeiter(in)?|praktikant(in)?|werkstudent(in)?|trainee|intern)\b",
    )
    .unwrap()
});

static ROLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(engineer|developer|entwickler(in)?|programmer|programmierer(in)?|manager(in)?|consultant|berater(in)?|architect|architekt(in)?|designer(in)?|analyst(in)?|administrator(in)?|specialist|spezialist(in)?|officer|director|direktor(in)?|assistant|assistent(in)?|kauffrau|kaufmann|ingenieur(in)?|informatiker(in)?|techniker(in)?|scientist|accountant|buchhalter(in)?|recruiter|coordinator|koordinator(in)?|projektleiter(in)?)\b",
    )
    .unwrap()
});

static LEGAL_ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(gmbh|ag|sàrl|sarl|inc|ltd|llc|corp|kg|ohg|plc|holding|group|gruppe)\b")
        .unwrap()
});

// ────────────────────────────────────────────────────────────────────────────
// Result types
// ────────────────────────────────────────────────────────────────────────────

/// What the rules need to know about the document being extracted.
#[derive(Clone, Copy)]
pub struct ValidationContext<'a> {
    pub phone: &'a PhoneNormalizer,
    /// Every line id of the corpus the model was shown.
    pub line_ids: &'a HashSet<&'a str>,
}

#[derive(Debug, Clone)]
pub struct ValidatedResponse {
    pub response: CognitiveResponse,
    pub corrections: Vec<AutoCorrection>,
    pub flagged_fields: Vec<FlaggedField>,
}

#[derive(Debug, Clone)]
pub enum ValidationOutcome {
    /// Structural failure. The model must be asked for a corrected object.
    Invalid(Vec<SchemaError>),
    Valid(ValidatedResponse),
}

// ────────────────────────────────────────────────────────────────────────────
// Entry points
// ────────────────────────────────────────────────────────────────────────────

/// Validates a raw model response in either dialect.
pub fn validate_response(raw: Value, ctx: &ValidationContext<'_>) -> ValidationOutcome {
    let dialect = detect_dialect(&raw);
    let canonical = to_canonical(raw, dialect);
    match parse_canonical(canonical) {
        Ok(response) => ValidationOutcome::Valid(apply_semantic_rules(response, ctx)),
        Err(errors) => {
            debug!("Response failed shape check with {} errors", errors.len());
            ValidationOutcome::Invalid(errors)
        }
    }
}

/// Applies rules 2–5 to a structurally valid response.
pub fn apply_semantic_rules(
    mut response: CognitiveResponse,
    ctx: &ValidationContext<'_>,
) -> ValidatedResponse {
    let mut corrections = Vec::new();
    let mut flagged = Vec::new();

    let cleared = clear_blank_values(&mut response);
    if cleared > 0 {
        debug!("Cleared {cleared} blank values");
    }
    drop_foreign_evidence(&mut response, ctx.line_ids, &mut corrections);
    demote_title_names(&mut response, &mut corrections, &mut flagged);
    enforce_scalar_evidence(&mut response, &mut corrections, &mut flagged);
    drop_unevidenced_list_entries(&mut response, &mut corrections);
    normalize_contact(&mut response, ctx.phone, &mut corrections, &mut flagged);

    if !corrections.is_empty() {
        warn!("Validator applied {} auto-corrections", corrections.len());
    }

    ValidatedResponse {
        response,
        corrections,
        flagged_fields: flagged,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule 2: blank values and foreign evidence
// ────────────────────────────────────────────────────────────────────────────

/// Nulls values that are empty after trimming. A person or contact block left
/// without any value releases its evidence. Returns the number of cleared values.
fn clear_blank_values(response: &mut CognitiveResponse) -> usize {
    let data = &mut response.extracted_data;
    let mut slots: Vec<&mut Option<String>> = vec![
        &mut data.person.first_name,
        &mut data.person.last_name,
        &mut data.person.date_of_birth,
        &mut data.person.nationality,
        &mut data.contact.email,
        &mut data.contact.phone,
        &mut data.contact.address,
        &mut data.contact.linkedin,
        &mut data.contact.website,
    ];
    for entry in data.languages.iter_mut() {
        slots.extend([&mut entry.name, &mut entry.level]);
    }
    for entry in data.skills.iter_mut() {
        slots.extend([&mut entry.name, &mut entry.category]);
    }
    for entry in data.experience.iter_mut() {
        slots.extend([
            &mut entry.company,
            &mut entry.title,
            &mut entry.location,
            &mut entry.start_date,
            &mut entry.end_date,
            &mut entry.description,
        ]);
    }
    for entry in data.education.iter_mut() {
        slots.extend([
            &mut entry.institution,
            &mut entry.degree,
            &mut entry.field_of_study,
            &mut entry.start_date,
            &mut entry.end_date,
        ]);
    }

    let mut cleared = 0;
    for slot in slots {
        if slot.as_deref().is_some_and(|v| v.trim().is_empty()) {
            *slot = None;
            cleared += 1;
        }
    }

    let person = &mut data.person;
    if [
        &person.first_name,
        &person.last_name,
        &person.date_of_birth,
        &person.nationality,
    ]
    .iter()
    .all(|v| v.is_none())
    {
        person.evidence.clear();
    }
    let contact = &mut data.contact;
    if [
        &contact.email,
        &contact.phone,
        &contact.address,
        &contact.linkedin,
        &contact.website,
    ]
    .iter()
    .all(|v| v.is_none())
    {
        contact.evidence.clear();
    }
    cleared
}

/// Removes evidence entries whose line id is not part of the corpus.
fn drop_foreign_evidence(
    response: &mut CognitiveResponse,
    line_ids: &HashSet<&str>,
    corrections: &mut Vec<AutoCorrection>,
) {
    let mut retain_known = |entity: String, evidence: &mut Vec<Evidence>| {
        evidence.retain(|e| {
            let known = line_ids.contains(e.line_id.as_str());
            if !known {
                corrections.push(AutoCorrection {
                    field: format!("{entity}.evidence"),
                    original_value: Some(e.line_id.clone()),
                    corrected_value: None,
                    reason: "Evidence cites a line that is not in the document".to_string(),
                });
            }
            known
        });
    };

    let data = &mut response.extracted_data;
    retain_known("person".to_string(), &mut data.person.evidence);
    retain_known("contact".to_string(), &mut data.contact.evidence);
    for (i, entry) in data.languages.iter_mut().enumerate() {
        retain_known(format!("languages[{i}]"), &mut entry.evidence);
    }
    for (i, entry) in data.skills.iter_mut().enumerate() {
        retain_known(format!("skills[{i}]"), &mut entry.evidence);
    }
    for (i, entry) in data.experience.iter_mut().enumerate() {
        retain_known(format!("experience[{i}]"), &mut entry.evidence);
    }
    for (i, entry) in data.education.iter_mut().enumerate() {
        retain_known(format!("education[{i}]"), &mut entry.evidence);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Rule 3: name sanity
// ────────────────────────────────────────────────────────────────────────────

/// Why a first/last name pair cannot be a person's name, if it cannot.
pub fn name_rejection_reason(first: Option<&str>, last: Option<&str>) -> Option<&'static str> {
    let parts: Vec<&str> = [first, last]
        .into_iter()
        .flatten()
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect();
    if parts.is_empty() {
        return None;
    }
    let full = parts.join(" ");

    if SENIORITY_RE.is_match(&full) || ROLE_RE.is_match(&full) {
        return Some("looks like a job title");
    }
    if LEGAL_ENTITY_RE.is_match(&full) {
        return Some("looks like a company name");
    }
    if full.chars().any(|c| c.is_ascii_digit()) {
        return Some("contains digits");
    }
    let out_of_range = parts.iter().any(|p| {
        p.chars().count() > MAX_NAME_PART_CHARS || p.split_whitespace().count() > MAX_NAME_PART_WORDS
    });
    if out_of_range {
        return Some("length out of range for a name");
    }
    None
}

fn demote_title_names(
    response: &mut CognitiveResponse,
    corrections: &mut Vec<AutoCorrection>,
    flagged: &mut Vec<FlaggedField>,
) {
    let person = &mut response.extracted_data.person;
    let Some(reason) = name_rejection_reason(person.first_name.as_deref(), person.last_name.as_deref())
    else {
        return;
    };

    let full = [person.first_name.as_deref(), person.last_name.as_deref()]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" ");
    warn!("Demoting person name '{full}': {reason}");

    for (field, value) in [
        ("firstName", person.first_name.take()),
        ("lastName", person.last_name.take()),
    ] {
        if value.is_some() {
            corrections.push(AutoCorrection {
                field: format!("person.{field}"),
                original_value: value,
                corrected_value: None,
                reason: format!("Name {reason}; moved to unmapped segments"),
            });
        }
    }
    flagged.push(FlaggedField {
        field: "person.name".to_string(),
        value: Some(full.clone()),
        reason: FlagReason::NameLooksLikeTitle,
    });

    let line_reference = best_matching_line(&person.evidence, &full).map(|e| e.line_id.clone());

    // Evidence only vouched for the demoted name; release it so the lines are
    // accounted for by the unmapped segment or found missing and re-extracted.
    if person.date_of_birth.is_none() && person.nationality.is_none() {
        person.evidence.clear();
    }

    response.unmapped_segments.push(UnmappedSegment {
        original_text: full,
        detected_category: SegmentCategory::Personal,
        reason: format!("Extracted as person name but {reason}"),
        confidence: DEMOTED_NAME_CONFIDENCE,
        suggested_field: Some(if reason.contains("company") {
            "experience.company".to_string()
        } else {
            "experience.title".to_string()
        }),
        line_reference,
    });
}

fn best_matching_line<'a>(evidence: &'a [Evidence], text: &str) -> Option<&'a Evidence> {
    let needle = text.to_lowercase();
    evidence
        .iter()
        .find(|e| {
            let hay = e.text.to_lowercase();
            hay.contains(&needle) || needle.split_whitespace().any(|w| hay.contains(w))
        })
        .or_else(|| evidence.first())
}

// ────────────────────────────────────────────────────────────────────────────
// Rule 4: evidence presence
// ────────────────────────────────────────────────────────────────────────────

fn null_fields(
    entity: &str,
    fields: Vec<(&str, &mut Option<String>)>,
    corrections: &mut Vec<AutoCorrection>,
    flagged: &mut Vec<FlaggedField>,
) {
    for (name, slot) in fields {
        if let Some(value) = slot.take() {
            corrections.push(AutoCorrection {
                field: format!("{entity}.{name}"),
                original_value: Some(value.clone()),
                corrected_value: None,
                reason: "Field has no evidence line".to_string(),
            });
            flagged.push(FlaggedField {
                field: format!("{entity}.{name}"),
                value: Some(value),
                reason: FlagReason::MissingEvidence,
            });
        }
    }
}

fn enforce_scalar_evidence(
    response: &mut CognitiveResponse,
    corrections: &mut Vec<AutoCorrection>,
    flagged: &mut Vec<FlaggedField>,
) {
    let person = &mut response.extracted_data.person;
    if person.evidence.is_empty() {
        null_fields(
            "person",
            vec![
                ("firstName", &mut person.first_name),
                ("lastName", &mut person.last_name),
                ("dateOfBirth", &mut person.date_of_birth),
                ("nationality", &mut person.nationality),
            ],
            corrections,
            flagged,
        );
    }

    let contact = &mut response.extracted_data.contact;
    if contact.evidence.is_empty() {
        null_fields(
            "contact",
            vec![
                ("email", &mut contact.email),
                ("phone", &mut contact.phone),
                ("address", &mut contact.address),
                ("linkedin", &mut contact.linkedin),
                ("website", &mut contact.website),
            ],
            corrections,
            flagged,
        );
    }
}

/// Keeps entries that carry evidence and at least one value; records the rest.
fn retain_entries<T>(
    list: &mut Vec<T>,
    label: &str,
    evidence: impl Fn(&T) -> &[Evidence],
    has_value: impl Fn(&T) -> bool,
    corrections: &mut Vec<AutoCorrection>,
) {
    let mut index = 0;
    list.retain(|entry| {
        let reason = if evidence(entry).is_empty() {
            Some("Entry has no evidence line")
        } else if !has_value(entry) {
            Some("Entry has no extracted value")
        } else {
            None
        };
        if let Some(reason) = reason {
            corrections.push(AutoCorrection {
                field: format!("{label}[{index}]"),
                original_value: None,
                corrected_value: None,
                reason: format!("{reason}; entry removed"),
            });
        }
        index += 1;
        reason.is_none()
    });
}

fn drop_unevidenced_list_entries(
    response: &mut CognitiveResponse,
    corrections: &mut Vec<AutoCorrection>,
) {
    let data = &mut response.extracted_data;
    retain_entries(
        &mut data.languages,
        "languages",
        |e| &e.evidence,
        |e| e.name.is_some(),
        corrections,
    );
    retain_entries(
        &mut data.skills,
        "skills",
        |e| &e.evidence,
        |e| e.name.is_some(),
        corrections,
    );
    retain_entries(
        &mut data.experience,
        "experience",
        |e| &e.evidence,
        |e| e.company.is_some() || e.title.is_some(),
        corrections,
    );
    retain_entries(
        &mut data.education,
        "education",
        |e| &e.evidence,
        |e| e.institution.is_some() || e.degree.is_some(),
        corrections,
    );
}

// ────────────────────────────────────────────────────────────────────────────
// Rule 5: field normalization
// ────────────────────────────────────────────────────────────────────────────

fn normalize_contact(
    response: &mut CognitiveResponse,
    phone: &PhoneNormalizer,
    corrections: &mut Vec<AutoCorrection>,
    flagged: &mut Vec<FlaggedField>,
) {
    let contact = &mut response.extracted_data.contact;

    if let Some(raw) = contact.email.take() {
        match normalize_email(&raw) {
            Some(email) => {
                if email != raw {
                    corrections.push(AutoCorrection {
                        field: "contact.email".to_string(),
                        original_value: Some(raw),
                        corrected_value: Some(email.clone()),
                        reason: "Email trimmed".to_string(),
                    });
                }
                contact.email = Some(email);
            }
            None => {
                corrections.push(AutoCorrection {
                    field: "contact.email".to_string(),
                    original_value: Some(raw.clone()),
                    corrected_value: None,
                    reason: "Invalid email format".to_string(),
                });
                flagged.push(FlaggedField {
                    field: "contact.email".to_string(),
                    value: Some(raw),
                    reason: FlagReason::InvalidEmail,
                });
            }
        }
    }

    if let Some(raw) = contact.phone.as_deref() {
        match phone.normalize(raw) {
            Some(normalized) if normalized != raw => {
                corrections.push(AutoCorrection {
                    field: "contact.phone".to_string(),
                    original_value: Some(raw.to_string()),
                    corrected_value: Some(normalized.clone()),
                    reason: "Phone normalized to international format".to_string(),
                });
                contact.phone = Some(normalized);
            }
            Some(_) => {}
            None => flagged.push(FlaggedField {
                field: "contact.phone".to_string(),
                value: Some(raw.to_string()),
                reason: FlagReason::UnparseablePhone,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const REASONING: &str =
        "Line p1_l0 holds a job title, p1_l1 the candidate's name; contact data is in the header.";

    const CORPUS_LINES: &[&str] = &[
        "p1_l0", "p1_l1", "p1_l2", "p1_l3", "p1_l7", "p1_l10", "p1_l20",
    ];

    fn ev(id: &str, text: &str) -> Value {
        json!({"lineId": id, "page": 1, "text": text})
    }

    fn with_context<R>(f: impl FnOnce(&ValidationContext<'_>) -> R) -> R {
        let phone = PhoneNormalizer::new("CH");
        let line_ids: HashSet<&str> = CORPUS_LINES.iter().copied().collect();
        f(&ValidationContext {
            phone: &phone,
            line_ids: &line_ids,
        })
    }

    fn validate(raw: Value) -> ValidatedResponse {
        match with_context(|ctx| validate_response(raw, ctx)) {
            ValidationOutcome::Valid(v) => v,
            ValidationOutcome::Invalid(errors) => panic!("unexpected shape errors: {errors:?}"),
        }
    }

    #[test]
    fn test_structural_failure_is_invalid() {
        let outcome = with_context(|ctx| validate_response(json!({"thoughtProcess": "short"}), ctx));
        match outcome {
            ValidationOutcome::Invalid(errors) => assert!(errors.len() >= 3),
            ValidationOutcome::Valid(_) => panic!("expected invalid"),
        }
    }

    #[test]
    fn test_job_title_name_demoted_to_unmapped() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "person": {
                    "firstName": "Senior Software",
                    "lastName": "Engineer",
                    "evidence": [ev("p1_l0", "Senior Software Engineer")]
                }
            },
            "unmappedSegments": []
        }));
        let person = &v.response.extracted_data.person;
        assert!(person.first_name.is_none());
        assert!(person.last_name.is_none());
        assert!(person.evidence.is_empty());

        let segment = &v.response.unmapped_segments[0];
        assert_eq!(segment.original_text, "Senior Software Engineer");
        assert_eq!(segment.line_reference.as_deref(), Some("p1_l0"));
        assert!(segment.confidence < 0.5);
        assert_eq!(segment.detected_category, SegmentCategory::Personal);
        assert_eq!(v.corrections.len(), 2);
        assert_eq!(v.flagged_fields[0].reason, FlagReason::NameLooksLikeTitle);
    }

    #[test]
    fn test_real_name_kept() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "person": {
                    "firstName": "Max",
                    "lastName": "Müller",
                    "evidence": [ev("p1_l1", "Max Müller")]
                }
            },
            "unmappedSegments": []
        }));
        let person = &v.response.extracted_data.person;
        assert_eq!(person.first_name.as_deref(), Some("Max"));
        assert_eq!(person.last_name.as_deref(), Some("Müller"));
        assert!(v.response.unmapped_segments.is_empty());
        assert!(v.corrections.is_empty());
    }

    #[test]
    fn test_name_rejection_reasons() {
        assert_eq!(
            name_rejection_reason(Some("ACME"), Some("Holding AG")),
            Some("looks like a company name")
        );
        assert_eq!(
            name_rejection_reason(Some("Max"), Some("Müller 2")),
            Some("contains digits")
        );
        assert_eq!(
            name_rejection_reason(Some("Projektleiterin"), None),
            Some("looks like a job title")
        );
        assert_eq!(name_rejection_reason(Some("Anna-Lena"), Some("von Arx")), None);
        assert_eq!(name_rejection_reason(None, None), None);
    }

    #[test]
    fn test_invalid_email_nulled_and_flagged() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "contact": {"email": "not-an-email", "evidence": [ev("p1_l2", "not-an-email")]}
            },
            "unmappedSegments": []
        }));
        assert!(v.response.extracted_data.contact.email.is_none());
        assert!(v
            .flagged_fields
            .iter()
            .any(|f| f.field == "contact.email" && f.reason == FlagReason::InvalidEmail));
    }

    #[test]
    fn test_swiss_phone_normalized() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "contact": {"phone": "079 123 45 67", "evidence": [ev("p1_l3", "Tel. 079 123 45 67")]}
            },
            "unmappedSegments": []
        }));
        assert_eq!(
            v.response.extracted_data.contact.phone.as_deref(),
            Some("+41791234567")
        );
        assert_eq!(v.corrections[0].field, "contact.phone");
    }

    #[test]
    fn test_unparseable_phone_flagged_not_discarded() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "contact": {"phone": "ask HR", "evidence": [ev("p1_l3", "Tel. ask HR")]}
            },
            "unmappedSegments": []
        }));
        assert_eq!(v.response.extracted_data.contact.phone.as_deref(), Some("ask HR"));
        assert_eq!(v.flagged_fields[0].reason, FlagReason::UnparseablePhone);
    }

    #[test]
    fn test_contact_without_evidence_nulled() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "contact": {"email": "max@example.ch", "evidence": []}
            },
            "unmappedSegments": []
        }));
        assert!(v.response.extracted_data.contact.email.is_none());
        assert_eq!(v.flagged_fields[0].reason, FlagReason::MissingEvidence);
    }

    #[test]
    fn test_unevidenced_entries_removed_from_arrays() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "skills": [
                    {"name": "Rust", "evidence": [ev("p1_l10", "Rust, Go")]},
                    {"name": "Go", "evidence": []}
                ],
                "languages": [{"name": "Deutsch", "evidence": []}],
                "experience": [
                    {"company": "ACME AG", "title": "Engineer", "evidence": []},
                    {"company": "Initech", "evidence": [ev("p1_l20", "Initech 2015-2019")]}
                ],
                "education": [{"institution": "ETH", "evidence": []}]
            },
            "unmappedSegments": []
        }));
        let data = &v.response.extracted_data;
        assert_eq!(data.skills.len(), 1);
        assert_eq!(data.skills[0].name.as_deref(), Some("Rust"));
        assert!(data.languages.is_empty());
        assert_eq!(data.experience.len(), 1);
        assert_eq!(data.experience[0].company.as_deref(), Some("Initech"));
        assert!(data.education.is_empty());
        assert_eq!(v.corrections.len(), 4);
    }

    #[test]
    fn test_snake_case_dialect_accepted() {
        let v = validate(json!({
            "thought_process": REASONING,
            "extracted_data": {
                "person": {
                    "first_name": "Max",
                    "last_name": "Müller",
                    "evidence": [{"line_id": "p1_l1", "page": 1, "text": "Max Müller"}]
                }
            },
            "unmapped_segments": []
        }));
        assert_eq!(v.response.extracted_data.person.first_name.as_deref(), Some("Max"));
    }

    #[test]
    fn test_every_populated_entity_has_evidence_after_validation() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "person": {"firstName": "Max", "lastName": "Müller", "evidence": []},
                "contact": {"email": "max@example.ch", "evidence": [ev("p1_l2", "max@example.ch")]},
                "skills": [{"name": "SQL"}],
                "experience": [{"title": "Developer", "evidence": [ev("p1_l7", "Developer")]}]
            },
            "unmappedSegments": []
        }));
        let data = &v.response.extracted_data;
        let person_populated = data.person.first_name.is_some() || data.person.last_name.is_some();
        assert!(!person_populated || !data.person.evidence.is_empty());
        assert!(data.contact.email.is_none() || !data.contact.evidence.is_empty());
        assert!(data.skills.iter().all(|s| !s.evidence.is_empty()));
        assert!(data.experience.iter().all(|e| !e.evidence.is_empty()));
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let first = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "person": {
                    "firstName": "Leiter",
                    "lastName": "Einkauf",
                    "evidence": [ev("p1_l0", "Leiter Einkauf")]
                },
                "contact": {
                    "email": " max@example.ch ",
                    "phone": "079 123 45 67",
                    "evidence": [ev("p1_l2", "max@example.ch"), ev("p1_l3", "079 123 45 67")]
                },
                "skills": [{"name": "SQL"}]
            },
            "unmappedSegments": []
        }));
        assert!(!first.corrections.is_empty());

        let second = with_context(|ctx| apply_semantic_rules(first.response.clone(), ctx));
        assert!(second.corrections.is_empty());
        assert_eq!(second.response, first.response);
    }

    #[test]
    fn test_blank_values_become_null() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "person": {
                    "firstName": "",
                    "lastName": "  ",
                    "evidence": [ev("p1_l0", "Max Müller")]
                },
                "contact": {
                    "email": "max@example.ch",
                    "website": " ",
                    "evidence": [ev("p1_l2", "max@example.ch")]
                },
                "skills": [{"name": "Rust", "category": "", "evidence": [ev("p1_l10", "Rust")]}]
            },
            "unmappedSegments": []
        }));
        let data = &v.response.extracted_data;
        assert!(data.person.first_name.is_none());
        assert!(data.person.last_name.is_none());
        // Nothing left to vouch for, so the line is free for re-extraction.
        assert!(data.person.evidence.is_empty());
        assert!(data.contact.website.is_none());
        assert_eq!(data.contact.email.as_deref(), Some("max@example.ch"));
        assert_eq!(data.contact.evidence.len(), 1);
        assert!(data.skills[0].category.is_none());
        assert!(v.flagged_fields.is_empty());
    }

    #[test]
    fn test_evidence_outside_corpus_is_dropped() {
        let v = validate(json!({
            "thoughtProcess": REASONING,
            "extractedData": {
                "person": {
                    "firstName": "Max",
                    "lastName": "Müller",
                    "evidence": [ev("p1_l1", "Max Müller"), ev("p4_l9", "Max Müller")]
                },
                "contact": {
                    "email": "ghost@example.ch",
                    "evidence": [ev("p9_l42", "ghost@example.ch")]
                },
                "skills": [{"name": "Cobol", "evidence": [ev("p9_l43", "Cobol")]}]
            },
            "unmappedSegments": []
        }));
        let data = &v.response.extracted_data;
        assert_eq!(data.person.first_name.as_deref(), Some("Max"));
        let person_lines: Vec<_> = data.person.evidence.iter().map(|e| e.line_id.as_str()).collect();
        assert_eq!(person_lines, vec!["p1_l1"]);

        assert!(data.contact.email.is_none());
        assert!(data.contact.evidence.is_empty());
        assert!(v
            .flagged_fields
            .iter()
            .any(|f| f.field == "contact.email" && f.reason == FlagReason::MissingEvidence));
        assert!(data.skills.is_empty());
        assert!(v
            .corrections
            .iter()
            .any(|c| c.field == "contact.evidence" && c.original_value.as_deref() == Some("p9_l42")));
    }
}
