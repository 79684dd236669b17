use serde::{Deserialize, Serialize};

use crate::document::packer::{email_matches, phone_matches, CorpusBucket, Line, PackedCorpus};
use crate::extraction::models::{CognitiveResponse, Evidence, FlaggedField};

/// Source confidence assumed when the layout service reported none.
const UNKNOWN_SOURCE_CONFIDENCE: f64 = 0.85;
const PRECEDING_LABEL_PROXIMITY: f64 = 0.7;
const FAILED_VALIDATION_FACTOR: f64 = 0.3;
const SECTION_MISMATCH_FACTOR: f64 = 0.5;
const REPETITION_SATURATION: u32 = 2;

pub const AUTOFILL_THRESHOLD: f64 = 0.90;
pub const REVIEW_THRESHOLD: f64 = 0.70;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfidenceWeights {
    pub source: f64,
    pub validation: f64,
    pub label_proximity: f64,
    pub uniqueness: f64,
    pub repetition: f64,
    pub section_match: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self {
            source: 0.25,
            validation: 0.25,
            label_proximity: 0.15,
            uniqueness: 0.15,
            repetition: 0.10,
            section_match: 0.10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceFactors {
    /// OCR confidence of the evidence line(s), 0..=1.
    pub source_confidence: f64,
    pub validation_passed: bool,
    /// 1.0 when a label sits on the evidence line, less when on the line above.
    pub label_proximity: f64,
    /// 1 / number of competing candidates of the same kind.
    pub uniqueness: f64,
    pub repetition_count: u32,
    pub section_match: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceStatus {
    Autofill,
    NeedsReview,
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceScore {
    pub score: f64,
    pub status: ConfidenceStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldConfidence {
    pub field: String,
    pub value: String,
    pub score: f64,
    pub status: ConfidenceStatus,
}

pub fn status_for(score: f64) -> ConfidenceStatus {
    if score >= AUTOFILL_THRESHOLD {
        ConfidenceStatus::Autofill
    } else if score >= REVIEW_THRESHOLD {
        ConfidenceStatus::NeedsReview
    } else {
        ConfidenceStatus::Skip
    }
}

/// Weighted confidence for one extracted field. Advisory only.
pub fn score(factors: &ConfidenceFactors, weights: &ConfidenceWeights) -> ConfidenceScore {
    let validation = if factors.validation_passed {
        1.0
    } else {
        FAILED_VALIDATION_FACTOR
    };
    let repetition = factors.repetition_count.min(REPETITION_SATURATION) as f64
        / REPETITION_SATURATION as f64;
    let section = if factors.section_match {
        1.0
    } else {
        SECTION_MISMATCH_FACTOR
    };

    let score = (weights.source * factors.source_confidence.clamp(0.0, 1.0)
        + weights.validation * validation
        + weights.label_proximity * factors.label_proximity.clamp(0.0, 1.0)
        + weights.uniqueness * factors.uniqueness.clamp(0.0, 1.0)
        + weights.repetition * repetition
        + weights.section_match * section)
        .clamp(0.0, 1.0);

    ConfidenceScore {
        score,
        status: status_for(score),
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Factor derivation
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FieldKind {
    Email,
    Phone,
    Other,
}

struct FieldSpec<'a> {
    path: &'static str,
    value: Option<&'a str>,
    labels: &'static [&'static str],
    kind: FieldKind,
    evidence: &'a [Evidence],
    buckets: &'static [CorpusBucket],
}

const PERSON_BUCKETS: &[CorpusBucket] = &[CorpusBucket::Header, CorpusBucket::KeyValue];
const CONTACT_BUCKETS: &[CorpusBucket] = &[
    CorpusBucket::Contact,
    CorpusBucket::Header,
    CorpusBucket::KeyValue,
];

const NAME_LABELS: &[&str] = &["name", "vorname", "nachname", "prénom", "nom"];
const BIRTH_LABELS: &[&str] = &["geburtsdatum", "geboren", "jahrgang", "date of birth", "birth"];
const NATIONALITY_LABELS: &[&str] = &["nationalität", "staatsangehörigkeit", "nationality", "nationalité"];
const EMAIL_LABELS: &[&str] = &["e-mail", "email", "mail"];
const PHONE_LABELS: &[&str] = &["tel", "telefon", "phone", "mobile", "natel", "handy"];
const ADDRESS_LABELS: &[&str] = &["adresse", "address", "wohnort", "strasse"];
const LINKEDIN_LABELS: &[&str] = &["linkedin"];
const WEBSITE_LABELS: &[&str] = &["website", "homepage", "web", "www"];

/// Scores every populated person and contact scalar against the corpus.
pub fn score_fields(
    corpus: &PackedCorpus,
    response: &CognitiveResponse,
    flagged: &[FlaggedField],
    weights: &ConfidenceWeights,
) -> Vec<FieldConfidence> {
    let person = &response.extracted_data.person;
    let contact = &response.extracted_data.contact;
    let lines = corpus.all_lines();

    let specs = [
        FieldSpec {
            path: "person.firstName",
            value: person.first_name.as_deref(),
            labels: NAME_LABELS,
            kind: FieldKind::Other,
            evidence: &person.evidence,
            buckets: PERSON_BUCKETS,
        },
        FieldSpec {
            path: "person.lastName",
            value: person.last_name.as_deref(),
            labels: NAME_LABELS,
            kind: FieldKind::Other,
            evidence: &person.evidence,
            buckets: PERSON_BUCKETS,
        },
        FieldSpec {
            path: "person.dateOfBirth",
            value: person.date_of_birth.as_deref(),
            labels: BIRTH_LABELS,
            kind: FieldKind::Other,
            evidence: &person.evidence,
            buckets: PERSON_BUCKETS,
        },
        FieldSpec {
            path: "person.nationality",
            value: person.nationality.as_deref(),
            labels: NATIONALITY_LABELS,
            kind: FieldKind::Other,
            evidence: &person.evidence,
            buckets: PERSON_BUCKETS,
        },
        FieldSpec {
            path: "contact.email",
            value: contact.email.as_deref(),
            labels: EMAIL_LABELS,
            kind: FieldKind::Email,
            evidence: &contact.evidence,
            buckets: CONTACT_BUCKETS,
        },
        FieldSpec {
            path: "contact.phone",
            value: contact.phone.as_deref(),
            labels: PHONE_LABELS,
            kind: FieldKind::Phone,
            evidence: &contact.evidence,
            buckets: CONTACT_BUCKETS,
        },
        FieldSpec {
            path: "contact.address",
            value: contact.address.as_deref(),
            labels: ADDRESS_LABELS,
            kind: FieldKind::Other,
            evidence: &contact.evidence,
            buckets: CONTACT_BUCKETS,
        },
        FieldSpec {
            path: "contact.linkedin",
            value: contact.linkedin.as_deref(),
            labels: LINKEDIN_LABELS,
            kind: FieldKind::Other,
            evidence: &contact.evidence,
            buckets: CONTACT_BUCKETS,
        },
        FieldSpec {
            path: "contact.website",
            value: contact.website.as_deref(),
            labels: WEBSITE_LABELS,
            kind: FieldKind::Other,
            evidence: &contact.evidence,
            buckets: CONTACT_BUCKETS,
        },
    ];

    specs
        .iter()
        .filter_map(|spec| {
            let value = spec.value?;
            let factors = derive_factors(corpus, &lines, spec, value, flagged);
            let scored = score(&factors, weights);
            Some(FieldConfidence {
                field: spec.path.to_string(),
                value: value.to_string(),
                score: scored.score,
                status: scored.status,
            })
        })
        .collect()
}

fn derive_factors(
    corpus: &PackedCorpus,
    lines: &[&Line],
    spec: &FieldSpec<'_>,
    value: &str,
    flagged: &[FlaggedField],
) -> ConfidenceFactors {
    let known: Vec<f64> = spec
        .evidence
        .iter()
        .filter_map(|e| corpus.line(&e.line_id)?.confidence)
        .map(f64::from)
        .collect();
    let source_confidence = if known.is_empty() {
        UNKNOWN_SOURCE_CONFIDENCE
    } else {
        known.iter().sum::<f64>() / known.len() as f64
    };

    let validation_passed = !flagged.iter().any(|f| f.field == spec.path);

    let label_proximity = spec
        .evidence
        .iter()
        .map(|e| label_proximity(lines, &e.line_id, spec.labels))
        .fold(0.0, f64::max);

    let candidates = match spec.kind {
        FieldKind::Email => distinct_candidates(lines, |t| {
            email_matches(t).map(str::to_lowercase).collect()
        }),
        FieldKind::Phone => distinct_candidates(lines, |t| {
            phone_matches(t).map(phone_key).collect()
        }),
        FieldKind::Other => 1,
    };
    let uniqueness = 1.0 / candidates.max(1) as f64;

    let repetition_count = lines
        .iter()
        .filter(|l| mentions(&l.text, value, spec.kind))
        .count() as u32;

    let section_match = spec.evidence.iter().any(|e| {
        corpus
            .bucket_of(&e.line_id)
            .is_some_and(|b| spec.buckets.contains(&b))
    });

    ConfidenceFactors {
        source_confidence,
        validation_passed,
        label_proximity,
        uniqueness,
        repetition_count,
        section_match,
    }
}

fn has_label(text: &str, labels: &[&str]) -> bool {
    let lower = text.to_lowercase();
    labels.iter().any(|l| lower.contains(l))
}

fn label_proximity(lines: &[&Line], line_id: &str, labels: &[&str]) -> f64 {
    if line_id.contains("_kv") {
        return 1.0;
    }
    let Some(pos) = lines.iter().position(|l| l.line_id == line_id) else {
        return 0.0;
    };
    if has_label(&lines[pos].text, labels) {
        1.0
    } else if pos > 0 && has_label(&lines[pos - 1].text, labels) {
        PRECEDING_LABEL_PROXIMITY
    } else {
        0.0
    }
}

fn distinct_candidates(lines: &[&Line], extract: impl Fn(&str) -> Vec<String>) -> usize {
    let mut seen: Vec<String> = lines.iter().flat_map(|l| extract(&l.text)).collect();
    seen.sort();
    seen.dedup();
    seen.len()
}

/// Last nine digits; enough to match national and international spellings.
fn phone_key(raw: &str) -> String {
    let digits: Vec<char> = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    let start = digits.len().saturating_sub(9);
    digits[start..].iter().collect()
}

fn mentions(text: &str, value: &str, kind: FieldKind) -> bool {
    match kind {
        FieldKind::Phone => {
            let key = phone_key(value);
            !key.is_empty() && phone_matches(text).any(|m| phone_key(m) == key)
        }
        _ => text.to_lowercase().contains(&value.trim().to_lowercase()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::models::{DocumentLayout, LayoutLine, LayoutPage};
    use crate::document::packer::{pack_document, PackerLimits};
    use crate::extraction::models::{ContactInfo, ExtractedData, FlagReason, PersonInfo};
    use proptest::prelude::*;

    fn factors() -> ConfidenceFactors {
        ConfidenceFactors {
            source_confidence: 1.0,
            validation_passed: true,
            label_proximity: 1.0,
            uniqueness: 1.0,
            repetition_count: 2,
            section_match: true,
        }
    }

    #[test]
    fn test_perfect_factors_autofill() {
        let s = score(&factors(), &ConfidenceWeights::default());
        assert!((s.score - 1.0).abs() < 1e-9);
        assert_eq!(s.status, ConfidenceStatus::Autofill);
    }

    #[test]
    fn test_failed_validation_drops_below_autofill() {
        let f = ConfidenceFactors {
            validation_passed: false,
            ..factors()
        };
        // 0.25 + 0.25*0.3 + 0.15 + 0.15 + 0.10 + 0.10 = 0.825
        let s = score(&f, &ConfidenceWeights::default());
        assert!((s.score - 0.825).abs() < 1e-9, "Score was {}", s.score);
        assert_eq!(s.status, ConfidenceStatus::NeedsReview);
    }

    #[test]
    fn test_weak_factors_skip() {
        let f = ConfidenceFactors {
            source_confidence: 0.4,
            validation_passed: false,
            label_proximity: 0.0,
            uniqueness: 0.25,
            repetition_count: 0,
            section_match: false,
        };
        // 0.1 + 0.075 + 0 + 0.0375 + 0 + 0.05 = 0.2625
        let s = score(&f, &ConfidenceWeights::default());
        assert!((s.score - 0.2625).abs() < 1e-9, "Score was {}", s.score);
        assert_eq!(s.status, ConfidenceStatus::Skip);
    }

    #[test]
    fn test_repetition_saturates_at_two() {
        let w = ConfidenceWeights::default();
        let twice = score(&factors(), &w).score;
        let many = score(
            &ConfidenceFactors {
                repetition_count: 7,
                ..factors()
            },
            &w,
        )
        .score;
        assert_eq!(twice, many);
    }

    #[test]
    fn test_thresholds() {
        assert_eq!(status_for(0.90), ConfidenceStatus::Autofill);
        assert_eq!(status_for(0.8999), ConfidenceStatus::NeedsReview);
        assert_eq!(status_for(0.70), ConfidenceStatus::NeedsReview);
        assert_eq!(status_for(0.6999), ConfidenceStatus::Skip);
    }

    fn layout(texts: &[&str]) -> DocumentLayout {
        DocumentLayout {
            pages: vec![LayoutPage {
                page_number: 1,
                lines: texts
                    .iter()
                    .map(|t| LayoutLine {
                        content: t.to_string(),
                        polygon: vec![],
                        confidence: Some(0.98),
                    })
                    .collect(),
            }],
            key_value_pairs: vec![],
            languages: vec![],
        }
    }

    fn evidence(corpus: &PackedCorpus, id: &str) -> Evidence {
        let line = corpus.line(id).unwrap();
        Evidence {
            line_id: id.to_string(),
            page: line.page,
            text: line.text.clone(),
        }
    }

    fn response(data: ExtractedData) -> CognitiveResponse {
        CognitiveResponse {
            thought_process: String::new(),
            extracted_data: data,
            unmapped_segments: vec![],
            metadata: Default::default(),
        }
    }

    #[test]
    fn test_labelled_unique_email_is_autofill() {
        let corpus = pack_document(
            &layout(&["Max Müller", "E-Mail: max@example.ch", "Zürich"]),
            &PackerLimits::default(),
        );
        let data = ExtractedData {
            contact: ContactInfo {
                email: Some("max@example.ch".into()),
                evidence: vec![evidence(&corpus, "p1_l1")],
                ..Default::default()
            },
            ..Default::default()
        };
        let scored = score_fields(&corpus, &response(data), &[], &ConfidenceWeights::default());
        assert_eq!(scored.len(), 1);
        // 0.245 + 0.25 + 0.15 + 0.15 + 0.05 + 0.10 = 0.945
        assert_eq!(scored[0].field, "contact.email");
        assert_eq!(scored[0].status, ConfidenceStatus::Autofill);
    }

    #[test]
    fn test_competing_phones_lower_confidence() {
        let corpus = pack_document(
            &layout(&["Max Müller", "079 123 45 67", "044 987 65 43"]),
            &PackerLimits::default(),
        );
        let data = ExtractedData {
            contact: ContactInfo {
                phone: Some("+41791234567".into()),
                evidence: vec![evidence(&corpus, "p1_l1")],
                ..Default::default()
            },
            ..Default::default()
        };
        let flagged = vec![FlaggedField {
            field: "contact.phone".into(),
            value: None,
            reason: FlagReason::UnparseablePhone,
        }];
        let scored = score_fields(&corpus, &response(data), &flagged, &ConfidenceWeights::default());
        // 0.245 + 0.075 + 0 + 0.075 + 0.05 + 0.10 = 0.545
        assert_eq!(scored[0].status, ConfidenceStatus::Skip);
    }

    #[test]
    fn test_only_populated_fields_scored() {
        let corpus = pack_document(&layout(&["Max Müller"]), &PackerLimits::default());
        let data = ExtractedData {
            person: PersonInfo {
                first_name: Some("Max".into()),
                last_name: Some("Müller".into()),
                evidence: vec![evidence(&corpus, "p1_l0")],
                ..Default::default()
            },
            ..Default::default()
        };
        let scored = score_fields(&corpus, &response(data), &[], &ConfidenceWeights::default());
        let fields: Vec<_> = scored.iter().map(|f| f.field.as_str()).collect();
        assert_eq!(fields, vec!["person.firstName", "person.lastName"]);
    }

    #[test]
    fn test_phone_key_matches_national_and_international() {
        assert_eq!(phone_key("+41 79 123 45 67"), phone_key("079 123 45 67"));
    }

    proptest! {
        #[test]
        fn prop_score_is_deterministic_and_bounded(
            source in 0.0f64..=1.0,
            passed in any::<bool>(),
            label in 0.0f64..=1.0,
            uniq in 0.0f64..=1.0,
            rep in 0u32..10,
            section in any::<bool>(),
        ) {
            let f = ConfidenceFactors {
                source_confidence: source,
                validation_passed: passed,
                label_proximity: label,
                uniqueness: uniq,
                repetition_count: rep,
                section_match: section,
            };
            let w = ConfidenceWeights::default();
            let a = score(&f, &w);
            let b = score(&f, &w);
            prop_assert_eq!(a, b);
            prop_assert!((0.0..=1.0).contains(&a.score));
            prop_assert_eq!(a.status, status_for(a.score));
        }
    }
}
