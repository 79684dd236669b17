use serde::{Deserialize, Serialize};

// ────────────────────────────────────────────────────────────────────────────
// Evidence & entities
// ────────────────────────────────────────────────────────────────────────────

/// Pointer from an extracted value back to exactly one source line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Evidence {
    pub line_id: String,
    pub page: u32,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonInfo {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub date_of_birth: Option<String>,
    #[serde(default)]
    pub nationality: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactInfo {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub linkedin: Option<String>,
    #[serde(default)]
    pub website: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LanguageEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub level: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillEntry {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperienceEntry {
    #[serde(default)]
    pub company: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EducationEntry {
    #[serde(default)]
    pub institution: Option<String>,
    #[serde(default)]
    pub degree: Option<String>,
    #[serde(default)]
    pub field_of_study: Option<String>,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
    #[serde(default)]
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedData {
    #[serde(default)]
    pub person: PersonInfo,
    #[serde(default)]
    pub contact: ContactInfo,
    #[serde(default)]
    pub languages: Vec<LanguageEntry>,
    #[serde(default)]
    pub skills: Vec<SkillEntry>,
    #[serde(default)]
    pub experience: Vec<ExperienceEntry>,
    #[serde(default)]
    pub education: Vec<EducationEntry>,
}

impl ExtractedData {
    /// Every evidence entry in the extracted data, entity by entity.
    pub fn all_evidence(&self) -> impl Iterator<Item = &Evidence> {
        self.person
            .evidence
            .iter()
            .chain(self.contact.evidence.iter())
            .chain(self.languages.iter().flat_map(|e| e.evidence.iter()))
            .chain(self.skills.iter().flat_map(|e| e.evidence.iter()))
            .chain(self.experience.iter().flat_map(|e| e.evidence.iter()))
            .chain(self.education.iter().flat_map(|e| e.evidence.iter()))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Residue bucket
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentCategory {
    Personal,
    Contact,
    Experience,
    Education,
    Skill,
    Language,
    Certificate,
    Hobby,
    Reference,
    #[serde(other)]
    Other,
}

/// Text the model saw but could not confidently place into a schema field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnmappedSegment {
    pub original_text: String,
    pub detected_category: SegmentCategory,
    pub reason: String,
    pub confidence: f64,
    #[serde(default)]
    pub suggested_field: Option<String>,
    #[serde(default)]
    pub line_reference: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    #[serde(default)]
    pub document_language: Option<String>,
    #[serde(default)]
    pub total_lines_processed: Option<u32>,
    #[serde(default)]
    pub extraction_notes: Option<String>,
}

/// The model's answer: reasoning first, then structured data and the residue bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CognitiveResponse {
    pub thought_process: String,
    pub extracted_data: ExtractedData,
    pub unmapped_segments: Vec<UnmappedSegment>,
    #[serde(default)]
    pub metadata: ResponseMetadata,
}

// ────────────────────────────────────────────────────────────────────────────
// Validation side-channel
// ────────────────────────────────────────────────────────────────────────────

/// A local fix the validator applied instead of failing the response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoCorrection {
    pub field: String,
    pub original_value: Option<String>,
    pub corrected_value: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagReason {
    InvalidEmail,
    UnparseablePhone,
    NameLooksLikeTitle,
    MissingEvidence,
}

/// A field that needs human review after validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlaggedField {
    pub field: String,
    pub value: Option<String>,
    pub reason: FlagReason,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cognitive_response_deserializes_camel_case() {
        let json = r#"{
            "thoughtProcess": "The header names the candidate.",
            "extractedData": {
                "person": {
                    "firstName": "Max",
                    "lastName": "Müller",
                    "evidence": [{"lineId": "p1_l0", "page": 1, "text": "Max Müller"}]
                },
                "skills": [{"name": "Rust", "evidence": []}]
            },
            "unmappedSegments": [{
                "originalText": "Hobbies: Klettern",
                "detectedCategory": "hobby",
                "reason": "no hobby field",
                "confidence": 0.8,
                "lineReference": "p2_l3"
            }]
        }"#;
        let response: CognitiveResponse = serde_json::from_str(json).unwrap();
        assert_eq!(response.extracted_data.person.first_name.as_deref(), Some("Max"));
        assert_eq!(response.extracted_data.skills.len(), 1);
        assert!(response.extracted_data.contact.email.is_none());
        assert_eq!(
            response.unmapped_segments[0].detected_category,
            SegmentCategory::Hobby
        );
    }

    #[test]
    fn test_unknown_segment_category_maps_to_other() {
        let category: SegmentCategory = serde_json::from_str(r#""volunteering""#).unwrap();
        assert_eq!(category, SegmentCategory::Other);
    }

    #[test]
    fn test_all_evidence_walks_every_entity() {
        let ev = |id: &str| Evidence {
            line_id: id.to_string(),
            page: 1,
            text: String::new(),
        };
        let data = ExtractedData {
            person: PersonInfo {
                evidence: vec![ev("p1_l0")],
                ..Default::default()
            },
            experience: vec![ExperienceEntry {
                evidence: vec![ev("p1_l5"), ev("p1_l6")],
                ..Default::default()
            }],
            education: vec![EducationEntry {
                evidence: vec![ev("p1_l9")],
                ..Default::default()
            }],
            ..Default::default()
        };
        let ids: Vec<_> = data.all_evidence().map(|e| e.line_id.as_str()).collect();
        assert_eq!(ids, vec!["p1_l0", "p1_l5", "p1_l6", "p1_l9"]);
    }
}
