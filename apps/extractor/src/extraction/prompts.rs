// All LLM prompt constants for the Extraction module.
// Reuses cross-cutting fragments from llm_client::prompts.

use crate::document::packer::PackedCorpus;
use crate::extraction::completeness::MissingLine;
use crate::extraction::schema::SchemaError;
use crate::feedback::models::{FewShotExample, FieldAccuracy};
use crate::llm_client::prompts::{EVIDENCE_INSTRUCTION, JSON_ONLY_SYSTEM, RESIDUE_INSTRUCTION};

/// System prompt for CV extraction. `{json_only}` is replaced at build time.
pub const EXTRACTION_SYSTEM_TEMPLATE: &str = r#"You are an expert CV analyst. You read a CV that has been split into identified lines and transfer every fact into a fixed JSON schema.

{json_only}

Return a JSON object with this EXACT schema (camelCase keys, no extra fields):
{
  "thoughtProcess": "Your reasoning FIRST: which lines hold the name, contact data, each job, each education step, and what you could not place. At least 50 characters.",
  "extractedData": {
    "person": {"firstName": null, "lastName": null, "dateOfBirth": null, "nationality": null, "evidence": []},
    "contact": {"email": null, "phone": null, "address": null, "linkedin": null, "website": null, "evidence": []},
    "languages": [{"name": "Deutsch", "level": "Muttersprache", "evidence": [{"lineId": "p2_l14", "page": 2, "text": "Deutsch – Muttersprache"}]}],
    "skills": [{"name": "Rust", "category": "Programming", "evidence": []}],
    "experience": [{"company": null, "title": null, "location": null, "startDate": null, "endDate": null, "description": null, "evidence": []}],
    "education": [{"institution": null, "degree": null, "fieldOfStudy": null, "startDate": null, "endDate": null, "evidence": []}]
  },
  "unmappedSegments": [
    {"originalText": "Klettern, Skitouren", "detectedCategory": "hobby", "reason": "No hobby field in the schema", "confidence": 0.9, "suggestedField": null, "lineReference": "p2_l20"}
  ],
  "metadata": {"documentLanguage": "de", "totalLinesProcessed": 0, "extractionNotes": null}
}

detectedCategory is one of: personal, contact, experience, education, skill, language, certificate, hobby, reference, other.

HARD RULES:
1. Job titles, departments and company names are NEVER a person's name. The name is usually the largest line of the header.
2. Dates stay as printed (e.g. "03/2019", "2015", "heute"); do not invent days or months.
3. Phone numbers and emails are copied verbatim; normalization happens later.
4. Use null for anything not printed. Never guess."#;

/// User prompt for the primary extraction call.
/// Replace: {evidence_instruction}, {residue_instruction}, {few_shot}, {problem_fields},
///          {languages}, {corpus}
pub const EXTRACTION_PROMPT_TEMPLATE: &str = r#"{evidence_instruction}

{residue_instruction}

{few_shot}{problem_fields}DOCUMENT LANGUAGES: {languages}

CV LINES (each prefixed with its line id):
{corpus}
Extract the CV now. Remember: thoughtProcess first, evidence for every value, unmappedSegments for everything else."#;

/// Corrective re-prompt after a structural validation failure.
/// Replace: {original_prompt}, {previous_response}, {errors}
pub const CORRECTIVE_PROMPT_TEMPLATE: &str = r#"{original_prompt}

YOUR PREVIOUS RESPONSE WAS REJECTED. It was:
{previous_response}

VALIDATION ERRORS (fix every one of them):
{errors}

Return the complete corrected JSON object. Keep every value that was valid."#;

/// Narrow follow-up call for lines the primary extraction did not account for.
/// Replace: {evidence_instruction}, {missing_lines}
pub const REEXTRACT_PROMPT_TEMPLATE: &str = r#"{evidence_instruction}

A previous pass over this CV left the following lines unaccounted for. Each line is shown with its id and the most likely reason it was missed.

MISSING LINES:
{missing_lines}
Extract ONLY what these lines contain, using the same JSON schema. Every line above must end up either as evidence in extractedData or in unmappedSegments with its lineReference. Do not repeat data from other lines."#;

pub fn extraction_system_prompt() -> String {
    EXTRACTION_SYSTEM_TEMPLATE.replace("{json_only}", JSON_ONLY_SYSTEM)
}

fn render_few_shot(examples: &[FewShotExample]) -> String {
    if examples.is_empty() {
        return String::new();
    }
    let mut out = String::from("LEARN FROM THESE PAST CORRECTIONS:\n");
    for (i, ex) in examples.iter().enumerate() {
        out.push_str(&format!("{}. Source: \"{}\"\n", i + 1, ex.context.replace('\n', " / ")));
        if let Some(wrong) = &ex.wrong_value {
            out.push_str(&format!("   Wrong: {wrong}\n"));
        }
        out.push_str(&format!("   Correct {}: {}\n", ex.field, ex.correct_value));
        if let Some(reasoning) = &ex.reasoning {
            out.push_str(&format!("   Why: {reasoning}\n"));
        }
    }
    out.push('\n');
    out
}

fn render_problem_fields(problems: &[FieldAccuracy]) -> String {
    if problems.is_empty() {
        return String::new();
    }
    let fields: Vec<String> = problems
        .iter()
        .map(|p| format!("{} ({:.0}% accurate)", p.field, p.accuracy * 100.0))
        .collect();
    format!(
        "FIELDS OFTEN EXTRACTED WRONG, double-check them: {}\n\n",
        fields.join(", ")
    )
}

pub fn build_extraction_prompt(
    corpus: &PackedCorpus,
    examples: &[FewShotExample],
    problems: &[FieldAccuracy],
) -> String {
    let languages = if corpus.languages.is_empty() {
        "unknown".to_string()
    } else {
        corpus.languages.join(", ")
    };
    EXTRACTION_PROMPT_TEMPLATE
        .replace("{evidence_instruction}", EVIDENCE_INSTRUCTION)
        .replace("{residue_instruction}", RESIDUE_INSTRUCTION)
        .replace("{few_shot}", &render_few_shot(examples))
        .replace("{problem_fields}", &render_problem_fields(problems))
        .replace("{languages}", &languages)
        .replace("{corpus}", &corpus.render_for_prompt())
}

pub fn build_corrective_prompt(
    original_prompt: &str,
    previous_response: &str,
    errors: &[SchemaError],
) -> String {
    let errors: String = errors.iter().map(|e| format!("- {e}\n")).collect();
    CORRECTIVE_PROMPT_TEMPLATE
        .replace("{original_prompt}", original_prompt)
        .replace("{previous_response}", previous_response)
        .replace("{errors}", errors.trim_end())
}

pub fn build_reextraction_prompt(missing: &[MissingLine]) -> String {
    let lines: String = missing
        .iter()
        .map(|m| format!("[{}] {}    (reason: {})\n", m.line_id, m.text, m.likely_reason))
        .collect();
    REEXTRACT_PROMPT_TEMPLATE
        .replace("{evidence_instruction}", EVIDENCE_INSTRUCTION)
        .replace("{missing_lines}", &lines)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::models::{DocumentLayout, LayoutLine, LayoutPage};
    use crate::document::packer::{pack_document, CorpusBucket, PackerLimits};
    use crate::feedback::store::builtin_examples;

    fn corpus() -> PackedCorpus {
        pack_document(
            &DocumentLayout {
                pages: vec![LayoutPage {
                    page_number: 1,
                    lines: vec![LayoutLine {
                        content: "Max Müller".into(),
                        polygon: vec![],
                        confidence: None,
                    }],
                }],
                key_value_pairs: vec![],
                languages: vec![],
            },
            &PackerLimits::default(),
        )
    }

    #[test]
    fn test_system_prompt_embeds_json_rule() {
        let system = extraction_system_prompt();
        assert!(system.contains("single valid JSON object"));
        assert!(!system.contains("{json_only}"));
        assert!(system.contains("\"thoughtProcess\""));
    }

    #[test]
    fn test_extraction_prompt_contains_lines_and_examples() {
        let problems = vec![FieldAccuracy {
            field: "phone".into(),
            total: 10,
            corrected: 5,
            accuracy: 0.5,
        }];
        let prompt = build_extraction_prompt(&corpus(), &builtin_examples(2), &problems);
        assert!(prompt.contains("[p1_l0] Max Müller"));
        assert!(prompt.contains("LEARN FROM THESE PAST CORRECTIONS"));
        assert!(prompt.contains("phone (50% accurate)"));
        assert!(prompt.contains("DOCUMENT LANGUAGES: unknown"));
        assert!(!prompt.contains("{corpus}"));
    }

    #[test]
    fn test_empty_feedback_sections_omitted() {
        let prompt = build_extraction_prompt(&corpus(), &[], &[]);
        assert!(!prompt.contains("PAST CORRECTIONS"));
        assert!(!prompt.contains("OFTEN EXTRACTED WRONG"));
    }

    #[test]
    fn test_corrective_prompt_lists_every_error() {
        let errors = vec![
            SchemaError {
                path: "thoughtProcess".into(),
                message: "required field missing".into(),
            },
            SchemaError {
                path: "unmappedSegments".into(),
                message: "expected an array".into(),
            },
        ];
        let prompt = build_corrective_prompt("ORIGINAL", "{\"a\":1}", &errors);
        assert!(prompt.starts_with("ORIGINAL"));
        assert!(prompt.contains("{\"a\":1}"));
        assert!(prompt.contains("- thoughtProcess: required field missing"));
        assert!(prompt.contains("- unmappedSegments: expected an array"));
    }

    #[test]
    fn test_reextraction_prompt_lists_only_missing_lines() {
        let missing = vec![MissingLine {
            line_id: "p2_l7".into(),
            page: 2,
            text: "Schachclub Bern".into(),
            bucket: CorpusBucket::Header,
            likely_reason: "Header line not attributed".into(),
        }];
        let prompt = build_reextraction_prompt(&missing);
        assert!(prompt.contains("[p2_l7] Schachclub Bern"));
        assert!(prompt.contains("reason: Header line not attributed"));
    }
}
