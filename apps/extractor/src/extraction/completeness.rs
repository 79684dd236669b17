//! Completeness validator: proves every significant corpus line was either
//! extracted, parked in the residue bucket, or is ignorable noise.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::document::packer::{CorpusBucket, PackedCorpus};
use crate::extraction::models::CognitiveResponse;

/// Fraction of the token cap at which the corpus counts as truncated-risk.
pub const TOKEN_LIMIT_RATIO: f64 = 0.94;
pub const DEFAULT_MIN_LINE_LENGTH: usize = 3;

pub const DEFAULT_IGNORABLE_PATTERNS: &[&str] = &[
    r"^\s*$",
    r"(?i)^\s*(seite|page|p\.)?\s*\d{1,3}\s*((/|von|of)\s*\d{1,3})?\s*$",
    r"^[\s\-_=*•·.|~]+$",
    r"(?i)^\s*(lebenslauf|curriculum vitae|cv|resume|résumé|bewerbung|bewerbungsunterlagen)\s*$",
];

static LINE_ID_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"p\d+_(?:l|kv)\d+").unwrap());

// ────────────────────────────────────────────────────────────────────────────
// Policy
// ────────────────────────────────────────────────────────────────────────────

/// Which lines may go unaccounted without making the extraction incomplete.
#[derive(Debug, Clone)]
pub struct CompletenessPolicy {
    patterns: Vec<Regex>,
    min_line_length: usize,
}

impl CompletenessPolicy {
    pub fn new(patterns: &[String], min_line_length: usize) -> Result<Self, regex::Error> {
        let patterns = patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            patterns,
            min_line_length,
        })
    }

    pub fn min_line_length(&self) -> usize {
        self.min_line_length
    }

    pub fn is_ignorable(&self, text: &str) -> bool {
        let trimmed = text.trim();
        trimmed.chars().count() < self.min_line_length
            || self.patterns.iter().any(|p| p.is_match(trimmed))
    }
}

impl Default for CompletenessPolicy {
    fn default() -> Self {
        Self {
            patterns: DEFAULT_IGNORABLE_PATTERNS
                .iter()
                .map(|p| Regex::new(p).unwrap())
                .collect(),
            min_line_length: DEFAULT_MIN_LINE_LENGTH,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Report
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingLine {
    pub line_id: String,
    pub page: u32,
    pub text: String,
    pub bucket: CorpusBucket,
    pub likely_reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletenessReport {
    pub total_lines: usize,
    pub significant_lines: usize,
    pub accounted_significant_lines: usize,
    pub completeness_percentage: u32,
    pub is_complete: bool,
    pub extracted_line_ids: Vec<String>,
    pub unmapped_line_ids: Vec<String>,
    pub ignorable_line_ids: Vec<String>,
    pub missing_lines: Vec<MissingLine>,
    /// Line ids the response cited that do not exist in the corpus.
    pub unknown_references: Vec<String>,
    pub token_limit_reached: bool,
    pub estimated_tokens: usize,
    pub token_cap: usize,
}

impl CompletenessReport {
    pub fn missing_line_ids(&self) -> Vec<&str> {
        self.missing_lines.iter().map(|m| m.line_id.as_str()).collect()
    }

    /// Exact comparison against a whole-percent threshold, ignoring the rounding
    /// applied to `completeness_percentage`.
    pub fn is_below(&self, threshold: u32) -> bool {
        self.accounted_significant_lines * 100 < threshold as usize * self.significant_lines
    }
}

/// Line ids cited by an unmapped segment's `lineReference`. Models sometimes
/// list several ids in one reference, so every id-shaped token counts.
pub fn parse_line_reference(reference: &str) -> Vec<String> {
    LINE_ID_RE
        .find_iter(reference)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Partitions the corpus into extracted, unmapped, ignorable and missing lines.
/// Pure: neither input is modified.
pub fn validate_completeness(
    corpus: &PackedCorpus,
    response: &CognitiveResponse,
    policy: &CompletenessPolicy,
) -> CompletenessReport {
    let lines = corpus.all_lines();
    let corpus_ids = corpus.line_ids();

    let extracted: HashSet<String> = response
        .extracted_data
        .all_evidence()
        .map(|e| e.line_id.clone())
        .collect();
    let unmapped: HashSet<String> = response
        .unmapped_segments
        .iter()
        .filter_map(|s| s.line_reference.as_deref())
        .flat_map(parse_line_reference)
        .collect();

    let mut unknown_references: Vec<String> = Vec::new();
    let cited = response
        .extracted_data
        .all_evidence()
        .map(|e| e.line_id.clone())
        .chain(
            response
                .unmapped_segments
                .iter()
                .filter_map(|s| s.line_reference.as_deref())
                .flat_map(parse_line_reference),
        );
    for id in cited {
        if !corpus_ids.contains(id.as_str()) && !unknown_references.contains(&id) {
            unknown_references.push(id);
        }
    }

    let token_limit_reached = corpus.is_near_token_cap(TOKEN_LIMIT_RATIO);

    let mut extracted_line_ids = Vec::new();
    let mut unmapped_line_ids = Vec::new();
    let mut ignorable_line_ids = Vec::new();
    let mut missing_lines = Vec::new();

    for line in &lines {
        let id = &line.line_id;
        if extracted.contains(id) {
            extracted_line_ids.push(id.clone());
        } else if unmapped.contains(id) {
            unmapped_line_ids.push(id.clone());
        } else if policy.is_ignorable(&line.text) {
            ignorable_line_ids.push(id.clone());
        } else {
            let bucket = corpus.bucket_of(id).unwrap_or(CorpusBucket::Header);
            missing_lines.push(MissingLine {
                line_id: id.clone(),
                page: line.page,
                text: line.text.clone(),
                bucket,
                likely_reason: likely_reason(bucket, token_limit_reached),
            });
        }
    }

    let accounted = extracted_line_ids.len() + unmapped_line_ids.len();
    let significant = accounted + missing_lines.len();
    let completeness_percentage = if significant == 0 {
        100
    } else {
        (accounted as f64 * 100.0 / significant as f64).round() as u32
    };

    CompletenessReport {
        total_lines: lines.len(),
        significant_lines: significant,
        accounted_significant_lines: accounted,
        completeness_percentage,
        is_complete: missing_lines.is_empty(),
        extracted_line_ids,
        unmapped_line_ids,
        ignorable_line_ids,
        missing_lines,
        unknown_references,
        token_limit_reached,
        estimated_tokens: corpus.estimated_tokens,
        token_cap: corpus.token_cap,
    }
}

fn likely_reason(bucket: CorpusBucket, token_limit_reached: bool) -> String {
    if token_limit_reached {
        return "Corpus close to the token cap; the response may have been cut short".to_string();
    }
    match bucket {
        CorpusBucket::Header => "Header line not attributed to person or contact".to_string(),
        CorpusBucket::Contact => "Contact-like line not attributed to a contact field".to_string(),
        CorpusBucket::KeyValue => "Labelled key/value pair not extracted".to_string(),
        CorpusBucket::Section(kind) => {
            format!("Line in the {} section not mapped to any field", kind.label())
        }
    }
}
