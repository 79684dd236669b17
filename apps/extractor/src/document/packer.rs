//! Line Corpus Builder: flattens a layout document into a token-budgeted corpus
//! of identified lines for a single LLM call.
//!
//! Every layout line receives a stable `p<page>_l<index>` id exactly once. The id is
//! the unit of accounting for the completeness check, so it must never change
//! between the primary call and a re-extraction.

use std::collections::{HashMap, HashSet};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::document::models::DocumentLayout;

const CHARS_PER_TOKEN: usize = 4;
const LANGUAGE_MIN_CONFIDENCE: f32 = 0.3;

// ────────────────────────────────────────────────────────────────────────────
// Data models
// ────────────────────────────────────────────────────────────────────────────

/// A single identified source line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Line {
    pub line_id: String,
    pub page: u32,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionKind {
    Experience,
    Education,
    Skills,
    Languages,
    Certificates,
    Other,
}

impl SectionKind {
    /// Sections pared back first when the corpus exceeds its token cap.
    pub fn is_low_value(self) -> bool {
        matches!(self, SectionKind::Skills | SectionKind::Certificates)
    }

    pub fn label(self) -> &'static str {
        match self {
            SectionKind::Experience => "experience",
            SectionKind::Education => "education",
            SectionKind::Skills => "skills",
            SectionKind::Languages => "languages",
            SectionKind::Certificates => "certificates",
            SectionKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusSection {
    pub kind: SectionKind,
    pub lines: Vec<Line>,
}

/// Where a line ended up inside the corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "bucket", content = "section")]
pub enum CorpusBucket {
    Header,
    Contact,
    KeyValue,
    Section(SectionKind),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackedCorpus {
    pub header: Vec<Line>,
    pub contact: Vec<Line>,
    pub key_values: Vec<Line>,
    pub sections: Vec<CorpusSection>,
    pub estimated_tokens: usize,
    pub token_cap: usize,
    /// Lines removed by token budgeting. They are not part of the corpus.
    #[serde(default)]
    pub truncated_lines: usize,
    #[serde(default)]
    pub languages: Vec<String>,
}

/// Caps and floors applied while packing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PackerLimits {
    pub token_cap: usize,
    pub header_cap: usize,
    pub section_cap: usize,
    pub low_value_floor: usize,
    pub section_floor: usize,
}

impl Default for PackerLimits {
    fn default() -> Self {
        Self {
            token_cap: 12_000,
            header_cap: 8,
            section_cap: 120,
            low_value_floor: 10,
            section_floor: 50,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Classification vocabularies
// ────────────────────────────────────────────────────────────────────────────

static SECTION_HEADINGS: Lazy<HashMap<&'static str, SectionKind>> = Lazy::new(|| {
    let mut m = HashMap::new();
    for h in [
        "berufserfahrung",
        "berufliche erfahrung",
        "beruflicher werdegang",
        "werdegang",
        "erfahrung",
        "praxiserfahrung",
        "experience",
        "work experience",
        "professional experience",
        "employment history",
        "career",
        "expérience professionnelle",
    ] {
        m.insert(h, SectionKind::Experience);
    }
    for h in [
        "ausbildung",
        "bildung",
        "schulbildung",
        "studium",
        "aus- und weiterbildung",
        "weiterbildung",
        "education",
        "academic background",
        "formation",
    ] {
        m.insert(h, SectionKind::Education);
    }
    for h in [
        "kenntnisse",
        "fähigkeiten",
        "kompetenzen",
        "it-kenntnisse",
        "edv-kenntnisse",
        "fachkenntnisse",
        "skills",
        "technical skills",
        "competencies",
        "compétences",
    ] {
        m.insert(h, SectionKind::Skills);
    }
    for h in [
        "sprachen",
        "sprachkenntnisse",
        "languages",
        "language skills",
        "langues",
    ] {
        m.insert(h, SectionKind::Languages);
    }
    for h in [
        "zertifikate",
        "zertifizierungen",
        "kurse",
        "certificates",
        "certifications",
        "courses",
    ] {
        m.insert(h, SectionKind::Certificates);
    }
    m
});

/// Normalized key/value keys worth forwarding to the model.
const KEY_SYNONYMS: &[&str] = &[
    "name",
    "vorname",
    "nachname",
    "e-mail",
    "email",
    "mail",
    "telefon",
    "tel",
    "tel.",
    "phone",
    "mobile",
    "mobil",
    "handy",
    "adresse",
    "address",
    "anschrift",
    "wohnort",
    "geburtsdatum",
    "date of birth",
    "geboren",
    "nationalität",
    "nationality",
    "staatsangehörigkeit",
    "linkedin",
    "website",
    "homepage",
];

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[\w.+-]+@[\w-]+(\.[\w-]+)+").unwrap());
static PHONE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:\+|\b00)\d[\d\s/()-]{6,}\d|\b0\d{1,3}[\s/-]?\d{3}[\s-]?\d{2}[\s-]?\d{2}\b")
        .unwrap()
});
static URL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(https?://|www\.)\S+|linkedin\.com/\S+").unwrap());

/// True when a line looks like contact data (email, phone number or URL).
pub fn is_contact_like(text: &str) -> bool {
    EMAIL_RE.is_match(text) || PHONE_RE.is_match(text) || URL_RE.is_match(text)
}

pub fn email_matches(text: &str) -> impl Iterator<Item = &str> + '_ {
    EMAIL_RE.find_iter(text).map(|m| m.as_str())
}

pub fn phone_matches(text: &str) -> impl Iterator<Item = &str> + '_ {
    PHONE_RE.find_iter(text).map(|m| m.as_str())
}

fn heading_kind(text: &str) -> Option<SectionKind> {
    let normalized = text
        .trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .to_lowercase();
    if normalized.is_empty() || normalized.chars().count() > 40 {
        return None;
    }
    SECTION_HEADINGS.get(normalized.as_str()).copied()
}

fn normalize_key(key: &str) -> String {
    key.trim().trim_end_matches(':').trim().to_lowercase()
}

/// Heuristic token estimate for one line as it will appear in the prompt.
pub fn estimate_tokens(line: &Line) -> usize {
    (line.line_id.len() + line.text.chars().count() + 3).div_ceil(CHARS_PER_TOKEN)
}

// ────────────────────────────────────────────────────────────────────────────
// Packing
// ────────────────────────────────────────────────────────────────────────────

/// Packs a layout document into a line corpus under the configured token cap.
pub fn pack_document(layout: &DocumentLayout, limits: &PackerLimits) -> PackedCorpus {
    let mut corpus = PackedCorpus {
        header: Vec::new(),
        contact: Vec::new(),
        key_values: Vec::new(),
        sections: Vec::new(),
        estimated_tokens: 0,
        token_cap: limits.token_cap,
        truncated_lines: 0,
        languages: layout.confident_locales(LANGUAGE_MIN_CONFIDENCE),
    };

    let first_page = layout.pages.iter().map(|p| p.page_number).min();
    let mut other = CorpusSection {
        kind: SectionKind::Other,
        lines: Vec::new(),
    };
    let mut open_section: Option<usize> = None;

    for page in &layout.pages {
        for (index, layout_line) in page.lines.iter().enumerate() {
            let line = Line {
                line_id: format!("p{}_l{}", page.page_number, index),
                page: page.page_number,
                text: layout_line.content.clone(),
                confidence: layout_line.confidence,
            };

            if let Some(kind) = heading_kind(&line.text) {
                corpus.sections.push(CorpusSection {
                    kind,
                    lines: vec![line],
                });
                open_section = Some(corpus.sections.len() - 1);
                continue;
            }

            if is_contact_like(&line.text) {
                corpus.contact.push(line);
                continue;
            }

            if open_section.is_none()
                && Some(page.page_number) == first_page
                && corpus.header.len() < limits.header_cap
            {
                corpus.header.push(line);
                continue;
            }

            match open_section {
                Some(idx) if corpus.sections[idx].lines.len() < limits.section_cap => {
                    corpus.sections[idx].lines.push(line);
                }
                _ => other.lines.push(line),
            }
        }
    }

    for (index, kv) in layout.key_value_pairs.iter().enumerate() {
        let Some(value) = kv.value.as_deref().map(str::trim).filter(|v| !v.is_empty()) else {
            continue;
        };
        if !KEY_SYNONYMS.contains(&normalize_key(&kv.key).as_str()) {
            continue;
        }
        let page = kv.page_number.or(first_page).unwrap_or(1);
        corpus.key_values.push(Line {
            line_id: format!("p{}_kv{}", page, index),
            page,
            text: format!("{}: {}", kv.key.trim().trim_end_matches(':'), value),
            confidence: kv.confidence,
        });
    }

    if !other.lines.is_empty() {
        corpus.sections.push(other);
    }

    enforce_token_cap(&mut corpus, limits);

    debug!(
        "Packed corpus: {} lines, ~{} tokens (cap {}), {} truncated",
        corpus.line_count(),
        corpus.estimated_tokens,
        corpus.token_cap,
        corpus.truncated_lines
    );

    corpus
}

/// Pares sections back until the estimate fits the cap or every floor is reached.
/// Skills and certificates go first; header, contact and key/value lines are never trimmed.
fn enforce_token_cap(corpus: &mut PackedCorpus, limits: &PackerLimits) {
    let mut tokens = corpus.compute_tokens();
    let mut truncated = 0;

    if tokens > limits.token_cap {
        let passes: [(bool, usize); 2] = [
            (true, limits.low_value_floor),
            (false, limits.section_floor),
        ];
        for (low_value_pass, floor) in passes {
            for section in corpus
                .sections
                .iter_mut()
                .rev()
                .filter(|s| s.kind.is_low_value() == low_value_pass)
            {
                while tokens > limits.token_cap && section.lines.len() > floor {
                    if let Some(line) = section.lines.pop() {
                        tokens -= estimate_tokens(&line);
                        truncated += 1;
                    }
                }
            }
        }
        if tokens > limits.token_cap {
            warn!(
                "Corpus still ~{} tokens after truncation (cap {}); every section is at its floor",
                tokens, limits.token_cap
            );
        }
    }

    corpus.estimated_tokens = tokens;
    corpus.truncated_lines += truncated;
}

// ────────────────────────────────────────────────────────────────────────────
// Corpus queries
// ────────────────────────────────────────────────────────────────────────────

/// Sort key for line ids: page, then layout lines before key/value lines, then index.
fn line_order(line_id: &str) -> (u32, u8, usize) {
    let parsed = line_id.strip_prefix('p').and_then(|rest| {
        let (page, tail) = rest.split_once('_')?;
        let page = page.parse().ok()?;
        if let Some(idx) = tail.strip_prefix("kv") {
            Some((page, 1, idx.parse().ok()?))
        } else {
            Some((page, 0, tail.strip_prefix('l')?.parse().ok()?))
        }
    });
    parsed.unwrap_or((u32::MAX, u8::MAX, usize::MAX))
}

impl PackedCorpus {
    fn buckets(&self) -> impl Iterator<Item = (CorpusBucket, &Line)> {
        let header = self.header.iter().map(|l| (CorpusBucket::Header, l));
        let contact = self.contact.iter().map(|l| (CorpusBucket::Contact, l));
        let kv = self.key_values.iter().map(|l| (CorpusBucket::KeyValue, l));
        let sections = self
            .sections
            .iter()
            .flat_map(|s| s.lines.iter().map(move |l| (CorpusBucket::Section(s.kind), l)));
        header.chain(contact).chain(kv).chain(sections)
    }

    /// Every line in the corpus, in document order.
    pub fn all_lines(&self) -> Vec<&Line> {
        let mut lines: Vec<&Line> = self.buckets().map(|(_, l)| l).collect();
        lines.sort_by_key(|l| line_order(&l.line_id));
        lines
    }

    /// Ids of every line in the corpus.
    pub fn line_ids(&self) -> HashSet<&str> {
        self.buckets().map(|(_, l)| l.line_id.as_str()).collect()
    }

    pub fn line_count(&self) -> usize {
        self.buckets().count()
    }

    pub fn line(&self, line_id: &str) -> Option<&Line> {
        self.buckets().map(|(_, l)| l).find(|l| l.line_id == line_id)
    }

    pub fn bucket_of(&self, line_id: &str) -> Option<CorpusBucket> {
        self.buckets()
            .find(|(_, l)| l.line_id == line_id)
            .map(|(b, _)| b)
    }

    pub fn compute_tokens(&self) -> usize {
        self.buckets().map(|(_, l)| estimate_tokens(l)).sum()
    }

    /// True once the estimate reaches `ratio` of the hard cap.
    pub fn is_near_token_cap(&self, ratio: f64) -> bool {
        self.token_cap > 0 && self.estimated_tokens as f64 >= self.token_cap as f64 * ratio
    }

    /// Renders the corpus as the line-tagged block embedded in the user prompt.
    pub fn render_for_prompt(&self) -> String {
        let mut out = String::new();
        let mut block = |title: &str, lines: &[Line]| {
            if lines.is_empty() {
                return;
            }
            out.push_str(&format!("### {title}\n"));
            for line in lines {
                out.push_str(&format!("[{}] {}\n", line.line_id, line.text));
            }
            out.push('\n');
        };
        block("HEADER", &self.header);
        block("CONTACT", &self.contact);
        block("KEY_VALUE_PAIRS", &self.key_values);
        for section in &self.sections {
            let title = format!("SECTION: {}", section.kind.label().to_uppercase());
            block(&title, &section.lines);
        }
        out
    }
}
