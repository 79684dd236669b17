//! Keyword tokenization and context hashing for few-shot retrieval.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use sha2::{Digest, Sha256};

pub const MIN_KEYWORD_CHARS: usize = 4;

static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // English
        "about", "also", "been", "from", "have", "into", "more", "only", "other", "over",
        "some", "such", "than", "that", "their", "them", "then", "there", "these", "they",
        "this", "those", "very", "were", "what", "when", "where", "which", "while", "with",
        "would", "your",
        // German
        "aber", "alle", "auch", "auf", "dass", "dann", "denn", "dies", "diese", "dieser",
        "durch", "eine", "einem", "einen", "einer", "eines", "für", "habe", "haben", "hatte",
        "ihre", "jede", "kann", "mehr", "meine", "nach", "nicht", "noch", "oder", "seit",
        "sehr", "sich", "sind", "über", "unter", "viel", "vom", "von", "wird", "wurde",
        "zwischen",
        // French
        "avec", "dans", "leur", "mais", "pour", "sans", "sont", "tout", "très",
    ]
    .into_iter()
    .collect()
});

/// Lowercased content words of at least four characters, stop words removed,
/// in first-seen order without duplicates.
pub fn keywords(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.split(|c: char| !c.is_alphanumeric() && c != '@' && c != '+')
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= MIN_KEYWORD_CHARS)
        .filter(|w| !STOP_WORDS.contains(w.as_str()))
        .filter(|w| seen.insert(w.clone()))
        .collect()
}

/// Number of keywords `a` and `b` share.
pub fn overlap(a: &[String], b: &[String]) -> usize {
    let set: HashSet<&str> = a.iter().map(String::as_str).collect();
    b.iter().filter(|w| set.contains(w.as_str())).count()
}

/// Whitespace-collapsed, lowercased context used for de-duplication.
pub fn normalize_context(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// SHA-256 of the normalized context, hex encoded.
pub fn context_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_context(text).as_bytes());
    hex::encode(hasher.finalize())
}
