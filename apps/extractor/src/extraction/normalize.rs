//! Field normalization used by the validator: email shape checks and phone
//! canonicalization to E.164.

use once_cell::sync::Lazy;
use phonenumber::{country, Mode};
use regex::Regex;
use tracing::warn;

/// Regions tried after the configured default, in order. First valid parse wins.
pub const FALLBACK_REGIONS: &[&str] = &["CH", "DE", "AT", "FR", "IT", "LI", "GB", "US"];

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9](?:[A-Za-z0-9-]*[A-Za-z0-9])?(?:\.[A-Za-z0-9-]+)*\.[A-Za-z]{2,}$")
        .unwrap()
});

/// Trims and strips a `mailto:` prefix; returns `None` if the result is not an email.
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let candidate = trimmed
        .strip_prefix("mailto:")
        .unwrap_or(trimmed)
        .trim();
    EMAIL_RE.is_match(candidate).then(|| candidate.to_string())
}

/// Region-aware phone normalizer.
#[derive(Debug, Clone)]
pub struct PhoneNormalizer {
    regions: Vec<country::Id>,
}

impl PhoneNormalizer {
    /// Builds the ordered region list: `default_region` first, then the fallbacks.
    pub fn new(default_region: &str) -> Self {
        let mut regions: Vec<country::Id> = Vec::new();
        let codes = std::iter::once(default_region).chain(FALLBACK_REGIONS.iter().copied());
        for code in codes {
            match code.trim().to_uppercase().parse::<country::Id>() {
                Ok(id) if !regions.contains(&id) => regions.push(id),
                Ok(_) => {}
                Err(_) => warn!("Ignoring unknown phone region '{code}'"),
            }
        }
        Self { regions }
    }

    /// Returns the E.164 form of `raw`, or `None` if no region yields a valid number.
    pub fn normalize(&self, raw: &str) -> Option<String> {
        let cleaned = raw.trim();
        if cleaned.chars().filter(|c| c.is_ascii_digit()).count() < 6 {
            return None;
        }
        self.regions.iter().find_map(|region| {
            phonenumber::parse(Some(*region), cleaned)
                .ok()
                .filter(phonenumber::is_valid)
                .map(|number| number.format().mode(Mode::E164).to_string())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        assert_eq!(
            normalize_email("  max.mueller@example.ch "),
            Some("max.mueller@example.ch".to_string())
        );
        assert_eq!(
            normalize_email("mailto:a+b@mail.example.com"),
            Some("a+b@mail.example.com".to_string())
        );
    }

    #[test]
    fn test_invalid_emails() {
        assert_eq!(normalize_email("not-an-email"), None);
        assert_eq!(normalize_email("max@"), None);
        assert_eq!(normalize_email("max@example"), None);
        assert_eq!(normalize_email(""), None);
    }

    #[test]
    fn test_swiss_mobile_normalizes_to_e164() {
        let normalizer = PhoneNormalizer::new("CH");
        assert_eq!(
            normalizer.normalize("079 123 45 67"),
            Some("+41791234567".to_string())
        );
    }

    #[test]
    fn test_international_prefix_kept() {
        let normalizer = PhoneNormalizer::new("CH");
        assert_eq!(
            normalizer.normalize("+41 79 123 45 67"),
            Some("+41791234567".to_string())
        );
    }

    #[test]
    fn test_default_region_tried_first() {
        let normalizer = PhoneNormalizer::new("DE");
        assert_eq!(
            normalizer.normalize("0176 12345678"),
            Some("+4917612345678".to_string())
        );
    }

    #[test]
    fn test_unparseable_phone() {
        let normalizer = PhoneNormalizer::new("CH");
        assert_eq!(normalizer.normalize("call me maybe"), None);
        assert_eq!(normalizer.normalize("12"), None);
    }

    #[test]
    fn test_unknown_default_region_falls_back() {
        let normalizer = PhoneNormalizer::new("XX");
        assert_eq!(
            normalizer.normalize("079 123 45 67"),
            Some("+41791234567".to_string())
        );
    }
}
