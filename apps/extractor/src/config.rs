use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::document::packer::PackerLimits;
use crate::extraction::completeness::{CompletenessPolicy, DEFAULT_IGNORABLE_PATTERNS};
use crate::extraction::parser::ParserSettings;
use crate::feedback::store::DEFAULT_EXAMPLE_LIMIT;
use crate::llm_client::ApiStyle;

/// Separator for `COMPLETENESS_IGNORABLE_PATTERNS`.
const PATTERN_SEPARATOR: &str = ";;";

/// Application configuration loaded from environment variables.
/// Only malformed values fail startup; everything has a default.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub rust_log: String,
    /// Absent → feedback is kept in memory for the lifetime of the process.
    pub database_url: Option<String>,

    pub extraction_enabled: bool,
    pub llm_endpoint: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: String,
    pub llm_api_style: ApiStyle,
    pub llm_timeout_secs: u64,
    pub llm_max_transport_attempts: u32,
    pub llm_max_validation_retries: u32,
    pub llm_retry_base_delay_ms: u64,
    pub llm_primary_max_tokens: u32,
    pub llm_reextract_max_tokens: u32,

    pub reextract_threshold: u32,
    pub auto_reextract: bool,
    pub phone_default_region: String,
    pub corpus_token_cap: usize,
    pub completeness_min_line_length: usize,
    pub completeness_ignorable_patterns: Vec<String>,
    pub few_shot_limit: usize,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            database_url: optional_env("DATABASE_URL"),

            extraction_enabled: parse_bool_env("EXTRACTION_ENABLED", true)?,
            llm_endpoint: optional_env("LLM_ENDPOINT"),
            llm_api_key: optional_env("LLM_API_KEY"),
            llm_model: optional_env("LLM_MODEL").unwrap_or_else(|| "gpt-4o-mini".to_string()),
            llm_api_style: optional_env("LLM_API_STYLE")
                .map(|s| ApiStyle::parse(&s))
                .unwrap_or_default(),
            llm_timeout_secs: parse_env("LLM_TIMEOUT_SECS", 90)?,
            llm_max_transport_attempts: parse_env("LLM_MAX_TRANSPORT_ATTEMPTS", 3)?,
            llm_max_validation_retries: parse_env("LLM_MAX_VALIDATION_RETRIES", 2)?,
            llm_retry_base_delay_ms: parse_env("LLM_RETRY_BASE_DELAY_MS", 1000)?,
            llm_primary_max_tokens: parse_env("LLM_PRIMARY_MAX_TOKENS", 4096)?,
            llm_reextract_max_tokens: parse_env("LLM_REEXTRACT_MAX_TOKENS", 2048)?,

            reextract_threshold: parse_env("REEXTRACT_THRESHOLD", 95)?,
            auto_reextract: parse_bool_env("AUTO_REEXTRACT", true)?,
            phone_default_region: optional_env("PHONE_DEFAULT_REGION")
                .map(|r| r.to_uppercase())
                .unwrap_or_else(|| "CH".to_string()),
            corpus_token_cap: parse_env("CORPUS_TOKEN_CAP", PackerLimits::default().token_cap)?,
            completeness_min_line_length: parse_env("COMPLETENESS_MIN_LINE_LENGTH", 3)?,
            completeness_ignorable_patterns: optional_env("COMPLETENESS_IGNORABLE_PATTERNS")
                .map(|raw| split_patterns(&raw))
                .unwrap_or_else(|| {
                    DEFAULT_IGNORABLE_PATTERNS
                        .iter()
                        .map(|p| p.to_string())
                        .collect()
                }),
            few_shot_limit: parse_env("FEW_SHOT_LIMIT", DEFAULT_EXAMPLE_LIMIT)?,
        })
    }

    pub fn parser_settings(&self) -> ParserSettings {
        ParserSettings {
            enabled: self.extraction_enabled,
            timeout: Duration::from_secs(self.llm_timeout_secs),
            max_transport_attempts: self.llm_max_transport_attempts,
            max_validation_retries: self.llm_max_validation_retries,
            retry_base_delay: Duration::from_millis(self.llm_retry_base_delay_ms),
            primary_max_tokens: self.llm_primary_max_tokens,
            reextract_max_tokens: self.llm_reextract_max_tokens,
            reextract_threshold: self.reextract_threshold,
            auto_reextract: self.auto_reextract,
            phone_region: self.phone_default_region.clone(),
            packer: PackerLimits {
                token_cap: self.corpus_token_cap,
                ..PackerLimits::default()
            },
        }
    }

    pub fn completeness_policy(&self) -> Result<CompletenessPolicy> {
        CompletenessPolicy::new(
            &self.completeness_ignorable_patterns,
            self.completeness_min_line_length,
        )
        .context("COMPLETENESS_IGNORABLE_PATTERNS contains an invalid regex")
    }
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match optional_env(key) {
        Some(raw) => raw
            .parse::<T>()
            .with_context(|| format!("Environment variable '{key}' has an invalid value '{raw}'")),
        None => Ok(default),
    }
}

fn parse_bool_env(key: &str, default: bool) -> Result<bool> {
    match optional_env(key).map(|v| v.to_lowercase()) {
        None => Ok(default),
        Some(v) => match v.as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => anyhow::bail!("Environment variable '{key}' must be a boolean, got '{v}'"),
        },
    }
}

fn split_patterns(raw: &str) -> Vec<String> {
    raw.split(PATTERN_SEPARATOR)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_patterns() {
        assert_eq!(
            split_patterns(r"^\s*$ ;; (?i)^anlage\s*\d+$;;"),
            vec![r"^\s*$".to_string(), r"(?i)^anlage\s*\d+$".to_string()]
        );
    }

    #[test]
    fn test_invalid_pattern_fails_policy() {
        let config = Config {
            completeness_ignorable_patterns: vec!["(unclosed".to_string()],
            ..test_config()
        };
        assert!(config.completeness_policy().is_err());
    }

    #[test]
    fn test_parser_settings_carry_config() {
        let settings = Config {
            corpus_token_cap: 8000,
            llm_retry_base_delay_ms: 250,
            ..test_config()
        }
        .parser_settings();
        assert_eq!(settings.packer.token_cap, 8000);
        assert_eq!(settings.packer.header_cap, PackerLimits::default().header_cap);
        assert_eq!(settings.retry_base_delay, Duration::from_millis(250));
        assert_eq!(settings.phone_region, "CH");
    }

    fn test_config() -> Config {
        Config {
            port: 8080,
            rust_log: "info".into(),
            database_url: None,
            extraction_enabled: true,
            llm_endpoint: None,
            llm_api_key: None,
            llm_model: "gpt-4o-mini".into(),
            llm_api_style: ApiStyle::OpenAi,
            llm_timeout_secs: 90,
            llm_max_transport_attempts: 3,
            llm_max_validation_retries: 2,
            llm_retry_base_delay_ms: 1000,
            llm_primary_max_tokens: 4096,
            llm_reextract_max_tokens: 2048,
            reextract_threshold: 95,
            auto_reextract: true,
            phone_default_region: "CH".into(),
            corpus_token_cap: 12_000,
            completeness_min_line_length: 3,
            completeness_ignorable_patterns: DEFAULT_IGNORABLE_PATTERNS
                .iter()
                .map(|p| p.to_string())
                .collect(),
            few_shot_limit: 5,
        }
    }
}
