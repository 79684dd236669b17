//! Extraction orchestrator.
//!
//! Drives one CV through the state machine in `state_machine.rs`:
//! 1. Pack the layout into a line corpus
//! 2. Build the prompt with few-shot examples and problem fields
//! 3. Call the LLM (transport retries with exponential backoff)
//! 4. Validate, re-prompting with the exact error list on shape failures
//! 5. Audit completeness and re-extract the missing lines once if needed
//! 6. Score person/contact fields and assemble the result

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::document::models::DocumentLayout;
use crate::document::packer::{pack_document, PackedCorpus, PackerLimits};
use crate::extraction::completeness::{
    validate_completeness, CompletenessPolicy, CompletenessReport, MissingLine,
};
use crate::extraction::confidence::{
    score_fields, ConfidenceStatus, ConfidenceWeights, FieldConfidence,
};
use crate::extraction::merge::merge_responses;
use crate::extraction::models::{
    AutoCorrection, ExtractedData, FlaggedField, ResponseMetadata, UnmappedSegment,
};
use crate::extraction::normalize::PhoneNormalizer;
use crate::extraction::prompts::{
    build_corrective_prompt, build_extraction_prompt, build_reextraction_prompt,
    extraction_system_prompt,
};
use crate::extraction::schema::SchemaError;
use crate::extraction::state_machine::{
    transition, Event, FailureCode, MachineState, Phase, RetryBudget,
};
use crate::extraction::validator::{
    validate_response, ValidatedResponse, ValidationContext, ValidationOutcome,
};
use crate::feedback::models::{FewShotExample, FieldAccuracy};
use crate::feedback::store::{builtin_examples, FeedbackStore, DEFAULT_EXAMPLE_LIMIT};
use crate::llm_client::{CompletionClient, CompletionRequest, LlmError, TokenUsage};

/// Corpus lines used as keyword context for few-shot retrieval.
const FEEDBACK_CONTEXT_LINES: usize = 60;

// ────────────────────────────────────────────────────────────────────────────
// Settings & request/result types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ParserSettings {
    pub enabled: bool,
    pub timeout: Duration,
    pub max_transport_attempts: u32,
    pub max_validation_retries: u32,
    /// First backoff delay; doubles on every further attempt.
    pub retry_base_delay: Duration,
    pub primary_max_tokens: u32,
    pub reextract_max_tokens: u32,
    /// Completeness percentage below which a re-extraction is attempted.
    pub reextract_threshold: u32,
    pub auto_reextract: bool,
    pub phone_region: String,
    pub packer: PackerLimits,
}

impl Default for ParserSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            timeout: Duration::from_secs(90),
            max_transport_attempts: 3,
            max_validation_retries: 2,
            retry_base_delay: Duration::from_millis(1000),
            primary_max_tokens: 4096,
            reextract_max_tokens: 2048,
            reextract_threshold: 95,
            auto_reextract: true,
            phone_region: "CH".to_string(),
            packer: PackerLimits::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionRequest {
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub layout: DocumentLayout,
    /// Fields the few-shot retrieval should favour. Defaults to the critical fields.
    #[serde(default)]
    pub target_fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionSuccess {
    pub thought_process: String,
    pub extracted_data: ExtractedData,
    pub unmapped_segments: Vec<UnmappedSegment>,
    pub metadata: ResponseMetadata,
    pub auto_corrections: Vec<AutoCorrection>,
    pub flagged_fields: Vec<FlaggedField>,
    pub field_confidences: Vec<FieldConfidence>,
    pub needs_review_fields: Vec<String>,
    pub warnings: Vec<String>,
    pub token_usage: TokenUsage,
    pub latency_ms: u64,
    pub retry_count: u32,
    pub re_extraction_performed: bool,
    pub completeness: CompletenessReport,
    pub is_data_complete: bool,
}

#[derive(Debug, Clone, Serialize, Error)]
#[serde(rename_all = "camelCase")]
#[error("extraction failed ({code}): {message}")]
pub struct ExtractionFailure {
    pub code: FailureCode,
    pub message: String,
    pub latency_ms: u64,
    pub retry_count: u32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub validation_errors: Vec<SchemaError>,
}

fn failure_code(error: &LlmError) -> FailureCode {
    match error {
        LlmError::Unconfigured => FailureCode::Unconfigured,
        LlmError::Auth { .. } => FailureCode::AuthFailed,
        LlmError::Timeout(_) => FailureCode::Timeout,
        LlmError::RateLimited { .. } => FailureCode::RateLimited,
        _ => FailureCode::Generic,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Orchestrator
// ────────────────────────────────────────────────────────────────────────────

/// Mutable working set of one extraction run.
#[derive(Default)]
struct RunContext {
    base_prompt: String,
    current_prompt: String,
    last_raw: String,
    last_value: Option<Value>,
    last_errors: Vec<SchemaError>,
    last_call_error: Option<LlmError>,
    validated: Option<ValidatedResponse>,
    supplement: Option<ValidatedResponse>,
    report: Option<CompletenessReport>,
    usage: TokenUsage,
    warnings: Vec<String>,
}

pub struct ExtractionParser {
    client: Arc<dyn CompletionClient>,
    feedback: Option<Arc<FeedbackStore>>,
    settings: ParserSettings,
    policy: CompletenessPolicy,
    phone: PhoneNormalizer,
    weights: ConfidenceWeights,
}

impl ExtractionParser {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        feedback: Option<Arc<FeedbackStore>>,
        settings: ParserSettings,
        policy: CompletenessPolicy,
    ) -> Self {
        let phone = PhoneNormalizer::new(&settings.phone_region);
        Self {
            client,
            feedback,
            settings,
            policy,
            phone,
            weights: ConfidenceWeights::default(),
        }
    }

    pub fn policy(&self) -> &CompletenessPolicy {
        &self.policy
    }

    pub fn settings(&self) -> &ParserSettings {
        &self.settings
    }

    pub fn is_llm_configured(&self) -> bool {
        self.client.is_configured()
    }

    /// Runs the full pipeline for one document. Expected failures come back as
    /// `ExtractionFailure`; nothing in here panics on model output.
    pub async fn extract(
        &self,
        request: &ExtractionRequest,
    ) -> Result<ExtractionSuccess, ExtractionFailure> {
        let started = Instant::now();
        let corpus = pack_document(&request.layout, &self.settings.packer);
        let line_ids = corpus.line_ids();
        let vctx = ValidationContext {
            phone: &self.phone,
            line_ids: &line_ids,
        };
        let system = extraction_system_prompt();

        let mut ctx = RunContext::default();
        if corpus.truncated_lines > 0 {
            ctx.warnings.push(format!(
                "{} lines were dropped to fit the corpus token cap",
                corpus.truncated_lines
            ));
        }

        let mut machine = MachineState::new(RetryBudget {
            max_call_attempts: self.settings.max_transport_attempts.max(1),
            max_validation_retries: self.settings.max_validation_retries,
        });

        info!(
            "Starting extraction: {} corpus lines, ~{} tokens",
            corpus.line_count(),
            corpus.estimated_tokens
        );

        while !machine.phase.is_terminal() {
            let event = match machine.phase {
                Phase::Preflight => self.preflight(),
                Phase::PromptBuild => {
                    let (examples, problems) = self.load_feedback(request, &corpus, &mut ctx).await;
                    ctx.base_prompt = build_extraction_prompt(&corpus, &examples, &problems);
                    ctx.current_prompt = ctx.base_prompt.clone();
                    Event::PromptBuilt
                }
                Phase::ValidationRetry => {
                    warn!(
                        "Re-prompting after {} validation errors (retry {}/{})",
                        ctx.last_errors.len(),
                        machine.validation_retries,
                        machine.budget.max_validation_retries
                    );
                    ctx.current_prompt =
                        build_corrective_prompt(&ctx.base_prompt, &ctx.last_raw, &ctx.last_errors);
                    Event::PromptBuilt
                }
                Phase::Call => {
                    // Corrective re-prompts wait like transport retries.
                    let prior = machine.call_attempts + machine.validation_retries;
                    if prior > 0 {
                        self.backoff(prior).await;
                    }
                    let call = CompletionRequest {
                        system: system.clone(),
                        user: ctx.current_prompt.clone(),
                        max_tokens: self.settings.primary_max_tokens,
                        timeout: self.settings.timeout,
                    };
                    match self.call_json(&call, &mut ctx.usage).await {
                        Ok((raw, value)) => {
                            ctx.last_raw = raw;
                            ctx.last_value = Some(value);
                            Event::CallSucceeded
                        }
                        Err(e) => {
                            warn!(
                                "LLM call attempt {}/{} failed: {e}",
                                machine.call_attempts + 1,
                                machine.budget.max_call_attempts
                            );
                            let event = Event::CallFailed {
                                retryable: e.is_retryable(),
                                code: failure_code(&e),
                            };
                            ctx.last_call_error = Some(e);
                            event
                        }
                    }
                }
                Phase::Validate => match ctx.last_value.take() {
                    None => Event::Abort,
                    Some(value) => match validate_response(value, &vctx) {
                        ValidationOutcome::Valid(validated) => {
                            ctx.validated = Some(validated);
                            Event::ResponseValid
                        }
                        ValidationOutcome::Invalid(errors) => {
                            ctx.last_errors = errors;
                            Event::ResponseInvalid
                        }
                    },
                },
                Phase::CompletenessCheck => match &ctx.validated {
                    None => Event::Abort,
                    Some(validated) => {
                        let report =
                            validate_completeness(&corpus, &validated.response, &self.policy);
                        debug!(
                            "Completeness {}% (missing: [{}])",
                            report.completeness_percentage,
                            report.missing_line_ids().join(", ")
                        );
                        let needs_more = !report.is_complete
                            && report.is_below(self.settings.reextract_threshold)
                            && self.settings.auto_reextract;
                        ctx.report = Some(report);
                        if needs_more {
                            Event::Incomplete
                        } else {
                            Event::Complete
                        }
                    }
                },
                Phase::ReExtract => {
                    let missing = ctx
                        .report
                        .as_ref()
                        .map(|r| r.missing_lines.clone())
                        .unwrap_or_default();
                    info!("Re-extracting {} missing lines", missing.len());
                    match self.reextract(&system, &missing, &vctx, &mut ctx.usage).await {
                        Ok(supplement) => {
                            ctx.supplement = Some(supplement);
                            Event::ReExtractFinished
                        }
                        Err(message) => {
                            warn!("{message}");
                            ctx.warnings.push(message);
                            Event::ReExtractFailed
                        }
                    }
                }
                Phase::Merge => match (ctx.validated.take(), ctx.supplement.take()) {
                    (Some(primary), Some(supplement)) => {
                        ctx.validated = Some(merge_validated(primary, supplement));
                        Event::Merged
                    }
                    _ => Event::Abort,
                },
                Phase::Done | Phase::Failed(_) => break,
            };

            let next = transition(machine, event);
            debug!("Extraction transition {:?} --{:?}--> {:?}", machine.phase, event, next.phase);
            machine = next;
        }

        let latency_ms = started.elapsed().as_millis() as u64;
        match (machine.phase, ctx.validated.take(), ctx.report.take()) {
            (Phase::Done, Some(validated), Some(report)) => {
                let success = self.assemble(
                    &corpus,
                    validated,
                    report,
                    ctx.usage,
                    ctx.warnings,
                    latency_ms,
                    &machine,
                );
                info!(
                    "Extraction finished in {}ms: {}% complete, {} retries, re-extraction={}",
                    latency_ms,
                    success.completeness.completeness_percentage,
                    success.retry_count,
                    success.re_extraction_performed
                );
                Ok(success)
            }
            (phase, _, _) => {
                let code = match phase {
                    Phase::Failed(code) => code,
                    _ => FailureCode::Generic,
                };
                let failure = ExtractionFailure {
                    code,
                    message: self.failure_message(code, &machine, &ctx),
                    latency_ms,
                    retry_count: machine.retry_count(),
                    validation_errors: if code == FailureCode::ValidationFailed {
                        ctx.last_errors
                    } else {
                        Vec::new()
                    },
                };
                warn!(
                    "Extraction failed after {}ms with {} retries: {}",
                    latency_ms, failure.retry_count, failure.message
                );
                Err(failure)
            }
        }
    }

    fn preflight(&self) -> Event {
        if !self.settings.enabled {
            Event::Disabled
        } else if !self.client.is_configured() {
            Event::Unconfigured
        } else {
            Event::PreflightPassed
        }
    }

    /// Few-shot examples and problem fields. Store failures degrade to the
    /// built-in examples so extraction never depends on the feedback database.
    async fn load_feedback(
        &self,
        request: &ExtractionRequest,
        corpus: &PackedCorpus,
        ctx: &mut RunContext,
    ) -> (Vec<FewShotExample>, Vec<FieldAccuracy>) {
        let tenant = request
            .tenant_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());
        let (Some(store), Some(tenant)) = (&self.feedback, tenant) else {
            let limit = self
                .feedback
                .as_ref()
                .map_or(DEFAULT_EXAMPLE_LIMIT, |s| s.example_limit());
            return (builtin_examples(limit), Vec::new());
        };

        let context: String = corpus
            .all_lines()
            .iter()
            .take(FEEDBACK_CONTEXT_LINES)
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let examples = match store
            .get_relevant_examples(tenant, &context, request.target_fields.as_deref())
            .await
        {
            Ok(examples) => examples,
            Err(e) => {
                warn!("Few-shot retrieval failed for tenant {tenant}, using built-ins: {e}");
                ctx.warnings
                    .push("Feedback store unavailable; built-in examples used".to_string());
                builtin_examples(store.example_limit())
            }
        };
        let problems = match store.get_problematic_fields(tenant).await {
            Ok(problems) => problems,
            Err(e) => {
                warn!("Problem-field lookup failed for tenant {tenant}: {e}");
                Vec::new()
            }
        };
        (examples, problems)
    }

    async fn backoff(&self, attempts_made: u32) {
        let delay = self
            .settings
            .retry_base_delay
            .saturating_mul(2u32.saturating_pow(attempts_made.saturating_sub(1)));
        if !delay.is_zero() {
            debug!("Backing off {:?} before the next attempt", delay);
            tokio::time::sleep(delay).await;
        }
    }

    /// One completion round trip. Unparseable JSON is reported as a
    /// retryable `LlmError::Parse`.
    async fn call_json(
        &self,
        request: &CompletionRequest,
        usage: &mut TokenUsage,
    ) -> Result<(String, Value), LlmError> {
        let completion = self.client.complete(request).await?;
        usage.add(completion.usage);
        if completion.content.trim().is_empty() {
            return Err(LlmError::EmptyContent);
        }
        let value: Value = serde_json::from_str(&completion.content)?;
        Ok((completion.content, value))
    }

    /// The narrow follow-up call. Errors are returned as warning text.
    async fn reextract(
        &self,
        system: &str,
        missing: &[MissingLine],
        vctx: &ValidationContext<'_>,
        usage: &mut TokenUsage,
    ) -> Result<ValidatedResponse, String> {
        let request = CompletionRequest {
            system: system.to_string(),
            user: build_reextraction_prompt(missing),
            max_tokens: self.settings.reextract_max_tokens,
            timeout: self.settings.timeout,
        };

        let attempts = self.settings.max_transport_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            if attempt > 1 {
                self.backoff(attempt - 1).await;
            }
            match self.call_json(&request, usage).await {
                Ok((_, value)) => {
                    return match validate_response(value, vctx) {
                        ValidationOutcome::Valid(validated) => Ok(validated),
                        ValidationOutcome::Invalid(errors) => Err(format!(
                            "Re-extraction response failed validation with {} errors",
                            errors.len()
                        )),
                    };
                }
                Err(e) => {
                    warn!("Re-extraction attempt {attempt}/{attempts} failed: {e}");
                    let retryable = e.is_retryable();
                    last_error = e.to_string();
                    if !retryable {
                        break;
                    }
                }
            }
        }
        Err(format!("Re-extraction failed: {last_error}"))
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        &self,
        corpus: &PackedCorpus,
        validated: ValidatedResponse,
        report: CompletenessReport,
        usage: TokenUsage,
        mut warnings: Vec<String>,
        latency_ms: u64,
        machine: &MachineState,
    ) -> ExtractionSuccess {
        let ValidatedResponse {
            response,
            corrections,
            flagged_fields,
        } = validated;

        let field_confidences = score_fields(corpus, &response, &flagged_fields, &self.weights);
        let mut needs_review_fields: Vec<String> = Vec::new();
        let review = field_confidences
            .iter()
            .filter(|f| f.status != ConfidenceStatus::Autofill)
            .map(|f| f.field.clone())
            .chain(flagged_fields.iter().map(|f| f.field.clone()));
        for field in review {
            if !needs_review_fields.contains(&field) {
                needs_review_fields.push(field);
            }
        }

        if !report.is_complete {
            warnings.push(format!(
                "{} significant lines are not accounted for ({}% complete)",
                report.missing_lines.len(),
                report.completeness_percentage
            ));
        }
        if !report.unknown_references.is_empty() {
            warnings.push(format!(
                "Response cited {} line ids that are not in the document: {}",
                report.unknown_references.len(),
                report.unknown_references.join(", ")
            ));
        }
        if report.token_limit_reached {
            warnings.push("Corpus is close to the token cap".to_string());
        }

        ExtractionSuccess {
            thought_process: response.thought_process,
            extracted_data: response.extracted_data,
            unmapped_segments: response.unmapped_segments,
            metadata: response.metadata,
            auto_corrections: corrections,
            flagged_fields,
            field_confidences,
            needs_review_fields,
            warnings,
            token_usage: usage,
            latency_ms,
            retry_count: machine.retry_count(),
            re_extraction_performed: machine.reextracted,
            is_data_complete: report.is_complete,
            completeness: report,
        }
    }

    fn failure_message(&self, code: FailureCode, machine: &MachineState, ctx: &RunContext) -> String {
        match code {
            FailureCode::Disabled => "Extraction is disabled".to_string(),
            FailureCode::Unconfigured => LlmError::Unconfigured.to_string(),
            FailureCode::ValidationFailed => format!(
                "Response failed schema validation after {} corrective retries ({} errors)",
                machine.validation_retries,
                ctx.last_errors.len()
            ),
            _ => match &ctx.last_call_error {
                Some(e) => format!("LLM call failed after {} attempts: {e}", machine.call_attempts),
                None => "Extraction aborted in an unexpected state".to_string(),
            },
        }
    }
}

fn merge_validated(primary: ValidatedResponse, supplement: ValidatedResponse) -> ValidatedResponse {
    let response = merge_responses(&primary.response, &supplement.response);
    let mut corrections = primary.corrections;
    corrections.extend(supplement.corrections);
    let mut flagged_fields = primary.flagged_fields;
    for flag in supplement.flagged_fields {
        if !flagged_fields.contains(&flag) {
            flagged_fields.push(flag);
        }
    }
    ValidatedResponse {
        response,
        corrections,
        flagged_fields,
    }
}
