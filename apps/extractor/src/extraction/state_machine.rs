//! Extraction state machine.
//!
//! ```text
//! PREFLIGHT → PROMPT_BUILD → CALL → VALIDATE → (VALIDATION_RETRY → CALL → VALIDATE)*
//!   → COMPLETENESS_CHECK → (RE_EXTRACT → MERGE → COMPLETENESS_CHECK)? → DONE | FAILED
//! ```
//!
//! `transition` is pure: the orchestrator performs the side effect for the
//! current phase, reports the outcome as an `Event`, and moves on with the
//! returned state. Every retry path is bounded by `RetryBudget`, and
//! re-extraction happens at most once.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailureCode {
    Disabled,
    Unconfigured,
    ValidationFailed,
    AuthFailed,
    Timeout,
    RateLimited,
    Generic,
}

impl fmt::Display for FailureCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FailureCode::Disabled => "disabled",
            FailureCode::Unconfigured => "unconfigured",
            FailureCode::ValidationFailed => "validation-failed",
            FailureCode::AuthFailed => "auth-failed",
            FailureCode::Timeout => "timeout",
            FailureCode::RateLimited => "rate-limited",
            FailureCode::Generic => "generic",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Preflight,
    PromptBuild,
    Call,
    Validate,
    ValidationRetry,
    CompletenessCheck,
    ReExtract,
    Merge,
    Done,
    Failed(FailureCode),
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    PreflightPassed,
    Disabled,
    Unconfigured,
    PromptBuilt,
    CallSucceeded,
    CallFailed { retryable: bool, code: FailureCode },
    ResponseValid,
    ResponseInvalid,
    Complete,
    Incomplete,
    ReExtractFinished,
    ReExtractFailed,
    Merged,
    /// An internal invariant broke; ends the run as a generic failure.
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    /// Attempts per logical call, the first one included.
    pub max_call_attempts: u32,
    /// Corrective re-prompts after a structural validation failure.
    pub max_validation_retries: u32,
}

impl Default for RetryBudget {
    fn default() -> Self {
        Self {
            max_call_attempts: 3,
            max_validation_retries: 2,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MachineState {
    pub phase: Phase,
    /// Attempts spent on the current logical call.
    pub call_attempts: u32,
    /// Calls made over the whole run, primary and corrective.
    pub total_calls: u32,
    pub validation_retries: u32,
    pub reextracted: bool,
    pub budget: RetryBudget,
}

impl MachineState {
    pub fn new(budget: RetryBudget) -> Self {
        Self {
            phase: Phase::Preflight,
            call_attempts: 0,
            total_calls: 0,
            validation_retries: 0,
            reextracted: false,
            budget,
        }
    }

    /// Calls beyond the first.
    pub fn retry_count(&self) -> u32 {
        self.total_calls.saturating_sub(1)
    }

    fn at(self, phase: Phase) -> Self {
        Self { phase, ..self }
    }
}

pub fn transition(state: MachineState, event: Event) -> MachineState {
    use Phase::*;

    if state.phase.is_terminal() {
        return state;
    }

    match (state.phase, event) {
        (_, Event::Abort) => state.at(Failed(FailureCode::Generic)),

        (Preflight, Event::PreflightPassed) => state.at(PromptBuild),
        (Preflight, Event::Disabled) => state.at(Failed(FailureCode::Disabled)),
        (Preflight, Event::Unconfigured) => state.at(Failed(FailureCode::Unconfigured)),

        (PromptBuild | ValidationRetry, Event::PromptBuilt) => MachineState {
            phase: Call,
            call_attempts: 0,
            ..state
        },

        (Call, Event::CallSucceeded) => MachineState {
            phase: Validate,
            call_attempts: state.call_attempts + 1,
            total_calls: state.total_calls + 1,
            ..state
        },
        (Call, Event::CallFailed { retryable, code }) => {
            let attempts = state.call_attempts + 1;
            let next = MachineState {
                call_attempts: attempts,
                total_calls: state.total_calls + 1,
                ..state
            };
            if retryable && attempts < state.budget.max_call_attempts {
                next.at(Call)
            } else {
                next.at(Failed(code))
            }
        }

        (Validate, Event::ResponseValid) => state.at(CompletenessCheck),
        (Validate, Event::ResponseInvalid) => {
            if state.validation_retries < state.budget.max_validation_retries {
                MachineState {
                    phase: ValidationRetry,
                    validation_retries: state.validation_retries + 1,
                    ..state
                }
            } else {
                state.at(Failed(FailureCode::ValidationFailed))
            }
        }

        (CompletenessCheck, Event::Complete) => state.at(Done),
        (CompletenessCheck, Event::Incomplete) => {
            if state.reextracted {
                state.at(Done)
            } else {
                MachineState {
                    phase: ReExtract,
                    reextracted: true,
                    ..state
                }
            }
        }

        (ReExtract, Event::ReExtractFinished) => state.at(Merge),
        (ReExtract, Event::ReExtractFailed) => state.at(Done),
        (Merge, Event::Merged) => state.at(CompletenessCheck),

        _ => state.at(Failed(FailureCode::Generic)),
    }
}
