use thiserror::Error;

use crate::model::{Intent, StageName};
use crate::types::{TreeDelta, VerificationFailure};

pub const EXIT_OK: i32 = 0;
pub const EXIT_INTERNAL: i32 = 1;
pub const EXIT_SCENARIO: i32 = 2;
pub const EXIT_SOURCE_MUTATION: i32 = 3;
pub const EXIT_CHECKPOINT_REJECTED: i32 = 4;
pub const EXIT_VERIFICATION: i32 = 5;
pub const EXIT_DISCLOSURE: i32 = 6;
pub const EXIT_TIMEOUT: i32 = 7;
pub const EXIT_BACKEND: i32 = 8;
pub const EXIT_BUSY: i32 = 9;
pub const EXIT_AWAITING_CHECKPOINT: i32 = 10;
pub const EXIT_INTERRUPTED: i32 = 130;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    Scenario,
    SourceMutation,
    CheckpointRejected,
    Verification,
    Disclosure,
    Timeout,
    Backend,
    Busy,
}

#[derive(Debug, Error)]
pub enum ConvError {
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    #[error("scenario {name} is malformed: {reason}")]
    ScenarioMalformed { name: String, reason: String },

    #[error("unknown intent: {0:?}")]
    UnknownIntent(String),

    #[error("source repository was mutated during the run ({})", .delta.summary())]
    SourceMutationDetected { delta: TreeDelta },

    #[error("checkpoint {checkpoint_id} rejected{}", .reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    CheckpointRejected { checkpoint_id: String, reason: Option<String> },

    #[error("backend claims zero semantic loss for lossy intent {intent}")]
    ImplausibleZeroLossClaim { intent: Intent },

    #[error("semantic diff discloses {found} loss categories, {required} required{}", fmt_missing(.missing))]
    InsufficientLossDisclosure { required: usize, found: usize, missing: Vec<String> },

    #[error("verification failed with {} failure(s)", .failures.len())]
    VerificationFailed { failures: Vec<VerificationFailure> },

    #[error("backend invocation failed at stage {stage}: {reason}")]
    BackendInvocationFailed { stage: StageName, reason: String },

    #[error("target path is busy: lock {lock} held by {holder}")]
    TargetPathBusy { lock: String, holder: String },

    #[error("{what} timed out after {seconds}s")]
    Timeout { what: String, seconds: u64 },
}

fn fmt_missing(missing: &[String]) -> String {
    if missing.is_empty() {
        String::new()
    } else {
        format!(" (missing: {})", missing.join(", "))
    }
}

impl ConvError {
    pub fn class(&self) -> ErrorClass {
        match self {
            ConvError::ScenarioNotFound(_) | ConvError::ScenarioMalformed { .. } | ConvError::UnknownIntent(_) => {
                ErrorClass::Scenario
            }
            ConvError::SourceMutationDetected { .. } => ErrorClass::SourceMutation,
            ConvError::CheckpointRejected { .. } => ErrorClass::CheckpointRejected,
            ConvError::ImplausibleZeroLossClaim { .. } | ConvError::InsufficientLossDisclosure { .. } => {
                ErrorClass::Disclosure
            }
            ConvError::VerificationFailed { .. } => ErrorClass::Verification,
            ConvError::BackendInvocationFailed { .. } => ErrorClass::Backend,
            ConvError::TargetPathBusy { .. } => ErrorClass::Busy,
            ConvError::Timeout { .. } => ErrorClass::Timeout,
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Scenario => EXIT_SCENARIO,
            ErrorClass::SourceMutation => EXIT_SOURCE_MUTATION,
            ErrorClass::CheckpointRejected => EXIT_CHECKPOINT_REJECTED,
            ErrorClass::Verification => EXIT_VERIFICATION,
            ErrorClass::Disclosure => EXIT_DISCLOSURE,
            ErrorClass::Timeout => EXIT_TIMEOUT,
            ErrorClass::Backend => EXIT_BACKEND,
            ErrorClass::Busy => EXIT_BUSY,
        }
    }

    /// Stable snake_case name used in summaries and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ConvError::ScenarioNotFound(_) => "scenario_not_found",
            ConvError::ScenarioMalformed { .. } => "scenario_malformed",
            ConvError::UnknownIntent(_) => "unknown_intent",
            ConvError::SourceMutationDetected { .. } => "source_mutation_detected",
            ConvError::CheckpointRejected { .. } => "checkpoint_rejected",
            ConvError::ImplausibleZeroLossClaim { .. } => "implausible_zero_loss_claim",
            ConvError::InsufficientLossDisclosure { .. } => "insufficient_loss_disclosure",
            ConvError::VerificationFailed { .. } => "verification_failed",
            ConvError::BackendInvocationFailed { .. } => "backend_invocation_failed",
            ConvError::TargetPathBusy { .. } => "target_path_busy",
            ConvError::Timeout { .. } => "timeout",
        }
    }
}
