//! Approval gate for lossy or irreversible transformations.
//!
//! A checkpoint is state on the run, not a blocking prompt: opening one parks the run in
//! `awaiting_checkpoint`, and resolution is a separate call made by an operator command or by
//! the auto-approve driver.

use chrono::{DateTime, Utc};
use conv_core::{Checkpoint, CheckpointId, CheckpointStatus, ConvError, FailureRecord, PipelineRun, RunStatus, StageName};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CheckpointError {
    #[error("run has no checkpoint")]
    NoCheckpoint,
    #[error("checkpoint {id} is already {status:?}")]
    AlreadyResolved { id: String, status: CheckpointStatus },
    #[error("checkpoint id mismatch: run has {actual}, got {given}")]
    IdMismatch { actual: String, given: String },
    #[error("an override needs a non-empty reason")]
    EmptyReason,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Resolution {
    Approve,
    Reject { reason: Option<String> },
    /// Approval that records why the operator accepted a flagged risk.
    Override { reason: String },
}

/// Record a pending checkpoint for `stage` and park the run.
pub fn open(run: &mut PipelineRun, stage: StageName, risk_description: impl Into<String>, now: DateTime<Utc>) -> Checkpoint {
    let cp = Checkpoint {
        id: CheckpointId::new(),
        run_id: run.id.clone(),
        stage,
        risk_description: risk_description.into(),
        status: CheckpointStatus::Pending,
        created_at: now,
        resolved_at: None,
        resolution_note: None,
    };
    info!(run = %run.id, checkpoint = %cp.id, stage = %stage, "checkpoint opened");
    run.checkpoint = Some(cp.clone());
    conv_core::pause_for_checkpoint(run);
    cp
}

pub fn is_pending(run: &PipelineRun) -> bool {
    run.checkpoint.as_ref().is_some_and(|c| c.status == CheckpointStatus::Pending)
}

/// True when the checkpoint for `stage` exists and was approved.
pub fn is_approved(run: &PipelineRun, stage: StageName) -> bool {
    run.checkpoint.as_ref().is_some_and(|c| c.stage == stage && c.status == CheckpointStatus::Approved)
}

/// Resolve the run's pending checkpoint. Rejection fails the run; artifacts already written to
/// the target stay where they are.
pub fn resolve(
    run: &mut PipelineRun,
    id: Option<&str>,
    resolution: Resolution,
    now: DateTime<Utc>,
) -> Result<CheckpointStatus, CheckpointError> {
    let cp = run.checkpoint.as_mut().ok_or(CheckpointError::NoCheckpoint)?;
    if let Some(given) = id {
        if given != cp.id.as_str() {
            return Err(CheckpointError::IdMismatch { actual: cp.id.to_string(), given: given.to_string() });
        }
    }
    if cp.status != CheckpointStatus::Pending {
        return Err(CheckpointError::AlreadyResolved { id: cp.id.to_string(), status: cp.status });
    }
    let (status, note) = match resolution {
        Resolution::Approve => (CheckpointStatus::Approved, None),
        Resolution::Override { reason } => {
            if reason.trim().is_empty() {
                return Err(CheckpointError::EmptyReason);
            }
            (CheckpointStatus::Approved, Some(format!("override: {}", reason.trim())))
        }
        Resolution::Reject { reason } => (CheckpointStatus::Rejected, reason),
    };
    cp.status = status;
    cp.resolved_at = Some(now);
    cp.resolution_note = note.clone();
    let cp_id = cp.id.to_string();

    if status == CheckpointStatus::Rejected {
        let err = ConvError::CheckpointRejected { checkpoint_id: cp_id.clone(), reason: note };
        warn!(run = %run.id, checkpoint = %cp_id, "checkpoint rejected");
        if let Some(stage) = run.stages.iter_mut().find(|s| s.status == conv_core::StageStatus::Running) {
            stage.status = conv_core::StageStatus::Failed;
            stage.error = Some(err.to_string());
            stage.finished_at = Some(now);
        }
        run.failure = Some(FailureRecord { class: err.kind().to_string(), message: err.to_string(), exit_code: err.exit_code() });
        run.status = RunStatus::Failed;
        run.finished_at = Some(now);
    } else {
        info!(run = %run.id, checkpoint = %cp_id, "checkpoint approved");
    }
    Ok(status)
}

/// Markdown approval packet for a pending checkpoint.
pub fn format_packet(scenario: &str, cp: &Checkpoint, reasons: &[String]) -> String {
    let mut s = String::new();
    s.push_str(&format!("# CHECKPOINT: {}\n\n", cp.id.as_str()));
    s.push_str(&format!("**Scenario:** {scenario}  \n**Stage:** {}  \n**Status:** {:?}\n\n", cp.stage, cp.status));
    s.push_str(&format!("**Risk:** {}\n\n", cp.risk_description));
    if !reasons.is_empty() {
        s.push_str("## Why\n");
        for r in reasons {
            s.push_str(&format!("- {r}\n"));
        }
        s.push('\n');
    }
    s.push_str("## Options\n");
    s.push_str(&format!("- [1] approve: `conv approve --scenario {scenario}`\n"));
    s.push_str(&format!("- [2] reject: `conv reject --scenario {scenario} --reason <why>`\n"));
    s.push_str(&format!("- [3] override: `conv override --scenario {scenario} --reason <why>`\n\n"));
    s.push_str("**If approved:** the run resumes after the gated stage on the next `conv run`.\n");
    if let Some(note) = &cp.resolution_note {
        s.push_str(&format!("\n**Resolution note:** {note}\n"));
    }
    s
}

#[cfg(test)]
mod tests {
    use super::*;
    use conv_core::{Intent, VerificationMode};

    fn run() -> PipelineRun {
        let mut r = PipelineRun::new("s", Intent::HighToLowLevel, VerificationMode::VectorsOnly, &StageName::ORDER, "l", Utc::now());
        conv_core::begin_stage(&mut r, StageName::SemanticMapping, Utc::now()).unwrap();
        conv_core::complete_stage(&mut r, StageName::SemanticMapping, Utc::now(), vec![]).unwrap();
        r
    }

    #[test]
    fn open_parks_the_run() {
        let mut r = run();
        let cp = open(&mut r, StageName::Realize, "lossy lowering", Utc::now());
        assert_eq!(r.status, RunStatus::AwaitingCheckpoint);
        assert!(is_pending(&r));
        assert_eq!(cp.status, CheckpointStatus::Pending);
        assert!(!is_approved(&r, StageName::Realize));
    }

    #[test]
    fn approve_then_double_resolve_fails() {
        let mut r = run();
        open(&mut r, StageName::Realize, "risk", Utc::now());
        assert_eq!(resolve(&mut r, None, Resolution::Approve, Utc::now()), Ok(CheckpointStatus::Approved));
        assert!(is_approved(&r, StageName::Realize));
        assert!(matches!(
            resolve(&mut r, None, Resolution::Approve, Utc::now()),
            Err(CheckpointError::AlreadyResolved { .. })
        ));
    }

    #[test]
    fn reject_fails_the_run_with_reason() {
        let mut r = run();
        open(&mut r, StageName::Realize, "risk", Utc::now());
        resolve(&mut r, None, Resolution::Reject { reason: Some("too lossy".into()) }, Utc::now()).unwrap();
        assert_eq!(r.status, RunStatus::Failed);
        let failure = r.failure.as_ref().unwrap();
        assert_eq!(failure.class, "checkpoint_rejected");
        assert_eq!(failure.exit_code, conv_core::EXIT_CHECKPOINT_REJECTED);
        assert!(failure.message.contains("too lossy"));
    }

    #[test]
    fn override_requires_reason_and_records_it() {
        let mut r = run();
        let cp = open(&mut r, StageName::Realize, "risk", Utc::now());
        assert_eq!(
            resolve(&mut r, None, Resolution::Override { reason: "  ".into() }, Utc::now()),
            Err(CheckpointError::EmptyReason)
        );
        assert!(matches!(
            resolve(&mut r, Some("other"), Resolution::Approve, Utc::now()),
            Err(CheckpointError::IdMismatch { .. })
        ));
        resolve(&mut r, Some(cp.id.as_str()), Resolution::Override { reason: "reviewed by hand".into() }, Utc::now()).unwrap();
        let note = r.checkpoint.as_ref().and_then(|c| c.resolution_note.clone()).unwrap();
        assert_eq!(note, "override: reviewed by hand");
    }

    #[test]
    fn packet_lists_options() {
        let mut r = run();
        let cp = open(&mut r, StageName::Realize, "RAII removed", Utc::now());
        let md = format_packet("lower", &cp, &["5 distinct loss categories".to_string()]);
        assert!(md.starts_with(&format!("# CHECKPOINT: {}\n", cp.id)));
        assert!(md.contains("**Risk:** RAII removed"));
        assert!(md.contains("- 5 distinct loss categories"));
        assert!(md.contains("conv approve --scenario lower"));
    }
}
