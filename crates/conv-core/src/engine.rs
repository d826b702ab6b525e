//! Pure stage-transition rules for a [`PipelineRun`].
//!
//! The runner owns all I/O: it calls one of these functions, persists the run, and only then
//! executes the stage body. Keeping the rules here makes them testable without a filesystem.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::{PipelineRun, RunStatus, StageName, StageStatus};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TransitionError {
    #[error("stage {stage} cannot start before {blocked_by} is done")]
    OutOfOrder { stage: StageName, blocked_by: StageName },
    #[error("stage {stage} is not running")]
    NotRunning { stage: StageName },
    #[error("stage {0} is not part of this run")]
    UnknownStage(StageName),
    #[error("run is already {0:?}")]
    Terminal(RunStatus),
}

/// First stage that still needs to execute, in canonical order.
pub fn next_stage(run: &PipelineRun) -> Option<StageName> {
    run.stages.iter().find(|s| !s.status.is_settled()).map(|s| s.stage)
}

pub fn all_settled(run: &PipelineRun) -> bool {
    next_stage(run).is_none()
}

/// Mark `stage` running. Every earlier stage must already be done or skipped.
pub fn begin_stage(run: &mut PipelineRun, stage: StageName, now: DateTime<Utc>) -> Result<(), TransitionError> {
    if run.status.is_terminal() {
        return Err(TransitionError::Terminal(run.status));
    }
    if let Some(blocker) = run
        .stages
        .iter()
        .take_while(|s| s.stage != stage)
        .find(|s| !s.status.is_settled())
    {
        return Err(TransitionError::OutOfOrder { stage, blocked_by: blocker.stage });
    }
    let st = run.stage_mut(stage).ok_or(TransitionError::UnknownStage(stage))?;
    st.status = StageStatus::Running;
    st.started_at = Some(now);
    st.finished_at = None;
    st.error = None;
    run.status = RunStatus::Running;
    Ok(())
}

pub fn complete_stage(
    run: &mut PipelineRun,
    stage: StageName,
    now: DateTime<Utc>,
    artifacts: Vec<String>,
) -> Result<(), TransitionError> {
    let st = run.stage_mut(stage).ok_or(TransitionError::UnknownStage(stage))?;
    if st.status != StageStatus::Running {
        return Err(TransitionError::NotRunning { stage });
    }
    st.status = StageStatus::Done;
    st.finished_at = Some(now);
    for a in artifacts {
        if !st.artifacts.contains(&a) {
            st.artifacts.push(a);
        }
    }
    Ok(())
}

/// Stage failures are always fatal to the run.
pub fn fail_stage(
    run: &mut PipelineRun,
    stage: StageName,
    now: DateTime<Utc>,
    message: impl Into<String>,
) -> Result<(), TransitionError> {
    let st = run.stage_mut(stage).ok_or(TransitionError::UnknownStage(stage))?;
    st.status = StageStatus::Failed;
    st.finished_at = Some(now);
    st.error = Some(message.into());
    run.status = RunStatus::Failed;
    Ok(())
}

/// Cancellation: the in-flight stage becomes `interrupted`, never `failed`.
pub fn interrupt(run: &mut PipelineRun, now: DateTime<Utc>) {
    if run.status.is_terminal() {
        return;
    }
    for st in run.stages.iter_mut().filter(|s| s.status == StageStatus::Running) {
        st.status = StageStatus::Interrupted;
        st.finished_at = Some(now);
    }
    run.status = RunStatus::Interrupted;
}

pub fn pause_for_checkpoint(run: &mut PipelineRun) {
    if !run.status.is_terminal() {
        run.status = RunStatus::AwaitingCheckpoint;
    }
}

/// Reopen a resumable run. Interrupted stages go back to pending so they re-execute.
pub fn prepare_resume(run: &mut PipelineRun) -> Result<(), TransitionError> {
    if run.status.is_terminal() {
        return Err(TransitionError::Terminal(run.status));
    }
    for st in run.stages.iter_mut().filter(|s| s.status == StageStatus::Interrupted) {
        st.status = StageStatus::Pending;
        st.started_at = None;
        st.finished_at = None;
    }
    run.status = RunStatus::Running;
    run.resumes += 1;
    Ok(())
}

pub fn finish(run: &mut PipelineRun, passed: bool, now: DateTime<Utc>) {
    run.status = if passed { RunStatus::Passed } else { RunStatus::Failed };
    run.finished_at = Some(now);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Intent, VerificationMode};

    fn run_with(required: &[StageName]) -> PipelineRun {
        PipelineRun::new("s", Intent::LanguageToLanguage, VerificationMode::GoldenDiff, required, "label", Utc::now())
    }

    #[test]
    fn stages_must_start_in_order() {
        let mut run = run_with(&StageName::ORDER);
        let err = begin_stage(&mut run, StageName::Overview, Utc::now()).unwrap_err();
        assert_eq!(err, TransitionError::OutOfOrder { stage: StageName::Overview, blocked_by: StageName::SemanticMapping });
    }

    #[test]
    fn skipped_stages_do_not_block() {
        let mut run = run_with(&[StageName::Realize, StageName::Verify]);
        assert_eq!(next_stage(&run), Some(StageName::Realize));
        begin_stage(&mut run, StageName::Realize, Utc::now()).unwrap();
        complete_stage(&mut run, StageName::Realize, Utc::now(), vec![]).unwrap();
        assert_eq!(next_stage(&run), Some(StageName::Verify));
    }

    #[test]
    fn interrupt_then_resume_reruns_inflight_stage() {
        let mut run = run_with(&StageName::ORDER);
        begin_stage(&mut run, StageName::SemanticMapping, Utc::now()).unwrap();
        complete_stage(&mut run, StageName::SemanticMapping, Utc::now(), vec!["artifacts/mapping.json".into()]).unwrap();
        begin_stage(&mut run, StageName::Overview, Utc::now()).unwrap();
        interrupt(&mut run, Utc::now());
        assert_eq!(run.status, RunStatus::Interrupted);
        assert_eq!(run.stage_status(StageName::Overview), Some(StageStatus::Interrupted));

        prepare_resume(&mut run).unwrap();
        assert_eq!(run.resumes, 1);
        assert_eq!(next_stage(&run), Some(StageName::Overview));
        assert_eq!(run.stage_status(StageName::SemanticMapping), Some(StageStatus::Done));
    }

    #[test]
    fn failure_is_terminal() {
        let mut run = run_with(&StageName::ORDER);
        begin_stage(&mut run, StageName::SemanticMapping, Utc::now()).unwrap();
        fail_stage(&mut run, StageName::SemanticMapping, Utc::now(), "boom").unwrap();
        assert_eq!(run.status, RunStatus::Failed);
        assert!(matches!(begin_stage(&mut run, StageName::SemanticMapping, Utc::now()), Err(TransitionError::Terminal(_))));
        assert!(prepare_resume(&mut run).is_err());
    }

    #[test]
    fn complete_requires_running() {
        let mut run = run_with(&StageName::ORDER);
        assert_eq!(
            complete_stage(&mut run, StageName::SemanticMapping, Utc::now(), vec![]),
            Err(TransitionError::NotRunning { stage: StageName::SemanticMapping })
        );
    }
}
