use std::path::PathBuf;
use std::time::Duration;

use conv_core::{
    Checkpoint, ConvError, FailureRecord, PipelineRun, RunStatus, EXIT_AWAITING_CHECKPOINT, EXIT_INTERNAL,
    EXIT_INTERRUPTED, EXIT_OK,
};
use serde::Serialize;

/// Operator switches for one `conv run`.
#[derive(Clone, Debug, Default)]
pub struct RunOptions {
    /// Wipe the target and ignore any resumable run.
    pub force_clean: bool,
    /// Leave seeded target contents in place on a fresh run.
    pub keep_target: bool,
    /// Replay the scenario's recorded backend responses instead of the configured command.
    pub no_ai: bool,
    pub interrupt_after: Option<Duration>,
    pub update_golden: bool,
    pub auto_approve: bool,
    pub idempotency_check: bool,
}

/// What a run ended as, for the command surface.
#[derive(Clone, Debug, Serialize)]
pub struct RunOutcome {
    pub scenario: String,
    pub run_label: String,
    pub run_dir: PathBuf,
    pub status: RunStatus,
    pub exit_code: i32,
    pub resumed: bool,
    pub failure: Option<FailureRecord>,
    pub checkpoint: Option<Checkpoint>,
}

pub fn failure_record(err: &anyhow::Error) -> FailureRecord {
    match err.downcast_ref::<ConvError>() {
        Some(c) => FailureRecord { class: c.kind().to_string(), message: c.to_string(), exit_code: c.exit_code() },
        None => FailureRecord { class: "internal".to_string(), message: format!("{err:#}"), exit_code: EXIT_INTERNAL },
    }
}

pub fn exit_code_for(run: &PipelineRun) -> i32 {
    match run.status {
        RunStatus::Passed => EXIT_OK,
        RunStatus::AwaitingCheckpoint => EXIT_AWAITING_CHECKPOINT,
        RunStatus::Interrupted => EXIT_INTERRUPTED,
        RunStatus::Failed => run.failure.as_ref().map(|f| f.exit_code).unwrap_or(EXIT_INTERNAL),
        RunStatus::Running => EXIT_INTERNAL,
    }
}
