use chrono::{DateTime, Utc};
use conv_core::{
    Checkpoint, DriftAnalysis, FailureRecord, Intent, LossEntry, PipelineRun, RunStatus, StageName, StageStatus,
    VerificationMode, VerificationResult,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageSummary {
    pub stage: StageName,
    pub status: StageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

/// `reports/summary.json`: the durable, machine-readable record of a run.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RunSummary {
    pub scenario: String,
    pub run_id: String,
    pub run_label: String,
    pub intent: Intent,
    pub verification_mode: VerificationMode,
    pub status: RunStatus,
    pub exit_code: i32,
    pub semantic_diff: Vec<LossEntry>,
    #[serde(default)]
    pub drift: Option<DriftAnalysis>,
    #[serde(default)]
    pub verification: Option<VerificationResult>,
    pub stages: Vec<StageSummary>,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: f64,
}

impl RunSummary {
    pub fn from_run(run: &PipelineRun, exit_code: i32, now: DateTime<Utc>) -> Self {
        let end = run.finished_at.unwrap_or(now);
        let duration_seconds = (end - run.started_at).num_milliseconds().max(0) as f64 / 1000.0;
        Self {
            scenario: run.scenario.clone(),
            run_id: run.id.to_string(),
            run_label: run.run_label.clone(),
            intent: run.intent,
            verification_mode: run.verification_mode,
            status: run.status,
            exit_code,
            semantic_diff: run.semantic_diff.as_ref().map(|r| r.entries.clone()).unwrap_or_default(),
            drift: run.semantic_diff.as_ref().map(|r| r.drift.clone()),
            verification: run.verification.clone(),
            stages: run
                .stages
                .iter()
                .map(|s| StageSummary {
                    stage: s.stage,
                    status: s.status,
                    started_at: s.started_at,
                    finished_at: s.finished_at,
                    error: s.error.clone(),
                })
                .collect(),
            checkpoint: run.checkpoint.clone(),
            failure: run.failure.clone(),
            started_at: run.started_at,
            finished_at: run.finished_at,
            duration_seconds,
        }
    }

    /// The summary with every wall-clock field blanked, for comparing two runs of the same
    /// scenario.
    pub fn without_timestamps(&self) -> serde_json::Value {
        let mut v = serde_json::to_value(self).unwrap_or(serde_json::Value::Null);
        strip_volatile(&mut v);
        v
    }
}

const VOLATILE_KEYS: &[&str] =
    &["started_at", "finished_at", "created_at", "resolved_at", "duration_seconds", "run_label", "run_id", "id"];

fn strip_volatile(v: &mut serde_json::Value) {
    match v {
        serde_json::Value::Object(map) => {
            for key in VOLATILE_KEYS {
                map.remove(*key);
            }
            for child in map.values_mut() {
                strip_volatile(child);
            }
        }
        serde_json::Value::Array(items) => items.iter_mut().for_each(strip_volatile),
        _ => {}
    }
}
