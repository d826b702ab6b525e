use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ids::*, model::*};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct StageResult {
    pub stage: StageName,
    pub status: StageStatus,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    /// Paths of artifacts written by this stage, relative to the run directory.
    #[serde(default)]
    pub artifacts: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl StageResult {
    pub fn pending(stage: StageName) -> Self {
        Self { stage, status: StageStatus::Pending, started_at: None, finished_at: None, artifacts: vec![], error: None }
    }

    pub fn skipped(stage: StageName) -> Self {
        Self { status: StageStatus::Skipped, ..Self::pending(stage) }
    }
}

/// Why a run ended in `failed`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FailureRecord {
    pub class: String,
    pub message: String,
    pub exit_code: i32,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    pub id: RunId,
    pub scenario: String,
    pub intent: Intent,
    pub verification_mode: VerificationMode,
    /// Directory name of the run under `runs/<scenario>/`.
    pub run_label: String,
    pub status: RunStatus,
    pub stages: Vec<StageResult>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checkpoint: Option<Checkpoint>,
    #[serde(default)]
    pub semantic_diff: Option<SemanticDiffReport>,
    #[serde(default)]
    pub verification: Option<VerificationResult>,
    #[serde(default)]
    pub failure: Option<FailureRecord>,
    /// Number of times this run has been picked back up after an interrupt or checkpoint pause.
    #[serde(default)]
    pub resumes: u32,
}

impl PipelineRun {
    /// Every stage in canonical order; stages outside `required` start out skipped.
    pub fn new(
        scenario: impl Into<String>,
        intent: Intent,
        verification_mode: VerificationMode,
        required: &[StageName],
        run_label: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        let stages = StageName::ORDER
            .iter()
            .map(|s| if required.contains(s) { StageResult::pending(*s) } else { StageResult::skipped(*s) })
            .collect();
        Self {
            id: RunId::new(),
            scenario: scenario.into(),
            intent,
            verification_mode,
            run_label: run_label.into(),
            status: RunStatus::Running,
            stages,
            started_at,
            finished_at: None,
            checkpoint: None,
            semantic_diff: None,
            verification: None,
            failure: None,
            resumes: 0,
        }
    }

    pub fn stage(&self, name: StageName) -> Option<&StageResult> {
        self.stages.iter().find(|s| s.stage == name)
    }

    pub fn stage_mut(&mut self, name: StageName) -> Option<&mut StageResult> {
        self.stages.iter_mut().find(|s| s.stage == name)
    }

    pub fn stage_status(&self, name: StageName) -> Option<StageStatus> {
        self.stage(name).map(|s| s.status)
    }

    /// Last stage that reached `done`, in canonical order.
    pub fn last_completed_stage(&self) -> Option<StageName> {
        self.stages.iter().filter(|s| s.status == StageStatus::Done).map(|s| s.stage).last()
    }
}

/// One unit of meaning lost or changed during conversion.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LossEntry {
    pub category: String,
    pub description: String,
    pub severity: Severity,
    pub source_construct: String,
    pub target_construct: String,
    /// False when the category is outside the controlled vocabulary.
    pub known: bool,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct DriftAnalysis {
    pub lost_categories: usize,
    pub high_severity_losses: usize,
    pub unknown_categories: usize,
    pub requires_checkpoint: bool,
    #[serde(default)]
    pub reasons: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct SemanticDiffReport {
    pub entries: Vec<LossEntry>,
    pub drift: DriftAnalysis,
}

/// Comparison key for a loss category: trimmed, lowercase, with `_` and spaces read as `-`.
pub fn category_key(raw: &str) -> String {
    raw.trim().chars().map(|c| if c == '_' || c == ' ' { '-' } else { c.to_ascii_lowercase() }).collect()
}

impl SemanticDiffReport {
    /// One spelling per category key, the first one reported.
    pub fn distinct_categories(&self) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        self.entries
            .iter()
            .filter(|e| seen.insert(category_key(&e.category)))
            .map(|e| e.category.clone())
            .collect()
    }

    pub fn has_category(&self, raw: &str) -> bool {
        let key = category_key(raw);
        self.entries.iter().any(|e| category_key(&e.category) == key)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub run_id: RunId,
    pub stage: StageName,
    pub risk_description: String,
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub resolved_at: Option<DateTime<Utc>>,
    /// Operator note attached on reject or override.
    #[serde(default)]
    pub resolution_note: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VectorOutcome {
    pub index: usize,
    pub function: String,
    pub inputs: Vec<serde_json::Value>,
    pub expected: serde_json::Value,
    #[serde(default)]
    pub actual: Option<String>,
    pub matched: bool,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FileDiffKind {
    MissingInTarget,
    UnexpectedInTarget,
    ContentMismatch,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct FileDiff {
    pub path: String,
    pub kind: FileDiffKind,
    #[serde(default)]
    pub unified: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct VerificationResult {
    pub mode: VerificationMode,
    pub passed: bool,
    #[serde(default)]
    pub vectors: Vec<VectorOutcome>,
    #[serde(default)]
    pub files: Vec<FileDiff>,
    /// Failures that belong to neither a vector nor a file: compile checks, timeouts, missing inputs.
    #[serde(default)]
    pub issues: Vec<VerificationFailure>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl VerificationResult {
    pub fn failures(&self) -> Vec<VerificationFailure> {
        let mut out: Vec<VerificationFailure> = self
            .vectors
            .iter()
            .filter(|v| !v.matched)
            .map(|v| VerificationFailure::Vector {
                function: v.function.clone(),
                expected: v.expected.to_string(),
                actual: v.actual.clone().or_else(|| v.error.clone()).unwrap_or_default(),
            })
            .collect();
        out.extend(self.files.iter().map(|f| VerificationFailure::File { path: f.path.clone(), kind: f.kind }));
        out.extend(self.issues.iter().cloned());
        out
    }
}

/// Structured failure carried by `ConvError::VerificationFailed`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "failure", rename_all = "snake_case")]
pub enum VerificationFailure {
    Vector { function: String, expected: String, actual: String },
    File { path: String, kind: FileDiffKind },
    CompileCheck { message: String },
    Expectation { message: String },
    Idempotency { change: String },
}

impl std::fmt::Display for VerificationFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VerificationFailure::Vector { function, expected, actual } => {
                write!(f, "vector {function}: expected {expected}, got {actual}")
            }
            VerificationFailure::File { path, kind } => write!(f, "{path}: {kind:?}"),
            VerificationFailure::CompileCheck { message } => write!(f, "compile check: {message}"),
            VerificationFailure::Expectation { message } => write!(f, "expectation: {message}"),
            VerificationFailure::Idempotency { change } => write!(f, "idempotency: {change}"),
        }
    }
}

/// Added/removed/modified relative paths between two tree snapshots.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeDelta {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub modified: Vec<String>,
}

impl TreeDelta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.modified.is_empty()
    }

    pub fn summary(&self) -> String {
        format!("{} added, {} removed, {} modified", self.added.len(), self.removed.len(), self.modified.len())
    }

    /// One `ADDED: path` style line per change.
    pub fn lines(&self) -> Vec<String> {
        let mut out = Vec::with_capacity(self.added.len() + self.removed.len() + self.modified.len());
        out.extend(self.added.iter().map(|p| format!("ADDED: {p}")));
        out.extend(self.removed.iter().map(|p| format!("DELETED: {p}")));
        out.extend(self.modified.iter().map(|p| format!("MODIFIED: {p}")));
        out
    }
}
