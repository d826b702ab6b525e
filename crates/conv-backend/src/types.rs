use std::path::{Path, PathBuf};

use async_trait::async_trait;
use conv_core::{Intent, StageName};
use conv_exec::Interrupt;
use conv_guard::TreeSnapshot;
use serde::Serialize;
use thiserror::Error;

pub const OVERVIEW_FILE: &str = "overview.md";
pub const MAPPING_FILE: &str = "mapping.json";

/// Fixed, scenario-derived context. Identical for every invocation within a scenario so backend
/// behavior is reproducible up to its own nondeterminism.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ScenarioContext {
    pub scenario: String,
    pub intent: Intent,
    pub notes: String,
    pub context_hash: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
}

#[derive(Clone, Debug, Serialize)]
pub struct StageRequest<'a> {
    pub scenario_context: &'a ScenarioContext,
    pub stage_name: StageName,
    pub source_snapshot: &'a TreeSnapshot,
    /// Where `mapping.json` and `overview.md` are expected.
    pub output_dir: PathBuf,
}

impl StageRequest<'_> {
    /// Artifact the stage must leave in `output_dir`; realize writes under the target instead.
    pub fn expected_artifact(&self) -> Option<PathBuf> {
        expected_artifact(self.stage_name, &self.output_dir)
    }
}

pub fn expected_artifact(stage: StageName, output_dir: &Path) -> Option<PathBuf> {
    match stage {
        StageName::SemanticMapping => Some(output_dir.join(MAPPING_FILE)),
        StageName::Overview => Some(output_dir.join(OVERVIEW_FILE)),
        _ => None,
    }
}

#[derive(Clone, Debug, Default)]
pub struct StageOutput {
    /// Files produced, absolute.
    pub artifacts: Vec<PathBuf>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{0}")]
    Failed(String),
    #[error("backend timed out after {0}s")]
    TimedOut(u64),
    #[error("backend interrupted")]
    Interrupted,
}

#[async_trait]
pub trait ConversionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Execute one backend stage. Must be cancellable through `interrupt`.
    async fn invoke(&self, req: &StageRequest<'_>, interrupt: &Interrupt) -> Result<StageOutput, BackendError>;
}
