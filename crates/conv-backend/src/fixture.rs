use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use conv_core::StageName;
use conv_exec::Interrupt;
use tracing::info;

use crate::types::{BackendError, ConversionBackend, StageOutput, StageRequest, MAPPING_FILE, OVERVIEW_FILE};

pub const REALIZE_DIR: &str = "realize";

/// Replays recorded backend responses from a scenario's `backend/` directory:
/// `mapping.json`, `overview.md`, and a `realize/` tree copied into the target.
#[derive(Clone, Debug)]
pub struct FixtureBackend {
    pub root: PathBuf,
    /// Simulated latency per stage; interruptible.
    pub delay: Duration,
}

impl FixtureBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), delay: Duration::ZERO }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    async fn copy_file(&self, name: &str, req: &StageRequest<'_>) -> Result<PathBuf, BackendError> {
        let from = self.root.join(name);
        let to = req.output_dir.join(name);
        tokio::fs::create_dir_all(&req.output_dir)
            .await
            .map_err(|e| BackendError::Failed(format!("create {}: {e}", req.output_dir.display())))?;
        tokio::fs::copy(&from, &to)
            .await
            .map_err(|e| BackendError::Failed(format!("fixture {}: {e}", from.display())))?;
        Ok(to)
    }
}

#[async_trait]
impl ConversionBackend for FixtureBackend {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn invoke(&self, req: &StageRequest<'_>, interrupt: &Interrupt) -> Result<StageOutput, BackendError> {
        if !self.delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.delay) => {}
                _ = interrupt.triggered() => return Err(BackendError::Interrupted),
            }
        }
        if interrupt.is_triggered() {
            return Err(BackendError::Interrupted);
        }
        let artifacts = match req.stage_name {
            StageName::SemanticMapping => vec![self.copy_file(MAPPING_FILE, req).await?],
            StageName::Overview => vec![self.copy_file(OVERVIEW_FILE, req).await?],
            StageName::Realize => {
                let from = self.root.join(REALIZE_DIR);
                if !from.is_dir() {
                    return Err(BackendError::Failed(format!("fixture has no {}", from.display())));
                }
                let target = req.scenario_context.target_path.clone();
                let copied = tokio::task::spawn_blocking(move || conv_vcs::copy_tree(&from, &target))
                    .await
                    .map_err(|e| BackendError::Failed(format!("realize task: {e}")))?
                    .map_err(|e| BackendError::Failed(format!("{e:#}")))?;
                info!(files = copied.len(), "fixture realize copied");
                copied.iter().map(|rel| req.scenario_context.target_path.join(rel)).collect()
            }
            other => return Err(BackendError::Failed(format!("stage {other} is not a backend stage"))),
        };
        Ok(StageOutput { artifacts, ..StageOutput::default() })
    }
}
