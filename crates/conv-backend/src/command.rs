use std::time::Duration;

use async_trait::async_trait;
use conv_exec::{run_bounded, CommandSpec, ExecStatus, Interrupt};
use tracing::{debug, info};

use crate::types::{BackendError, ConversionBackend, StageOutput, StageRequest};

/// Runs a configured external program once per stage.
///
/// The program receives `--stage <name>` appended to its argv, the request as JSON on stdin, and
/// `CONV_STAGE`, `CONV_OUTPUT_DIR`, `CONV_SOURCE_PATH`, `CONV_TARGET_PATH` in its environment.
/// For mapping and overview stages, stdout becomes the artifact when the program does not write
/// the file itself.
#[derive(Clone, Debug)]
pub struct CommandBackend {
    pub argv: Vec<String>,
    pub timeout: Duration,
}

impl CommandBackend {
    pub fn new(argv: Vec<String>, timeout: Duration) -> Self {
        Self { argv, timeout }
    }
}

#[async_trait]
impl ConversionBackend for CommandBackend {
    fn name(&self) -> &str {
        "command"
    }

    async fn invoke(&self, req: &StageRequest<'_>, interrupt: &Interrupt) -> Result<StageOutput, BackendError> {
        let base = CommandSpec::from_argv(&self.argv)
            .ok_or_else(|| BackendError::Failed("backend command is not configured".to_string()))?;
        let payload = serde_json::to_vec(req).map_err(|e| BackendError::Failed(format!("encode request: {e}")))?;
        tokio::fs::create_dir_all(&req.output_dir)
            .await
            .map_err(|e| BackendError::Failed(format!("create {}: {e}", req.output_dir.display())))?;
        let ctx = req.scenario_context;
        let spec = base
            .arg("--stage")
            .arg(req.stage_name.as_str())
            .env("CONV_STAGE", req.stage_name.as_str())
            .env("CONV_OUTPUT_DIR", req.output_dir.display().to_string())
            .env("CONV_SOURCE_PATH", ctx.source_path.display().to_string())
            .env("CONV_TARGET_PATH", ctx.target_path.display().to_string())
            .cwd(&ctx.target_path)
            .stdin(payload);
        info!(stage = %req.stage_name, command = %spec.display(), "invoking backend");

        let out = run_bounded(&spec, self.timeout, interrupt)
            .await
            .map_err(|e| BackendError::Failed(format!("{e:#}")))?;
        match out.status {
            ExecStatus::TimedOut => return Err(BackendError::TimedOut(self.timeout.as_secs())),
            ExecStatus::Interrupted => return Err(BackendError::Interrupted),
            ExecStatus::Exited { success: false, code } => {
                return Err(BackendError::Failed(format!(
                    "backend exited with {:?}: {}",
                    code,
                    out.stderr_str().trim()
                )))
            }
            ExecStatus::Exited { .. } => {}
        }

        let mut artifacts = Vec::new();
        if let Some(path) = req.expected_artifact() {
            if !path.exists() {
                if out.stdout.is_empty() {
                    return Err(BackendError::Failed(format!("backend produced no {}", path.display())));
                }
                debug!(path = %path.display(), "writing backend stdout as artifact");
                tokio::fs::write(&path, &out.stdout)
                    .await
                    .map_err(|e| BackendError::Failed(format!("write {}: {e}", path.display())))?;
            }
            artifacts.push(path);
        }
        Ok(StageOutput { artifacts, stdout: out.stdout, stderr: out.stderr })
    }
}
