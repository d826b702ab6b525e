use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use conv_artifacts::{overwrite_golden, GoldenUpdateRequest};
use conv_core::{VerificationFailure, VerificationMode, VerificationResult};
use conv_exec::{run_bounded, CommandSpec, ExecStatus, Interrupt};
use conv_scenario::{TestVector, VerifySpec};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::compare::DEFAULT_FLOAT_TOLERANCE;
use crate::golden::compare_trees;
use crate::template::{expand, Placeholders};
use crate::vectors::{run_vectors, VectorContext};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("verification interrupted")]
    Interrupted,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct VerifyConfig {
    /// Per-command bound when the scenario sets none.
    pub timeout_secs: u64,
    /// Concurrent vector invocations. 1 runs them in order.
    pub workers: usize,
    pub float_tolerance: f64,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        Self { timeout_secs: 30, workers: 4, float_tolerance: DEFAULT_FLOAT_TOLERANCE }
    }
}

/// Everything one verification pass looks at.
#[derive(Debug)]
pub struct VerifyRequest<'a> {
    pub mode: VerificationMode,
    pub target: &'a Path,
    pub source: &'a Path,
    pub expected: Option<&'a Path>,
    pub vectors: &'a [TestVector],
    pub spec: &'a VerifySpec,
    pub golden_update: Option<&'a GoldenUpdateRequest>,
}

/// Captured output of a verification subprocess, for the run's `logs/` directory.
#[derive(Clone, Debug)]
pub struct CommandLog {
    pub name: String,
    pub command: String,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

#[derive(Debug)]
pub struct VerifyOutput {
    pub result: VerificationResult,
    pub logs: Vec<CommandLog>,
}

pub struct VerificationRunner {
    config: VerifyConfig,
    interrupt: Interrupt,
}

enum Step {
    Ok,
    Failed(VerificationFailure),
}

impl VerificationRunner {
    pub fn new(config: VerifyConfig, interrupt: Interrupt) -> Self {
        Self { config, interrupt }
    }

    fn timeout(&self, spec: &VerifySpec) -> Duration {
        Duration::from_secs(spec.timeout_secs.unwrap_or(self.config.timeout_secs).max(1))
    }

    pub async fn verify(&self, req: &VerifyRequest<'_>) -> Result<VerifyOutput, VerifyError> {
        let build_dir = tempfile::Builder::new()
            .prefix("conv-verify-")
            .tempdir()
            .map_err(|e| VerifyError::Other(e.into()))?;
        let mut result = VerificationResult {
            mode: req.mode,
            passed: false,
            vectors: Vec::new(),
            files: Vec::new(),
            issues: Vec::new(),
            notes: Vec::new(),
        };
        let mut logs = Vec::new();
        let placeholders = Placeholders { build_dir: Some(build_dir.path()), target: Some(req.target), ..Default::default() };

        if let Some(check) = &req.spec.compile_check {
            if let Step::Failed(f) = self.run_step("compile_check", check, &placeholders, req, &mut logs).await? {
                result.issues.push(f);
            }
        }

        match req.mode {
            VerificationMode::GoldenDiff => self.golden(req, &mut result)?,
            VerificationMode::VectorsOnly => {
                if req.golden_update.is_some() {
                    warn!("update_golden has no effect in vectors_only mode");
                    result.notes.push("update_golden ignored: scenario verifies by vectors".into());
                }
                self.vectors(req, build_dir.path(), &placeholders, &mut result, &mut logs).await?;
            }
        }

        result.passed = result.failures().is_empty();
        info!(
            mode = req.mode.as_str(),
            passed = result.passed,
            vectors = result.vectors.len(),
            file_diffs = result.files.len(),
            issues = result.issues.len(),
            "verification finished"
        );
        Ok(VerifyOutput { result, logs })
    }

    fn golden(&self, req: &VerifyRequest<'_>, result: &mut VerificationResult) -> Result<(), VerifyError> {
        let Some(expected) = req.expected else {
            result.issues.push(VerificationFailure::Expectation {
                message: "golden_diff requires an expected directory".into(),
            });
            return Ok(());
        };
        if let Some(update) = req.golden_update {
            let written = overwrite_golden(update, req.target, expected, req.source)?;
            result.notes.push(format!("golden fixtures updated ({} files)", written.len()));
        }
        result.files = compare_trees(req.target, expected)?;
        Ok(())
    }

    async fn vectors(
        &self,
        req: &VerifyRequest<'_>,
        build_dir: &Path,
        placeholders: &Placeholders<'_>,
        result: &mut VerificationResult,
        logs: &mut Vec<CommandLog>,
    ) -> Result<(), VerifyError> {
        if req.vectors.is_empty() {
            result.issues.push(VerificationFailure::Expectation { message: "no test vectors declared".into() });
            return Ok(());
        }
        let Some(invoke) = &req.spec.invoke else {
            result.issues.push(VerificationFailure::Expectation {
                message: "test vectors declared but verify.invoke is missing".into(),
            });
            return Ok(());
        };
        if let Some(build) = &req.spec.build {
            if let Step::Failed(f) = self.run_step("build", build, placeholders, req, logs).await? {
                result.issues.push(f);
                result.notes.push("vectors not run: build failed".into());
                return Ok(());
            }
        }
        let ctx = Arc::new(VectorContext {
            invoke: invoke.clone(),
            build_dir: build_dir.to_path_buf(),
            target: req.target.to_path_buf(),
            timeout: self.timeout(req.spec),
            tolerance: self.config.float_tolerance,
            interrupt: self.interrupt.clone(),
        });
        result.vectors = run_vectors(ctx, req.vectors, self.config.workers).await?;
        Ok(())
    }

    async fn run_step(
        &self,
        name: &str,
        template: &[String],
        placeholders: &Placeholders<'_>,
        req: &VerifyRequest<'_>,
        logs: &mut Vec<CommandLog>,
    ) -> Result<Step, VerifyError> {
        let argv = expand(template, placeholders);
        let Some(spec) = CommandSpec::from_argv(&argv) else {
            return Ok(Step::Failed(VerificationFailure::CompileCheck { message: format!("{name}: empty command") }));
        };
        let spec = spec.cwd(req.target);
        let timeout = self.timeout(req.spec);
        let out = match run_bounded(&spec, timeout, &self.interrupt).await {
            Ok(out) => out,
            Err(e) => {
                return Ok(Step::Failed(VerificationFailure::CompileCheck { message: format!("{name}: {e:#}") }));
            }
        };
        logs.push(CommandLog {
            name: name.to_string(),
            command: spec.display(),
            stdout: out.stdout.clone(),
            stderr: out.stderr.clone(),
        });
        Ok(match out.status {
            ExecStatus::Interrupted => return Err(VerifyError::Interrupted),
            ExecStatus::TimedOut => Step::Failed(VerificationFailure::CompileCheck {
                message: format!("{name} timed out after {}s", timeout.as_secs()),
            }),
            ExecStatus::Exited { success: true, .. } => Step::Ok,
            ExecStatus::Exited { code, .. } => {
                let stderr = out.stderr_str();
                let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
                let tail: Vec<&str> = tail.into_iter().rev().collect();
                Step::Failed(VerificationFailure::CompileCheck {
                    message: format!("{name} failed (exit {:?}): {}", code, tail.join("\n")),
                })
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conv_core::FileDiffKind;
    use serde_json::json;
    use std::fs;
    use tempfile::tempdir;

    fn runner() -> VerificationRunner {
        VerificationRunner::new(VerifyConfig { timeout_secs: 10, workers: 2, ..Default::default() }, Interrupt::new())
    }

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn golden_diff_reports_mismatches() {
        let d = tempdir().unwrap();
        let (src, target, expected) = (d.path().join("src"), d.path().join("target"), d.path().join("expected"));
        for p in [&src, &target, &expected] {
            fs::create_dir_all(p).unwrap();
        }
        fs::write(target.join("a.cpp"), "int a;\n").unwrap();
        fs::write(expected.join("a.cpp"), "int b;\n").unwrap();
        fs::write(expected.join("b.cpp"), "x\n").unwrap();
        let spec = VerifySpec::default();
        let req = VerifyRequest {
            mode: VerificationMode::GoldenDiff,
            target: &target,
            source: &src,
            expected: Some(&expected),
            vectors: &[],
            spec: &spec,
            golden_update: None,
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(!out.result.passed);
        let kinds: Vec<_> = out.result.files.iter().map(|f| (f.path.as_str(), f.kind)).collect();
        assert_eq!(kinds, vec![("a.cpp", FileDiffKind::ContentMismatch), ("b.cpp", FileDiffKind::MissingInTarget)]);
    }

    #[tokio::test]
    async fn golden_update_makes_the_diff_empty() {
        let d = tempdir().unwrap();
        let (src, target, expected) = (d.path().join("src"), d.path().join("target"), d.path().join("expected"));
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("a.cpp"), "int a;\n").unwrap();
        let spec = VerifySpec::default();
        let update = GoldenUpdateRequest::from_operator_flag(true).unwrap();
        let req = VerifyRequest {
            mode: VerificationMode::GoldenDiff,
            target: &target,
            source: &src,
            expected: Some(&expected),
            vectors: &[],
            spec: &spec,
            golden_update: Some(&update),
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(out.result.passed, "{:?}", out.result);
        assert_eq!(fs::read_to_string(expected.join("a.cpp")).unwrap(), "int a;\n");
    }

    #[tokio::test]
    async fn golden_without_expected_dir_fails() {
        let d = tempdir().unwrap();
        let spec = VerifySpec::default();
        let req = VerifyRequest {
            mode: VerificationMode::GoldenDiff,
            target: d.path(),
            source: d.path(),
            expected: None,
            vectors: &[],
            spec: &spec,
            golden_update: None,
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(!out.result.passed);
        assert_eq!(out.result.issues.len(), 1);
    }

    #[tokio::test]
    async fn vectors_only_without_vectors_fails() {
        let d = tempdir().unwrap();
        let spec = VerifySpec { invoke: Some(argv(&["true"])), ..Default::default() };
        let req = VerifyRequest {
            mode: VerificationMode::VectorsOnly,
            target: d.path(),
            source: d.path(),
            expected: None,
            vectors: &[],
            spec: &spec,
            golden_update: None,
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(!out.result.passed);
        assert!(out.result.issues[0].to_string().contains("no test vectors"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn build_then_vectors() {
        let d = tempdir().unwrap();
        fs::write(d.path().join("calc.sh"), "case \"$1\" in add) echo $(($2 + $3));; *) exit 1;; esac\n").unwrap();
        let spec = VerifySpec {
            build: Some(argv(&["cp", "{target}/calc.sh", "{build_dir}/calc.sh"])),
            invoke: Some(argv(&["sh", "{build_dir}/calc.sh", "{function}", "{inputs}"])),
            ..Default::default()
        };
        let vectors = vec![
            TestVector { function: "add".into(), inputs: vec![json!(2), json!(3)], expected: json!(5) },
            TestVector { function: "divide".into(), inputs: vec![json!(1), json!(0)], expected: json!("error") },
        ];
        let req = VerifyRequest {
            mode: VerificationMode::VectorsOnly,
            target: d.path(),
            source: d.path(),
            expected: None,
            vectors: &vectors,
            spec: &spec,
            golden_update: None,
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(out.result.passed, "{:?}", out.result);
        assert_eq!(out.logs[0].name, "build");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn failed_build_fails_verification_without_running_vectors() {
        let d = tempdir().unwrap();
        let spec = VerifySpec {
            build: Some(argv(&["sh", "-c", "echo broken >&2; exit 3"])),
            invoke: Some(argv(&["true"])),
            ..Default::default()
        };
        let vectors = vec![TestVector { function: "f".into(), inputs: vec![], expected: json!(1) }];
        let req = VerifyRequest {
            mode: VerificationMode::VectorsOnly,
            target: d.path(),
            source: d.path(),
            expected: None,
            vectors: &vectors,
            spec: &spec,
            golden_update: None,
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(!out.result.passed);
        assert!(out.result.vectors.is_empty());
        assert!(out.result.issues[0].to_string().contains("broken"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn compile_check_failure_is_reported_alongside_golden_diff() {
        let d = tempdir().unwrap();
        let (target, expected) = (d.path().join("t"), d.path().join("e"));
        fs::create_dir_all(&target).unwrap();
        fs::create_dir_all(&expected).unwrap();
        let spec = VerifySpec { compile_check: Some(argv(&["false"])), ..Default::default() };
        let req = VerifyRequest {
            mode: VerificationMode::GoldenDiff,
            target: &target,
            source: d.path(),
            expected: Some(&expected),
            vectors: &[],
            spec: &spec,
            golden_update: None,
        };
        let out = runner().verify(&req).await.unwrap();
        assert!(out.result.files.is_empty());
        assert!(!out.result.passed);
        assert!(matches!(out.result.issues[0], VerificationFailure::CompileCheck { .. }));
    }
}
