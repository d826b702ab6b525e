//! The stage executor.
//!
//! Every transition goes through `conv_core`'s pure rules and is persisted to the journal before
//! the stage body runs, so a crash or interrupt loses at most the in-flight stage. Stage bodies
//! must tolerate re-execution against a partially written target.

use std::fs;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use conv_artifacts::{ArtifactRole, ArtifactStore, GoldenUpdateRequest, RunDir, TargetLock, LOCK_FILE, target_lock_path};
use conv_backend::{BackendError, ConversionBackend, ScenarioContext, StageOutput, StageRequest};
use conv_checkpoint::Resolution;
use conv_core::{
    ConvError, PipelineRun, RunStatus, StageName, StageStatus, VerificationFailure, VerificationResult,
};
use conv_exec::Interrupt;
use conv_guard::{TreeSnapshot, WriteProtectionGuard};
use conv_policy::PolicyDecision;
use conv_scenario::Scenario;
use conv_semantic::{first_violation, render_markdown, DisclosureRequirement, MappingArtifact, SemanticDiffEngine, MAPPING_FILE};
use conv_storage::RunJournal;
use conv_verify::{VerificationRunner, VerifyError, VerifyRequest};
use tracing::{info, warn};

use crate::harness::Harness;
use crate::options::{exit_code_for, failure_record, RunOptions, RunOutcome};
use crate::reporting::{capture_target, not_vcs, write_alert, write_reports};

/// Baseline of the read-only source, kept with the run so a resumed process checks against it.
pub const SOURCE_SNAPSHOT_FILE: &str = "source_snapshot.json";
pub const REALIZED_FILE: &str = "realized.json";
pub const IDEMPOTENCY_FILE: &str = "idempotency_changes.json";
pub const SEMANTIC_DIFF_JSON: &str = "semantic_diff.json";
pub const SEMANTIC_DIFF_MD: &str = "semantic_diff.md";
pub const VERIFICATION_FILE: &str = "verification.json";

enum StageError {
    Interrupted,
    Fatal(anyhow::Error),
}

impl From<anyhow::Error> for StageError {
    fn from(e: anyhow::Error) -> Self {
        StageError::Fatal(e)
    }
}

impl From<ConvError> for StageError {
    fn from(e: ConvError) -> Self {
        StageError::Fatal(e.into())
    }
}

enum End {
    Completed,
    Failed,
    Paused,
    Interrupted,
}

pub fn checkpoint_packet_name(id: &str) -> String {
    format!("checkpoint_{id}.md")
}

/// One pipeline run, from lock acquisition to final report.
pub struct ConversionPipeline<'h> {
    h: &'h Harness,
    scenario: Scenario,
    decision: PolicyDecision,
    opts: RunOptions,
    backend: Arc<dyn ConversionBackend>,
    interrupt: Interrupt,
    ctx: ScenarioContext,
    run: PipelineRun,
    run_dir: RunDir,
    guard: WriteProtectionGuard,
    resumed: bool,
    _locks: (TargetLock, TargetLock),
}

impl<'h> ConversionPipeline<'h> {
    /// Lock the scenario and its target path, then either pick up its newest resumable run or start a fresh one.
    pub fn start(
        h: &'h Harness,
        scenario: Scenario,
        opts: RunOptions,
        backend: Arc<dyn ConversionBackend>,
        interrupt: Interrupt,
    ) -> Result<Self> {
        let decision = h.policy.resolve(scenario.intent);
        conv_guard::ensure_disjoint(&scenario.source_path, &scenario.target_path).map_err(|e| {
            ConvError::ScenarioMalformed { name: scenario.name.clone(), reason: format!("{e:#}") }
        })?;
        let lock_path = h.artifacts.scenario_dir(&scenario.name).join(LOCK_FILE);
        let lock = TargetLock::acquire(&lock_path, &format!("conv run {}", scenario.name))?;
        let target_lock = TargetLock::acquire(
            &target_lock_path(&h.artifacts.root, &scenario.target_path)?,
            &format!("conv run {} -> {}", scenario.name, scenario.target_path.display()),
        )?;

        let previous = if opts.force_clean { None } else { h.journal.latest_resumable(&scenario.name)? };
        let (run, run_dir, baseline, resumed) = match previous {
            Some(run) => {
                let run_dir = h.artifacts.open_run_dir(&scenario.name, &run.run_label)?;
                let baseline = TreeSnapshot::load(&run_dir.role(ArtifactRole::Artifacts).join(SOURCE_SNAPSHOT_FILE))
                    .context("load source baseline of resumable run")?;
                info!(scenario = %scenario.name, run = %run.run_label, status = ?run.status, "found resumable run");
                (run, run_dir, baseline, true)
            }
            None => {
                // Baseline first: nothing below may touch the source unobserved.
                let baseline = conv_guard::snapshot(&scenario.source_path)?;
                prepare_target(h, &scenario, &opts)?;
                let now = Utc::now();
                let run_dir = h.artifacts.create_run_dir(&scenario.name, now)?;
                let run = PipelineRun::new(
                    &scenario.name,
                    scenario.intent,
                    decision.verification_mode,
                    &decision.stages,
                    &run_dir.label,
                    now,
                );
                baseline.save(&run_dir.role(ArtifactRole::Artifacts).join(SOURCE_SNAPSHOT_FILE))?;
                h.journal.save(&run)?;
                (run, run_dir, baseline, false)
            }
        };

        let ctx = ScenarioContext {
            scenario: scenario.name.clone(),
            intent: scenario.intent,
            notes: scenario.notes.clone(),
            context_hash: scenario.context_hash.clone(),
            source_path: scenario.source_path.clone(),
            target_path: scenario.target_path.clone(),
        };
        let guard = WriteProtectionGuard::with_baseline(&scenario.source_path, baseline);
        Ok(Self { h, scenario, decision, opts, backend, interrupt, ctx, run, run_dir, guard, resumed, _locks: (lock, target_lock) })
    }

    fn log(&self, line: impl AsRef<str>) {
        if let Err(e) = self.h.artifacts.append_log(&self.run_dir, line.as_ref()) {
            warn!(error = %format!("{e:#}"), "run log write failed");
        }
    }

    fn save(&self) -> Result<()> {
        self.h.journal.save(&self.run)
    }

    fn write(&self, role: ArtifactRole, name: &str, bytes: &[u8]) -> Result<String> {
        let path = self.h.artifacts.write_role_bytes(&self.run_dir, role, name, bytes)?;
        Ok(self.run_dir.relative(&path))
    }

    fn write_json<T: serde::Serialize>(&self, role: ArtifactRole, name: &str, value: &T) -> Result<String> {
        let path = self.h.artifacts.write_json(&self.run_dir, role, name, value)?;
        Ok(self.run_dir.relative(&path))
    }

    /// Run to a stopping point and write the run's records. The returned outcome carries the
    /// process exit code.
    pub async fn drive(mut self) -> Result<RunOutcome> {
        info!(scenario = %self.scenario.name, run = %self.run_dir.label, resumed = self.resumed, "run started");
        self.log(format!(
            "{} run of {} (intent {}, mode {}, backend {})",
            if self.resumed { "resumed" } else { "new" },
            self.scenario.name,
            self.scenario.intent,
            self.run.verification_mode.as_str(),
            self.backend.name()
        ));
        let end = match self.execute().await {
            Ok(end) => end,
            Err(e) => {
                self.record_failure(None, &e);
                End::Failed
            }
        };
        let now = Utc::now();
        match end {
            End::Completed => conv_core::finish(&mut self.run, true, now),
            End::Interrupted => {
                conv_core::interrupt(&mut self.run, now);
                self.log("interrupted; rerun the scenario to resume");
            }
            End::Paused | End::Failed => {}
        }

        // Later stages run builds and tests; the source gets a second look before anything is reported.
        if !self.mutation_recorded() {
            if let Err(e) = self.guard.verify() {
                self.record_failure(None, &e);
            }
        }

        let exit_code = exit_code_for(&self.run);
        self.save()?;
        if let Err(e) = capture_target(&self.h.artifacts, &self.run_dir, self.h.vcs.as_ref(), &self.scenario.target_path) {
            warn!(error = %format!("{e:#}"), "target capture failed");
        }
        self.log(format!("run ended {:?} (exit {exit_code})", self.run.status));
        write_reports(&self.h.artifacts, &self.run_dir, &self.run, exit_code)?;
        info!(scenario = %self.scenario.name, status = ?self.run.status, exit_code, "run finished");

        Ok(RunOutcome {
            scenario: self.scenario.name.clone(),
            run_label: self.run_dir.label.clone(),
            run_dir: self.run_dir.path.clone(),
            status: self.run.status,
            exit_code,
            resumed: self.resumed,
            failure: self.run.failure.clone(),
            checkpoint: self.run.checkpoint.clone(),
        })
    }

    fn mutation_recorded(&self) -> bool {
        self.run.failure.as_ref().is_some_and(|f| f.class == "source_mutation_detected")
    }

    /// Fail the run. `stage` defaults to whichever stage is running.
    fn record_failure(&mut self, stage: Option<StageName>, err: &anyhow::Error) {
        let now = Utc::now();
        let rec = failure_record(err);
        let stage = stage.or_else(|| self.run.stages.iter().find(|s| s.status == StageStatus::Running).map(|s| s.stage));
        if let Some(stage) = stage {
            if let Err(e) = conv_core::fail_stage(&mut self.run, stage, now, rec.message.clone()) {
                warn!(error = %e, "could not mark stage failed");
            }
        }
        if let Some(c) = err.downcast_ref::<ConvError>().filter(|c| matches!(c, ConvError::SourceMutationDetected { .. })) {
            if let Err(e) = write_alert(&self.h.artifacts, &self.run_dir, c) {
                warn!(error = %format!("{e:#}"), "alert write failed");
            }
        }
        warn!(scenario = %self.scenario.name, class = %rec.class, "run failed: {}", rec.message);
        self.log(format!("FAILED ({}): {}", rec.class, rec.message));
        self.run.failure = Some(rec);
        self.run.status = RunStatus::Failed;
        self.run.finished_at = Some(now);
    }

    async fn execute(&mut self) -> Result<End> {
        if self.resumed {
            if conv_checkpoint::is_pending(&self.run) {
                if !self.opts.auto_approve {
                    self.log("checkpoint still pending; resolve it with approve, reject or override");
                    return Ok(End::Paused);
                }
                self.auto_approve()?;
            }
            conv_core::prepare_resume(&mut self.run)?;
            self.save()?;
            let from = conv_core::next_stage(&self.run).map(|s| s.to_string()).unwrap_or_else(|| "reporting".into());
            self.log(format!("resume #{} from {from}", self.run.resumes));
        }

        loop {
            if self.interrupt.is_triggered() {
                return Ok(End::Interrupted);
            }
            let Some(stage) = conv_core::next_stage(&self.run) else { break };
            if stage > StageName::Realize && self.gate_pending()? {
                return Ok(End::Paused);
            }
            conv_core::begin_stage(&mut self.run, stage, Utc::now())?;
            self.save()?;
            self.log(format!("stage {stage} started"));
            info!(scenario = %self.scenario.name, stage = %stage, "stage started");

            let res = match stage {
                StageName::SemanticMapping => self.semantic_mapping().await,
                StageName::Overview => self.overview().await,
                StageName::Realize => self.realize().await,
                StageName::SemanticDiff => self.semantic_diff(),
                StageName::Verify => self.verify().await,
            };
            match res {
                Ok(artifacts) => {
                    conv_core::complete_stage(&mut self.run, stage, Utc::now(), artifacts)?;
                    self.save()?;
                    self.log(format!("stage {stage} done"));
                }
                Err(StageError::Interrupted) => return Ok(End::Interrupted),
                Err(StageError::Fatal(e)) => {
                    self.record_failure(Some(stage), &e);
                    self.save()?;
                    return Ok(End::Failed);
                }
            }
        }

        match self.post_checks().await {
            Ok(()) => Ok(End::Completed),
            Err(StageError::Interrupted) => Ok(End::Interrupted),
            Err(StageError::Fatal(e)) => {
                self.record_failure(None, &e);
                Ok(End::Failed)
            }
        }
    }

    // ---- checkpoint gate ----

    /// Reasons the realized output needs an operator's approval before it counts.
    fn gate_reasons(&self) -> Result<Vec<String>, StageError> {
        let mut reasons = Vec::new();
        if self.decision.checkpoint_before_final {
            reasons.push(format!("intent {} is lossy; realized output is final only once approved", self.scenario.intent));
        }
        let report = SemanticDiffEngine::default().reduce(&self.load_mapping()?);
        if report.drift.requires_checkpoint {
            reasons.extend(report.drift.reasons.iter().cloned());
        }
        Ok(reasons)
    }

    /// Opens the checkpoint once realize is done. True when the run must park.
    fn gate_pending(&mut self) -> Result<bool> {
        if self.run.stage_status(StageName::Realize) != Some(StageStatus::Done)
            || conv_checkpoint::is_approved(&self.run, StageName::Realize)
        {
            return Ok(false);
        }
        let reasons = match self.gate_reasons() {
            Ok(r) => r,
            Err(StageError::Fatal(e)) => return Err(e),
            Err(StageError::Interrupted) => return Ok(false),
        };
        if reasons.is_empty() {
            return Ok(false);
        }
        let cp = conv_checkpoint::open(&mut self.run, StageName::Realize, reasons.join("; "), Utc::now());
        let packet = conv_checkpoint::format_packet(&self.scenario.name, &cp, &reasons);
        self.write(ArtifactRole::Reports, &checkpoint_packet_name(cp.id.as_str()), packet.as_bytes())?;
        self.log(format!("checkpoint {} opened after realize: {}", cp.id, cp.risk_description));
        if self.opts.auto_approve {
            self.auto_approve()?;
            self.run.status = RunStatus::Running;
            self.save()?;
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn auto_approve(&mut self) -> Result<()> {
        conv_checkpoint::resolve(&mut self.run, None, Resolution::Approve, Utc::now())?;
        if let Some(cp) = &self.run.checkpoint {
            self.log(format!("checkpoint {} auto-approved", cp.id));
        }
        Ok(())
    }

    // ---- stage bodies ----

    async fn invoke_backend(&self, stage: StageName, output_dir: std::path::PathBuf) -> Result<StageOutput, StageError> {
        let req = StageRequest {
            scenario_context: &self.ctx,
            stage_name: stage,
            source_snapshot: &self.guard.baseline,
            output_dir,
        };
        let out = self.backend.invoke(&req, &self.interrupt).await;
        match out {
            Ok(out) => {
                if !out.stdout.is_empty() {
                    self.write(ArtifactRole::Logs, &format!("{stage}.stdout.log"), &out.stdout)?;
                }
                if !out.stderr.is_empty() {
                    self.write(ArtifactRole::Logs, &format!("{stage}.stderr.log"), &out.stderr)?;
                }
                Ok(out)
            }
            Err(BackendError::Interrupted) => Err(StageError::Interrupted),
            Err(BackendError::TimedOut(seconds)) => {
                Err(ConvError::Timeout { what: format!("backend stage {stage}"), seconds }.into())
            }
            Err(BackendError::Failed(reason)) => Err(ConvError::BackendInvocationFailed { stage, reason }.into()),
        }
    }

    fn load_mapping(&self) -> Result<MappingArtifact, StageError> {
        let path = self.run_dir.role(ArtifactRole::Artifacts).join(MAPPING_FILE);
        let bytes = fs::read(&path).map_err(|e| ConvError::BackendInvocationFailed {
            stage: StageName::SemanticMapping,
            reason: format!("mapping artifact {}: {e}", path.display()),
        })?;
        Ok(MappingArtifact::parse(&bytes, self.scenario.intent)?)
    }

    async fn semantic_mapping(&mut self) -> Result<Vec<String>, StageError> {
        let out = self.invoke_backend(StageName::SemanticMapping, self.run_dir.role(ArtifactRole::Artifacts)).await?;
        let mapping = self.load_mapping()?;
        self.log(format!("mapping: {} records ({})", mapping.records().len(), mapping.kind()));
        Ok(out.artifacts.iter().map(|p| self.run_dir.relative(p)).collect())
    }

    async fn overview(&mut self) -> Result<Vec<String>, StageError> {
        let dir = self.run_dir.role(ArtifactRole::Artifacts);
        let out = self.invoke_backend(StageName::Overview, dir.clone()).await?;
        let expected = conv_backend::expected_artifact(StageName::Overview, &dir);
        if let Some(p) = expected.filter(|p| !p.is_file()) {
            return Err(ConvError::BackendInvocationFailed {
                stage: StageName::Overview,
                reason: format!("backend produced no {}", p.display()),
            }
            .into());
        }
        Ok(out.artifacts.iter().map(|p| self.run_dir.relative(p)).collect())
    }

    /// Re-execution starts from an empty target; only the first attempt of a `--keep-target`
    /// run keeps the seed.
    async fn realize(&mut self) -> Result<Vec<String>, StageError> {
        let target = self.scenario.target_path.clone();
        if !self.opts.keep_target || self.resumed {
            conv_vcs::clear_worktree(&target)?;
        }
        self.invoke_backend(StageName::Realize, self.run_dir.role(ArtifactRole::Artifacts)).await?;

        if !conv_vcs::has_content(&target) {
            return Err(ConvError::BackendInvocationFailed {
                stage: StageName::Realize,
                reason: format!("target {} is empty after realize", target.display()),
            }
            .into());
        }
        conv_guard::ensure_disjoint(&self.scenario.source_path, &target)?;
        self.guard.verify()?;

        let realized = conv_guard::snapshot_filtered(&target, not_vcs)?;
        self.log(format!("realize wrote {} files", realized.len()));
        Ok(vec![self.write_json(ArtifactRole::Artifacts, REALIZED_FILE, &realized)?])
    }

    fn disclosure(&self) -> DisclosureRequirement {
        let req = &self.scenario.requirements;
        DisclosureRequirement {
            intent: self.scenario.intent,
            lossy: self.decision.lossy,
            min_categories: self.decision.min_loss_categories.max(req.minimum_categories.unwrap_or(0)),
            required_categories: req.required_categories.clone(),
        }
    }

    fn semantic_diff(&mut self) -> Result<Vec<String>, StageError> {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&self.load_mapping()?);
        let findings = engine.findings(&report, &self.disclosure());
        // Written before judging so a rejected diff can still be inspected.
        let json = self.write_json(ArtifactRole::Reports, SEMANTIC_DIFF_JSON, &report)?;
        let md = render_markdown(&self.scenario.name, &report, &findings);
        let md = self.write(ArtifactRole::Reports, SEMANTIC_DIFF_MD, md.as_bytes())?;
        self.log(format!(
            "semantic diff: {} entries, {} categories",
            report.entries.len(),
            report.distinct_categories().len()
        ));
        self.run.semantic_diff = Some(report);
        if let Some(err) = first_violation(&findings, self.scenario.intent) {
            return Err(err.into());
        }
        Ok(vec![json, md])
    }

    async fn verify(&mut self) -> Result<Vec<String>, StageError> {
        let update = GoldenUpdateRequest::from_operator_flag(self.opts.update_golden);
        let expected = if update.is_some() { Some(self.scenario.golden_dir.clone()) } else { self.scenario.expected_path.clone() };
        let req = VerifyRequest {
            mode: self.run.verification_mode,
            target: &self.scenario.target_path,
            source: &self.scenario.source_path,
            expected: expected.as_deref(),
            vectors: &self.scenario.vectors,
            spec: &self.scenario.verify,
            golden_update: update.as_ref(),
        };
        let runner = VerificationRunner::new(self.h.cfg.verify.clone(), self.interrupt.clone());
        let out = match runner.verify(&req).await {
            Ok(out) => out,
            Err(VerifyError::Interrupted) => return Err(StageError::Interrupted),
            Err(VerifyError::Other(e)) => return Err(StageError::Fatal(e)),
        };
        let mut artifacts = Vec::new();
        for log in &out.logs {
            self.log(format!("verify {}: {}", log.name, log.command));
            artifacts.push(self.write(ArtifactRole::Logs, &format!("verify.{}.stdout.log", log.name), &log.stdout)?);
            artifacts.push(self.write(ArtifactRole::Logs, &format!("verify.{}.stderr.log", log.name), &log.stderr)?);
        }
        artifacts.push(self.write_json(ArtifactRole::Reports, VERIFICATION_FILE, &out.result)?);
        let passed = out.result.passed;
        let failures = out.result.failures();
        for f in &failures {
            self.log(format!("verification failure: {f}"));
        }
        self.run.verification = Some(out.result);
        if !passed {
            return Err(ConvError::VerificationFailed { failures }.into());
        }
        Ok(artifacts)
    }

    // ---- after the last stage ----

    fn push_issues(&mut self, issues: Vec<VerificationFailure>) -> Result<(), StageError> {
        if issues.is_empty() {
            return Ok(());
        }
        let mode = self.run.verification_mode;
        let v = self.run.verification.get_or_insert_with(|| VerificationResult {
            mode,
            passed: false,
            vectors: vec![],
            files: vec![],
            issues: vec![],
            notes: vec![],
        });
        v.issues.extend(issues.iter().cloned());
        v.passed = false;
        Err(ConvError::VerificationFailed { failures: issues }.into())
    }

    async fn post_checks(&mut self) -> Result<(), StageError> {
        let mut issues = Vec::new();
        for raw in &self.scenario.expect.stages {
            match raw.parse::<StageName>() {
                Ok(stage) if self.run.stage_status(stage) == Some(StageStatus::Done) => {}
                Ok(stage) => issues.push(VerificationFailure::Expectation {
                    message: format!("stage {stage} expected done, got {:?}", self.run.stage_status(stage)),
                }),
                Err(e) => issues.push(VerificationFailure::Expectation { message: e }),
            }
        }
        if self.scenario.expect.success == Some(false) {
            issues.push(VerificationFailure::Expectation { message: "scenario expects failure but the run passed".into() });
        }
        self.push_issues(issues)?;

        if self.opts.idempotency_check {
            self.idempotency_check().await?;
        }
        Ok(())
    }

    /// Realize again into the same target and compare content hashes.
    async fn idempotency_check(&mut self) -> Result<(), StageError> {
        let target = self.scenario.target_path.clone();
        let before = conv_guard::snapshot_filtered(&target, not_vcs)?;
        conv_vcs::clear_worktree(&target)?;
        self.log("idempotency check: realize re-run");
        self.invoke_backend(StageName::Realize, self.run_dir.role(ArtifactRole::Artifacts).join("idempotency")).await?;
        let after = conv_guard::snapshot_filtered(&target, not_vcs)?;
        self.guard.verify()?;
        let changes = conv_guard::diff_snapshots(&before, &after).lines();
        self.write_json(ArtifactRole::Reports, IDEMPOTENCY_FILE, &changes)?;
        self.log(format!("idempotency check: {} changes", changes.len()));
        self.push_issues(changes.into_iter().map(|change| VerificationFailure::Idempotency { change }).collect())
    }
}

/// Fresh-run target setup: optional wipe, creation, git init, and clearing unless kept.
fn prepare_target(h: &Harness, scenario: &Scenario, opts: &RunOptions) -> Result<()> {
    let target = &scenario.target_path;
    if opts.force_clean && target.exists() {
        fs::remove_dir_all(target).with_context(|| format!("force-clean {}", target.display()))?;
        info!(target = %target.display(), "target wiped");
    }
    fs::create_dir_all(target).with_context(|| format!("create {}", target.display()))?;
    if h.vcs.available() && !h.vcs.is_repo(target) {
        if let Err(e) = h.vcs.init(target) {
            warn!(target = %target.display(), error = %format!("{e:#}"), "target git init failed");
        }
    }
    if !opts.keep_target {
        conv_vcs::clear_worktree(target)?;
    }
    Ok(())
}
