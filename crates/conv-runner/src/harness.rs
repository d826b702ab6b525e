use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use chrono::Utc;
use conv_artifacts::{ArtifactRole, ArtifactStore, FsArtifactStore, TargetLock, LOCK_FILE};
use conv_backend::{CommandBackend, ConversionBackend, FixtureBackend};
use conv_checkpoint::Resolution;
use conv_core::{ConvError, PipelineRun, StageName};
use conv_exec::Interrupt;
use conv_policy::IntentPolicy;
use conv_scenario::{Scenario, ScenarioStore};
use conv_storage::{FsJournal, RunJournal};
use conv_vcs::{GitTargetVcs, TargetVcs};
use tracing::info;

use crate::options::{exit_code_for, RunOptions, RunOutcome};
use crate::pipeline::{checkpoint_packet_name, ConversionPipeline};
use crate::reporting::write_reports;
use crate::Config;

/// Everything rooted at one harness directory: scenarios, runs, config.
pub struct Harness {
    pub root: PathBuf,
    pub cfg: Config,
    pub scenarios: ScenarioStore,
    pub artifacts: FsArtifactStore,
    pub journal: FsJournal,
    pub policy: IntentPolicy,
    pub vcs: Arc<dyn TargetVcs>,
}

impl Harness {
    pub fn open(root: PathBuf) -> Result<Self> {
        let cfg = Config::load_or_default(&root)?;
        Ok(Self::with_config(root, cfg))
    }

    pub fn with_config(root: PathBuf, cfg: Config) -> Self {
        let runs_root = cfg.runs_root(&root);
        Self {
            scenarios: ScenarioStore::new(cfg.scenarios_root(&root)),
            artifacts: FsArtifactStore::new(runs_root.clone()),
            journal: FsJournal::new(runs_root),
            policy: IntentPolicy::new(cfg.policy.clone()),
            vcs: Arc::new(GitTargetVcs::new()),
            root,
            cfg,
        }
    }

    pub fn list(&self) -> Vec<String> {
        self.scenarios.list_sorted()
    }

    /// `--no-ai` replays the scenario's recorded responses; otherwise the configured command runs.
    pub fn backend_for(&self, scenario: &Scenario, no_ai: bool) -> Result<Arc<dyn ConversionBackend>> {
        if no_ai {
            let root = scenario.backend_fixture.clone().ok_or_else(|| ConvError::BackendInvocationFailed {
                stage: StageName::SemanticMapping,
                reason: format!("scenario {} has no recorded backend responses", scenario.name),
            })?;
            let delay = Duration::from_millis(self.cfg.backend.fixture_delay_ms);
            return Ok(Arc::new(FixtureBackend::new(root).with_delay(delay)));
        }
        match &self.cfg.backend.command {
            Some(argv) if !argv.is_empty() => {
                Ok(Arc::new(CommandBackend::new(argv.clone(), Duration::from_secs(self.cfg.backend.timeout_secs))))
            }
            _ => Err(ConvError::BackendInvocationFailed {
                stage: StageName::SemanticMapping,
                reason: "no [backend] command configured; use --no-ai to replay recorded responses".into(),
            }
            .into()),
        }
    }

    pub async fn run(&self, name: &str, opts: &RunOptions, interrupt: &Interrupt) -> Result<RunOutcome> {
        let scenario = self.scenarios.load(name)?;
        let backend = self.backend_for(&scenario, opts.no_ai)?;
        self.run_with_backend(scenario, opts, backend, interrupt).await
    }

    pub async fn run_with_backend(
        &self,
        scenario: Scenario,
        opts: &RunOptions,
        backend: Arc<dyn ConversionBackend>,
        interrupt: &Interrupt,
    ) -> Result<RunOutcome> {
        let timer = opts.interrupt_after.map(|after| {
            let i = interrupt.clone();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                info!(after_secs = after.as_secs_f64(), "interrupt-after elapsed");
                i.trigger();
            })
        });
        let out = match ConversionPipeline::start(self, scenario, opts.clone(), backend, interrupt.clone()) {
            Ok(p) => p.drive().await,
            Err(e) => Err(e),
        };
        if let Some(t) = timer {
            t.abort();
        }
        out
    }

    /// Newest run of a scenario, whatever its state.
    pub fn status(&self, name: &str) -> Result<Option<PipelineRun>> {
        self.scenarios.load(name)?;
        self.journal.latest(name)
    }

    /// Approve, reject or override the pending checkpoint of the scenario's newest run.
    pub fn resolve_checkpoint(&self, name: &str, id: Option<&str>, resolution: Resolution) -> Result<PipelineRun> {
        self.scenarios.load(name)?;
        let _lock = TargetLock::acquire(&self.artifacts.scenario_dir(name).join(LOCK_FILE), &format!("conv resolve {name}"))?;
        let mut run = self
            .journal
            .latest(name)?
            .ok_or_else(|| anyhow!("scenario {name} has no runs"))?;
        let status = conv_checkpoint::resolve(&mut run, id, resolution, Utc::now())?;
        self.journal.save(&run)?;

        let run_dir = self.artifacts.open_run_dir(name, &run.run_label)?;
        if let Some(cp) = &run.checkpoint {
            let reasons: Vec<String> = cp.risk_description.split("; ").map(str::to_string).collect();
            let packet = conv_checkpoint::format_packet(name, cp, &reasons);
            self.artifacts
                .write_role_bytes(&run_dir, ArtifactRole::Reports, &checkpoint_packet_name(cp.id.as_str()), packet.as_bytes())?;
            self.artifacts.append_log(&run_dir, &format!("checkpoint {} resolved {:?}", cp.id, status))?;
        }
        if run.status.is_terminal() {
            write_reports(&self.artifacts, &run_dir, &run, exit_code_for(&run))?;
        }
        info!(scenario = name, status = ?status, "checkpoint resolved");
        Ok(run)
    }
}
