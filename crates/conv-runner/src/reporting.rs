//! End-of-run records: diff capture, summary, human report, manifest, alert.

use std::path::Path;

use anyhow::Result;
use chrono::Utc;
use conv_artifacts::{
    render_report, ArtifactManifest, ArtifactRole, ArtifactStore, FsArtifactStore, RunDir, RunSummary, MANIFEST_FILE,
    SUMMARY_FILE,
};
use conv_core::{ConvError, PipelineRun};
use conv_vcs::TargetVcs;
use tracing::{error, warn};

pub const REPORT_FILE: &str = "report.md";
pub const ALERT_FILE: &str = "ALERT_source_mutation.txt";
pub const TARGET_MANIFEST_FILE: &str = "target_manifest.json";

pub fn not_vcs(rel: &str) -> bool {
    let first = rel.split('/').next().unwrap_or(rel);
    !conv_vcs::PRESERVED.contains(&first)
}

/// Target-side diff record. Git output is best effort; the content manifest is always written.
pub fn capture_target(store: &FsArtifactStore, run_dir: &RunDir, vcs: &dyn TargetVcs, target: &Path) -> Result<()> {
    if !target.is_dir() {
        return Ok(());
    }
    let snap = conv_guard::snapshot_filtered(target, not_vcs)?;
    store.write_json(run_dir, ArtifactRole::Diff, TARGET_MANIFEST_FILE, &snap)?;
    if !(vcs.available() && vcs.is_repo(target)) {
        return Ok(());
    }
    match vcs.capture(target) {
        Ok(c) => {
            store.write_role_bytes(run_dir, ArtifactRole::Diff, "status.txt", c.status.as_bytes())?;
            store.write_role_bytes(run_dir, ArtifactRole::Diff, "diff.patch", c.patch.as_bytes())?;
            store.write_role_bytes(run_dir, ArtifactRole::Diff, "log.txt", c.log.as_bytes())?;
            if let Err(e) = vcs.record(target, &format!("conv run {}", run_dir.label)) {
                warn!(error = %format!("{e:#}"), "could not record target revision");
            }
        }
        Err(e) => warn!(error = %format!("{e:#}"), target = %target.display(), "diff capture skipped"),
    }
    Ok(())
}

/// Out-of-band alert for a source mutation, next to the run's reports.
pub fn write_alert(store: &FsArtifactStore, run_dir: &RunDir, err: &ConvError) -> Result<()> {
    let mut body = format!("SOURCE MUTATION DETECTED\n\nscenario: {}\nrun: {}\n\n", run_dir.scenario, run_dir.label);
    if let ConvError::SourceMutationDetected { delta } = err {
        for line in delta.lines() {
            body.push_str(&line);
            body.push('\n');
        }
    }
    error!(target: "conv::alert", scenario = %run_dir.scenario, run = %run_dir.label, "{err}");
    store.write_role_bytes(run_dir, ArtifactRole::Reports, ALERT_FILE, body.as_bytes())?;
    Ok(())
}

/// `summary.json`, `report.md`, then the manifest over everything written so far.
pub fn write_reports(store: &FsArtifactStore, run_dir: &RunDir, run: &PipelineRun, exit_code: i32) -> Result<RunSummary> {
    let summary = RunSummary::from_run(run, exit_code, Utc::now());
    store.write_json(run_dir, ArtifactRole::Reports, SUMMARY_FILE, &summary)?;
    store.write_role_bytes(run_dir, ArtifactRole::Reports, REPORT_FILE, render_report(&summary).as_bytes())?;
    let manifest = ArtifactManifest::collect(run_dir)?;
    store.write_json(run_dir, ArtifactRole::Artifacts, MANIFEST_FILE, &manifest)?;
    Ok(summary)
}
