use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use conv_core::PipelineRun;
use tracing::warn;

use crate::traits::RunJournal;

pub const STATE_FILE: &str = "state.json";

/// Journal stored as `<runs_root>/<scenario>/<label>/state.json`, next to the run's artifacts.
#[derive(Clone, Debug)]
pub struct FsJournal {
    pub root: PathBuf,
}

impl FsJournal {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn state_path(&self, scenario: &str, run_label: &str) -> PathBuf {
        self.root.join(scenario).join(run_label).join(STATE_FILE)
    }
}

impl RunJournal for FsJournal {
    /// Write-then-rename so an interrupt never leaves a torn state file.
    fn save(&self, run: &PipelineRun) -> Result<()> {
        let path = self.state_path(&run.scenario, &run.run_label);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(run)?;
        fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        fs::rename(&tmp, &path).with_context(|| format!("rename {} -> {}", tmp.display(), path.display()))?;
        Ok(())
    }

    fn load(&self, scenario: &str, run_label: &str) -> Result<Option<PipelineRun>> {
        let path = self.state_path(scenario, run_label);
        if !path.exists() {
            return Ok(None);
        }
        let s = fs::read_to_string(&path).with_context(|| format!("read {}", path.display()))?;
        let run = serde_json::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(Some(run))
    }

    fn history(&self, scenario: &str) -> Result<Vec<PipelineRun>> {
        let dir = self.root.join(scenario);
        if !dir.is_dir() {
            return Ok(vec![]);
        }
        let mut runs = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(label) = entry.file_name().to_str().map(str::to_string) else { continue };
            match self.load(scenario, &label) {
                Ok(Some(run)) => runs.push(run),
                Ok(None) => {}
                // One unreadable state file must not hide the rest of the history.
                Err(e) => warn!(scenario, label = %label, error = %e, "skipping unreadable run state"),
            }
        }
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_label.cmp(&b.run_label)));
        Ok(runs)
    }
}
