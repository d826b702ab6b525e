use std::collections::HashMap;
use std::sync::Mutex;

use anyhow::anyhow;
use conv_core::PipelineRun;

use crate::traits::RunJournal;

/// In-memory journal for tests. Not durable.
#[derive(Default)]
pub struct InMemoryJournal {
    inner: Mutex<HashMap<(String, String), PipelineRun>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RunJournal for InMemoryJournal {
    fn save(&self, run: &PipelineRun) -> anyhow::Result<()> {
        let mut inner = self.inner.lock().map_err(|_| anyhow!("journal mutex poisoned"))?;
        inner.insert((run.scenario.clone(), run.run_label.clone()), run.clone());
        Ok(())
    }

    fn load(&self, scenario: &str, run_label: &str) -> anyhow::Result<Option<PipelineRun>> {
        let inner = self.inner.lock().map_err(|_| anyhow!("journal mutex poisoned"))?;
        Ok(inner.get(&(scenario.to_string(), run_label.to_string())).cloned())
    }

    fn history(&self, scenario: &str) -> anyhow::Result<Vec<PipelineRun>> {
        let inner = self.inner.lock().map_err(|_| anyhow!("journal mutex poisoned"))?;
        let mut runs: Vec<PipelineRun> = inner.values().filter(|r| r.scenario == scenario).cloned().collect();
        runs.sort_by(|a, b| a.started_at.cmp(&b.started_at).then_with(|| a.run_label.cmp(&b.run_label)));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use conv_core::{Intent, RunStatus, StageName, VerificationMode};

    fn run(label: &str, offset: i64, status: RunStatus) -> PipelineRun {
        let mut r = PipelineRun::new(
            "s",
            Intent::LanguageToLanguage,
            VerificationMode::GoldenDiff,
            &StageName::ORDER,
            label,
            Utc::now() + Duration::seconds(offset),
        );
        r.status = status;
        r
    }

    #[test]
    fn latest_resumable_skips_terminal_runs() {
        let j = InMemoryJournal::new();
        j.save(&run("a", 0, RunStatus::Interrupted)).unwrap();
        j.save(&run("b", 1, RunStatus::AwaitingCheckpoint)).unwrap();
        j.save(&run("c", 2, RunStatus::Passed)).unwrap();
        assert_eq!(j.latest("s").unwrap().unwrap().run_label, "c");
        assert_eq!(j.latest_resumable("s").unwrap().unwrap().run_label, "b");
        assert!(j.latest_resumable("other").unwrap().is_none());
    }

    #[test]
    fn save_overwrites_same_run() {
        let j = InMemoryJournal::new();
        let mut r = run("a", 0, RunStatus::Running);
        j.save(&r).unwrap();
        r.status = RunStatus::Failed;
        j.save(&r).unwrap();
        assert_eq!(j.history("s").unwrap().len(), 1);
        assert_eq!(j.load("s", "a").unwrap().unwrap().status, RunStatus::Failed);
    }
}
