use conv_core::PipelineRun;

/// Durable record of pipeline runs. The runner saves after every stage transition, before the
/// stage body executes.
pub trait RunJournal: Send + Sync {
    fn save(&self, run: &PipelineRun) -> anyhow::Result<()>;
    fn load(&self, scenario: &str, run_label: &str) -> anyhow::Result<Option<PipelineRun>>;

    /// All runs of a scenario, oldest first.
    fn history(&self, scenario: &str) -> anyhow::Result<Vec<PipelineRun>>;

    fn latest(&self, scenario: &str) -> anyhow::Result<Option<PipelineRun>> {
        Ok(self.history(scenario)?.pop())
    }

    /// Newest run that was interrupted or parked at a checkpoint.
    fn latest_resumable(&self, scenario: &str) -> anyhow::Result<Option<PipelineRun>> {
        Ok(self.history(scenario)?.into_iter().rev().find(|r| r.status.is_resumable()))
    }
}
