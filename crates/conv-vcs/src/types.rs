use std::path::Path;

use anyhow::Result;

/// What the diff capture recorded for the target repository. Every field is best effort.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DiffCapture {
    pub status: String,
    pub patch: String,
    pub log: String,
}

/// Version-control plumbing for the disposable target repository. Never pointed at the source.
pub trait TargetVcs: Send + Sync {
    fn name(&self) -> &'static str;

    /// Whether the backing tool is installed.
    fn available(&self) -> bool;

    fn is_repo(&self, target: &Path) -> bool;

    /// Initialize `target` as a repository if it is not one yet.
    fn init(&self, target: &Path) -> Result<()>;

    /// Status, patch against the last recorded state, and recent history.
    fn capture(&self, target: &Path) -> Result<DiffCapture>;

    /// Record the current tree so the next run diffs against it. No-op when nothing changed.
    fn record(&self, target: &Path, message: &str) -> Result<()>;
}
