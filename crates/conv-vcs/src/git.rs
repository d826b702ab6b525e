use std::path::Path;
use std::process::Command;

use anyhow::{anyhow, Context, Result};
use tracing::debug;

use crate::types::{DiffCapture, TargetVcs};

#[derive(Clone, Debug, Default)]
pub struct GitTargetVcs;

impl GitTargetVcs {
    pub fn new() -> Self {
        Self
    }

    pub(crate) fn run(repo: &Path, args: &[&str]) -> Result<String> {
        let out = Command::new("git")
            .args(args)
            .current_dir(repo)
            .output()
            .with_context(|| format!("run git {:?}", args))?;
        if !out.status.success() {
            return Err(anyhow!(
                "command failed: git {:?}\nstdout:{}\nstderr:{}",
                args,
                String::from_utf8_lossy(&out.stdout),
                String::from_utf8_lossy(&out.stderr)
            ));
        }
        Ok(String::from_utf8_lossy(&out.stdout).to_string())
    }

    fn has_commits(target: &Path) -> bool {
        Self::run(target, &["rev-parse", "--verify", "HEAD"]).is_ok()
    }
}

impl TargetVcs for GitTargetVcs {
    fn name(&self) -> &'static str {
        "git"
    }

    fn available(&self) -> bool {
        Command::new("git").arg("--version").output().map(|o| o.status.success()).unwrap_or(false)
    }

    fn is_repo(&self, target: &Path) -> bool {
        target.join(".git").exists()
    }

    fn init(&self, target: &Path) -> Result<()> {
        if self.is_repo(target) {
            return Ok(());
        }
        std::fs::create_dir_all(target).with_context(|| format!("create {}", target.display()))?;
        Self::run(target, &["init", "--quiet"])?;
        Self::run(target, &["config", "user.email", "conv@localhost"])?;
        Self::run(target, &["config", "user.name", "conv"])?;
        Self::run(target, &["config", "commit.gpgsign", "false"])?;
        debug!(target = %target.display(), "initialized target repository");
        Ok(())
    }

    fn capture(&self, target: &Path) -> Result<DiffCapture> {
        // Stage everything so new files appear in the patch. The index belongs to the disposable
        // target repo.
        Self::run(target, &["add", "-A"])?;
        let status = Self::run(target, &["status", "--porcelain"])?;
        let patch = Self::run(target, &["diff", "--cached", "--binary"])?;
        let log = if Self::has_commits(target) {
            Self::run(target, &["log", "--oneline", "-n", "20"])?
        } else {
            String::new()
        };
        Ok(DiffCapture { status, patch, log })
    }

    fn record(&self, target: &Path, message: &str) -> Result<()> {
        Self::run(target, &["add", "-A"])?;
        if Self::run(target, &["diff", "--cached", "--name-only"])?.trim().is_empty() {
            return Ok(());
        }
        Self::run(target, &["commit", "--quiet", "-m", message])?;
        Ok(())
    }
}
