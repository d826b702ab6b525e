use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Subdirectories of a run directory. `Diff` only ever holds target-side data.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ArtifactRole {
    Artifacts,
    Reports,
    Logs,
    Diff,
}

impl ArtifactRole {
    pub const ALL: [ArtifactRole; 4] = [ArtifactRole::Artifacts, ArtifactRole::Reports, ArtifactRole::Logs, ArtifactRole::Diff];

    pub fn dir_name(&self) -> &'static str {
        match self {
            ArtifactRole::Artifacts => "artifacts",
            ArtifactRole::Reports => "reports",
            ArtifactRole::Logs => "logs",
            ArtifactRole::Diff => "diff",
        }
    }
}

pub const RUN_LOG: &str = "run.log";
pub const SUMMARY_FILE: &str = "summary.json";

/// A single run's directory: `<runs_root>/<scenario>/<label>/`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunDir {
    pub scenario: String,
    pub label: String,
    pub path: PathBuf,
}

impl RunDir {
    pub fn role(&self, role: ArtifactRole) -> PathBuf {
        self.path.join(role.dir_name())
    }

    /// Path relative to the run directory, `/`-separated, as recorded in stage results.
    pub fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.path)
            .unwrap_or(path)
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/")
    }
}

pub trait ArtifactStore: Send + Sync {
    fn create_run_dir(&self, scenario: &str, started_at: DateTime<Utc>) -> Result<RunDir>;
    fn open_run_dir(&self, scenario: &str, label: &str) -> Result<RunDir>;
    fn append_log(&self, run: &RunDir, line: &str) -> Result<()>;
    fn write_role_bytes(&self, run: &RunDir, role: ArtifactRole, name: &str, bytes: &[u8]) -> Result<PathBuf>;
}

#[derive(Clone, Debug)]
pub struct FsArtifactStore {
    pub root: PathBuf,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn scenario_dir(&self, scenario: &str) -> PathBuf {
        self.root.join(scenario)
    }

    /// Run labels for a scenario, oldest first. Labels sort chronologically.
    pub fn list_runs(&self, scenario: &str) -> Result<Vec<String>> {
        let dir = self.scenario_dir(scenario);
        if !dir.exists() {
            return Ok(vec![]);
        }
        let mut labels = Vec::new();
        for entry in fs::read_dir(&dir).with_context(|| format!("read {}", dir.display()))? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                if let Some(name) = entry.file_name().to_str() {
                    labels.push(name.to_string());
                }
            }
        }
        labels.sort_by(|a, b| label_key(a).cmp(&label_key(b)));
        Ok(labels)
    }

    pub fn write_json<T: Serialize>(&self, run: &RunDir, role: ArtifactRole, name: &str, value: &T) -> Result<PathBuf> {
        let bytes = serde_json::to_vec_pretty(value)?;
        self.write_role_bytes(run, role, name, &bytes)
    }
}

/// `20260101_120000` < `20260101_120000_2` < `20260101_120000_10`.
fn label_key(label: &str) -> (String, u32) {
    match label.rsplit_once('_') {
        Some((head, n)) if head.contains('_') => (head.to_string(), n.parse().unwrap_or(0)),
        _ => (label.to_string(), 0),
    }
}

impl ArtifactStore for FsArtifactStore {
    fn create_run_dir(&self, scenario: &str, started_at: DateTime<Utc>) -> Result<RunDir> {
        let base = started_at.format("%Y%m%d_%H%M%S").to_string();
        let parent = self.scenario_dir(scenario);
        fs::create_dir_all(&parent).with_context(|| format!("create {}", parent.display()))?;
        // Two runs started within the same second must not share a directory.
        let mut n = 1u32;
        let (label, path) = loop {
            let label = if n == 1 { base.clone() } else { format!("{base}_{n}") };
            let path = parent.join(&label);
            match fs::create_dir(&path) {
                Ok(()) => break (label, path),
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => n += 1,
                Err(e) => return Err(e).with_context(|| format!("create run dir {}", path.display())),
            }
        };
        for role in ArtifactRole::ALL {
            fs::create_dir_all(path.join(role.dir_name()))?;
        }
        tracing::debug!(run_dir = %path.display(), "run directory created");
        Ok(RunDir { scenario: scenario.to_string(), label, path })
    }

    fn open_run_dir(&self, scenario: &str, label: &str) -> Result<RunDir> {
        let path = self.scenario_dir(scenario).join(label);
        if !path.is_dir() {
            anyhow::bail!("run directory {} does not exist", path.display());
        }
        for role in ArtifactRole::ALL {
            fs::create_dir_all(path.join(role.dir_name()))?;
        }
        Ok(RunDir { scenario: scenario.to_string(), label: label.to_string(), path })
    }

    fn append_log(&self, run: &RunDir, line: &str) -> Result<()> {
        let path = run.role(ArtifactRole::Logs).join(RUN_LOG);
        let mut f = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        writeln!(f, "[{}] {}", Utc::now().format("%Y-%m-%dT%H:%M:%SZ"), line)?;
        Ok(())
    }

    fn write_role_bytes(&self, run: &RunDir, role: ArtifactRole, name: &str, bytes: &[u8]) -> Result<PathBuf> {
        let path = run.role(role).join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes).with_context(|| format!("write {}", path.display()))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::tempdir;

    #[test]
    fn same_second_runs_get_distinct_dirs() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let t = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let a = store.create_run_dir("s", t).unwrap();
        let b = store.create_run_dir("s", t).unwrap();
        assert_eq!(a.label, "20260301_120000");
        assert_eq!(b.label, "20260301_120000_2");
        for role in ArtifactRole::ALL {
            assert!(a.role(role).is_dir());
        }
        assert_eq!(store.list_runs("s").unwrap(), vec![a.label.clone(), b.label.clone()]);
    }

    #[test]
    fn log_and_role_bytes() {
        let dir = tempdir().unwrap();
        let store = FsArtifactStore::new(dir.path());
        let run = store.create_run_dir("s", Utc::now()).unwrap();
        store.append_log(&run, "hello").unwrap();
        store.append_log(&run, "world").unwrap();
        let log = fs::read_to_string(run.role(ArtifactRole::Logs).join(RUN_LOG)).unwrap();
        assert_eq!(log.lines().count(), 2);
        assert!(log.lines().next().unwrap().ends_with("hello"));

        let p = store.write_role_bytes(&run, ArtifactRole::Reports, "nested/x.txt", b"x").unwrap();
        assert_eq!(run.relative(&p), "reports/nested/x.txt");
        assert!(store.open_run_dir("s", &run.label).is_ok());
        assert!(store.open_run_dir("s", "missing").is_err());
    }

    #[test]
    fn label_ordering_is_numeric_on_suffix() {
        let mut v = vec!["20260101_000000_10", "20260101_000000_2", "20260101_000000"];
        v.sort_by(|a, b| label_key(a).cmp(&label_key(b)));
        assert_eq!(v, vec!["20260101_000000", "20260101_000000_2", "20260101_000000_10"]);
    }
}
