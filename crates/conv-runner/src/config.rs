use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use conv_policy::PolicyConfig;
use conv_verify::VerifyConfig;

pub const CONFIG_FILE: &str = "conv.toml";

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub verify: VerifyConfig,
    #[serde(default)]
    pub backend: BackendConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PathsConfig {
    pub scenarios_root: String,
    pub runs_root: String,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self { scenarios_root: "scenarios".to_string(), runs_root: "runs".to_string() }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct BackendConfig {
    /// argv of the external conversion backend; `--stage <name>` is appended per call.
    #[serde(default)]
    pub command: Option<Vec<String>>,
    #[serde(default = "default_backend_timeout")]
    pub timeout_secs: u64,
    /// Artificial latency for the recorded-response backend (`--no-ai`).
    #[serde(default)]
    pub fixture_delay_ms: u64,
}

fn default_backend_timeout() -> u64 {
    600
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self { command: None, timeout_secs: default_backend_timeout(), fixture_delay_ms: 0 }
    }
}

impl Config {
    pub fn default_for_root() -> Self {
        Self::default()
    }

    pub fn config_path(root: &Path) -> PathBuf {
        root.join(CONFIG_FILE)
    }

    /// `conv.toml` under `root`, or defaults when there is none.
    pub fn load_or_default(root: &Path) -> Result<Self> {
        let path = Self::config_path(root);
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default_for_root())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let s = std::fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
        let cfg: Config = toml::from_str(&s).with_context(|| format!("parse {}", path.display()))?;
        Ok(cfg)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let s = toml::to_string_pretty(self).with_context(|| "serialize toml")?;
        std::fs::write(path, s).with_context(|| format!("write {}", path.display()))?;
        Ok(())
    }

    pub fn scenarios_root(&self, root: &Path) -> PathBuf {
        resolve(root, &self.paths.scenarios_root)
    }

    pub fn runs_root(&self, root: &Path) -> PathBuf {
        resolve(root, &self.paths.runs_root)
    }
}

/// `~` is expanded; relative paths hang off the harness root.
fn resolve(root: &Path, raw: &str) -> PathBuf {
    let p = PathBuf::from(shellexpand::tilde(raw).to_string());
    if p.is_absolute() {
        p
    } else {
        root.join(p)
    }
}
