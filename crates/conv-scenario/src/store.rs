use std::fs;
use std::path::{Component, Path, PathBuf};

use conv_core::{ConvError, Intent};
use tracing::debug;

use crate::descriptor::{context_hash, Expectations, LossRequirements, ScenarioDescriptor, TestVector, VerifySpec};
use crate::notes::intent_from_notes;

pub const DESCRIPTOR_FILE: &str = "scenario.yaml";
pub const NOTES_FILE: &str = "notes.md";
pub const BACKEND_FIXTURE_DIR: &str = "backend";

/// A loaded scenario. Immutable once constructed.
#[derive(Clone, Debug)]
pub struct Scenario {
    pub name: String,
    pub root: PathBuf,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    /// Golden directory, only when it exists.
    pub expected_path: Option<PathBuf>,
    /// Where the golden directory lives or would be created by a golden update.
    pub golden_dir: PathBuf,
    pub intent: Intent,
    pub notes: String,
    pub vectors: Vec<TestVector>,
    pub verify: VerifySpec,
    pub requirements: LossRequirements,
    pub expect: Expectations,
    /// Recorded backend responses used by the replay backend, when present.
    pub backend_fixture: Option<PathBuf>,
    pub context_hash: String,
}

/// Loads scenario definitions from `<root>/<name>/`.
#[derive(Clone, Debug)]
pub struct ScenarioStore {
    pub root: PathBuf,
}

impl ScenarioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Scenario names under the store root. Each call starts a fresh directory scan, so the
    /// sequence can be restarted at will; order follows the filesystem.
    pub fn list(&self) -> ScenarioNames {
        ScenarioNames { entries: fs::read_dir(&self.root).ok() }
    }

    /// Names sorted, for display.
    pub fn list_sorted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.list().collect();
        names.sort();
        names
    }

    pub fn load(&self, name: &str) -> Result<Scenario, ConvError> {
        if !is_plain_name(name) {
            return Err(ConvError::ScenarioNotFound(name.to_string()));
        }
        let dir = self.root.join(name);
        if !dir.is_dir() {
            return Err(ConvError::ScenarioNotFound(name.to_string()));
        }
        let malformed = |reason: String| ConvError::ScenarioMalformed { name: name.to_string(), reason };

        let desc_path = dir.join(DESCRIPTOR_FILE);
        let desc: ScenarioDescriptor = if desc_path.exists() {
            let s = fs::read_to_string(&desc_path).map_err(|e| malformed(format!("read {}: {e}", desc_path.display())))?;
            serde_yaml::from_str(&s).map_err(|e| malformed(format!("parse {DESCRIPTOR_FILE}: {e}")))?
        } else {
            ScenarioDescriptor::default()
        };

        let notes_path = dir.join(NOTES_FILE);
        let notes = if notes_path.exists() {
            fs::read_to_string(&notes_path).map_err(|e| malformed(format!("read {NOTES_FILE}: {e}")))?
        } else {
            String::new()
        };

        let intent_tag = desc
            .intent
            .clone()
            .or_else(|| intent_from_notes(&notes))
            .ok_or_else(|| malformed("missing required field: intent".to_string()))?;
        let intent: Intent = intent_tag.parse()?;

        let source_path = dir.join(desc.source_path.as_deref().unwrap_or("source_repo"));
        if !source_path.is_dir() {
            return Err(malformed(format!("missing required source_path: {}", source_path.display())));
        }
        let target_path = dir.join(desc.target_path.as_deref().unwrap_or("target_repo"));
        if target_path == source_path {
            return Err(malformed("target_path must differ from source_path".to_string()));
        }
        let golden_dir = dir.join(desc.expected_path.as_deref().unwrap_or("expected"));
        let expected_path = Some(golden_dir.clone()).filter(|p| p.is_dir());
        let backend_fixture = Some(dir.join(BACKEND_FIXTURE_DIR)).filter(|p| p.is_dir());

        for (i, v) in desc.vectors.iter().enumerate() {
            if v.function.trim().is_empty() {
                return Err(malformed(format!("vector {i} has an empty function name")));
            }
        }

        debug!(scenario = name, intent = %intent, "scenario loaded");
        Ok(Scenario {
            name: name.to_string(),
            root: dir,
            source_path,
            target_path,
            expected_path,
            golden_dir,
            intent,
            context_hash: context_hash(&desc, &notes),
            notes,
            vectors: desc.vectors,
            verify: desc.verify,
            requirements: desc.requirements,
            expect: desc.expect,
            backend_fixture,
        })
    }
}

/// Lazy, finite iterator over scenario directory names.
pub struct ScenarioNames {
    entries: Option<fs::ReadDir>,
}

impl Iterator for ScenarioNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref().flatten() {
            if !entry.path().is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if !name.starts_with('.') {
                    return Some(name.to_string());
                }
            }
        }
        None
    }
}

fn is_plain_name(name: &str) -> bool {
    let mut comps = Path::new(name).components();
    matches!((comps.next(), comps.next()), (Some(Component::Normal(_)), None))
}
