use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::store::{ArtifactRole, RunDir};

pub const MANIFEST_FILE: &str = "manifest.json";

/// sha256 of every file recorded for a run, keyed by run-relative path.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ArtifactManifest {
    pub scenario: String,
    pub run_label: String,
    pub files: BTreeMap<String, String>,
}

impl ArtifactManifest {
    /// Walks the four role directories. The manifest itself is excluded.
    pub fn collect(run: &RunDir) -> Result<Self> {
        let mut files = BTreeMap::new();
        for role in ArtifactRole::ALL {
            let dir = run.role(role);
            let snap = conv_guard::snapshot(&dir)?;
            for (rel, digest) in snap.files {
                let key = format!("{}/{rel}", role.dir_name());
                if key == format!("artifacts/{MANIFEST_FILE}") {
                    continue;
                }
                files.insert(key, digest);
            }
        }
        Ok(Self { scenario: run.scenario.clone(), run_label: run.label.clone(), files })
    }

    /// Paths whose current content no longer matches the recorded digest.
    pub fn verify(&self, run_path: &Path) -> Result<Vec<String>> {
        let mut stale = Vec::new();
        for (rel, digest) in &self.files {
            let p = run_path.join(rel);
            if !p.exists() || conv_guard::hash_file(&p)? != *digest {
                stale.push(rel.clone());
            }
        }
        Ok(stale)
    }
}
