//! Write protection for the source repository.
//!
//! The guard never locks the source tree. It records a digest of every file before the run
//! and recomputes it afterwards; any difference is a harness safety violation.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use conv_core::{ConvError, TreeDelta};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, error};
use walkdir::WalkDir;

/// Relative path (always `/`-separated) to sha256 hex digest.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TreeSnapshot {
    pub files: BTreeMap<String, String>,
}

impl TreeSnapshot {
    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Digest over the whole mapping; equal trees give equal fingerprints.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for (path, digest) in &self.files {
            hasher.update(path.as_bytes());
            hasher.update([0u8]);
            hasher.update(digest.as_bytes());
            hasher.update([b'\n']);
        }
        hex::encode(hasher.finalize())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let s = fs::read_to_string(path).with_context(|| format!("read snapshot {}", path.display()))?;
        serde_json::from_str(&s).with_context(|| format!("parse snapshot {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(self)?;
        fs::write(path, bytes).with_context(|| format!("write snapshot {}", path.display()))
    }
}

pub fn hash_bytes(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

pub fn hash_file(path: &Path) -> Result<String> {
    let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
    Ok(hash_bytes(&bytes))
}

/// Content digest of every file under `root`. Symlinks are recorded by their target, not
/// followed. A missing root yields an empty snapshot.
pub fn snapshot(root: &Path) -> Result<TreeSnapshot> {
    snapshot_filtered(root, |_| true)
}

/// Like [`snapshot`], skipping any entry for which `keep` returns false. Skipped directories
/// are not descended into.
pub fn snapshot_filtered(root: &Path, keep: impl Fn(&str) -> bool) -> Result<TreeSnapshot> {
    let mut files = BTreeMap::new();
    if !root.exists() {
        return Ok(TreeSnapshot { files });
    }
    let walker = WalkDir::new(root).follow_links(false).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|e| e.depth() == 0 || rel_key(root, e.path()).map(|k| keep(&k)).unwrap_or(true)) {
        let entry = entry.with_context(|| format!("walk {}", root.display()))?;
        let ft = entry.file_type();
        if ft.is_dir() {
            continue;
        }
        let Some(key) = rel_key(root, entry.path()) else { continue };
        let digest = if ft.is_symlink() {
            let target = fs::read_link(entry.path()).with_context(|| format!("readlink {}", entry.path().display()))?;
            hash_bytes(format!("symlink:{}", target.display()).as_bytes())
        } else {
            hash_file(entry.path())?
        };
        files.insert(key, digest);
    }
    debug!(root = %root.display(), files = files.len(), "tree snapshot");
    Ok(TreeSnapshot { files })
}

fn rel_key(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Entries added, removed or changed going from `before` to `after`.
pub fn diff_snapshots(before: &TreeSnapshot, after: &TreeSnapshot) -> TreeDelta {
    let mut delta = TreeDelta::default();
    for (path, digest) in &after.files {
        match before.files.get(path) {
            None => delta.added.push(path.clone()),
            Some(d) if d != digest => delta.modified.push(path.clone()),
            Some(_) => {}
        }
    }
    delta.removed = before.files.keys().filter(|p| !after.files.contains_key(*p)).cloned().collect();
    delta
}

/// Recompute the snapshot of `root` and compare. Any delta is `SourceMutationDetected`.
pub fn verify(root: &Path, before: &TreeSnapshot) -> Result<()> {
    let after = snapshot(root)?;
    let delta = diff_snapshots(before, &after);
    if delta.is_empty() {
        return Ok(());
    }
    error!(target: "conv::alert", root = %root.display(), changes = %delta.summary(), "source repository mutated");
    Err(ConvError::SourceMutationDetected { delta }.into())
}

/// A snapshot bound to the tree it was taken from.
#[derive(Clone, Debug)]
pub struct WriteProtectionGuard {
    pub root: PathBuf,
    pub baseline: TreeSnapshot,
}

impl WriteProtectionGuard {
    pub fn arm(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        let baseline = snapshot(&root)?;
        Ok(Self { root, baseline })
    }

    /// Rebind a baseline persisted by an earlier process (resume).
    pub fn with_baseline(root: impl Into<PathBuf>, baseline: TreeSnapshot) -> Self {
        Self { root: root.into(), baseline }
    }

    pub fn verify(&self) -> Result<()> {
        verify(&self.root, &self.baseline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn seed(dir: &Path) {
        fs::create_dir_all(dir.join("src")).unwrap();
        fs::write(dir.join("src/main.c"), "int main(void) { return 0; }\n").unwrap();
        fs::write(dir.join("README"), "hello\n").unwrap();
    }

    #[test]
    fn untouched_tree_verifies() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let guard = WriteProtectionGuard::arm(dir.path()).unwrap();
        assert_eq!(guard.baseline.len(), 2);
        assert!(guard.baseline.files.contains_key("src/main.c"));
        guard.verify().unwrap();
    }

    #[test]
    fn every_kind_of_change_is_detected() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let guard = WriteProtectionGuard::arm(dir.path()).unwrap();
        fs::write(dir.path().join("src/main.c"), "int main(void) { return 1; }\n").unwrap();
        fs::remove_file(dir.path().join("README")).unwrap();
        fs::write(dir.path().join("new.h"), "").unwrap();

        let err = guard.verify().unwrap_err();
        match err.downcast_ref::<ConvError>() {
            Some(ConvError::SourceMutationDetected { delta }) => {
                assert_eq!(delta.added, vec!["new.h".to_string()]);
                assert_eq!(delta.removed, vec!["README".to_string()]);
                assert_eq!(delta.modified, vec!["src/main.c".to_string()]);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn snapshot_roundtrips_through_disk() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        let snap = snapshot(dir.path()).unwrap();
        let out = tempdir().unwrap();
        let path = out.path().join("snap.json");
        snap.save(&path).unwrap();
        let loaded = TreeSnapshot::load(&path).unwrap();
        assert_eq!(loaded.fingerprint(), snap.fingerprint());
        verify(dir.path(), &loaded).unwrap();
    }

    #[test]
    fn filtered_snapshot_skips_subtrees() {
        let dir = tempdir().unwrap();
        seed(dir.path());
        fs::create_dir_all(dir.path().join(".git/objects")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        let snap = snapshot_filtered(dir.path(), |k| k != ".git").unwrap();
        assert_eq!(snap.len(), 2);
        assert_eq!(snapshot(dir.path()).unwrap().len(), 3);
    }

    #[test]
    fn missing_root_is_empty() {
        let dir = tempdir().unwrap();
        assert!(snapshot(&dir.path().join("nope")).unwrap().is_empty());
    }
}
