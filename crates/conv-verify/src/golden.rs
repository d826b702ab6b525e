use std::fs;
use std::path::Path;

use anyhow::Result;
use conv_core::{FileDiff, FileDiffKind};

use crate::udiff::unified_diff;

fn not_vcs(key: &str) -> bool {
    !conv_vcs::PRESERVED.contains(&key)
}

/// Compare every file under `target` with `expected`. Presence in only one tree is always a
/// failure; differing content carries a unified diff when both sides are UTF-8.
pub fn compare_trees(target: &Path, expected: &Path) -> Result<Vec<FileDiff>> {
    let got = conv_guard::snapshot_filtered(target, not_vcs)?;
    let want = conv_guard::snapshot_filtered(expected, not_vcs)?;
    let mut diffs = Vec::new();

    for (path, digest) in &want.files {
        match got.files.get(path) {
            None => diffs.push(FileDiff { path: path.clone(), kind: FileDiffKind::MissingInTarget, unified: None }),
            Some(d) if d != digest => {
                let a = fs::read(expected.join(path))?;
                let b = fs::read(target.join(path))?;
                let unified = match (std::str::from_utf8(&a), std::str::from_utf8(&b)) {
                    (Ok(a), Ok(b)) => {
                        let d = unified_diff(&format!("expected/{path}"), &format!("target/{path}"), a, b);
                        // Line-identical content can still differ in its trailing newline.
                        if d.is_empty() {
                            format!("--- expected/{path}\n+++ target/{path}\n(trailing newline differs)\n")
                        } else {
                            d
                        }
                    }
                    _ => format!("Binary files expected/{path} and target/{path} differ\n"),
                };
                diffs.push(FileDiff { path: path.clone(), kind: FileDiffKind::ContentMismatch, unified: Some(unified) });
            }
            Some(_) => {}
        }
    }
    for path in got.files.keys().filter(|p| !want.files.contains_key(*p)) {
        diffs.push(FileDiff { path: path.clone(), kind: FileDiffKind::UnexpectedInTarget, unified: None });
    }
    diffs.sort_by(|a, b| a.path.cmp(&b.path));
    Ok(diffs)
}
