//! The one code path allowed to write golden fixtures.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};
use tracing::info;

/// Proof that an operator asked for a golden update. Only obtainable from an explicit flag.
#[derive(Debug)]
pub struct GoldenUpdateRequest {
    _private: (),
}

impl GoldenUpdateRequest {
    pub fn from_operator_flag(update_golden: bool) -> Option<Self> {
        update_golden.then_some(Self { _private: () })
    }
}

/// Replace the contents of `expected` with the target tree (VCS metadata excluded). Refuses when
/// the expected directory overlaps the read-only source. Returns the written relative paths.
pub fn overwrite_golden(_request: &GoldenUpdateRequest, target: &Path, expected: &Path, source: &Path) -> Result<Vec<String>> {
    conv_guard::ensure_disjoint(source, expected).context("golden directory")?;
    if !target.is_dir() {
        bail!("target {} does not exist", target.display());
    }
    if expected.exists() {
        fs::remove_dir_all(expected).with_context(|| format!("clear {}", expected.display()))?;
    }
    fs::create_dir_all(expected)?;
    let written = conv_vcs::copy_tree(target, expected)?;
    info!(expected = %expected.display(), files = written.len(), "golden fixtures updated");
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn request_only_from_flag() {
        assert!(GoldenUpdateRequest::from_operator_flag(false).is_none());
        assert!(GoldenUpdateRequest::from_operator_flag(true).is_some());
    }

    #[test]
    fn overwrite_replaces_contents_and_skips_git() {
        let dir = tempdir().unwrap();
        let (src, target, expected) = (dir.path().join("src"), dir.path().join("target"), dir.path().join("expected"));
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(target.join(".git")).unwrap();
        fs::create_dir_all(target.join("include")).unwrap();
        fs::write(target.join(".git/HEAD"), "ref").unwrap();
        fs::write(target.join("item.cpp"), "struct Item {};\n").unwrap();
        fs::write(target.join("include/item.hpp"), "#pragma once\n").unwrap();
        fs::create_dir_all(&expected).unwrap();
        fs::write(expected.join("stale.cpp"), "old").unwrap();

        let req = GoldenUpdateRequest::from_operator_flag(true).unwrap();
        let written = overwrite_golden(&req, &target, &expected, &src).unwrap();
        assert_eq!(written, vec!["include/item.hpp".to_string(), "item.cpp".to_string()]);
        assert!(!expected.join("stale.cpp").exists());
        assert!(!expected.join(".git").exists());
    }

    #[test]
    fn refuses_to_write_into_source() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("src");
        let target = dir.path().join("target");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&target).unwrap();
        let req = GoldenUpdateRequest::from_operator_flag(true).unwrap();
        assert!(overwrite_golden(&req, &target, &src.join("expected"), &src).is_err());
    }
}
