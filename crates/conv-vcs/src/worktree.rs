use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use walkdir::WalkDir;

/// Entries preserved when a target tree is cleared.
pub const PRESERVED: &[&str] = &[".git"];

/// Remove everything under `dir` except VCS metadata. Missing `dir` is created.
pub fn clear_worktree(dir: &Path) -> Result<()> {
    if !dir.exists() {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
        return Ok(());
    }
    for entry in fs::read_dir(dir).with_context(|| format!("read {}", dir.display()))? {
        let entry = entry?;
        if PRESERVED.iter().any(|p| entry.file_name() == *p) {
            continue;
        }
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            fs::remove_dir_all(&path).with_context(|| format!("remove {}", path.display()))?;
        } else {
            fs::remove_file(&path).with_context(|| format!("remove {}", path.display()))?;
        }
    }
    Ok(())
}

/// True when `dir` holds anything besides VCS metadata.
pub fn has_content(dir: &Path) -> bool {
    fs::read_dir(dir)
        .map(|rd| rd.flatten().any(|e| !PRESERVED.iter().any(|p| e.file_name() == *p)))
        .unwrap_or(false)
}

/// Copy regular files from `from` into `to`, skipping VCS metadata. Returns the copied relative paths.
pub fn copy_tree(from: &Path, to: &Path) -> Result<Vec<String>> {
    let mut written = Vec::new();
    let walker = WalkDir::new(from).sort_by_file_name().into_iter();
    for entry in walker.filter_entry(|e| e.depth() == 0 || !PRESERVED.iter().any(|p| e.file_name() == *p)) {
        let entry = entry.with_context(|| format!("walk {}", from.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let rel = entry.path().strip_prefix(from)?;
        let dest = to.join(rel);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(entry.path(), &dest).with_context(|| format!("copy {}", entry.path().display()))?;
        written.push(rel.components().map(|c| c.as_os_str().to_string_lossy().into_owned()).collect::<Vec<_>>().join("/"));
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn clear_keeps_git_metadata() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join(".git")).unwrap();
        fs::write(dir.path().join(".git/HEAD"), "ref").unwrap();
        fs::create_dir_all(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/a.c"), "").unwrap();
        fs::write(dir.path().join("b.c"), "").unwrap();
        assert!(has_content(dir.path()));
        clear_worktree(dir.path()).unwrap();
        assert!(dir.path().join(".git/HEAD").exists());
        assert!(!has_content(dir.path()));
    }

    #[test]
    fn copy_tree_skips_git() {
        let dir = tempdir().unwrap();
        let (from, to) = (dir.path().join("from"), dir.path().join("to"));
        fs::create_dir_all(from.join(".git")).unwrap();
        fs::create_dir_all(from.join("src")).unwrap();
        fs::write(from.join(".git/HEAD"), "ref").unwrap();
        fs::write(from.join("src/add.c"), "int add(int a, int b) { return a + b; }\n").unwrap();
        let copied = copy_tree(&from, &to).unwrap();
        assert_eq!(copied, vec!["src/add.c".to_string()]);
        assert!(!to.join(".git").exists());
    }

    #[test]
    fn missing_dir_is_created() {
        let dir = tempdir().unwrap();
        let t = dir.path().join("target_repo");
        clear_worktree(&t).unwrap();
        assert!(t.is_dir());
        assert!(!has_content(&t));
    }
}
