use std::path::{Component, Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};

/// Normalize a path lexically (no filesystem access).
pub fn normalize_path(p: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in p.components() {
        match comp {
            Component::Prefix(_) | Component::RootDir => out.push(comp.as_os_str()),
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            Component::Normal(s) => out.push(s),
        }
    }
    out
}

pub fn is_within(parent: &Path, child: &Path) -> bool {
    let parent = parent.components().collect::<Vec<_>>();
    let child = child.components().collect::<Vec<_>>();
    child.len() >= parent.len() && child[..parent.len()] == parent[..]
}

/// Canonicalize if possible; otherwise canonicalize the nearest existing parent and re-append
/// the missing suffix.
pub fn canonicalize_best_effort(path: &Path) -> Result<PathBuf> {
    if path.exists() {
        return std::fs::canonicalize(path).map_err(|e| anyhow!(e));
    }
    let abs = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir().context("current dir")?.join(path)
    };
    let abs = normalize_path(&abs);
    let mut cur = abs.clone();
    while !cur.exists() {
        if !cur.pop() {
            break;
        }
    }
    if cur.as_os_str().is_empty() {
        bail!("cannot canonicalize path '{}'", path.display());
    }
    let canon_parent = std::fs::canonicalize(&cur).map_err(|e| anyhow!(e))?;
    let suffix = abs.strip_prefix(&cur).unwrap_or(&abs);
    Ok(canon_parent.join(suffix))
}

/// The writable root must neither be, contain, nor sit inside the read-only root.
pub fn ensure_disjoint(read_only: &Path, writable: &Path) -> Result<()> {
    let ro = canonicalize_best_effort(read_only)?;
    let rw = canonicalize_best_effort(writable)?;
    if is_within(&ro, &rw) || is_within(&rw, &ro) {
        bail!("'{}' overlaps read-only tree '{}'", rw.display(), ro.display());
    }
    Ok(())
}
