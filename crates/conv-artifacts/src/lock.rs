use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use conv_core::ConvError;
use tracing::{debug, warn};

pub const LOCK_FILE: &str = "target.lock";
/// Directory under the runs root holding one lock per resolved target path.
pub const TARGET_LOCK_DIR: &str = ".targets";

/// Lock file claiming `target` itself, shared by every scenario that resolves to the same
/// directory however its path is spelled.
pub fn target_lock_path(runs_root: &Path, target: &Path) -> Result<PathBuf> {
    let resolved = conv_guard::canonicalize_best_effort(target)
        .with_context(|| format!("resolve target path {}", target.display()))?;
    let key = conv_guard::hash_bytes(resolved.to_string_lossy().as_bytes());
    Ok(runs_root.join(TARGET_LOCK_DIR).join(format!("{}.lock", &key[..16])))
}

/// Exclusive claim on a scenario's target path for the lifetime of one run. Released on drop.
#[derive(Debug)]
pub struct TargetLock {
    path: PathBuf,
}

impl TargetLock {
    /// Fails with `TargetPathBusy` while another live process holds the lock. A lock left behind
    /// by a process that no longer exists is reclaimed.
    pub fn acquire(path: &Path, holder: &str) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
        }
        for _ in 0..2 {
            match fs::OpenOptions::new().write(true).create_new(true).open(path) {
                Ok(mut f) => {
                    writeln!(f, "{}", std::process::id())?;
                    writeln!(f, "{holder}")?;
                    debug!(lock = %path.display(), "target lock acquired");
                    return Ok(Self { path: path.to_path_buf() });
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    let content = fs::read_to_string(path).unwrap_or_default();
                    let pid = content.lines().next().and_then(|l| l.trim().parse::<u32>().ok());
                    match pid {
                        Some(pid) if !pid_alive(pid) => {
                            warn!(lock = %path.display(), pid, "removing stale target lock");
                            fs::remove_file(path).with_context(|| format!("remove stale lock {}", path.display()))?;
                        }
                        _ => {
                            return Err(ConvError::TargetPathBusy {
                                lock: path.display().to_string(),
                                holder: content.lines().collect::<Vec<_>>().join(" "),
                            }
                            .into())
                        }
                    }
                }
                Err(e) => return Err(e).with_context(|| format!("create lock {}", path.display())),
            }
        }
        Err(ConvError::TargetPathBusy { lock: path.display().to_string(), holder: "unknown".to_string() }.into())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TargetLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(target_os = "linux")]
fn pid_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

// Without procfs there is no cheap liveness probe; treat the holder as alive.
#[cfg(not(target_os = "linux"))]
fn pid_alive(_pid: u32) -> bool {
    true
}
