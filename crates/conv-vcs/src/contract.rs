use std::path::Path;

use anyhow::{anyhow, Result};

use crate::types::TargetVcs;

/// Shared contract for target VCS adapters: init, capture a new file, record, capture clean.
pub fn run_target_vcs_contract(vcs: &dyn TargetVcs, target: &Path) -> Result<()> {
    vcs.init(target)?;
    if !vcs.is_repo(target) {
        return Err(anyhow!("expected {} to be a repository after init", target.display()));
    }
    vcs.init(target)?;

    std::fs::write(target.join("item.cpp"), "struct Item {};\n")?;
    let first = vcs.capture(target)?;
    if !first.status.contains("item.cpp") || !first.patch.contains("struct Item") {
        return Err(anyhow!("expected new file in status and patch, got {:?}", first));
    }

    vcs.record(target, "conv: first run")?;
    let second = vcs.capture(target)?;
    if !second.status.trim().is_empty() || !second.patch.is_empty() {
        return Err(anyhow!("expected clean capture after record, got {:?}", second));
    }
    if !second.log.contains("conv: first run") {
        return Err(anyhow!("expected recorded commit in log, got {:?}", second.log));
    }
    // Recording an unchanged tree is a no-op.
    vcs.record(target, "conv: nothing")?;
    Ok(())
}
