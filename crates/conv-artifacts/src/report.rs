use conv_core::{FileDiffKind, StageStatus};

use crate::summary::RunSummary;

/// `reports/report.md`.
pub fn render_report(s: &RunSummary) -> String {
    let mut md = String::new();
    md.push_str(&format!("# Conversion run: {}\n\n", s.scenario));
    md.push_str(&format!("- **Run:** {} ({})\n", s.run_label, s.run_id));
    md.push_str(&format!("- **Intent:** {}\n", s.intent));
    md.push_str(&format!("- **Verification mode:** {}\n", s.verification_mode.as_str()));
    md.push_str(&format!("- **Status:** {:?}\n", s.status));
    md.push_str(&format!("- **Exit code:** {}\n", s.exit_code));
    md.push_str(&format!("- **Duration:** {:.1}s\n\n", s.duration_seconds));

    md.push_str("## Stages\n\n| Stage | Status | Error |\n|-------|--------|-------|\n");
    for st in &s.stages {
        let mark = match st.status {
            StageStatus::Done => "done",
            StageStatus::Skipped => "skipped",
            StageStatus::Failed => "FAILED",
            StageStatus::Interrupted => "interrupted",
            StageStatus::Running => "running",
            StageStatus::Pending => "pending",
        };
        md.push_str(&format!("| {} | {} | {} |\n", st.stage, mark, st.error.as_deref().unwrap_or("")));
    }

    if let Some(f) = &s.failure {
        md.push_str(&format!("\n## Failure\n\n`{}`: {}\n", f.class, f.message));
    }

    if !s.semantic_diff.is_empty() {
        md.push_str(&format!("\n## Semantic loss ({} entries)\n\n", s.semantic_diff.len()));
        for e in &s.semantic_diff {
            md.push_str(&format!("- **{}** ({:?}): {}\n", e.category, e.severity, e.description));
        }
    }

    if let Some(cp) = &s.checkpoint {
        md.push_str(&format!("\n## Checkpoint\n\n{} at `{}`: {:?}\n", cp.id, cp.stage, cp.status));
        if let Some(note) = &cp.resolution_note {
            md.push_str(&format!("\nNote: {note}\n"));
        }
    }

    if let Some(v) = &s.verification {
        md.push_str(&format!("\n## Verification: {}\n\n", if v.passed { "PASS" } else { "FAIL" }));
        for o in &v.vectors {
            let got = o.actual.as_deref().or(o.error.as_deref()).unwrap_or("-");
            md.push_str(&format!(
                "- [{}] `{}({})` expected `{}` got `{}`\n",
                if o.matched { "x" } else { " " },
                o.function,
                o.inputs.iter().map(|i| i.to_string()).collect::<Vec<_>>().join(", "),
                o.expected,
                got
            ));
        }
        for f in &v.files {
            let what = match f.kind {
                FileDiffKind::MissingInTarget => "missing in target",
                FileDiffKind::UnexpectedInTarget => "not in expected",
                FileDiffKind::ContentMismatch => "content differs",
            };
            md.push_str(&format!("- `{}`: {what}\n", f.path));
            if let Some(u) = &f.unified {
                md.push_str(&format!("\n```diff\n{}```\n", u));
            }
        }
        for i in &v.issues {
            md.push_str(&format!("- {i}\n"));
        }
        for n in &v.notes {
            md.push_str(&format!("- note: {n}\n"));
        }
    }
    md
}
