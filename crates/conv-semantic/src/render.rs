use conv_core::SemanticDiffReport;

use crate::rule::{Finding, FindingSeverity};

pub fn render_markdown(scenario: &str, report: &SemanticDiffReport, findings: &[Finding]) -> String {
    let mut s = String::new();
    s.push_str(&format!("# Semantic diff: {scenario}\n\n"));
    s.push_str(&format!(
        "**Loss entries:** {}  \n**Distinct categories:** {}  \n**High severity:** {}\n\n",
        report.entries.len(),
        report.drift.lost_categories,
        report.drift.high_severity_losses
    ));
    if report.entries.is_empty() {
        s.push_str("No semantic loss reported.\n");
    } else {
        s.push_str("| # | Category | Severity | Source | Target | Description |\n");
        s.push_str("|---|----------|----------|--------|--------|-------------|\n");
        for (i, e) in report.entries.iter().enumerate() {
            let cat = if e.known { e.category.clone() } else { format!("{} (new)", e.category) };
            s.push_str(&format!(
                "| {} | {} | {:?} | `{}` | `{}` | {} |\n",
                i + 1,
                cat,
                e.severity,
                e.source_construct,
                e.target_construct,
                e.description.replace('|', "\\|")
            ));
        }
    }
    s.push_str("\n## Drift\n");
    if report.drift.requires_checkpoint {
        s.push_str("Checkpoint required:\n");
        for r in &report.drift.reasons {
            s.push_str(&format!("- {r}\n"));
        }
    } else {
        s.push_str("Within thresholds.\n");
    }
    if !findings.is_empty() {
        s.push_str("\n## Findings\n");
        for f in findings {
            let tag = match f.severity {
                FindingSeverity::Warn => "WARN",
                FindingSeverity::Fail => "FAIL",
            };
            s.push_str(&format!("- [{tag}] {}: {}\n", f.rule_id, f.message));
        }
    }
    s
}
