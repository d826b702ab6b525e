use std::collections::{BTreeMap, BTreeSet};

use conv_core::{category_key, ConvError, DriftAnalysis, LossEntry, SemanticDiffReport, Severity};

use crate::mapping::MappingArtifact;
use crate::rule::{default_rules, eval_all, first_violation, DisclosureRequirement, Finding, Rule};
use crate::vocabulary::canonical_category;

pub const DEFAULT_LOST_CATEGORY_THRESHOLD: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DriftThresholds {
    /// Distinct lost categories at or above which an operator must sign off.
    pub lost_categories: usize,
    /// Any high-severity loss requires sign-off.
    pub any_high_severity: bool,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self { lost_categories: DEFAULT_LOST_CATEGORY_THRESHOLD, any_high_severity: true }
    }
}

pub struct SemanticDiffEngine {
    pub thresholds: DriftThresholds,
    rules: Vec<Box<dyn Rule>>,
}

impl Default for SemanticDiffEngine {
    fn default() -> Self {
        Self { thresholds: DriftThresholds::default(), rules: default_rules() }
    }
}

impl SemanticDiffEngine {
    pub fn new(thresholds: DriftThresholds) -> Self {
        Self { thresholds, ..Self::default() }
    }

    /// Reduce a mapping artifact to its loss entries, in mapping order. Records without a loss
    /// annotation were preserved and contribute nothing.
    /// Spellings of one unknown category collapse onto the first one seen.
    pub fn reduce(&self, mapping: &MappingArtifact) -> SemanticDiffReport {
        let mut first_spelling: BTreeMap<String, String> = BTreeMap::new();
        let entries: Vec<LossEntry> = mapping
            .records()
            .iter()
            .filter_map(|r| {
                let raw = r.loss_category.as_deref().map(str::trim).filter(|c| !c.is_empty())?;
                let (category, known) = canonical_category(raw);
                let category = first_spelling.entry(category_key(&category)).or_insert(category).clone();
                Some(LossEntry {
                    description: r
                        .description
                        .clone()
                        .unwrap_or_else(|| format!("{} lowered to {}", r.source_construct, r.target_construct)),
                    severity: r.severity.unwrap_or_default(),
                    source_construct: r.source_construct.clone(),
                    target_construct: r.target_construct.clone(),
                    category,
                    known,
                })
            })
            .collect();
        let mut report = SemanticDiffReport { entries, drift: DriftAnalysis::default() };
        report.drift = self.drift(&report);
        report
    }

    pub fn drift(&self, report: &SemanticDiffReport) -> DriftAnalysis {
        let lost_categories = report.distinct_categories().len();
        let high_severity_losses = report.entries.iter().filter(|e| e.severity == Severity::High).count();
        let unknown_categories = report
            .entries
            .iter()
            .filter(|e| !e.known)
            .map(|e| category_key(&e.category))
            .collect::<BTreeSet<_>>()
            .len();
        let mut reasons = Vec::new();
        if lost_categories >= self.thresholds.lost_categories {
            reasons.push(format!(
                "{lost_categories} distinct loss categories (threshold {})",
                self.thresholds.lost_categories
            ));
        }
        if self.thresholds.any_high_severity && high_severity_losses > 0 {
            reasons.push(format!("{high_severity_losses} high-severity loss(es)"));
        }
        DriftAnalysis {
            lost_categories,
            high_severity_losses,
            unknown_categories,
            requires_checkpoint: !reasons.is_empty(),
            reasons,
        }
    }

    pub fn findings(&self, report: &SemanticDiffReport, req: &DisclosureRequirement) -> Vec<Finding> {
        eval_all(&self.rules, report, req)
    }

    /// Fails with `ImplausibleZeroLossClaim` or `InsufficientLossDisclosure`.
    pub fn validate(&self, report: &SemanticDiffReport, req: &DisclosureRequirement) -> Result<Vec<Finding>, ConvError> {
        let findings = self.findings(report, req);
        match first_violation(&findings, req.intent) {
            Some(err) => Err(err),
            None => Ok(findings),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapping::MappingRecord;
    use conv_core::Intent;

    fn rec(src: &str, cat: Option<&str>, severity: Option<Severity>) -> MappingRecord {
        MappingRecord {
            source_construct: src.to_string(),
            target_construct: format!("{src}_c"),
            loss_category: cat.map(str::to_string),
            description: None,
            severity,
        }
    }

    fn lowering(records: Vec<MappingRecord>) -> MappingArtifact {
        MappingArtifact::Lowering { records, lowering_strategy: "manual cleanup".into() }
    }

    fn req(min: usize) -> DisclosureRequirement {
        DisclosureRequirement { min_categories: min, lossy: true, ..DisclosureRequirement::lenient(Intent::HighToLowLevel) }
    }

    #[test]
    fn reduce_keeps_order_and_flags_unknown() {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&lowering(vec![
            rec("Widget::~Widget", Some("raii"), None),
            rec("add", None, None),
            rec("co_await", Some("coroutines"), Some(Severity::Low)),
        ]));
        assert_eq!(report.entries.len(), 2);
        assert_eq!(report.entries[0].category, "RAII");
        assert!(report.entries[0].known);
        assert_eq!(report.entries[1].category, "coroutines");
        assert!(!report.entries[1].known);
        assert_eq!(report.drift.unknown_categories, 1);
        assert!(!report.drift.requires_checkpoint);
    }

    #[test]
    fn drift_thresholds_require_checkpoint() {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&lowering(vec![
            rec("a", Some("RAII"), None),
            rec("b", Some("templates"), None),
            rec("c", Some("exceptions"), None),
        ]));
        assert!(report.drift.requires_checkpoint);
        assert_eq!(report.drift.reasons.len(), 1);

        let report = engine.reduce(&lowering(vec![rec("a", Some("RAII"), Some(Severity::High))]));
        assert!(report.drift.requires_checkpoint);
    }

    #[test]
    fn empty_loss_list_never_passes_a_lowering() {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&lowering(vec![rec("add", None, None)]));
        assert!(matches!(engine.validate(&report, &req(4)), Err(ConvError::ImplausibleZeroLossClaim { .. })));
    }

    #[test]
    fn too_few_categories_is_insufficient() {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&lowering(vec![rec("a", Some("RAII"), None), rec("b", Some("templates"), None)]));
        match engine.validate(&report, &req(4)) {
            Err(ConvError::InsufficientLossDisclosure { required, found, .. }) => {
                assert_eq!((required, found), (4, 2));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sufficient_disclosure_passes_with_warnings() {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&lowering(vec![
            rec("a", Some("RAII"), None),
            rec("b", Some("templates"), None),
            rec("c", Some("exceptions"), None),
            rec("d", Some("coroutines"), None),
        ]));
        let findings = engine.validate(&report, &req(4)).unwrap();
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].rule_id, "unknown_category");
    }

    #[test]
    fn respelled_unknown_category_counts_once() {
        let engine = SemanticDiffEngine::default();
        let report = engine.reduce(&lowering(vec![
            rec("co_await", Some("coroutines"), None),
            rec("co_yield", Some("Coroutines"), None),
            rec("co_return", Some("COROUTINES"), None),
            rec("generator", Some("co routines"), None),
        ]));
        assert_eq!(report.entries.len(), 4);
        assert!(report.entries.iter().all(|e| e.category == "coroutines"));
        assert_eq!(report.distinct_categories().len(), 1);
        assert_eq!(report.drift.lost_categories, 1);
        assert_eq!(report.drift.unknown_categories, 1);
        assert!(!report.drift.requires_checkpoint);
        match engine.validate(&report, &req(4)) {
            Err(ConvError::InsufficientLossDisclosure { required, found, .. }) => assert_eq!((required, found), (4, 1)),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
