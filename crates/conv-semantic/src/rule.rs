use conv_core::{category_key, ConvError, Intent, SemanticDiffReport};
use serde::{Deserialize, Serialize};

use crate::vocabulary::canonical_category;

/// What a semantic diff must disclose for a run to pass.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DisclosureRequirement {
    pub intent: Intent,
    pub lossy: bool,
    pub min_categories: usize,
    pub required_categories: Vec<String>,
}

impl DisclosureRequirement {
    /// No floor and no required categories.
    pub fn lenient(intent: Intent) -> Self {
        Self { intent, lossy: false, min_categories: 0, required_categories: vec![] }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum FindingSeverity {
    Warn,
    Fail,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub enum Violation {
    ZeroLossClaim,
    Insufficient { required: usize, found: usize, missing: Vec<String> },
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Finding {
    pub rule_id: String,
    pub severity: FindingSeverity,
    pub message: String,
    #[serde(default)]
    pub violation: Option<Violation>,
}

pub trait Rule: Send + Sync {
    fn id(&self) -> &str;
    fn eval(&self, report: &SemanticDiffReport, req: &DisclosureRequirement) -> Vec<Finding>;
}

/// A lossy intent that reports no loss at all is never credible.
pub struct ZeroLossClaimRule;

impl Rule for ZeroLossClaimRule {
    fn id(&self) -> &str {
        "zero_loss_claim"
    }

    fn eval(&self, report: &SemanticDiffReport, req: &DisclosureRequirement) -> Vec<Finding> {
        if req.lossy && report.entries.is_empty() {
            return vec![Finding {
                rule_id: self.id().to_string(),
                severity: FindingSeverity::Fail,
                message: "backend reports zero semantic loss for a lossy conversion".to_string(),
                violation: Some(Violation::ZeroLossClaim),
            }];
        }
        vec![]
    }
}

/// Distinct categories must reach the floor, and every required category must appear.
pub struct CategoryCoverageRule;

impl Rule for CategoryCoverageRule {
    fn id(&self) -> &str {
        "category_coverage"
    }

    fn eval(&self, report: &SemanticDiffReport, req: &DisclosureRequirement) -> Vec<Finding> {
        let found = report.distinct_categories();
        let missing: Vec<String> = req
            .required_categories
            .iter()
            .filter(|c| !report.has_category(c))
            .map(|c| canonical_category(c).0)
            .collect();
        if found.len() >= req.min_categories && missing.is_empty() {
            return vec![];
        }
        let required = req.min_categories.max(req.required_categories.len());
        vec![Finding {
            rule_id: self.id().to_string(),
            severity: FindingSeverity::Fail,
            message: format!("{} distinct loss categories disclosed, {} required", found.len(), required),
            violation: Some(Violation::Insufficient { required, found: found.len(), missing }),
        }]
    }
}

/// Categories outside the vocabulary are accepted but surfaced.
pub struct UnknownCategoryRule;

impl Rule for UnknownCategoryRule {
    fn id(&self) -> &str {
        "unknown_category"
    }

    fn eval(&self, report: &SemanticDiffReport, _req: &DisclosureRequirement) -> Vec<Finding> {
        let mut seen = std::collections::BTreeSet::new();
        report
            .entries
            .iter()
            .filter(|e| !e.known && seen.insert(category_key(&e.category)))
            .map(|e| Finding {
                rule_id: self.id().to_string(),
                severity: FindingSeverity::Warn,
                message: format!("loss category {:?} is not in the controlled vocabulary", e.category),
                violation: None,
            })
            .collect()
    }
}

pub fn default_rules() -> Vec<Box<dyn Rule>> {
    vec![Box::new(ZeroLossClaimRule), Box::new(CategoryCoverageRule), Box::new(UnknownCategoryRule)]
}

pub fn eval_all(rules: &[Box<dyn Rule>], report: &SemanticDiffReport, req: &DisclosureRequirement) -> Vec<Finding> {
    rules.iter().flat_map(|r| r.eval(report, req)).collect()
}

/// The first failing finding as a taxonomy error. Zero-loss claims take precedence.
pub fn first_violation(findings: &[Finding], intent: Intent) -> Option<ConvError> {
    let zero = findings.iter().any(|f| f.violation == Some(Violation::ZeroLossClaim));
    if zero {
        return Some(ConvError::ImplausibleZeroLossClaim { intent });
    }
    findings.iter().filter(|f| f.severity == FindingSeverity::Fail).find_map(|f| match &f.violation {
        Some(Violation::ZeroLossClaim) => Some(ConvError::ImplausibleZeroLossClaim { intent }),
        Some(Violation::Insufficient { required, found, missing }) => Some(ConvError::InsufficientLossDisclosure {
            required: *required,
            found: *found,
            missing: missing.clone(),
        }),
        None => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use conv_core::{LossEntry, Severity};

    fn entry(cat: &str) -> LossEntry {
        LossEntry {
            category: cat.to_string(),
            description: String::new(),
            severity: Severity::Medium,
            source_construct: "a".into(),
            target_construct: "b".into(),
            known: true,
        }
    }

    fn lowering(min: usize, required: &[&str]) -> DisclosureRequirement {
        DisclosureRequirement {
            intent: Intent::HighToLowLevel,
            lossy: true,
            min_categories: min,
            required_categories: required.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_report_for_lossy_intent_fails_both_rules() {
        let report = SemanticDiffReport::default();
        let findings = eval_all(&default_rules(), &report, &lowering(4, &[]));
        assert_eq!(findings.len(), 2);
        assert!(matches!(
            first_violation(&findings, Intent::HighToLowLevel),
            Some(ConvError::ImplausibleZeroLossClaim { .. })
        ));
    }

    #[test]
    fn missing_required_category_is_reported() {
        let report = SemanticDiffReport {
            entries: ["RAII", "templates", "exceptions", "namespaces", "lambdas"].iter().map(|c| entry(c)).collect(),
            ..Default::default()
        };
        let findings = CategoryCoverageRule.eval(&report, &lowering(5, &["RAII", "smart_pointers"]));
        assert_eq!(findings.len(), 1);
        assert_eq!(
            findings[0].violation,
            Some(Violation::Insufficient { required: 5, found: 5, missing: vec!["smart-pointers".to_string()] })
        );
    }

    #[test]
    fn duplicate_categories_count_once() {
        let report = SemanticDiffReport { entries: vec![entry("RAII"), entry("RAII")], ..Default::default() };
        let findings = CategoryCoverageRule.eval(&report, &lowering(2, &[]));
        assert!(matches!(&findings[0].violation, Some(Violation::Insufficient { found: 1, .. })));
    }

    #[test]
    fn non_lossy_intent_with_no_floor_passes() {
        let req = DisclosureRequirement::lenient(Intent::LanguageToLanguage);
        assert!(eval_all(&default_rules(), &SemanticDiffReport::default(), &req).is_empty());
    }
}
