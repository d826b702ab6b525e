use chrono::Utc;
use conv_core::{
    category_key, ConvError, ErrorClass, FileDiffKind, Intent, LossEntry, PipelineRun, RunId, RunStatus,
    SemanticDiffReport, Severity, StageName, StageStatus, TreeDelta, VerificationFailure, VerificationMode, EXIT_DISCLOSURE, EXIT_SCENARIO, EXIT_SOURCE_MUTATION,
};

#[test]
fn test_intent_parse_exact_tags() {
    assert_eq!("high_to_low_level".parse::<Intent>().unwrap(), Intent::HighToLowLevel);
    assert_eq!(" typedness_upgrade ".parse::<Intent>().unwrap(), Intent::TypednessUpgrade);
    let err = "lang2lang".parse::<Intent>().unwrap_err();
    assert!(matches!(err, ConvError::UnknownIntent(ref t) if t == "lang2lang"));
    assert_eq!(err.exit_code(), EXIT_SCENARIO);
}

#[test]
fn test_run_id_new_is_unique() {
    assert_ne!(RunId::new(), RunId::new());
}

#[test]
fn test_new_run_marks_unrequired_stages_skipped() {
    let run = PipelineRun::new(
        "c_to_cpp_basic",
        Intent::LanguageToLanguage,
        VerificationMode::GoldenDiff,
        &[StageName::SemanticMapping, StageName::Overview, StageName::Realize, StageName::Verify],
        "20260101_000000",
        Utc::now(),
    );
    assert_eq!(run.status, RunStatus::Running);
    assert_eq!(run.stages.len(), 5);
    assert_eq!(run.stage_status(StageName::SemanticDiff), Some(StageStatus::Skipped));
    assert_eq!(run.stage_status(StageName::Verify), Some(StageStatus::Pending));
    assert_eq!(run.last_completed_stage(), None);
}

#[test]
fn test_run_serializes_snake_case() {
    let run = PipelineRun::new("s", Intent::HighToLowLevel, VerificationMode::VectorsOnly, &StageName::ORDER, "l", Utc::now());
    let v = serde_json::to_value(&run).unwrap();
    assert_eq!(v["intent"], "high_to_low_level");
    assert_eq!(v["verification_mode"], "vectors_only");
    assert_eq!(v["stages"][0]["stage"], "semantic_mapping");
    let back: PipelineRun = serde_json::from_value(v).unwrap();
    assert_eq!(back, run);
}

#[test]
fn test_error_classes_have_distinct_exit_codes() {
    let mutation = ConvError::SourceMutationDetected {
        delta: TreeDelta { added: vec!["x".into()], removed: vec![], modified: vec![] },
    };
    assert_eq!(mutation.class(), ErrorClass::SourceMutation);
    assert_eq!(mutation.exit_code(), EXIT_SOURCE_MUTATION);
    assert!(mutation.to_string().contains("1 added"));

    let zero = ConvError::ImplausibleZeroLossClaim { intent: Intent::HighToLowLevel };
    assert_eq!(zero.exit_code(), EXIT_DISCLOSURE);
    assert_eq!(zero.kind(), "implausible_zero_loss_claim");

    let insufficient = ConvError::InsufficientLossDisclosure { required: 5, found: 2, missing: vec!["RAII".into()] };
    assert!(insufficient.to_string().contains("missing: RAII"));
}

#[test]
fn test_file_failure_keeps_its_diff_kind() {
    let f = VerificationFailure::File { path: "item.cpp".into(), kind: FileDiffKind::MissingInTarget };
    let v = serde_json::to_value(&f).unwrap();
    assert_eq!(v["failure"], "file");
    assert_eq!(v["kind"], "missing_in_target");
    let back: VerificationFailure = serde_json::from_value(v).unwrap();
    assert_eq!(back, f);
}

#[test]
fn test_distinct_categories_fold_spelling() {
    let entry = |category: &str| LossEntry {
        category: category.into(),
        description: String::new(),
        severity: Severity::Low,
        source_construct: "a".into(),
        target_construct: "b".into(),
        known: false,
    };
    let report = SemanticDiffReport {
        entries: vec![entry("Coroutines"), entry("co_routines"), entry("co routines"), entry("RAII")],
        ..Default::default()
    };
    assert_eq!(category_key(" Co_Routines "), "co-routines");
    let distinct: Vec<_> = report.distinct_categories().into_iter().collect();
    assert_eq!(distinct, vec!["Coroutines".to_string(), "RAII".to_string(), "co_routines".to_string()]);
    assert!(report.has_category("raii"));
}
