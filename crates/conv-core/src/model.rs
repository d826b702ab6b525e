use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConvError;

/// Declared purpose of a conversion run.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    LanguageToLanguage,
    TypednessUpgrade,
    HighToLowLevel,
}

impl Intent {
    pub const ALL: [Intent; 3] = [Intent::LanguageToLanguage, Intent::TypednessUpgrade, Intent::HighToLowLevel];

    pub fn as_str(&self) -> &'static str {
        match self {
            Intent::LanguageToLanguage => "language_to_language",
            Intent::TypednessUpgrade => "typedness_upgrade",
            Intent::HighToLowLevel => "high_to_low_level",
        }
    }
}

impl FromStr for Intent {
    type Err = ConvError;

    /// Exact tag match only. Unknown tags never fall back to a default intent.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "language_to_language" => Ok(Intent::LanguageToLanguage),
            "typedness_upgrade" => Ok(Intent::TypednessUpgrade),
            "high_to_low_level" => Ok(Intent::HighToLowLevel),
            other => Err(ConvError::UnknownIntent(other.to_string())),
        }
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    SemanticMapping,
    Overview,
    Realize,
    SemanticDiff,
    Verify,
}

impl StageName {
    /// Canonical execution order.
    pub const ORDER: [StageName; 5] = [
        StageName::SemanticMapping,
        StageName::Overview,
        StageName::Realize,
        StageName::SemanticDiff,
        StageName::Verify,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StageName::SemanticMapping => "semantic_mapping",
            StageName::Overview => "overview",
            StageName::Realize => "realize",
            StageName::SemanticDiff => "semantic_diff",
            StageName::Verify => "verify",
        }
    }

    /// Stages whose body is delegated to the conversion backend.
    pub fn is_backend_stage(&self) -> bool {
        matches!(self, StageName::SemanticMapping | StageName::Overview | StageName::Realize)
    }
}

impl FromStr for StageName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "semantic_mapping" => Ok(StageName::SemanticMapping),
            "overview" => Ok(StageName::Overview),
            "realize" => Ok(StageName::Realize),
            "semantic_diff" => Ok(StageName::SemanticDiff),
            "verify" => Ok(StageName::Verify),
            other => Err(format!("unknown stage name: {other}")),
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Done,
    Failed,
    Skipped,
    Interrupted,
}

impl StageStatus {
    /// Done or skipped: nothing left to execute for this stage.
    pub fn is_settled(&self) -> bool {
        matches!(self, StageStatus::Done | StageStatus::Skipped)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    AwaitingCheckpoint,
    Interrupted,
    Passed,
    Failed,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Passed | RunStatus::Failed)
    }

    /// A rerun of the same scenario picks these runs back up instead of starting over.
    pub fn is_resumable(&self) -> bool {
        matches!(self, RunStatus::Interrupted | RunStatus::AwaitingCheckpoint)
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VerificationMode {
    VectorsOnly,
    GoldenDiff,
}

impl VerificationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            VerificationMode::VectorsOnly => "vectors_only",
            VerificationMode::GoldenDiff => "golden_diff",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}
