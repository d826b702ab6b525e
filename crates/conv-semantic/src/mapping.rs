//! Mapping artifact emitted by the backend's `semantic_mapping` stage.
//!
//! The shape depends on the intent, so it is a tagged variant checked against the run's intent
//! before anything downstream reads it.

use conv_core::{ConvError, Intent, Severity, StageName};
use serde::{Deserialize, Serialize};

pub const MAPPING_FILE: &str = "mapping.json";

/// One source construct and what it became in the target.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MappingRecord {
    pub source_construct: String,
    pub target_construct: String,
    #[serde(default)]
    pub loss_category: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub severity: Option<Severity>,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MappingArtifact {
    Translation {
        records: Vec<MappingRecord>,
    },
    TypeUpgrade {
        records: Vec<MappingRecord>,
        /// Names of the types whose contracts were strengthened.
        strengthened_types: Vec<String>,
    },
    Lowering {
        records: Vec<MappingRecord>,
        /// How higher-level constructs are expressed in the target, e.g. "explicit cleanup calls".
        lowering_strategy: String,
    },
}

impl MappingArtifact {
    pub fn records(&self) -> &[MappingRecord] {
        match self {
            MappingArtifact::Translation { records }
            | MappingArtifact::TypeUpgrade { records, .. }
            | MappingArtifact::Lowering { records, .. } => records,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            MappingArtifact::Translation { .. } => "translation",
            MappingArtifact::TypeUpgrade { .. } => "type_upgrade",
            MappingArtifact::Lowering { .. } => "lowering",
        }
    }

    pub fn expected_kind(intent: Intent) -> &'static str {
        match intent {
            Intent::LanguageToLanguage => "translation",
            Intent::TypednessUpgrade => "type_upgrade",
            Intent::HighToLowLevel => "lowering",
        }
    }

    /// Check the variant and its intent-specific fields.
    pub fn validate_for(&self, intent: Intent) -> Result<(), String> {
        let expected = Self::expected_kind(intent);
        if self.kind() != expected {
            return Err(format!("mapping kind {} does not match intent {intent} (expected {expected})", self.kind()));
        }
        match self {
            MappingArtifact::TypeUpgrade { strengthened_types, .. } if strengthened_types.is_empty() => {
                return Err("type_upgrade mapping lists no strengthened_types".to_string())
            }
            MappingArtifact::Lowering { lowering_strategy, .. } if lowering_strategy.trim().is_empty() => {
                return Err("lowering mapping has an empty lowering_strategy".to_string())
            }
            _ => {}
        }
        for (i, r) in self.records().iter().enumerate() {
            if r.source_construct.trim().is_empty() || r.target_construct.trim().is_empty() {
                return Err(format!("mapping record {i} has an empty construct"));
            }
        }
        Ok(())
    }

    /// Parse and validate backend output. A bare record array is accepted for translations only,
    /// since the other intents carry required fields.
    pub fn parse(bytes: &[u8], intent: Intent) -> Result<Self, ConvError> {
        let fail = |reason: String| ConvError::BackendInvocationFailed { stage: StageName::SemanticMapping, reason };
        let value: serde_json::Value =
            serde_json::from_slice(bytes).map_err(|e| fail(format!("mapping is not valid JSON: {e}")))?;
        let artifact = if value.is_array() && intent == Intent::LanguageToLanguage {
            let records: Vec<MappingRecord> =
                serde_json::from_value(value).map_err(|e| fail(format!("mapping records: {e}")))?;
            MappingArtifact::Translation { records }
        } else {
            serde_json::from_value(value).map_err(|e| fail(format!("mapping artifact: {e}")))?
        };
        artifact.validate_for(intent).map_err(fail)?;
        Ok(artifact)
    }
}
