//! Intent policy: which stages a run executes, how it is verified, and how much semantic loss
//! it must disclose.

use conv_core::{ConvError, Intent, StageName, VerificationMode};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MIN_LOWERING_CATEGORIES: usize = 4;

/// Tunable knobs. Loaded from the `[policy]` table of `conv.toml`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    #[serde(default = "default_min_lowering")]
    pub min_lowering_categories: usize,
}

fn default_min_lowering() -> usize {
    DEFAULT_MIN_LOWERING_CATEGORIES
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self { min_lowering_categories: DEFAULT_MIN_LOWERING_CATEGORIES }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PolicyDecision {
    pub intent: Intent,
    pub stages: Vec<StageName>,
    pub verification_mode: VerificationMode,
    pub min_loss_categories: usize,
    /// The intent structurally loses meaning; a zero-loss claim is never credible.
    pub lossy: bool,
    /// Realize output is only final after an approved checkpoint.
    pub checkpoint_before_final: bool,
}

impl PolicyDecision {
    pub fn requires(&self, stage: StageName) -> bool {
        self.stages.contains(&stage)
    }
}

#[derive(Clone, Debug, Default)]
pub struct IntentPolicy {
    pub config: PolicyConfig,
}

impl IntentPolicy {
    pub fn new(config: PolicyConfig) -> Self {
        Self { config }
    }

    pub fn resolve(&self, intent: Intent) -> PolicyDecision {
        use StageName::*;
        match intent {
            Intent::LanguageToLanguage | Intent::TypednessUpgrade => PolicyDecision {
                intent,
                stages: vec![SemanticMapping, Overview, Realize, Verify],
                verification_mode: VerificationMode::GoldenDiff,
                min_loss_categories: 0,
                lossy: false,
                checkpoint_before_final: false,
            },
            Intent::HighToLowLevel => PolicyDecision {
                intent,
                stages: StageName::ORDER.to_vec(),
                verification_mode: VerificationMode::VectorsOnly,
                // A lowering that discloses no loss at all is rejected separately, so the floor
                // never drops below one.
                min_loss_categories: self.config.min_lowering_categories.max(1),
                lossy: true,
                checkpoint_before_final: true,
            },
        }
    }

    /// Resolve a raw tag. Unrecognized tags are an error, never a default.
    pub fn resolve_tag(&self, tag: &str) -> Result<PolicyDecision, ConvError> {
        Ok(self.resolve(tag.parse()?))
    }
}
