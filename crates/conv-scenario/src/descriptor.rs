use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// On-disk `scenario.yaml`. Every field is optional so a scenario may be described by
/// `notes.md` alone; required fields are enforced when the scenario is loaded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioDescriptor {
    #[serde(default)]
    pub intent: Option<String>,
    #[serde(default)]
    pub source_path: Option<String>,
    #[serde(default)]
    pub target_path: Option<String>,
    #[serde(default)]
    pub expected_path: Option<String>,
    #[serde(default)]
    pub vectors: Vec<TestVector>,
    #[serde(default)]
    pub verify: VerifySpec,
    #[serde(default)]
    pub requirements: LossRequirements,
    #[serde(default)]
    pub expect: Expectations,
}

/// Literal input/expected-output pair replayed against the generated target code.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TestVector {
    pub function: String,
    #[serde(default)]
    pub inputs: Vec<serde_json::Value>,
    /// The literal string `"error"` means the call must signal an error.
    pub expected: serde_json::Value,
}

pub const ERROR_SENTINEL: &str = "error";

impl TestVector {
    pub fn expects_error(&self) -> bool {
        self.expected.as_str() == Some(ERROR_SENTINEL)
    }
}

/// External commands used by verification. Each entry is an argv list with placeholders
/// `{build_dir}`, `{target}`, `{function}` and `{inputs}`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct VerifySpec {
    #[serde(default)]
    pub build: Option<Vec<String>>,
    #[serde(default)]
    pub invoke: Option<Vec<String>>,
    #[serde(default)]
    pub compile_check: Option<Vec<String>>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Scenario-level tightening of the policy's loss-disclosure floor.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct LossRequirements {
    #[serde(default)]
    pub minimum_categories: Option<usize>,
    #[serde(default)]
    pub required_categories: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct Expectations {
    /// Stages that must finish `done`.
    #[serde(default)]
    pub stages: Vec<String>,
    #[serde(default)]
    pub success: Option<bool>,
}

pub fn canonical_json(desc: &ScenarioDescriptor) -> serde_json::Value {
    // Plain data; serialization cannot fail.
    let v = serde_json::to_value(desc).unwrap_or(serde_json::Value::Null);
    sort_json(v)
}

/// Recursively sort object keys for stable hashing.
fn sort_json(v: serde_json::Value) -> serde_json::Value {
    match v {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new_map = serde_json::Map::new();
            for k in keys {
                let child = map.get(&k).cloned().unwrap_or(serde_json::Value::Null);
                new_map.insert(k, sort_json(child));
            }
            serde_json::Value::Object(new_map)
        }
        serde_json::Value::Array(arr) => serde_json::Value::Array(arr.into_iter().map(sort_json).collect()),
        other => other,
    }
}

/// Digest over the descriptor and notes; identifies the fixed context handed to the backend.
pub fn context_hash(desc: &ScenarioDescriptor, notes: &str) -> String {
    let v = canonical_json(desc);
    let mut hasher = Sha256::new();
    hasher.update(v.to_string().as_bytes());
    hasher.update([0u8]);
    hasher.update(notes.as_bytes());
    hex::encode(hasher.finalize())
}
