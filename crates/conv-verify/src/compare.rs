use serde_json::Value;

pub const DEFAULT_FLOAT_TOLERANCE: f64 = 1e-9;

/// Compare a program's trimmed stdout against the expected JSON value.
///
/// Integers compare exactly, floats within `tolerance`, strings verbatim (surrounding quotes in
/// the output are accepted), booleans as `true`/`false`, and arrays/objects as parsed JSON.
pub fn output_matches(expected: &Value, actual: &str, tolerance: f64) -> bool {
    let actual = actual.trim();
    match expected {
        Value::Number(n) => {
            if let Some(e) = n.as_i64() {
                return actual.parse::<i64>().map(|a| a == e).unwrap_or(false)
                    || actual.parse::<f64>().map(|a| a == e as f64).unwrap_or(false);
            }
            if let Some(e) = n.as_u64() {
                return actual.parse::<u64>().map(|a| a == e).unwrap_or(false);
            }
            match (n.as_f64(), actual.parse::<f64>()) {
                (Some(e), Ok(a)) => (a - e).abs() <= tolerance,
                _ => false,
            }
        }
        Value::String(s) => actual == s || actual.strip_prefix('"').and_then(|a| a.strip_suffix('"')) == Some(s.as_str()),
        Value::Bool(b) => actual == b.to_string(),
        Value::Null => actual.is_empty() || actual == "null",
        Value::Array(_) | Value::Object(_) => serde_json::from_str::<Value>(actual).map(|a| &a == expected).unwrap_or(false),
    }
}
