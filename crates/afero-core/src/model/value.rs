// ── Function values ──

use std::fmt;

use serde::{Deserialize, Serialize};

/// A scalar function value.
///
/// Structured values (colour objects, arrays) have no representation here;
/// the reconciler skips them at ingest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Number(f64),
    Text(String),
}

/// Largest integer an `f64` holds exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

impl Value {
    /// Convert a raw JSON scalar. Returns `None` for null, objects and arrays.
    pub fn from_json(raw: &serde_json::Value) -> Option<Self> {
        match raw {
            serde_json::Value::Bool(b) => Some(Self::Bool(*b)),
            serde_json::Value::Number(n) => n.as_f64().map(Self::Number),
            serde_json::Value::String(s) => Some(Self::Text(s.clone())),
            _ => None,
        }
    }

    /// Convert to JSON, writing integral numbers as JSON integers.
    #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => {
                serde_json::Value::from(*n as i64)
            }
            Self::Number(n) => serde_json::Number::from_f64(*n)
                .map_or(serde_json::Value::Null, serde_json::Value::Number),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Short name of the value's kind, for error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Text(_) => "text",
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_json_accepts_scalars_only() {
        assert_eq!(Value::from_json(&json!(true)), Some(Value::Bool(true)));
        assert_eq!(Value::from_json(&json!(42)), Some(Value::Number(42.0)));
        assert_eq!(Value::from_json(&json!("on")), Some(Value::from("on")));
        assert_eq!(Value::from_json(&json!(null)), None);
        assert_eq!(Value::from_json(&json!({"r": 1})), None);
        assert_eq!(Value::from_json(&json!([1, 2])), None);
    }

    #[test]
    fn integral_numbers_serialize_as_integers() {
        assert_eq!(Value::Number(75.0).to_json(), json!(75));
        assert_eq!(Value::Number(2.5).to_json(), json!(2.5));
        assert_eq!(Value::Number(f64::NAN).to_json(), json!(null));
    }

    #[test]
    fn display_is_plain() {
        assert_eq!(Value::Number(100.0).to_string(), "100");
        assert_eq!(Value::from("off").to_string(), "off");
        assert_eq!(Value::Bool(false).to_string(), "false");
    }
}
