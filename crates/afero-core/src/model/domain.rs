// ── Function value domains ──
//
// Device descriptors are loosely typed on the wire. They are resolved once,
// at ingest, into one of three closed variants; every value that enters the
// registry is checked against its function's domain.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::Value;

/// Declared value domain of a function.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FunctionDomain {
    Boolean,
    /// Numeric range; either bound may be open. `step` is informational.
    Numeric {
        min: Option<f64>,
        max: Option<f64>,
        step: Option<f64>,
    },
    /// Closed set of names, in declared order.
    Enumerated { values: Vec<String> },
}

/// Why a value does not belong to a domain.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DomainError {
    #[error("expected a {expected} value, got {found}")]
    KindMismatch {
        expected: &'static str,
        found: &'static str,
    },

    #[error("{value} is outside {}", range_label(*.min, *.max))]
    OutOfRange {
        value: f64,
        min: Option<f64>,
        max: Option<f64>,
    },

    #[error("'{value}' is not one of [{}]", .allowed.join(", "))]
    NotAllowed { value: String, allowed: Vec<String> },

    #[error("numeric value is not finite")]
    NotFinite,

    #[error("cannot parse '{input}' as {expected}")]
    Unparseable {
        input: String,
        expected: &'static str,
    },
}

/// Result of fitting an ingested value into a domain.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Accepted(Value),
    /// The value was pulled back to the nearest bound.
    Clamped { value: Value, original: f64 },
}

impl Normalized {
    pub fn into_value(self) -> Value {
        match self {
            Self::Accepted(value) | Self::Clamped { value, .. } => value,
        }
    }
}

impl FunctionDomain {
    /// Unbounded numeric domain.
    pub const fn numeric() -> Self {
        Self::Numeric {
            min: None,
            max: None,
            step: None,
        }
    }

    pub fn enumerated<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Enumerated {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Domain for a function that has a value but no descriptor.
    pub fn infer(value: &Value) -> Self {
        match value {
            Value::Bool(_) => Self::Boolean,
            Value::Number(_) => Self::numeric(),
            Value::Text(s) => Self::enumerated([s.clone()]),
        }
    }

    /// Widen an enumerated domain with the names `other` adds. Any other
    /// pairing yields `other` unchanged.
    pub fn union(&self, other: &FunctionDomain) -> FunctionDomain {
        match (self, other) {
            (Self::Enumerated { values: ours }, Self::Enumerated { values: theirs }) => {
                let mut values = ours.clone();
                for name in theirs {
                    if !values.contains(name) {
                        values.push(name.clone());
                    }
                }
                Self::Enumerated { values }
            }
            _ => other.clone(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::Boolean => "boolean",
            Self::Numeric { .. } => "number",
            Self::Enumerated { .. } => "text",
        }
    }

    /// Strict membership check, used for outbound commands.
    pub fn validate(&self, value: &Value) -> Result<(), DomainError> {
        match self.normalize(value.clone())? {
            Normalized::Accepted(_) => Ok(()),
            Normalized::Clamped { original, .. } => {
                let (min, max) = self.bounds();
                Err(DomainError::OutOfRange {
                    value: original,
                    min,
                    max,
                })
            }
        }
    }

    /// Fit an ingested value into the domain.
    ///
    /// Out-of-range numbers are clamped to the nearest bound. Kind
    /// mismatches and unknown enumerated names are rejected.
    pub fn normalize(&self, value: Value) -> Result<Normalized, DomainError> {
        match (self, value) {
            (Self::Boolean, value @ Value::Bool(_)) => Ok(Normalized::Accepted(value)),
            (Self::Numeric { min, max, .. }, Value::Number(n)) => {
                if !n.is_finite() {
                    return Err(DomainError::NotFinite);
                }
                let mut clamped = n;
                if let Some(lo) = min {
                    clamped = clamped.max(*lo);
                }
                if let Some(hi) = max {
                    clamped = clamped.min(*hi);
                }
                if clamped.total_cmp(&n).is_eq() {
                    Ok(Normalized::Accepted(Value::Number(n)))
                } else {
                    Ok(Normalized::Clamped {
                        value: Value::Number(clamped),
                        original: n,
                    })
                }
            }
            (Self::Enumerated { values }, Value::Text(s)) => {
                if values.iter().any(|v| *v == s) {
                    Ok(Normalized::Accepted(Value::Text(s)))
                } else {
                    Err(DomainError::NotAllowed {
                        value: s,
                        allowed: values.clone(),
                    })
                }
            }
            (domain, other) => Err(DomainError::KindMismatch {
                expected: domain.kind(),
                found: other.kind(),
            }),
        }
    }

    /// Domain-aware equality: numbers within `epsilon`, everything else exact.
    pub fn values_equal(&self, a: &Value, b: &Value, epsilon: f64) -> bool {
        match (self, a, b) {
            (Self::Numeric { .. }, Value::Number(x), Value::Number(y)) => (x - y).abs() <= epsilon,
            _ => a == b,
        }
    }

    /// Parse user input (e.g. a CLI argument) into a value of this domain.
    pub fn parse(&self, input: &str) -> Result<Value, DomainError> {
        let value = match self {
            Self::Boolean => match input.to_ascii_lowercase().as_str() {
                "true" | "on" | "1" | "yes" => Value::Bool(true),
                "false" | "off" | "0" | "no" => Value::Bool(false),
                _ => {
                    return Err(DomainError::Unparseable {
                        input: input.to_owned(),
                        expected: "boolean",
                    });
                }
            },
            Self::Numeric { .. } => {
                input
                    .trim()
                    .parse::<f64>()
                    .map(Value::Number)
                    .map_err(|_| DomainError::Unparseable {
                        input: input.to_owned(),
                        expected: "number",
                    })?
            }
            Self::Enumerated { .. } => Value::Text(input.to_owned()),
        };
        self.validate(&value)?;
        Ok(value)
    }

    fn bounds(&self) -> (Option<f64>, Option<f64>) {
        match self {
            Self::Numeric { min, max, .. } => (*min, *max),
            _ => (None, None),
        }
    }
}

impl fmt::Display for FunctionDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Boolean => f.write_str("boolean"),
            Self::Numeric { min, max, step } => {
                write!(f, "number {}", range_label(*min, *max))?;
                if let Some(step) = step {
                    write!(f, " step {step}")?;
                }
                Ok(())
            }
            Self::Enumerated { values } => write!(f, "one of {}", values.join("|")),
        }
    }
}

fn range_label(min: Option<f64>, max: Option<f64>) -> String {
    let lo = min.map_or_else(|| "-inf".to_owned(), |v| v.to_string());
    let hi = max.map_or_else(|| "+inf".to_owned(), |v| v.to_string());
    format!("[{lo}, {hi}]")
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn brightness() -> FunctionDomain {
        FunctionDomain::Numeric {
            min: Some(0.0),
            max: Some(100.0),
            step: Some(1.0),
        }
    }

    #[test]
    fn union_keeps_order_and_skips_duplicates() {
        let seen = FunctionDomain::enumerated(["home", "work"]);
        assert_eq!(
            seen.union(&FunctionDomain::enumerated(["cafe", "home"])),
            FunctionDomain::enumerated(["home", "work", "cafe"])
        );
        assert_eq!(seen.union(&brightness()), brightness());
    }

    #[test]
    fn numeric_ingest_clamps_to_nearest_bound() {
        let d = brightness();
        assert_eq!(
            d.normalize(Value::Number(140.0)).unwrap(),
            Normalized::Clamped {
                value: Value::Number(100.0),
                original: 140.0
            }
        );
        assert_eq!(
            d.normalize(Value::Number(-3.0)).unwrap().into_value(),
            Value::Number(0.0)
        );
        assert_eq!(
            d.normalize(Value::Number(40.0)).unwrap(),
            Normalized::Accepted(Value::Number(40.0))
        );
    }

    #[test]
    fn commands_are_validated_strictly() {
        let d = brightness();
        assert!(matches!(
            d.validate(&Value::Number(101.0)),
            Err(DomainError::OutOfRange { .. })
        ));
        assert!(d.validate(&Value::Number(100.0)).is_ok());

        let power = FunctionDomain::enumerated(["on", "off"]);
        assert!(power.validate(&Value::from("on")).is_ok());
        assert!(matches!(
            power.validate(&Value::from("dim")),
            Err(DomainError::NotAllowed { .. })
        ));
        assert!(matches!(
            power.validate(&Value::Bool(true)),
            Err(DomainError::KindMismatch { .. })
        ));
    }

    #[test]
    fn non_finite_numbers_are_rejected() {
        assert_eq!(
            FunctionDomain::numeric().normalize(Value::Number(f64::NAN)),
            Err(DomainError::NotFinite)
        );
    }

    #[test]
    fn equality_uses_epsilon_for_numbers_only() {
        let d = FunctionDomain::numeric();
        assert!(d.values_equal(&Value::Number(0.5), &Value::Number(0.500_000_1), 1e-6));
        assert!(!d.values_equal(&Value::Number(0.5), &Value::Number(0.51), 1e-6));

        let e = FunctionDomain::enumerated(["on", "off"]);
        assert!(!e.values_equal(&Value::from("on"), &Value::from("off"), 1.0));
    }

    #[test]
    fn parse_respects_domain() {
        assert_eq!(FunctionDomain::Boolean.parse("on").unwrap(), Value::Bool(true));
        assert_eq!(brightness().parse("42").unwrap(), Value::Number(42.0));
        assert!(brightness().parse("bright").is_err());
        assert!(brightness().parse("250").is_err());
        assert_eq!(
            FunctionDomain::enumerated(["on", "off"]).parse("off").unwrap(),
            Value::from("off")
        );
    }

    #[test]
    fn out_of_range_message_names_bounds() {
        let err = brightness().validate(&Value::Number(120.0)).unwrap_err();
        assert_eq!(err.to_string(), "120 is outside [0, 100]");
    }
}
