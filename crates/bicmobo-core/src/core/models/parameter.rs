use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// A single design-parameter value as proposed by an optimizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParameterValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ParameterValue::Int(v) => Some(*v as f64),
            ParameterValue::Float(v) => Some(*v),
            ParameterValue::Text(_) => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ParameterValue::Int(v) => Some(*v),
            ParameterValue::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    /// Formats the value the way detector descriptions expect it, with an optional unit
    /// suffix joined by `*`.
    pub fn with_units(&self, units: Option<&str>) -> String {
        match units {
            Some(u) if !u.is_empty() => format!("{}*{}", self, u),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for ParameterValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterValue::Int(v) => write!(f, "{}", v),
            ParameterValue::Float(v) => write!(f, "{}", v),
            ParameterValue::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for ParameterValue {
    fn from(v: i64) -> Self {
        ParameterValue::Int(v)
    }
}

impl From<f64> for ParameterValue {
    fn from(v: f64) -> Self {
        ParameterValue::Float(v)
    }
}

impl From<&str> for ParameterValue {
    fn from(v: &str) -> Self {
        ParameterValue::Text(v.to_string())
    }
}

/// A complete parameter point, keyed by parameter name.
pub type Assignment = BTreeMap<String, ParameterValue>;

/// Stable textual key of an assignment, used to recognise repeated points.
pub fn assignment_key(assignment: &Assignment) -> String {
    assignment
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join(",")
}
