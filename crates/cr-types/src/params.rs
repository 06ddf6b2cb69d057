use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A concrete parameter value produced by a search strategy or supplied in a
/// job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Float(f64),
    Int(i64),
    Json(serde_json::Value),
}

impl ParamValue {
    /// Numeric view of the value, when one exists. Used for range clamping
    /// and for encoding combos into the surrogate's normalized space.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(v) => Some(*v),
            Self::Int(v) => Some(*v as f64),
            Self::Json(v) => v.as_f64(),
        }
    }
}

impl std::fmt::Display for ParamValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Float(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Json(v) => write!(f, "{v}"),
        }
    }
}

/// Parameter assignment: axis name → value.
pub type ParamMap = HashMap<String, ParamValue>;
