use serde::{Deserialize, Serialize};

/// Declared constraint for one parameter a model target accepts.
///
/// Presence of a constraint means the parameter is supported; `min`/`max`
/// bound numeric values where the provider declares a range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamConstraint {
    pub name: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// A model-serving endpoint that jobs evaluate against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelTarget {
    /// Model identifier as the provider knows it (e.g. "sonnet-large-v2").
    pub name: String,
    /// Provider key. Invoker-level concurrency ceilings are per provider.
    pub provider: String,
    /// Parameters this target accepts, with declared ranges.
    pub supported_params: Vec<ParamConstraint>,
}

impl ModelTarget {
    pub fn new(name: impl Into<String>, provider: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            provider: provider.into(),
            supported_params: Vec::new(),
        }
    }

    pub fn with_param(mut self, name: impl Into<String>, min: Option<f64>, max: Option<f64>) -> Self {
        self.supported_params.push(ParamConstraint {
            name: name.into(),
            min,
            max,
        });
        self
    }

    pub fn supports(&self, param: &str) -> bool {
        self.supported_params.iter().any(|c| c.name == param)
    }

    pub fn constraint(&self, param: &str) -> Option<&ParamConstraint> {
        self.supported_params.iter().find(|c| c.name == param)
    }
}

impl std::fmt::Display for ModelTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider, self.name)
    }
}
