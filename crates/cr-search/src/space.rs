//! Search space definitions and grid enumeration.

use serde::{Deserialize, Serialize};

use cr_types::{ParamMap, ParamValue, SearchError};

/// The kind of value range an axis spans.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AxisDomain {
    /// Continuous range discretized into `floor((max-min)/step)+1` ascending
    /// points.
    Continuous { min: f64, max: f64, step: f64 },
    /// Explicit choices, kept in declared order.
    Discrete { values: Vec<serde_json::Value> },
}

/// A single parameter dimension in the search space.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamAxis {
    /// Parameter name (e.g. "temperature").
    pub name: String,
    pub domain: AxisDomain,
}

/// The full search space: an ordered list of parameter axes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchSpace {
    pub axes: Vec<ParamAxis>,
}

impl SearchSpace {
    pub fn new() -> Self {
        Self { axes: Vec::new() }
    }

    pub fn add_continuous(
        mut self,
        name: impl Into<String>,
        min: f64,
        max: f64,
        step: f64,
    ) -> Self {
        self.axes.push(ParamAxis {
            name: name.into(),
            domain: AxisDomain::Continuous { min, max, step },
        });
        self
    }

    pub fn add_discrete(mut self, name: impl Into<String>, values: Vec<serde_json::Value>) -> Self {
        self.axes.push(ParamAxis {
            name: name.into(),
            domain: AxisDomain::Discrete { values },
        });
        self
    }

    /// Check that every axis resolves to a finite, non-empty value set and
    /// that the space as a whole yields at least one combination.
    pub fn validate(&self) -> Result<(), SearchError> {
        if self.axes.is_empty() {
            return Err(SearchError::EmptySpace);
        }
        for axis in &self.axes {
            match &axis.domain {
                AxisDomain::Continuous { min, max, step } => {
                    if !step.is_finite() || *step <= 0.0 {
                        return Err(SearchError::InvalidAxis {
                            name: axis.name.clone(),
                            message: format!("step must be positive, got {step}"),
                        });
                    }
                    if !min.is_finite() || !max.is_finite() || max < min {
                        return Err(SearchError::InvalidAxis {
                            name: axis.name.clone(),
                            message: format!("invalid range [{min}, {max}]"),
                        });
                    }
                }
                AxisDomain::Discrete { values } => {
                    if values.is_empty() {
                        return Err(SearchError::InvalidAxis {
                            name: axis.name.clone(),
                            message: "no values declared".into(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// The discretized value set for one axis, in deterministic order:
    /// ascending for continuous axes, declared order for discrete ones.
    /// A continuous axis yields `floor((max-min)/step)+1` points; the ratio
    /// gets a step-relative tolerance so binary rounding (e.g. `(1.0-0.9)/0.1`
    /// landing just under 1) cannot drop the endpoint.
    pub fn axis_values(axis: &ParamAxis) -> Vec<ParamValue> {
        match &axis.domain {
            AxisDomain::Continuous { min, max, step } => {
                let count = ((max - min + step * 1e-6) / step).floor() as usize + 1;
                (0..count)
                    .map(|i| ParamValue::Float((min + i as f64 * step).min(*max)))
                    .collect()
            }
            AxisDomain::Discrete { values } => values
                .iter()
                .map(|v| ParamValue::Json(v.clone()))
                .collect(),
        }
    }

    /// Value sets for all axes, in axis declaration order.
    pub fn value_sets(&self) -> Vec<Vec<ParamValue>> {
        self.axes.iter().map(Self::axis_values).collect()
    }

    /// Total number of grid combinations (0 when the space is empty).
    pub fn grid_size(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.value_sets()
            .iter()
            .try_fold(1usize, |total, set| total.checked_mul(set.len()))
            .unwrap_or(usize::MAX)
    }

    /// Materialize the combination at flat grid index `flat`. Indices follow
    /// the enumeration order of [`SearchSpace::combos`]: axis declaration
    /// order, last axis varying fastest.
    pub fn combo_at(&self, mut flat: usize) -> ParamMap {
        let sets = self.value_sets();
        let mut indices = vec![0usize; sets.len()];
        for (i, set) in sets.iter().enumerate().rev() {
            indices[i] = flat % set.len();
            flat /= set.len();
        }
        self.axes
            .iter()
            .zip(sets.iter().zip(&indices))
            .map(|(axis, (set, &idx))| (axis.name.clone(), set[idx].clone()))
            .collect()
    }

    /// The full cartesian product in deterministic order.
    pub fn combos(&self) -> Vec<ParamMap> {
        (0..self.grid_size()).map(|i| self.combo_at(i)).collect()
    }

    /// Encode the combination at `flat` into the normalized unit cube used by
    /// the Bayesian surrogate: one coordinate per axis, each the value's
    /// position within its axis scaled to [0, 1].
    pub fn encode(&self, mut flat: usize) -> Vec<f64> {
        let sets = self.value_sets();
        let mut coords = vec![0.0; sets.len()];
        for (i, set) in sets.iter().enumerate().rev() {
            let idx = flat % set.len();
            flat /= set.len();
            coords[i] = if set.len() > 1 {
                idx as f64 / (set.len() - 1) as f64
            } else {
                0.5
            };
        }
        coords
    }
}

impl Default for SearchSpace {
    fn default() -> Self {
        Self::new()
    }
}
