//! Trial tracking and tuning-run bookkeeping.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cr_types::{JobId, ModelTarget, ParamMap, ParamValue};

use crate::space::SearchSpace;

/// Configuration for a tuning run, embedded in the job spec.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneConfig {
    pub name: String,

    /// The parameter search space.
    pub search_space: SearchSpace,

    /// Which search strategy to use: "grid", "random", or "bayesian".
    #[serde(default = "default_strategy")]
    pub strategy: String,

    /// Maximum number of trials to run.
    #[serde(default = "default_max_trials")]
    pub max_trials: usize,

    /// Number of draws for random search.
    #[serde(default = "default_n_samples")]
    pub n_samples: usize,

    /// Wall-clock bound for the whole run.
    #[serde(default)]
    pub timeout_secs: Option<u64>,

    /// RNG seed for random/Bayesian proposals. `None` = fresh entropy.
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_strategy() -> String {
    "grid".to_string()
}

fn default_max_trials() -> usize {
    100
}

fn default_n_samples() -> usize {
    20
}

impl TuneConfig {
    pub fn new(name: impl Into<String>, search_space: SearchSpace, strategy: &str) -> Self {
        Self {
            name: name.into(),
            search_space,
            strategy: strategy.to_string(),
            max_trials: default_max_trials(),
            n_samples: default_n_samples(),
            timeout_secs: None,
            seed: None,
        }
    }

    pub fn with_max_trials(mut self, n: usize) -> Self {
        self.max_trials = n;
        self
    }

    pub fn with_samples(mut self, n: usize) -> Self {
        self.n_samples = n;
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

/// Adjustment applied to a requested parameter before dispatch, because the
/// target either does not support it or declares a narrower range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ParamAdjustment {
    Dropped { name: String },
    Clamped { name: String, from: f64, to: f64 },
}

/// Outcome of one evaluation case inside a trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseResult {
    pub case_id: String,
    /// 0–100, or `None` when the case produced no usable output.
    pub score: Option<f64>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrialStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A single trial: one parameter combination evaluated against one target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trial {
    pub id: Uuid,
    pub job_id: JobId,
    pub trial_number: usize,
    /// Effective parameters after target-compatibility filtering.
    pub params: ParamMap,
    pub model_target: String,
    pub status: TrialStatus,
    /// Aggregate score 0–100, `None` until evaluated or when every case
    /// failed.
    pub score: Option<f64>,
    /// Drops and clamps applied to the requested combination.
    pub adjustments: Vec<ParamAdjustment>,
    pub per_case_results: Vec<CaseResult>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl Trial {
    pub fn new(
        job_id: JobId,
        trial_number: usize,
        params: ParamMap,
        model_target: impl Into<String>,
        adjustments: Vec<ParamAdjustment>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            trial_number,
            params,
            model_target: model_target.into(),
            status: TrialStatus::Pending,
            score: None,
            adjustments,
            per_case_results: Vec::new(),
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
            error: None,
        }
    }

    pub fn mark_running(&mut self) {
        self.status = TrialStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_completed(&mut self, score: Option<f64>, per_case_results: Vec<CaseResult>) {
        self.status = TrialStatus::Completed;
        self.finished_at = Some(Utc::now());
        self.score = score;
        self.per_case_results = per_case_results;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = TrialStatus::Failed;
        self.finished_at = Some(Utc::now());
        self.error = Some(error);
    }
}

/// The highest-scoring trial observed so far within a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BestConfig {
    pub trial_id: Uuid,
    pub trial_number: usize,
    pub params: ParamMap,
    pub score: f64,
}

/// Aggregate status of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneStatus {
    pub job_id: JobId,
    pub trials_completed: usize,
    pub trials_failed: usize,
    pub best: Option<BestConfig>,
}

impl TuneStatus {
    pub fn new(job_id: JobId) -> Self {
        Self {
            job_id,
            trials_completed: 0,
            trials_failed: 0,
            best: None,
        }
    }

    /// Fold a finished trial into the run status. The best config is replaced
    /// only on a strictly greater score, so ties keep the earlier trial.
    pub fn record(&mut self, trial: &Trial) {
        match trial.score {
            Some(score) => {
                self.trials_completed += 1;
                let improves = match &self.best {
                    None => true,
                    Some(best) => score > best.score,
                };
                if improves {
                    self.best = Some(BestConfig {
                        trial_id: trial.id,
                        trial_number: trial.trial_number,
                        params: trial.params.clone(),
                        score,
                    });
                }
            }
            None => self.trials_failed += 1,
        }
    }
}

/// Filter a requested combination against the target's declared parameter
/// support: unsupported parameters are dropped, numeric values outside a
/// declared range are clamped to the nearest bound. Every adjustment is
/// recorded so the caller can see the effective configuration differed from
/// the requested one.
pub fn apply_target_constraints(
    requested: &ParamMap,
    target: &ModelTarget,
) -> (ParamMap, Vec<ParamAdjustment>) {
    let mut effective = ParamMap::new();
    let mut adjustments = Vec::new();

    for (name, value) in requested {
        let constraint = match target.constraint(name) {
            Some(c) => c,
            None => {
                adjustments.push(ParamAdjustment::Dropped { name: name.clone() });
                continue;
            }
        };

        match value.as_f64() {
            Some(v) => {
                let lo = constraint.min.unwrap_or(f64::NEG_INFINITY);
                let hi = constraint.max.unwrap_or(f64::INFINITY);
                let clamped = v.clamp(lo, hi);
                if clamped != v {
                    adjustments.push(ParamAdjustment::Clamped {
                        name: name.clone(),
                        from: v,
                        to: clamped,
                    });
                    effective.insert(name.clone(), ParamValue::Float(clamped));
                } else {
                    effective.insert(name.clone(), value.clone());
                }
            }
            // Non-numeric values have no range to clamp against.
            None => {
                effective.insert(name.clone(), value.clone());
            }
        }
    }

    (effective, adjustments)
}
