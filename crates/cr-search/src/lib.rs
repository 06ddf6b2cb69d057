//! # cr-search
//!
//! Parameter search engine for Crucible tuning jobs.
//!
//! Provides search space definitions, sweep strategies (grid, random,
//! Bayesian with a kernel-regression surrogate), trial tracking, and
//! target-compatibility filtering (drop/clamp of unsupported parameters).

mod space;
mod strategy;
mod surrogate;
mod trial;

pub use space::{AxisDomain, ParamAxis, SearchSpace};
pub use strategy::{strategy_for, BayesianSearch, GridSearch, RandomSearch, SearchStrategy};
pub use surrogate::{expected_improvement, KernelSurrogate};
pub use trial::{
    apply_target_constraints, BestConfig, CaseResult, ParamAdjustment, Trial, TrialStatus,
    TuneConfig, TuneStatus,
};
