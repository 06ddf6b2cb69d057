//! Parameter-tuning and prompt-tuning drivers.
//!
//! Both run the same sequential loop: pull a combination from the search
//! strategy, filter it against the target's declared parameter support,
//! evaluate every case, persist the trial, feed the score back to the
//! strategy, and emit a `combo_result`. Prompt tuning rides on a reserved
//! discrete axis holding the candidate templates.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{info, warn};

use async_trait::async_trait;
use cr_invoker::{InvocationInput, InvocationOutcome, ModelInvoker};
use cr_search::{
    apply_target_constraints, strategy_for, CaseResult, SearchSpace, SearchStrategy, Trial,
    TuneConfig, TuneStatus,
};
use cr_store::DurableStore;
use cr_types::{validation_error, CrResult, ModelTarget, ParamValue, Report};

use crate::{unit_pct, CancelFlag, Driver, DriverOutcome, JobContext, ProgressSink};

/// Reserved axis name carrying prompt-template candidates. Stripped from the
/// parameter map before dispatch — it shapes the prompt, not the sampling
/// parameters.
pub const PROMPT_TEMPLATE_PARAM: &str = "prompt_template";

/// One graded input of a tuning run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalCase {
    pub id: String,
    pub prompt: String,
    /// Substring the output must contain to score 100. Without it, any
    /// non-empty output passes.
    #[serde(default)]
    pub expected: Option<String>,
}

/// Spec of a param-tune job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TuneSpec {
    #[serde(flatten)]
    pub config: TuneConfig,
    pub target: ModelTarget,
    pub cases: Vec<EvalCase>,
}

impl TuneSpec {
    pub fn parse(spec: &Value) -> CrResult<Self> {
        let parsed: Self = serde_json::from_value(spec.clone())
            .map_err(|e| validation_error!("malformed tune spec: {e}"))?;
        if parsed.cases.is_empty() {
            return Err(validation_error!("tune spec has no evaluation cases"));
        }
        // Rejects empty search spaces and unknown strategies up front.
        strategy_for(&parsed.config)
            .map_err(|e| validation_error!("invalid search space: {e}"))?;
        Ok(parsed)
    }

    /// Trials the run will attempt, bounded by the strategy's own supply and
    /// `max_trials`.
    pub fn planned_trials(&self) -> usize {
        let grid = self.config.search_space.grid_size();
        let supply = match self.config.strategy.as_str() {
            "random" => self.config.n_samples.min(grid),
            _ => grid,
        };
        supply.min(self.config.max_trials)
    }
}

/// Spec of a prompt-tune job: the same tuning loop over a discrete axis of
/// prompt templates. Templates may reference the case input as `{input}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptTuneSpec {
    pub name: String,
    pub target: ModelTarget,
    pub cases: Vec<EvalCase>,
    pub prompt_candidates: Vec<String>,
    #[serde(default = "default_prompt_strategy")]
    pub strategy: String,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub seed: Option<u64>,
}

fn default_prompt_strategy() -> String {
    "grid".to_string()
}

impl PromptTuneSpec {
    pub fn parse(spec: &Value) -> CrResult<TuneSpec> {
        let parsed: Self = serde_json::from_value(spec.clone())
            .map_err(|e| validation_error!("malformed prompt-tune spec: {e}"))?;
        if parsed.prompt_candidates.is_empty() {
            return Err(validation_error!("prompt_candidates must not be empty"));
        }
        parsed.into_tune_spec()
    }

    fn into_tune_spec(self) -> CrResult<TuneSpec> {
        let candidates = self
            .prompt_candidates
            .iter()
            .map(|c| serde_json::Value::String(c.clone()))
            .collect();
        let space = SearchSpace::new().add_discrete(PROMPT_TEMPLATE_PARAM, candidates);

        let mut config = TuneConfig::new(self.name, space, &self.strategy)
            .with_max_trials(self.prompt_candidates.len())
            .with_samples(self.prompt_candidates.len());
        config.timeout_secs = self.timeout_secs;
        config.seed = self.seed;

        let tune = TuneSpec {
            config,
            target: self.target,
            cases: self.cases,
        };
        if tune.cases.is_empty() {
            return Err(validation_error!("prompt-tune spec has no evaluation cases"));
        }
        strategy_for(&tune.config)
            .map_err(|e| validation_error!("invalid search space: {e}"))?;
        Ok(tune)
    }
}

/// Driver for param_tune jobs.
pub struct TuneDriver;

#[async_trait]
impl Driver for TuneDriver {
    async fn run(&self, ctx: JobContext, cancel: CancelFlag) -> DriverOutcome {
        let spec = match TuneSpec::parse(&ctx.spec) {
            Ok(s) => s,
            Err(e) => return DriverOutcome::Failed { error: e.to_string() },
        };
        run_tune(ctx, cancel, spec).await
    }
}

/// Driver for prompt_tune jobs.
pub struct PromptTuneDriver;

#[async_trait]
impl Driver for PromptTuneDriver {
    async fn run(&self, ctx: JobContext, cancel: CancelFlag) -> DriverOutcome {
        let spec = match PromptTuneSpec::parse(&ctx.spec) {
            Ok(s) => s,
            Err(e) => return DriverOutcome::Failed { error: e.to_string() },
        };
        run_tune(ctx, cancel, spec).await
    }
}

async fn run_tune(ctx: JobContext, cancel: CancelFlag, spec: TuneSpec) -> DriverOutcome {
    let mut strategy = match strategy_for(&spec.config) {
        Ok(s) => s,
        Err(e) => return DriverOutcome::Failed { error: e.to_string() },
    };
    let total = spec.planned_trials();
    let deadline = spec
        .config
        .timeout_secs
        .map(|s| Instant::now() + Duration::from_secs(s));

    info!(
        job_id = %ctx.job_id,
        strategy = strategy.name(),
        total,
        model = %spec.target,
        "tuning run starting"
    );

    let mut status = TuneStatus::new(ctx.job_id);
    let mut completed = 0usize;
    let mut timed_out = false;

    while completed < total {
        if cancel.is_cancelled() {
            info!(job_id = %ctx.job_id, completed, "tuning run cancelled");
            return DriverOutcome::Cancelled;
        }
        if let Some(d) = deadline {
            if Instant::now() >= d {
                timed_out = true;
                break;
            }
        }

        let requested = match strategy.next_combo() {
            Some(c) => c,
            None => break,
        };

        // The reserved template axis shapes the prompt, never the call
        // parameters.
        let template = requested
            .get(PROMPT_TEMPLATE_PARAM)
            .and_then(|v| match v {
                ParamValue::Json(serde_json::Value::String(s)) => Some(s.clone()),
                _ => None,
            });
        let mut model_params = requested.clone();
        model_params.remove(PROMPT_TEMPLATE_PARAM);

        let (effective, adjustments) = apply_target_constraints(&model_params, &spec.target);

        let mut recorded_params = effective.clone();
        if let Some(t) = &template {
            recorded_params.insert(
                PROMPT_TEMPLATE_PARAM.to_string(),
                ParamValue::Json(serde_json::Value::String(t.clone())),
            );
        }

        let mut trial = Trial::new(
            ctx.job_id,
            completed,
            recorded_params,
            spec.target.name.clone(),
            adjustments,
        );
        trial.mark_running();

        let mut case_results = Vec::with_capacity(spec.cases.len());
        for case in &spec.cases {
            let prompt = render_prompt(template.as_deref(), &case.prompt);
            let input = InvocationInput::from_prompt(prompt);
            match ctx.invoker.invoke(&spec.target, &effective, &input).await {
                Ok(outcome) => case_results.push(CaseResult {
                    case_id: case.id.clone(),
                    score: Some(score_case(&outcome, case.expected.as_deref())),
                    error: None,
                }),
                Err(e) => {
                    warn!(job_id = %ctx.job_id, case = %case.id, error = %e, "trial case failed");
                    case_results.push(CaseResult {
                        case_id: case.id.clone(),
                        score: None,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        let scored: Vec<f64> = case_results.iter().filter_map(|c| c.score).collect();
        let score = if scored.is_empty() {
            None
        } else {
            Some(scored.iter().sum::<f64>() / scored.len() as f64)
        };
        trial.mark_completed(score, case_results);

        // Durable state first, events second.
        if let Err(e) = ctx.store.put_trial(&trial).await {
            return DriverOutcome::Failed {
                error: format!("persisting trial: {e}"),
            };
        }

        strategy.observe(&requested, score);
        status.record(&trial);
        ctx.sink.combo_result(trial).await;

        completed += 1;
        if completed < total {
            ctx.sink
                .progress(
                    unit_pct(completed, total),
                    format!("trial {completed}/{total}"),
                )
                .await;
        }
    }

    if completed > 0 && status.trials_completed == 0 {
        return DriverOutcome::Failed {
            error: format!("all {completed} trials failed"),
        };
    }

    let summary = Report::new(
        ctx.job_id,
        "tune_summary",
        json!({
            "strategy": strategy.name(),
            "trials_completed": status.trials_completed,
            "trials_failed": status.trials_failed,
            "timed_out": timed_out,
            "best": status.best,
        }),
    );
    if let Err(e) = ctx.store.put_report(&summary).await {
        return DriverOutcome::Failed {
            error: format!("persisting summary: {e}"),
        };
    }

    info!(
        job_id = %ctx.job_id,
        completed,
        best_score = status.best.as_ref().map(|b| b.score),
        "tuning run finished"
    );
    DriverOutcome::Done {
        result_ref: Some(summary.id.to_string()),
    }
}

fn render_prompt(template: Option<&str>, case_prompt: &str) -> String {
    match template {
        Some(t) if t.contains("{input}") => t.replace("{input}", case_prompt),
        Some(t) => format!("{t}\n\n{case_prompt}"),
        None => case_prompt.to_string(),
    }
}

fn score_case(outcome: &InvocationOutcome, expected: Option<&str>) -> f64 {
    match expected {
        Some(e) => {
            if outcome.output.contains(e) {
                100.0
            } else {
                0.0
            }
        }
        None => {
            if outcome.output.trim().is_empty() {
                0.0
            } else {
                100.0
            }
        }
    }
}
