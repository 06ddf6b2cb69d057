//! Throughput benchmark driver — the reference [`Driver`] implementation.
//!
//! One work unit per target × context tier × run. Each unit times a single
//! invocation, persists its measurements as a report, and moves on; a
//! provider failure is recorded and never aborts the run.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{info, warn};

use async_trait::async_trait;
use cr_invoker::{InvocationInput, ModelInvoker};
use cr_search::apply_target_constraints;
use cr_store::DurableStore;
use cr_types::{validation_error, CrResult, ModelTarget, ParamMap, Report};

use crate::{unit_pct, CancelFlag, Driver, DriverOutcome, JobContext, ProgressSink};

/// Spec of a benchmark (or scheduled-benchmark) job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkSpec {
    pub targets: Vec<ModelTarget>,
    #[serde(default = "default_prompt")]
    pub prompt: String,
    #[serde(default = "default_runs")]
    pub runs_per_target: usize,
    /// Approximate extra prompt characters per tier; tier 0 is the bare
    /// prompt.
    #[serde(default = "default_tiers")]
    pub context_tiers: Vec<usize>,
    /// Sampling parameters applied to every call, filtered per target.
    #[serde(default)]
    pub params: ParamMap,
}

fn default_prompt() -> String {
    "Summarize the trade-offs between batch and streaming inference.".to_string()
}

fn default_runs() -> usize {
    3
}

fn default_tiers() -> Vec<usize> {
    vec![0]
}

impl BenchmarkSpec {
    pub fn parse(spec: &Value) -> CrResult<Self> {
        let parsed: Self = serde_json::from_value(spec.clone())
            .map_err(|e| validation_error!("malformed benchmark spec: {e}"))?;
        if parsed.targets.is_empty() {
            return Err(validation_error!("benchmark spec names no targets"));
        }
        if parsed.runs_per_target == 0 {
            return Err(validation_error!("runs_per_target must be at least 1"));
        }
        if parsed.context_tiers.is_empty() {
            return Err(validation_error!("context_tiers must not be empty"));
        }
        Ok(parsed)
    }

    pub fn total_units(&self) -> usize {
        self.targets.len() * self.context_tiers.len() * self.runs_per_target
    }
}

#[derive(Default)]
struct TargetAggregate {
    units: usize,
    failures: usize,
    latency_ms_sum: u64,
    tokens_per_sec_sum: f64,
}

/// Reference driver: measures latency and throughput per target.
pub struct BenchmarkDriver;

#[async_trait]
impl Driver for BenchmarkDriver {
    async fn run(&self, ctx: JobContext, cancel: CancelFlag) -> DriverOutcome {
        let spec = match BenchmarkSpec::parse(&ctx.spec) {
            Ok(s) => s,
            Err(e) => return DriverOutcome::Failed { error: e.to_string() },
        };

        let total = spec.total_units();
        let mut completed = 0usize;
        let mut failed = 0usize;
        let mut aggregates: HashMap<String, TargetAggregate> = HashMap::new();

        info!(job_id = %ctx.job_id, targets = spec.targets.len(), total, "benchmark starting");

        for target in &spec.targets {
            let (effective, adjustments) = apply_target_constraints(&spec.params, target);
            for &tier in &spec.context_tiers {
                for run in 0..spec.runs_per_target {
                    if cancel.is_cancelled() {
                        info!(job_id = %ctx.job_id, completed, "benchmark cancelled");
                        return DriverOutcome::Cancelled;
                    }

                    let input = InvocationInput::from_prompt(padded_prompt(&spec.prompt, tier));
                    let result = ctx.invoker.invoke(target, &effective, &input).await;

                    let agg = aggregates.entry(target.to_string()).or_default();
                    agg.units += 1;

                    let payload = match &result {
                        Ok(outcome) => {
                            let tps = tokens_per_sec(
                                outcome.usage.output_tokens,
                                outcome.latency_ms,
                            );
                            agg.latency_ms_sum += outcome.latency_ms;
                            agg.tokens_per_sec_sum += tps;
                            json!({
                                "target": target.to_string(),
                                "tier": tier,
                                "run": run,
                                "ok": true,
                                "latency_ms": outcome.latency_ms,
                                "tokens_per_sec": tps,
                                "usage": outcome.usage,
                                "cost": outcome.cost,
                                "adjustments": adjustments,
                            })
                        }
                        Err(e) => {
                            failed += 1;
                            agg.failures += 1;
                            warn!(job_id = %ctx.job_id, model = %target, error = %e, "benchmark unit failed");
                            json!({
                                "target": target.to_string(),
                                "tier": tier,
                                "run": run,
                                "ok": false,
                                "error": e.to_string(),
                                "adjustments": adjustments,
                            })
                        }
                    };

                    // Durable state first, progress event second.
                    let report = Report::new(ctx.job_id, "bench_unit", payload);
                    if let Err(e) = ctx.store.put_report(&report).await {
                        return DriverOutcome::Failed {
                            error: format!("persisting unit result: {e}"),
                        };
                    }

                    completed += 1;
                    if completed < total {
                        ctx.sink
                            .progress(
                                unit_pct(completed, total),
                                format!("{completed}/{total} units"),
                            )
                            .await;
                    }
                }
            }
        }

        if failed == total {
            return DriverOutcome::Failed {
                error: format!("all {total} benchmark units failed"),
            };
        }

        let per_target: Vec<Value> = aggregates
            .iter()
            .map(|(name, agg)| {
                let ok = agg.units - agg.failures;
                json!({
                    "target": name,
                    "units": agg.units,
                    "failures": agg.failures,
                    "mean_latency_ms": if ok > 0 { agg.latency_ms_sum as f64 / ok as f64 } else { 0.0 },
                    "mean_tokens_per_sec": if ok > 0 { agg.tokens_per_sec_sum / ok as f64 } else { 0.0 },
                })
            })
            .collect();

        let summary = Report::new(
            ctx.job_id,
            "bench_summary",
            json!({
                "total_units": total,
                "failed_units": failed,
                "per_target": per_target,
            }),
        );
        if let Err(e) = ctx.store.put_report(&summary).await {
            return DriverOutcome::Failed {
                error: format!("persisting summary: {e}"),
            };
        }

        info!(job_id = %ctx.job_id, total, failed, "benchmark finished");
        DriverOutcome::Done {
            result_ref: Some(summary.id.to_string()),
        }
    }
}

fn padded_prompt(prompt: &str, tier: usize) -> String {
    if tier == 0 {
        return prompt.to_string();
    }
    const FILLER: &str = "The quick brown fox jumps over the lazy dog. ";
    let mut padding = FILLER.repeat(tier / FILLER.len() + 1);
    padding.truncate(tier);
    format!("{padding}\n{prompt}")
}

fn tokens_per_sec(output_tokens: u64, latency_ms: u64) -> f64 {
    if latency_ms == 0 {
        return 0.0;
    }
    output_tokens as f64 / (latency_ms as f64 / 1000.0)
}
