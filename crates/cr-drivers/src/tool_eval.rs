//! Tool-calling evaluation driver.
//!
//! One work unit per target × case: the model gets the declared tools and the
//! case prompt, and the unit passes when the expected tool is among the calls
//! it made.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use async_trait::async_trait;
use cr_invoker::{InvocationInput, ModelInvoker, ToolSpec};
use cr_search::apply_target_constraints;
use cr_store::DurableStore;
use cr_types::{validation_error, CrResult, ModelTarget, ParamMap, Report};

use crate::{unit_pct, CancelFlag, Driver, DriverOutcome, JobContext, ProgressSink};

/// One tool-calling case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCase {
    pub id: String,
    pub prompt: String,
    /// Tool the model is expected to call for this prompt.
    pub expected_tool: String,
}

/// Spec of a tool-eval job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolEvalSpec {
    pub targets: Vec<ModelTarget>,
    pub tools: Vec<ToolSpec>,
    pub cases: Vec<ToolCase>,
    #[serde(default)]
    pub params: ParamMap,
}

impl ToolEvalSpec {
    pub fn parse(spec: &Value) -> CrResult<Self> {
        let parsed: Self = serde_json::from_value(spec.clone())
            .map_err(|e| validation_error!("malformed tool-eval spec: {e}"))?;
        if parsed.targets.is_empty() {
            return Err(validation_error!("tool-eval spec names no targets"));
        }
        if parsed.tools.is_empty() {
            return Err(validation_error!("tool-eval spec declares no tools"));
        }
        if parsed.cases.is_empty() {
            return Err(validation_error!("tool-eval spec has no cases"));
        }
        Ok(parsed)
    }

    pub fn total_units(&self) -> usize {
        self.targets.len() * self.cases.len()
    }
}

/// Driver for tool_eval jobs.
pub struct ToolEvalDriver;

#[async_trait]
impl Driver for ToolEvalDriver {
    async fn run(&self, ctx: JobContext, cancel: CancelFlag) -> DriverOutcome {
        let spec = match ToolEvalSpec::parse(&ctx.spec) {
            Ok(s) => s,
            Err(e) => return DriverOutcome::Failed { error: e.to_string() },
        };

        let total = spec.total_units();
        let mut completed = 0usize;
        let mut errored = 0usize;
        let mut passed = 0usize;

        info!(job_id = %ctx.job_id, targets = spec.targets.len(), cases = spec.cases.len(), "tool eval starting");

        for target in &spec.targets {
            let (effective, adjustments) = apply_target_constraints(&spec.params, target);
            for case in &spec.cases {
                if cancel.is_cancelled() {
                    info!(job_id = %ctx.job_id, completed, "tool eval cancelled");
                    return DriverOutcome::Cancelled;
                }

                let input = InvocationInput::from_prompt(case.prompt.clone())
                    .with_tools(spec.tools.clone());
                let result = ctx.invoker.invoke(target, &effective, &input).await;

                let payload = match &result {
                    Ok(outcome) => {
                        let called: Vec<&str> =
                            outcome.tool_calls.iter().map(|c| c.name.as_str()).collect();
                        let pass = called.contains(&case.expected_tool.as_str());
                        if pass {
                            passed += 1;
                        }
                        json!({
                            "target": target.to_string(),
                            "case_id": case.id,
                            "ok": true,
                            "passed": pass,
                            "expected_tool": case.expected_tool,
                            "called_tools": called,
                            "adjustments": adjustments,
                        })
                    }
                    Err(e) => {
                        errored += 1;
                        warn!(job_id = %ctx.job_id, case = %case.id, error = %e, "tool eval unit failed");
                        json!({
                            "target": target.to_string(),
                            "case_id": case.id,
                            "ok": false,
                            "passed": false,
                            "expected_tool": case.expected_tool,
                            "error": e.to_string(),
                            "adjustments": adjustments,
                        })
                    }
                };

                let report = Report::new(ctx.job_id, "tool_eval_unit", payload);
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
                            format!("{completed}/{total} cases"),
                        )
                        .await;
                }
            }
        }

        if errored == total {
            return DriverOutcome::Failed {
                error: format!("all {total} tool-eval units failed"),
            };
        }

        let summary = Report::new(
            ctx.job_id,
            "tool_eval_summary",
            json!({
                "total_units": total,
                "errored_units": errored,
                "passed_units": passed,
                "pass_rate": passed as f64 / total as f64,
            }),
        );
        if let Err(e) = ctx.store.put_report(&summary).await {
            return DriverOutcome::Failed {
                error: format!("persisting summary: {e}"),
            };
        }

        info!(job_id = %ctx.job_id, passed, total, "tool eval finished");
        DriverOutcome::Done {
            result_ref: Some(summary.id.to_string()),
        }
    }
}
