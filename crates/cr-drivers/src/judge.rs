//! LLM-as-judge driver.
//!
//! One work unit per case. In scoring mode (one candidate) the judge model is
//! asked for a 0–100 grade; in comparison mode (two candidates, used by
//! judge_compare jobs) it is asked to pick A, B, or tie. The grading prompt
//! content is deliberately minimal — callers supply their own rubric text.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{info, warn};

use async_trait::async_trait;
use cr_invoker::{InvocationInput, ModelInvoker};
use cr_search::apply_target_constraints;
use cr_store::DurableStore;
use cr_types::{validation_error, CrResult, ModelTarget, ParamMap, Report};

use crate::{unit_pct, CancelFlag, Driver, DriverOutcome, JobContext, ProgressSink};

/// One judged case: a prompt plus one candidate output (scoring) or two
/// (comparison).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeCase {
    pub id: String,
    pub prompt: String,
    pub candidates: Vec<String>,
}

/// Spec of a judge / judge_compare job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JudgeSpec {
    pub judge_target: ModelTarget,
    pub cases: Vec<JudgeCase>,
    /// Rubric text prepended to every grading prompt.
    #[serde(default)]
    pub rubric: String,
    #[serde(default)]
    pub params: ParamMap,
}

impl JudgeSpec {
    pub fn parse(spec: &Value) -> CrResult<Self> {
        let parsed: Self = serde_json::from_value(spec.clone())
            .map_err(|e| validation_error!("malformed judge spec: {e}"))?;
        if parsed.cases.is_empty() {
            return Err(validation_error!("judge spec has no cases"));
        }
        for case in &parsed.cases {
            if case.candidates.is_empty() || case.candidates.len() > 2 {
                return Err(validation_error!(
                    "case {} must have one or two candidates",
                    case.id
                ));
            }
        }
        Ok(parsed)
    }
}

/// Driver for judge and judge_compare jobs.
pub struct JudgeDriver;

#[async_trait]
impl Driver for JudgeDriver {
    async fn run(&self, ctx: JobContext, cancel: CancelFlag) -> DriverOutcome {
        let spec = match JudgeSpec::parse(&ctx.spec) {
            Ok(s) => s,
            Err(e) => return DriverOutcome::Failed { error: e.to_string() },
        };

        let total = spec.cases.len();
        let (effective, adjustments) =
            apply_target_constraints(&spec.params, &spec.judge_target);

        info!(job_id = %ctx.job_id, judge = %spec.judge_target, cases = total, "judge run starting");

        let mut completed = 0usize;
        let mut errored = 0usize;
        let mut score_sum = 0.0;
        let mut scored = 0usize;

        for case in &spec.cases {
            if cancel.is_cancelled() {
                info!(job_id = %ctx.job_id, completed, "judge run cancelled");
                return DriverOutcome::Cancelled;
            }

            let prompt = grading_prompt(&spec.rubric, case);
            let input = InvocationInput::from_prompt(prompt);
            let result = ctx
                .invoker
                .invoke(&spec.judge_target, &effective, &input)
                .await;

            let (verdict, score, payload) = match &result {
                Ok(outcome) => {
                    let (verdict, score) = interpret_verdict(&outcome.output, case.candidates.len());
                    if let Some(s) = score {
                        score_sum += s;
                        scored += 1;
                    }
                    let payload = json!({
                        "case_id": case.id,
                        "ok": true,
                        "verdict": verdict,
                        "score": score,
                        "raw_output": outcome.output,
                        "adjustments": adjustments,
                    });
                    (verdict, score, payload)
                }
                Err(e) => {
                    errored += 1;
                    warn!(job_id = %ctx.job_id, case = %case.id, error = %e, "judge unit failed");
                    let payload = json!({
                        "case_id": case.id,
                        "ok": false,
                        "error": e.to_string(),
                        "adjustments": adjustments,
                    });
                    ("error".to_string(), None, payload)
                }
            };

            let report = Report::new(ctx.job_id, "judge_verdict", payload);
            if let Err(e) = ctx.store.put_report(&report).await {
                return DriverOutcome::Failed {
                    error: format!("persisting verdict: {e}"),
                };
            }

            ctx.sink
                .judge_verdict(case.id.clone(), verdict, score)
                .await;

            completed += 1;
            if completed < total {
                ctx.sink
                    .progress(
                        unit_pct(completed, total),
                        format!("{completed}/{total} cases judged"),
                    )
                    .await;
            }
        }

        if errored == total {
            return DriverOutcome::Failed {
                error: format!("all {total} judge units failed"),
            };
        }

        let summary = Report::new(
            ctx.job_id,
            "judge_summary",
            json!({
                "total_cases": total,
                "errored_cases": errored,
                "mean_score": if scored > 0 { Some(score_sum / scored as f64) } else { None },
            }),
        );
        if let Err(e) = ctx.store.put_report(&summary).await {
            return DriverOutcome::Failed {
                error: format!("persisting summary: {e}"),
            };
        }

        info!(job_id = %ctx.job_id, total, errored, "judge run finished");
        DriverOutcome::Done {
            result_ref: Some(summary.id.to_string()),
        }
    }
}

fn grading_prompt(rubric: &str, case: &JudgeCase) -> String {
    match case.candidates.as_slice() {
        [single] => format!(
            "{rubric}\n\nTask:\n{}\n\nResponse:\n{single}\n\nGrade the response from 0 to 100. Reply with the number first.",
            case.prompt
        ),
        [a, b] => format!(
            "{rubric}\n\nTask:\n{}\n\nResponse A:\n{a}\n\nResponse B:\n{b}\n\nWhich response is better? Reply with A, B, or tie first.",
            case.prompt
        ),
        _ => case.prompt.clone(),
    }
}

/// Map raw judge output to a verdict string and optional numeric score.
///
/// Scoring mode expects a leading number; comparison mode expects A/B/tie.
/// Unparseable output yields an "unparseable" verdict with no score rather
/// than an error — one bad judge reply should not fail the unit.
fn interpret_verdict(output: &str, candidates: usize) -> (String, Option<f64>) {
    let trimmed = output.trim();
    if candidates == 2 {
        let lowered = trimmed.to_lowercase();
        let verdict = if lowered.starts_with('a') {
            "A"
        } else if lowered.starts_with('b') {
            "B"
        } else if lowered.starts_with("tie") {
            "tie"
        } else {
            return ("unparseable".into(), None);
        };
        return (verdict.to_string(), None);
    }

    match first_number(trimmed) {
        Some(n) => (format!("{n:.0}"), Some(n.clamp(0.0, 100.0))),
        None => ("unparseable".into(), None),
    }
}

fn first_number(text: &str) -> Option<f64> {
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() || (ch == '.' && !current.is_empty()) {
            current.push(ch);
        } else if !current.is_empty() {
            break;
        }
    }
    current.parse().ok()
}
