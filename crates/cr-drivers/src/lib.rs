//! # cr-drivers
//!
//! Execution drivers: one per job kind, all implementing the [`Driver`]
//! contract. A driver turns a job spec into a finite sequence of work units,
//! calls the Model Invoker for each, persists every unit result *before*
//! emitting its progress event, and observes the cooperative cancel flag at
//! unit boundaries.

mod benchmark;
mod judge;
mod tool_eval;
mod tune;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cr_invoker::ModelInvoker;
use cr_search::Trial;
use cr_store::DurableStore;
use cr_types::{CrResult, JobId, JobType, OwnerId};

pub use benchmark::{BenchmarkDriver, BenchmarkSpec};
pub use judge::{JudgeCase, JudgeDriver, JudgeSpec};
pub use tool_eval::{ToolCase, ToolEvalDriver, ToolEvalSpec};
pub use tune::{EvalCase, PromptTuneDriver, PromptTuneSpec, TuneDriver, TuneSpec};

/// Cooperative cancellation flag, one per job.
///
/// Settable once; drivers and the tuning loop observe it between work units.
/// Never preemptive — an in-flight provider call finishes before the flag is
/// checked again.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Terminal outcome a driver reports back to the scheduler.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverOutcome {
    /// The run finished; partial per-unit failures still count as done.
    Done { result_ref: Option<String> },
    /// Every unit failed, or a non-recoverable error (e.g. the durable store
    /// went away) ended the run early.
    Failed { error: String },
    /// The cancel flag was observed at a unit boundary.
    Cancelled,
}

/// Channel through which a running driver reports progress and domain
/// events. Implemented by the scheduler: it is the single writer of the
/// job's progress fields and forwards each event to the Progress Hub after
/// persisting it.
#[async_trait]
pub trait ProgressSink: Send + Sync {
    /// Progress after a completed unit. `pct` is monotonically increasing
    /// and stays below 100 — the terminal event closes the stream.
    async fn progress(&self, pct: f64, detail: String);

    /// A finished trial of a tuning job.
    async fn combo_result(&self, trial: Trial);

    /// A graded case of a judge job.
    async fn judge_verdict(&self, case_id: String, verdict: String, score: Option<f64>);
}

/// Everything a driver needs to run one job.
pub struct JobContext {
    pub job_id: JobId,
    pub owner_id: OwnerId,
    /// The submitted spec, parsed by the concrete driver.
    pub spec: Value,
    pub store: Arc<dyn DurableStore>,
    pub invoker: Arc<dyn ModelInvoker>,
    pub sink: Arc<dyn ProgressSink>,
}

/// Execution driver contract, one implementation per job kind.
#[async_trait]
pub trait Driver: Send + Sync {
    async fn run(&self, ctx: JobContext, cancel: CancelFlag) -> DriverOutcome;
}

/// Validate a job spec at the submission boundary, before a job record is
/// created. Returns the same errors the driver would hit, so malformed specs
/// and empty search spaces are rejected up front.
pub fn validate_spec(job_type: JobType, spec: &Value) -> CrResult<()> {
    match job_type {
        JobType::Benchmark | JobType::ScheduledBenchmark => {
            benchmark::BenchmarkSpec::parse(spec).map(|_| ())
        }
        JobType::ParamTune => tune::TuneSpec::parse(spec).map(|_| ()),
        JobType::PromptTune => tune::PromptTuneSpec::parse(spec).map(|_| ()),
        JobType::ToolEval => tool_eval::ToolEvalSpec::parse(spec).map(|_| ()),
        JobType::Judge | JobType::JudgeCompare => judge::JudgeSpec::parse(spec).map(|_| ()),
    }
}

/// Progress percentage after `completed` of `total` units.
pub(crate) fn unit_pct(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    completed as f64 / total as f64 * 100.0
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_flag_is_sticky_and_shared() {
        let flag = CancelFlag::new();
        let observer = flag.clone();
        assert!(!observer.is_cancelled());

        flag.request();
        assert!(observer.is_cancelled());

        // Requesting again is a no-op, not an error.
        flag.request();
        assert!(observer.is_cancelled());
    }

    #[test]
    fn unit_pct_stays_in_range() {
        assert_eq!(unit_pct(0, 10), 0.0);
        assert_eq!(unit_pct(4, 10), 40.0);
        assert_eq!(unit_pct(10, 10), 100.0);
        assert_eq!(unit_pct(3, 0), 0.0);
    }
}
