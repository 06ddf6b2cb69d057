use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique job identifier
pub type JobId = Uuid;

/// Identifier of the user owning a job
pub type OwnerId = String;

/// Kind of evaluation work a job performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Benchmark,
    ToolEval,
    ParamTune,
    PromptTune,
    Judge,
    JudgeCompare,
    ScheduledBenchmark,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Benchmark => "benchmark",
            Self::ToolEval => "tool_eval",
            Self::ParamTune => "param_tune",
            Self::PromptTune => "prompt_tune",
            Self::Judge => "judge",
            Self::JudgeCompare => "judge_compare",
            Self::ScheduledBenchmark => "scheduled_benchmark",
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job lifecycle status.
///
/// pending → queued → running → {done, failed, cancelled, interrupted}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Done,
    Failed,
    Cancelled,
    Interrupted,
}

impl JobStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done | Self::Failed | Self::Cancelled | Self::Interrupted
        )
    }

    /// Active = admitted but not yet terminal.
    pub fn is_active(&self) -> bool {
        !self.is_terminal()
    }
}

/// One asynchronous unit of orchestrated work.
///
/// Field ownership: the scheduler is the sole writer of `status`,
/// `started_at`, and `completed_at`; the owning driver is the sole writer of
/// `progress_pct`, `progress_detail`, and `result_ref` while running.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub job_type: JobType,
    pub owner_id: OwnerId,
    pub status: JobStatus,
    /// 0–100, monotonically non-decreasing while running. Drivers report
    /// unit progress strictly below 100; only [`Job::mark_done`] writes 100.
    pub progress_pct: f64,
    pub progress_detail: String,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Opaque pointer into the durable store (report id) once results exist.
    pub result_ref: Option<String>,
    pub error_msg: Option<String>,
    /// The submitted job specification, opaque to the scheduler.
    pub spec: serde_json::Value,
}

impl Job {
    pub fn new(job_type: JobType, owner_id: impl Into<OwnerId>, spec: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_type,
            owner_id: owner_id.into(),
            status: JobStatus::Pending,
            progress_pct: 0.0,
            progress_detail: String::new(),
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result_ref: None,
            error_msg: None,
            spec,
        }
    }

    pub fn mark_queued(&mut self) {
        self.status = JobStatus::Queued;
    }

    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
        self.started_at = Some(Utc::now());
    }

    pub fn mark_done(&mut self, result_ref: Option<String>) {
        self.status = JobStatus::Done;
        self.completed_at = Some(Utc::now());
        self.progress_pct = 100.0;
        self.result_ref = result_ref;
    }

    pub fn mark_failed(&mut self, error: String) {
        self.status = JobStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error_msg = Some(error);
    }

    pub fn mark_cancelled(&mut self) {
        self.status = JobStatus::Cancelled;
        self.completed_at = Some(Utc::now());
    }

    pub fn mark_interrupted(&mut self) {
        self.status = JobStatus::Interrupted;
        self.completed_at = Some(Utc::now());
        self.error_msg
            .get_or_insert_with(|| "interrupted by process restart".to_string());
    }

    /// Update progress. Values are clamped to [0, 100] and the stored
    /// percentage never decreases.
    pub fn set_progress(&mut self, pct: f64, detail: impl Into<String>) {
        let pct = pct.clamp(0.0, 100.0);
        if pct > self.progress_pct {
            self.progress_pct = pct;
        }
        self.progress_detail = detail.into();
    }
}
