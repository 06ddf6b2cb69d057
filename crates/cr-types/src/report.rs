use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::JobId;

/// Unique report identifier
pub type ReportId = Uuid;

/// A durable result record written by a driver.
///
/// Drivers write one report per completed work unit and one summary report at
/// the end of a run; a job's `result_ref` points at the summary. The payload
/// is opaque JSON so the store contract stays independent of driver internals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub id: ReportId,
    pub job_id: JobId,
    /// Discriminator for consumers, e.g. "bench_unit", "bench_summary",
    /// "judge_verdict", "tune_summary".
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Report {
    pub fn new(job_id: JobId, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            job_id,
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}
