//! Typed messages of the real-time channel.

use serde::{Deserialize, Serialize};

use cr_search::Trial;
use cr_types::{Job, JobId};

/// Every message the hub can deliver to a client.
///
/// Tagged on `type` so the wire form is self-describing; new job kinds add
/// variants here and the compiler finds every match that needs updating.
/// For any single job, messages are delivered in the order the driver
/// produced them, terminal message last; no ordering holds across jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// First message after connect: the complete current state for this user.
    Sync {
        active_jobs: Vec<Job>,
        recent_jobs: Vec<Job>,
    },
    JobCreated {
        job: Job,
    },
    JobStarted {
        job_id: JobId,
    },
    JobProgress {
        job_id: JobId,
        pct: f64,
        detail: String,
    },
    JobCompleted {
        job_id: JobId,
        result_ref: Option<String>,
    },
    JobFailed {
        job_id: JobId,
        error: String,
    },
    JobCancelled {
        job_id: JobId,
    },
    /// One finished trial of a tuning job.
    ComboResult {
        job_id: JobId,
        trial: Trial,
    },
    /// One graded case of a judge job.
    JudgeVerdict {
        job_id: JobId,
        case_id: String,
        verdict: String,
        score: Option<f64>,
    },
    Ping {
        seq: u64,
    },
    Pong {
        seq: u64,
    },
}

impl ClientMessage {
    /// The job this message correlates to, when it concerns a single job.
    pub fn job_id(&self) -> Option<JobId> {
        match self {
            Self::JobCreated { job } => Some(job.id),
            Self::JobStarted { job_id }
            | Self::JobProgress { job_id, .. }
            | Self::JobCompleted { job_id, .. }
            | Self::JobFailed { job_id, .. }
            | Self::JobCancelled { job_id }
            | Self::ComboResult { job_id, .. }
            | Self::JudgeVerdict { job_id, .. } => Some(*job_id),
            Self::Sync { .. } | Self::Ping { .. } | Self::Pong { .. } => None,
        }
    }

    /// Whether this message closes a job's event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::JobCompleted { .. } | Self::JobFailed { .. } | Self::JobCancelled { .. }
        )
    }
}
