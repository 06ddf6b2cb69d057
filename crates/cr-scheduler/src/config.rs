use serde::{Deserialize, Serialize};

use cr_hub::HeartbeatConfig;
use cr_types::JobType;

/// Scheduler tuning knobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Submissions allowed per user inside the rolling window.
    pub submission_cap: usize,
    /// Length of the rolling submission window.
    pub submission_window_secs: u64,
    /// Jobs one user may have running at once; excess submissions queue.
    pub max_running_per_user: usize,
    /// Optional process-wide running cap across all users.
    pub max_running_global: Option<usize>,
    /// Job kinds of which a user may have at most one active at a time.
    pub singleton_kinds: Vec<JobType>,
    /// How many recently finished jobs the sync snapshot carries.
    pub recent_terminal_window: usize,
    pub heartbeat: HeartbeatConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            submission_cap: 20,
            submission_window_secs: 3600,
            max_running_per_user: 2,
            max_running_global: None,
            singleton_kinds: vec![JobType::ToolEval],
            recent_terminal_window: 10,
            heartbeat: HeartbeatConfig::default(),
        }
    }
}
