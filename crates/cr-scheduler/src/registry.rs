//! In-memory job registry.
//!
//! A cache over the durable store, owned by the scheduler. Field ownership is
//! enforced by API shape: the scheduler mutates status through
//! [`JobRegistry::update`], the driver's progress sink mutates only the
//! progress fields the same way, and nothing else writes at all.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::VecDeque;

use cr_drivers::CancelFlag;
use cr_hub::SyncSnapshot;
use cr_types::{Job, JobId, JobType};

#[derive(Debug)]
pub struct JobRegistry {
    jobs: DashMap<JobId, Job>,
    cancel_flags: DashMap<JobId, CancelFlag>,
    recent_terminal: Mutex<VecDeque<JobId>>,
    recent_window: usize,
}

impl JobRegistry {
    pub fn new(recent_window: usize) -> Self {
        Self {
            jobs: DashMap::new(),
            cancel_flags: DashMap::new(),
            recent_terminal: Mutex::new(VecDeque::new()),
            recent_window,
        }
    }

    pub fn insert(&self, job: Job, flag: CancelFlag) {
        self.cancel_flags.insert(job.id, flag);
        self.jobs.insert(job.id, job);
    }

    pub fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.get(&id).map(|j| j.clone())
    }

    /// Apply a mutation under the entry lock and return the updated record.
    pub fn update<F: FnOnce(&mut Job)>(&self, id: JobId, f: F) -> Option<Job> {
        self.jobs.get_mut(&id).map(|mut j| {
            f(&mut j);
            j.clone()
        })
    }

    pub fn cancel_flag(&self, id: JobId) -> Option<CancelFlag> {
        self.cancel_flags.get(&id).map(|f| f.clone())
    }

    pub fn drop_cancel_flag(&self, id: JobId) {
        self.cancel_flags.remove(&id);
    }

    pub fn list_for_owner(&self, owner: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.owner_id == owner)
            .map(|j| j.clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        jobs
    }

    pub fn running_count_for(&self, owner: &str) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.owner_id == owner && j.status == cr_types::JobStatus::Running)
            .count()
    }

    pub fn running_count(&self) -> usize {
        self.jobs
            .iter()
            .filter(|j| j.status == cr_types::JobStatus::Running)
            .count()
    }

    /// An active (pending/queued/running) job of `kind` for `owner`, if any.
    pub fn active_of_kind(&self, owner: &str, kind: JobType) -> Option<JobId> {
        self.jobs
            .iter()
            .find(|j| j.owner_id == owner && j.job_type == kind && j.status.is_active())
            .map(|j| j.id)
    }

    /// Remember a finished job for sync snapshots, oldest evicted first.
    pub fn push_recent_terminal(&self, id: JobId) {
        let mut recent = self.recent_terminal.lock();
        recent.push_back(id);
        while recent.len() > self.recent_window {
            recent.pop_front();
        }
    }

    /// Snapshot for one user's reconnect: all active jobs plus the bounded
    /// recent-terminal window, both in stable order.
    pub fn snapshot(&self, owner: &str) -> SyncSnapshot {
        let mut active: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| j.owner_id == owner && j.status.is_active())
            .map(|j| j.clone())
            .collect();
        active.sort_by_key(|j| j.created_at);

        let recent_ids = self.recent_terminal.lock().clone();
        let recent: Vec<Job> = recent_ids
            .iter()
            .rev() // newest first
            .filter_map(|id| self.get(*id))
            .filter(|j| j.owner_id == owner)
            .collect();

        SyncSnapshot {
            active_jobs: active,
            recent_jobs: recent,
        }
    }
}
