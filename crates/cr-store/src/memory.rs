//! In-memory store for tests and embedded use.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use cr_search::Trial;
use cr_types::{Job, JobId, PersistenceError, Report, ReportId};

use crate::{DurableStore, StoreResult};

/// HashMap-backed store. Durable only for the process lifetime — intended for
/// tests and single-shot embedded runs; production deployments use
/// [`crate::FileStore`] or an external implementation of the contract.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: RwLock<HashMap<JobId, Job>>,
    trials: RwLock<HashMap<JobId, Vec<Trial>>>,
    reports: RwLock<HashMap<ReportId, Report>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn put_job(&self, job: &Job) -> StoreResult<()> {
        self.jobs.write().insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Job> {
        self.jobs
            .read()
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::NotFound { id: id.to_string() })
    }

    async fn list_jobs(&self, owner: Option<&str>) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read();
        let mut out: Vec<Job> = jobs
            .values()
            .filter(|j| owner.map_or(true, |o| j.owner_id == o))
            .cloned()
            .collect();
        out.sort_by_key(|j| j.created_at);
        Ok(out)
    }

    async fn put_trial(&self, trial: &Trial) -> StoreResult<()> {
        let mut trials = self.trials.write();
        let entries = trials.entry(trial.job_id).or_default();
        // Overwrite by trial number so re-persisting a trial is idempotent.
        match entries
            .iter_mut()
            .find(|t| t.trial_number == trial.trial_number)
        {
            Some(existing) => *existing = trial.clone(),
            None => entries.push(trial.clone()),
        }
        Ok(())
    }

    async fn list_trials(&self, job_id: JobId) -> StoreResult<Vec<Trial>> {
        let mut out = self
            .trials
            .read()
            .get(&job_id)
            .cloned()
            .unwrap_or_default();
        out.sort_by_key(|t| t.trial_number);
        Ok(out)
    }

    async fn put_report(&self, report: &Report) -> StoreResult<()> {
        self.reports.write().insert(report.id, report.clone());
        Ok(())
    }

    async fn get_report(&self, id: ReportId) -> StoreResult<Report> {
        self.reports
            .read()
            .get(&id)
            .cloned()
            .ok_or(PersistenceError::NotFound { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_types::{JobType, ParamMap};

    #[tokio::test]
    async fn job_round_trip_and_owner_filter() {
        let store = MemoryStore::new();
        let job_a = Job::new(JobType::Benchmark, "alice", serde_json::json!({}));
        let job_b = Job::new(JobType::Judge, "bob", serde_json::json!({}));
        store.put_job(&job_a).await.unwrap();
        store.put_job(&job_b).await.unwrap();

        let fetched = store.get_job(job_a.id).await.unwrap();
        assert_eq!(fetched.owner_id, "alice");

        let alices = store.list_jobs(Some("alice")).await.unwrap();
        assert_eq!(alices.len(), 1);
        let all = store.list_jobs(None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let store = MemoryStore::new();
        let err = store.get_job(uuid::Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, PersistenceError::NotFound { .. }));
    }

    #[tokio::test]
    async fn trials_listed_in_number_order_and_overwritten_by_number() {
        let store = MemoryStore::new();
        let job_id = uuid::Uuid::new_v4();

        for n in [2usize, 0, 1] {
            let trial = Trial::new(job_id, n, ParamMap::new(), "m", vec![]);
            store.put_trial(&trial).await.unwrap();
        }

        let trials = store.list_trials(job_id).await.unwrap();
        assert_eq!(
            trials.iter().map(|t| t.trial_number).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        // Re-persisting trial 1 replaces it rather than duplicating.
        let mut updated = trials[1].clone();
        updated.mark_running();
        store.put_trial(&updated).await.unwrap();
        assert_eq!(store.list_trials(job_id).await.unwrap().len(), 3);
    }
}
