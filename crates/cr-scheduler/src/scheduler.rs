//! The scheduler itself: admission, lifecycle transitions, cancellation, and
//! restart recovery.

use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use async_trait::async_trait;
use cr_drivers::{
    validate_spec, BenchmarkDriver, CancelFlag, Driver, DriverOutcome, JobContext, JudgeDriver,
    ProgressSink, PromptTuneDriver, ToolEvalDriver, TuneDriver,
};
use cr_hub::{ClientMessage, ProgressHub, Subscription};
use cr_invoker::ModelInvoker;
use cr_search::Trial;
use cr_store::DurableStore;
use cr_types::{AdmissionError, CrResult, Job, JobId, JobStatus, JobType, OwnerId};

use crate::config::SchedulerConfig;
use crate::ratelimit::RateLimitCounter;
use crate::registry::JobRegistry;

/// Result of a cancel request. Cancelling a job that already finished is a
/// success outcome, not an error — callers must tolerate ghost jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Cancelled,
    AlreadyFinished,
}

/// Orchestrates every job from submission to terminal state.
pub struct Scheduler {
    config: SchedulerConfig,
    registry: Arc<JobRegistry>,
    store: Arc<dyn DurableStore>,
    invoker: Arc<dyn ModelInvoker>,
    hub: Arc<ProgressHub>,
    drivers: HashMap<JobType, Arc<dyn Driver>>,
    rate: RateLimitCounter,
    /// FIFO of admitted-but-not-started jobs, per owner.
    queues: DashMap<OwnerId, VecDeque<JobId>>,
    tasks: DashMap<JobId, JoinHandle<()>>,
}

impl Scheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn DurableStore>,
        invoker: Arc<dyn ModelInvoker>,
    ) -> Arc<Self> {
        let rate = RateLimitCounter::new(config.submission_cap, config.submission_window_secs);
        let registry = Arc::new(JobRegistry::new(config.recent_terminal_window));
        let hub = Arc::new(ProgressHub::new(config.heartbeat));

        Arc::new(Self {
            registry,
            store,
            invoker,
            hub,
            drivers: Self::default_drivers(),
            rate,
            queues: DashMap::new(),
            tasks: DashMap::new(),
            config,
        })
    }

    fn default_drivers() -> HashMap<JobType, Arc<dyn Driver>> {
        let benchmark: Arc<dyn Driver> = Arc::new(BenchmarkDriver);
        let judge: Arc<dyn Driver> = Arc::new(JudgeDriver);
        let mut drivers: HashMap<JobType, Arc<dyn Driver>> = HashMap::new();
        drivers.insert(JobType::Benchmark, benchmark.clone());
        drivers.insert(JobType::ScheduledBenchmark, benchmark);
        drivers.insert(JobType::ParamTune, Arc::new(TuneDriver));
        drivers.insert(JobType::PromptTune, Arc::new(PromptTuneDriver));
        drivers.insert(JobType::ToolEval, Arc::new(ToolEvalDriver));
        drivers.insert(JobType::Judge, judge.clone());
        drivers.insert(JobType::JudgeCompare, judge);
        drivers
    }

    pub fn hub(&self) -> Arc<ProgressHub> {
        self.hub.clone()
    }

    /// Rebuild the in-memory registry from the durable store. Jobs a previous
    /// process left active are marked interrupted — they never silently
    /// vanish. Returns how many were interrupted.
    pub async fn recover(&self) -> CrResult<usize> {
        let jobs = self.store.list_jobs(None).await?;
        let mut interrupted = 0usize;
        let mut terminal: Vec<Job> = Vec::new();

        for mut job in jobs {
            if job.status.is_active() {
                job.mark_interrupted();
                self.store.put_job(&job).await?;
                interrupted += 1;
            }
            terminal.push(job);
        }

        terminal.sort_by_key(|j| j.completed_at);
        for job in terminal {
            let id = job.id;
            self.registry.insert(job, CancelFlag::new());
            self.registry.push_recent_terminal(id);
        }

        info!(interrupted, "registry rebuilt from durable store");
        Ok(interrupted)
    }

    /// Admit a job. Checks run in order: rate limit, singleton conflict, spec
    /// validation, then capacity — at capacity the job is queued FIFO rather
    /// than rejected.
    pub async fn submit(
        self: &Arc<Self>,
        owner: &str,
        job_type: JobType,
        spec: Value,
    ) -> CrResult<JobId> {
        if !self.rate.try_acquire(owner) {
            return Err(AdmissionError::RateLimitExceeded {
                cap: self.config.submission_cap,
                window_secs: self.config.submission_window_secs,
            }
            .into());
        }

        if self.config.singleton_kinds.contains(&job_type) {
            if let Some(existing) = self.registry.active_of_kind(owner, job_type) {
                return Err(AdmissionError::SingletonConflict {
                    job_type: job_type.to_string(),
                    existing,
                }
                .into());
            }
        }

        validate_spec(job_type, &spec)?;

        let mut job = Job::new(job_type, owner, spec);
        let can_start = self.has_capacity(owner);
        if !can_start {
            job.mark_queued();
        }

        // Log of record first, cache second, events last.
        self.store.put_job(&job).await?;
        let job_id = job.id;
        self.registry.insert(job.clone(), CancelFlag::new());
        self.hub.publish(owner, ClientMessage::JobCreated { job });

        if can_start {
            self.start_job(job_id).await;
        } else {
            self.queues
                .entry(owner.to_string())
                .or_default()
                .push_back(job_id);
            info!(job_id = %job_id, owner = %owner, "job queued at capacity");
        }

        Ok(job_id)
    }

    /// Request cooperative cancellation.
    pub async fn cancel(self: &Arc<Self>, job_id: JobId) -> CrResult<CancelOutcome> {
        let job = self
            .registry
            .get(job_id)
            .ok_or(cr_types::PersistenceError::NotFound {
                id: job_id.to_string(),
            })?;

        if job.status.is_terminal() {
            return Ok(CancelOutcome::AlreadyFinished);
        }

        if let Some(flag) = self.registry.cancel_flag(job_id) {
            flag.request();
        }

        match job.status {
            JobStatus::Pending | JobStatus::Queued => {
                // Never started: drop it from the queue and finalize directly.
                if let Some(mut queue) = self.queues.get_mut(&job.owner_id) {
                    queue.retain(|id| *id != job_id);
                }
                self.finalize(job_id, DriverOutcome::Cancelled).await;
                Ok(CancelOutcome::Cancelled)
            }
            // The running driver observes the flag at its next unit boundary.
            _ => Ok(CancelOutcome::Cancelled),
        }
    }

    pub fn get_status(&self, job_id: JobId) -> CrResult<Job> {
        self.registry
            .get(job_id)
            .ok_or_else(|| {
                cr_types::PersistenceError::NotFound {
                    id: job_id.to_string(),
                }
                .into()
            })
    }

    pub fn list_jobs(&self, owner: &str) -> Vec<Job> {
        self.registry.list_for_owner(owner)
    }

    /// Open a real-time channel for `owner`. The subscription's first message
    /// is a sync snapshot of current state.
    pub fn subscribe(&self, owner: &str) -> Subscription {
        self.hub.connect(owner, self.registry.snapshot(owner))
    }

    /// Block until `job_id` reaches a terminal state. Intended for tests and
    /// shutdown paths.
    pub async fn wait_for(&self, job_id: JobId) {
        loop {
            if let Some((_, handle)) = self.tasks.remove(&job_id) {
                let _ = handle.await;
            }
            match self.registry.get(job_id) {
                Some(job) if job.status.is_terminal() => return,
                _ => tokio::time::sleep(Duration::from_millis(2)).await,
            }
        }
    }

    fn has_capacity(&self, owner: &str) -> bool {
        if self.registry.running_count_for(owner) >= self.config.max_running_per_user {
            return false;
        }
        match self.config.max_running_global {
            Some(cap) => self.registry.running_count() < cap,
            None => true,
        }
    }

    // Returns a boxed future (a concrete `Send` type) rather than an `async
    // fn`'s opaque future. `start_job` spawns `finalize`, which transitively
    // calls back into `start_job`; with opaque futures the compiler cannot
    // resolve the resulting `Send` auto-trait cycle. Naming the type here
    // breaks the cycle without changing behavior.
    fn start_job<'a>(
        self: &'a Arc<Self>,
        job_id: JobId,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
        let job = match self.registry.get(job_id) {
            Some(j) if matches!(j.status, JobStatus::Pending | JobStatus::Queued) => j,
            // Cancelled while queued, or otherwise gone.
            _ => return,
        };

        let updated = match self.registry.update(job_id, |j| j.mark_running()) {
            Some(j) => j,
            None => return,
        };
        if let Err(e) = self.store.put_job(&updated).await {
            error!(job_id = %job_id, error = %e, "persisting start transition failed");
            let failed = self
                .registry
                .update(job_id, |j| j.mark_failed(format!("persistence error: {e}")));
            self.registry.push_recent_terminal(job_id);
            self.registry.drop_cancel_flag(job_id);
            if let Some(failed) = failed {
                self.publish_terminal(&failed);
            }
            return;
        }

        self.hub
            .publish(&updated.owner_id, ClientMessage::JobStarted { job_id });
        info!(job_id = %job_id, job_type = %updated.job_type, owner = %updated.owner_id, "job started");

        let driver = match self.drivers.get(&updated.job_type) {
            Some(d) => d.clone(),
            None => {
                // Unreachable with the default registry; guard anyway.
                let failed = self.registry.update(job_id, |j| {
                    j.mark_failed(format!("no driver for {}", updated.job_type))
                });
                if let Some(failed) = &failed {
                    if let Err(e) = self.store.put_job(failed).await {
                        error!(job_id = %job_id, error = %e, "persisting terminal state failed");
                    }
                    self.publish_terminal(failed);
                }
                self.registry.push_recent_terminal(job_id);
                self.registry.drop_cancel_flag(job_id);
                return;
            }
        };

        let cancel = self.registry.cancel_flag(job_id).unwrap_or_default();
        let ctx = JobContext {
            job_id,
            owner_id: updated.owner_id.clone(),
            spec: updated.spec.clone(),
            store: self.store.clone(),
            invoker: self.invoker.clone(),
            sink: Arc::new(SchedulerSink {
                scheduler: self.clone(),
                job_id,
                owner: updated.owner_id.clone(),
            }),
        };

        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            let outcome = driver.run(ctx, cancel).await;
            scheduler.finalize(job_id, outcome).await;
        });
        self.tasks.insert(job_id, handle);
        })
    }

    async fn finalize(self: &Arc<Self>, job_id: JobId, outcome: DriverOutcome) {
        let updated = match &outcome {
            DriverOutcome::Done { result_ref } => self
                .registry
                .update(job_id, |j| j.mark_done(result_ref.clone())),
            DriverOutcome::Failed { error } => {
                self.registry.update(job_id, |j| j.mark_failed(error.clone()))
            }
            DriverOutcome::Cancelled => self.registry.update(job_id, |j| j.mark_cancelled()),
        };

        let job = match updated {
            Some(j) => j,
            None => {
                warn!(job_id = %job_id, "finalize for unknown job");
                return;
            }
        };

        // Terminal states must survive a restart even if the event is lost.
        if let Err(e) = self.store.put_job(&job).await {
            error!(job_id = %job_id, error = %e, "persisting terminal state failed");
        }

        self.registry.push_recent_terminal(job_id);
        self.registry.drop_cancel_flag(job_id);
        self.publish_terminal(&job);
        info!(job_id = %job_id, status = ?job.status, "job finalized");

        self.start_next_queued(&job.owner_id).await;
    }

    fn publish_terminal(&self, job: &Job) {
        let message = match job.status {
            JobStatus::Done => ClientMessage::JobCompleted {
                job_id: job.id,
                result_ref: job.result_ref.clone(),
            },
            JobStatus::Failed => ClientMessage::JobFailed {
                job_id: job.id,
                error: job.error_msg.clone().unwrap_or_default(),
            },
            JobStatus::Cancelled => ClientMessage::JobCancelled { job_id: job.id },
            _ => return,
        };
        self.hub.publish(&job.owner_id, message);
    }

    /// Start queued jobs for `owner` while capacity allows, oldest first.
    async fn start_next_queued(self: &Arc<Self>, owner: &str) {
        loop {
            if !self.has_capacity(owner) {
                return;
            }
            let next = match self.queues.get_mut(owner) {
                Some(mut queue) => queue.pop_front(),
                None => None,
            };
            match next {
                Some(job_id) => self.start_job(job_id).await,
                None => return,
            }
        }
    }
}

/// Progress path from a running driver back into the system. The sink writes
/// the job's progress fields (their single writer), persists the record, and
/// only then lets the event reach the hub.
struct SchedulerSink {
    scheduler: Arc<Scheduler>,
    job_id: JobId,
    owner: OwnerId,
}

#[async_trait]
impl ProgressSink for SchedulerSink {
    async fn progress(&self, pct: f64, detail: String) {
        let updated = self
            .scheduler
            .registry
            .update(self.job_id, |j| j.set_progress(pct, detail.clone()));
        if let Some(job) = updated {
            if let Err(e) = self.scheduler.store.put_job(&job).await {
                warn!(job_id = %self.job_id, error = %e, "persisting progress failed");
            }
            self.scheduler.hub.publish(
                &self.owner,
                ClientMessage::JobProgress {
                    job_id: self.job_id,
                    pct: job.progress_pct,
                    detail,
                },
            );
        }
    }

    async fn combo_result(&self, trial: Trial) {
        self.scheduler.hub.publish(
            &self.owner,
            ClientMessage::ComboResult {
                job_id: self.job_id,
                trial,
            },
        );
    }

    async fn judge_verdict(&self, case_id: String, verdict: String, score: Option<f64>) {
        self.scheduler.hub.publish(
            &self.owner,
            ClientMessage::JudgeVerdict {
                job_id: self.job_id,
                case_id,
                verdict,
                score,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_drivers::BenchmarkSpec;
    use cr_invoker::MockInvoker;
    use cr_search::{SearchSpace, TuneConfig};
    use cr_store::MemoryStore;
    use cr_types::{CrError, ModelTarget, ParamMap};
    use tokio::sync::Semaphore;

    fn bench_spec(runs: usize) -> Value {
        serde_json::to_value(BenchmarkSpec {
            targets: vec![ModelTarget::new("sonnet-large-v2", "openmodel")],
            prompt: "ping".into(),
            runs_per_target: runs,
            context_tiers: vec![0],
            params: ParamMap::new(),
        })
        .unwrap()
    }

    fn tool_eval_spec() -> Value {
        serde_json::json!({
            "targets": [ModelTarget::new("sonnet-large-v2", "openmodel")],
            "tools": [{"name": "get_weather", "description": "d", "parameters": {}}],
            "cases": [{"id": "c1", "prompt": "p", "expected_tool": "get_weather"}],
        })
    }

    fn scheduler_with(
        config: SchedulerConfig,
        invoker: Arc<MockInvoker>,
    ) -> (Arc<Scheduler>, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        let scheduler = Scheduler::new(config, store.clone(), invoker);
        (scheduler, store)
    }

    #[tokio::test]
    async fn benchmark_job_runs_to_done_with_result_ref() {
        let (scheduler, _store) = scheduler_with(
            SchedulerConfig::default(),
            Arc::new(MockInvoker::with_defaults()),
        );

        let mut sub = scheduler.subscribe("alice");
        let job_id = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(3))
            .await
            .unwrap();
        scheduler.wait_for(job_id).await;

        let job = scheduler.get_status(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(job.progress_pct, 100.0);
        assert!(job.result_ref.is_some());
        assert!(job.completed_at.is_some());

        // Subscriber sees: sync, created, started, monotonic progress below
        // 100, then the terminal event.
        let mut pcts = Vec::new();
        let mut saw_terminal = false;
        while let Ok(msg) = sub.rx.try_recv() {
            match msg {
                ClientMessage::JobProgress { pct, .. } => {
                    assert!(!saw_terminal, "progress after terminal event");
                    assert!(pct < 100.0);
                    pcts.push(pct);
                }
                ClientMessage::JobCompleted { result_ref, .. } => {
                    saw_terminal = true;
                    assert!(result_ref.is_some());
                }
                _ => {}
            }
        }
        assert!(saw_terminal);
        assert!(pcts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn twenty_first_submission_is_rate_limited() {
        let config = SchedulerConfig {
            max_running_per_user: 1,
            ..Default::default()
        };
        let (scheduler, _store) =
            scheduler_with(config, Arc::new(MockInvoker::with_defaults()));

        for i in 0..20 {
            scheduler
                .submit("alice", JobType::Benchmark, bench_spec(1))
                .await
                .unwrap_or_else(|e| panic!("submission {i} rejected: {e}"));
        }
        let err = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CrError::Admission(AdmissionError::RateLimitExceeded { cap: 20, .. })
        ));

        // Another user is unaffected.
        scheduler
            .submit("bob", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn singleton_kind_conflicts_while_active_only() {
        let hold = Arc::new(Semaphore::new(0));
        let invoker = Arc::new(MockInvoker::with_defaults().with_hold(hold.clone()));
        let (scheduler, _store) = scheduler_with(SchedulerConfig::default(), invoker);

        let first = scheduler
            .submit("alice", JobType::ToolEval, tool_eval_spec())
            .await
            .unwrap();

        let err = scheduler
            .submit("alice", JobType::ToolEval, tool_eval_spec())
            .await
            .unwrap_err();
        match err {
            CrError::Admission(AdmissionError::SingletonConflict { existing, .. }) => {
                assert_eq!(existing, first)
            }
            other => panic!("expected singleton conflict, got {other}"),
        }

        // A different user and a different kind are both fine.
        scheduler
            .submit("bob", JobType::ToolEval, tool_eval_spec())
            .await
            .unwrap();
        scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();

        hold.add_permits(100);
        scheduler.wait_for(first).await;
        scheduler
            .submit("alice", JobType::ToolEval, tool_eval_spec())
            .await
            .expect("singleton clears once the first job finished");
    }

    #[tokio::test]
    async fn excess_jobs_queue_and_start_fifo() {
        let hold = Arc::new(Semaphore::new(0));
        let invoker = Arc::new(MockInvoker::with_defaults().with_hold(hold.clone()));
        let config = SchedulerConfig {
            max_running_per_user: 1,
            ..Default::default()
        };
        let (scheduler, _store) = scheduler_with(config, invoker);

        let first = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();
        let second = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();

        assert_eq!(
            scheduler.get_status(first).unwrap().status,
            JobStatus::Running
        );
        assert_eq!(
            scheduler.get_status(second).unwrap().status,
            JobStatus::Queued
        );

        hold.add_permits(100);
        scheduler.wait_for(first).await;
        scheduler.wait_for(second).await;

        let first_job = scheduler.get_status(first).unwrap();
        let second_job = scheduler.get_status(second).unwrap();
        assert_eq!(first_job.status, JobStatus::Done);
        assert_eq!(second_job.status, JobStatus::Done);
        assert!(second_job.started_at.unwrap() >= first_job.started_at.unwrap());
    }

    #[tokio::test]
    async fn cancelling_a_running_job_keeps_partial_results() {
        let hold = Arc::new(Semaphore::new(0));
        let invoker = Arc::new(MockInvoker::with_defaults().with_hold(hold.clone()));
        let (scheduler, store) = scheduler_with(SchedulerConfig::default(), invoker);

        let job_id = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(5))
            .await
            .unwrap();

        // Let two units finish, then cancel.
        hold.add_permits(2);
        loop {
            let job = scheduler.get_status(job_id).unwrap();
            if job.progress_pct >= 40.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        let outcome = scheduler.cancel(job_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);

        hold.add_permits(100);
        scheduler.wait_for(job_id).await;

        let job = scheduler.get_status(job_id).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.progress_pct < 100.0);
        assert!(job.completed_at.is_some());

        // Completed unit results stayed durable. At most the unit in flight
        // at cancel time finished after the acknowledgment.
        use cr_store::DurableStore as _;
        let jobs = store.list_jobs(Some("alice")).await.unwrap();
        assert_eq!(jobs[0].status, JobStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancelling_a_finished_job_reports_already_finished() {
        let (scheduler, _store) = scheduler_with(
            SchedulerConfig::default(),
            Arc::new(MockInvoker::with_defaults()),
        );
        let job_id = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();
        scheduler.wait_for(job_id).await;

        let outcome = scheduler.cancel(job_id).await.unwrap();
        assert_eq!(outcome, CancelOutcome::AlreadyFinished);
        // Status is untouched.
        assert_eq!(scheduler.get_status(job_id).unwrap().status, JobStatus::Done);
    }

    #[tokio::test]
    async fn cancelling_a_queued_job_finalizes_it_immediately() {
        let hold = Arc::new(Semaphore::new(0));
        let invoker = Arc::new(MockInvoker::with_defaults().with_hold(hold.clone()));
        let config = SchedulerConfig {
            max_running_per_user: 1,
            ..Default::default()
        };
        let (scheduler, _store) = scheduler_with(config, invoker);

        let running = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();
        let queued = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(1))
            .await
            .unwrap();

        let outcome = scheduler.cancel(queued).await.unwrap();
        assert_eq!(outcome, CancelOutcome::Cancelled);
        assert_eq!(
            scheduler.get_status(queued).unwrap().status,
            JobStatus::Cancelled
        );

        hold.add_permits(100);
        scheduler.wait_for(running).await;
        // The cancelled job never started.
        assert!(scheduler.get_status(queued).unwrap().started_at.is_none());
    }

    #[tokio::test]
    async fn reconnect_mid_run_syncs_current_progress_first() {
        let hold = Arc::new(Semaphore::new(0));
        let invoker = Arc::new(MockInvoker::with_defaults().with_hold(hold.clone()));
        let (scheduler, _store) = scheduler_with(SchedulerConfig::default(), invoker);

        let job_id = scheduler
            .submit("alice", JobType::Benchmark, bench_spec(5))
            .await
            .unwrap();

        hold.add_permits(2);
        loop {
            if scheduler.get_status(job_id).unwrap().progress_pct >= 40.0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }

        // Reconnect now: the snapshot must already show 40%.
        let mut sub = scheduler.subscribe("alice");
        match sub.rx.recv().await.unwrap() {
            ClientMessage::Sync { active_jobs, .. } => {
                let entry = active_jobs.iter().find(|j| j.id == job_id).unwrap();
                assert_eq!(entry.progress_pct, 40.0);
            }
            other => panic!("expected sync first, got {other:?}"),
        }

        hold.add_permits(100);
        scheduler.wait_for(job_id).await;

        // Everything after the sync is at or above the snapshot's progress.
        while let Ok(msg) = sub.rx.try_recv() {
            if let ClientMessage::JobProgress { pct, .. } = msg {
                assert!(pct >= 40.0);
            }
        }
    }

    #[tokio::test]
    async fn empty_search_space_is_rejected_at_submission() {
        let (scheduler, store) = scheduler_with(
            SchedulerConfig::default(),
            Arc::new(MockInvoker::with_defaults()),
        );

        let spec = serde_json::to_value(serde_json::json!({
            "name": "sweep",
            "search_space": {"axes": []},
            "strategy": "grid",
            "target": ModelTarget::new("m", "p"),
            "cases": [{"id": "c", "prompt": "p"}],
        }))
        .unwrap();

        let err = scheduler
            .submit("alice", JobType::ParamTune, spec)
            .await
            .unwrap_err();
        assert!(matches!(err, CrError::Validation(_)), "{err}");

        // The job was never created.
        use cr_store::DurableStore as _;
        assert!(store.list_jobs(None).await.unwrap().is_empty());
        assert!(scheduler.list_jobs("alice").is_empty());
    }

    #[tokio::test]
    async fn param_tune_runs_under_the_scheduler() {
        let (scheduler, store) = scheduler_with(
            SchedulerConfig::default(),
            Arc::new(MockInvoker::with_defaults()),
        );

        let space = SearchSpace::new().add_continuous("temperature", 0.0, 1.0, 0.5);
        let config = TuneConfig::new("sweep", space, "grid").with_max_trials(10);
        let mut spec = serde_json::to_value(config).unwrap();
        let obj = spec.as_object_mut().unwrap();
        obj.insert(
            "target".into(),
            serde_json::to_value(
                ModelTarget::new("sonnet-large-v2", "openmodel").with_param(
                    "temperature",
                    Some(0.0),
                    Some(1.0),
                ),
            )
            .unwrap(),
        );
        obj.insert(
            "cases".into(),
            serde_json::json!([{"id": "c1", "prompt": "2+2?", "expected": "ok"}]),
        );

        let mut sub = scheduler.subscribe("alice");
        let job_id = scheduler
            .submit("alice", JobType::ParamTune, spec)
            .await
            .unwrap();
        scheduler.wait_for(job_id).await;

        assert_eq!(scheduler.get_status(job_id).unwrap().status, JobStatus::Done);

        use cr_store::DurableStore as _;
        assert_eq!(store.list_trials(job_id).await.unwrap().len(), 3);

        let mut combo_events = 0;
        while let Ok(msg) = sub.rx.try_recv() {
            if matches!(msg, ClientMessage::ComboResult { .. }) {
                combo_events += 1;
            }
        }
        assert_eq!(combo_events, 3);
    }

    #[tokio::test]
    async fn recovery_marks_stale_active_jobs_interrupted() {
        let store = Arc::new(MemoryStore::new());

        // A previous process left one running and one finished job behind.
        let mut stale = Job::new(JobType::Benchmark, "alice", bench_spec(1));
        stale.mark_running();
        let mut finished = Job::new(JobType::Benchmark, "alice", bench_spec(1));
        finished.mark_running();
        finished.mark_done(Some("report-1".into()));
        {
            use cr_store::DurableStore as _;
            store.put_job(&stale).await.unwrap();
            store.put_job(&finished).await.unwrap();
        }

        let scheduler = Scheduler::new(
            SchedulerConfig::default(),
            store.clone(),
            Arc::new(MockInvoker::with_defaults()),
        );
        let interrupted = scheduler.recover().await.unwrap();
        assert_eq!(interrupted, 1);

        let recovered = scheduler.get_status(stale.id).unwrap();
        assert_eq!(recovered.status, JobStatus::Interrupted);
        assert!(recovered.completed_at.is_some());

        // And it is durably interrupted, not just in memory.
        use cr_store::DurableStore as _;
        assert_eq!(
            store.get_job(stale.id).await.unwrap().status,
            JobStatus::Interrupted
        );
        assert_eq!(
            store.get_job(finished.id).await.unwrap().status,
            JobStatus::Done
        );
    }

    #[tokio::test]
    async fn unknown_job_id_is_not_found() {
        let (scheduler, _store) = scheduler_with(
            SchedulerConfig::default(),
            Arc::new(MockInvoker::with_defaults()),
        );
        assert!(scheduler.get_status(uuid::Uuid::new_v4()).is_err());
        assert!(scheduler.cancel(uuid::Uuid::new_v4()).await.is_err());
    }
}
