//! # cr-store
//!
//! The Durable Store boundary. The store is the log of record: every job,
//! trial, and report mutation is written through it, and a process restart
//! reconstructs in-flight state from what it holds. In-memory registries are
//! caches over this contract, never the source of truth.

mod file;
mod memory;

use async_trait::async_trait;

use cr_search::Trial;
use cr_types::{Job, JobId, PersistenceError, Report, ReportId};

pub use file::FileStore;
pub use memory::MemoryStore;

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, PersistenceError>;

/// Append/overwrite contract for Job, Trial, and Report records.
///
/// `put_*` overwrites by id (jobs are rewritten on every lifecycle and
/// progress change — at-least-once durability); `get`/`list` are the only
/// reads the core needs. Implementations must be safe to call from many
/// tasks at once.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn put_job(&self, job: &Job) -> StoreResult<()>;

    async fn get_job(&self, id: JobId) -> StoreResult<Job>;

    /// Jobs for one owner, or all jobs when `owner` is `None`.
    async fn list_jobs(&self, owner: Option<&str>) -> StoreResult<Vec<Job>>;

    async fn put_trial(&self, trial: &Trial) -> StoreResult<()>;

    /// All trials persisted for a job, ordered by trial number.
    async fn list_trials(&self, job_id: JobId) -> StoreResult<Vec<Trial>>;

    async fn put_report(&self, report: &Report) -> StoreResult<()>;

    async fn get_report(&self, id: ReportId) -> StoreResult<Report>;
}
