//! File-backed store: one JSON document per record.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

use cr_search::Trial;
use cr_types::{Job, JobId, PersistenceError, Report, ReportId};

use crate::{DurableStore, StoreResult};

/// Crash-durable store that lays records out under a data root:
///
/// ```text
/// <root>/jobs/<job_id>.json
/// <root>/trials/<job_id>/<trial_number>.json
/// <root>/reports/<report_id>.json
/// ```
///
/// Writes go to a temp file and rename into place, so a crash mid-write
/// leaves the previous version intact.
#[derive(Debug)]
pub struct FileStore {
    data_root: PathBuf,
}

impl FileStore {
    pub fn new<P: AsRef<Path>>(data_root: P) -> StoreResult<Self> {
        let data_root = data_root.as_ref().to_path_buf();
        for sub in ["jobs", "trials", "reports"] {
            std::fs::create_dir_all(data_root.join(sub)).map_err(|e| {
                PersistenceError::WriteFailed {
                    message: format!("creating {sub} directory: {e}"),
                }
            })?;
        }
        Ok(Self { data_root })
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.data_root.join("jobs").join(format!("{id}.json"))
    }

    fn trial_dir(&self, job_id: JobId) -> PathBuf {
        self.data_root.join("trials").join(job_id.to_string())
    }

    fn report_path(&self, id: ReportId) -> PathBuf {
        self.data_root.join("reports").join(format!("{id}.json"))
    }

    async fn write_record<T: serde::Serialize>(path: &Path, record: &T) -> StoreResult<()> {
        let bytes = serde_json::to_vec_pretty(record).map_err(|e| {
            PersistenceError::WriteFailed {
                message: format!("serializing record: {e}"),
            }
        })?;

        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                message: format!("writing {}: {e}", tmp.display()),
            })?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                message: format!("renaming into {}: {e}", path.display()),
            })
    }

    async fn read_record<T: serde::de::DeserializeOwned>(path: &Path) -> StoreResult<T> {
        let bytes = match tokio::fs::read(path).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistenceError::NotFound {
                    id: path.display().to_string(),
                })
            }
            Err(e) => {
                return Err(PersistenceError::ReadFailed {
                    message: format!("reading {}: {e}", path.display()),
                })
            }
        };
        serde_json::from_slice(&bytes).map_err(|e| PersistenceError::Corrupt {
            message: format!("{}: {e}", path.display()),
        })
    }

    async fn read_dir_records<T: serde::de::DeserializeOwned>(
        dir: &Path,
    ) -> StoreResult<Vec<T>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(PersistenceError::ReadFailed {
                    message: format!("listing {}: {e}", dir.display()),
                })
            }
        };

        let mut records = Vec::new();
        while let Some(entry) =
            entries
                .next_entry()
                .await
                .map_err(|e| PersistenceError::ReadFailed {
                    message: format!("listing {}: {e}", dir.display()),
                })?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match Self::read_record(&path).await {
                Ok(record) => records.push(record),
                // One corrupt record should not hide the rest of the log.
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl DurableStore for FileStore {
    async fn put_job(&self, job: &Job) -> StoreResult<()> {
        Self::write_record(&self.job_path(job.id), job).await
    }

    async fn get_job(&self, id: JobId) -> StoreResult<Job> {
        Self::read_record(&self.job_path(id))
            .await
            .map_err(|e| match e {
                PersistenceError::NotFound { .. } => {
                    PersistenceError::NotFound { id: id.to_string() }
                }
                other => other,
            })
    }

    async fn list_jobs(&self, owner: Option<&str>) -> StoreResult<Vec<Job>> {
        let mut jobs: Vec<Job> = Self::read_dir_records(&self.data_root.join("jobs"))
            .await?
            .into_iter()
            .filter(|j: &Job| owner.map_or(true, |o| j.owner_id == o))
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }

    async fn put_trial(&self, trial: &Trial) -> StoreResult<()> {
        let dir = self.trial_dir(trial.job_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| PersistenceError::WriteFailed {
                message: format!("creating {}: {e}", dir.display()),
            })?;
        let path = dir.join(format!("{:06}.json", trial.trial_number));
        Self::write_record(&path, trial).await
    }

    async fn list_trials(&self, job_id: JobId) -> StoreResult<Vec<Trial>> {
        let mut trials: Vec<Trial> = Self::read_dir_records(&self.trial_dir(job_id)).await?;
        trials.sort_by_key(|t| t.trial_number);
        Ok(trials)
    }

    async fn put_report(&self, report: &Report) -> StoreResult<()> {
        Self::write_record(&self.report_path(report.id), report).await
    }

    async fn get_report(&self, id: ReportId) -> StoreResult<Report> {
        Self::read_record(&self.report_path(id))
            .await
            .map_err(|e| match e {
                PersistenceError::NotFound { .. } => {
                    PersistenceError::NotFound { id: id.to_string() }
                }
                other => other,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cr_types::{JobType, ParamMap};
    use uuid::Uuid;

    fn scratch_root() -> PathBuf {
        std::env::temp_dir().join(format!("cr-store-test-{}", Uuid::new_v4()))
    }

    #[tokio::test]
    async fn job_survives_store_reopen() {
        let root = scratch_root();
        let mut job = Job::new(JobType::Benchmark, "alice", serde_json::json!({"runs": 3}));
        job.mark_running();
        job.set_progress(40.0, "4/10 units");

        {
            let store = FileStore::new(&root).unwrap();
            store.put_job(&job).await.unwrap();
        }

        // A fresh handle over the same root sees the persisted state.
        let store = FileStore::new(&root).unwrap();
        let restored = store.get_job(job.id).await.unwrap();
        assert_eq!(restored.progress_pct, 40.0);
        assert_eq!(restored, job);

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn trials_round_trip_in_order() {
        let root = scratch_root();
        let store = FileStore::new(&root).unwrap();
        let job_id = Uuid::new_v4();

        for n in [1usize, 0, 2] {
            let trial = Trial::new(job_id, n, ParamMap::new(), "m", vec![]);
            store.put_trial(&trial).await.unwrap();
        }

        let trials = store.list_trials(job_id).await.unwrap();
        assert_eq!(
            trials.iter().map(|t| t.trial_number).collect::<Vec<_>>(),
            vec![0, 1, 2]
        );

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }

    #[tokio::test]
    async fn missing_records_are_not_found() {
        let root = scratch_root();
        let store = FileStore::new(&root).unwrap();
        assert!(matches!(
            store.get_job(Uuid::new_v4()).await,
            Err(PersistenceError::NotFound { .. })
        ));
        assert!(store.list_trials(Uuid::new_v4()).await.unwrap().is_empty());

        tokio::fs::remove_dir_all(&root).await.unwrap();
    }
}
