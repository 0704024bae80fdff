//! Async update job tracker.
//!
//! Long-running incremental updates are tracked by `job_id`. One running job
//! per repository is allowed (the API-layer face of I3). A periodic sweep
//! evicts finished jobs past the max age; a total cap evicts the oldest
//! finished jobs first.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, ServeError};

/// Default retention for finished jobs.
pub const MAX_JOB_AGE_MS: u64 = 60 * 60 * 1000;

/// Default cap on retained jobs.
pub const MAX_JOBS: usize = 500;

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Timeout,
}

impl JobStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout)
    }
}

/// Serializable view of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: String,
    pub repository: String,
    pub status: JobStatus,
    pub started_at: String,
    pub completed_at: Option<String>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

struct JobEntry {
    record: JobRecord,
    finished: Option<Instant>,
}

/// Tracker for asynchronous update jobs.
pub struct JobTracker {
    jobs: Arc<DashMap<String, JobEntry>>,
    max_jobs: usize,
    max_age: Duration,
}

impl JobTracker {
    pub fn new() -> Self {
        Self::with_limits(MAX_JOBS, Duration::from_millis(MAX_JOB_AGE_MS))
    }

    pub fn with_limits(max_jobs: usize, max_age: Duration) -> Self {
        Self {
            jobs: Arc::new(DashMap::new()),
            max_jobs,
            max_age,
        }
    }

    /// Create a pending job; rejects when the repository already has a live
    /// job.
    pub fn create(&self, repository: &str) -> Result<String> {
        if self.has_running_job(repository) {
            return Err(ServeError::JobAlreadyRunning(repository.to_string()));
        }
        let job_id = Uuid::new_v4().to_string();
        self.jobs.insert(
            job_id.clone(),
            JobEntry {
                record: JobRecord {
                    job_id: job_id.clone(),
                    repository: repository.to_string(),
                    status: JobStatus::Pending,
                    started_at: chrono::Utc::now().to_rfc3339(),
                    completed_at: None,
                    result: None,
                    error: None,
                },
                finished: None,
            },
        );
        self.enforce_cap();
        debug!("job {job_id} created for '{repository}'");
        Ok(job_id)
    }

    pub fn mark_running(&self, job_id: &str) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.record.status = JobStatus::Running;
        }
    }

    pub fn complete(&self, job_id: &str, result: serde_json::Value) {
        self.finish(job_id, JobStatus::Completed, Some(result), None);
    }

    pub fn fail(&self, job_id: &str, error: String) {
        self.finish(job_id, JobStatus::Failed, None, Some(error));
    }

    pub fn timeout(&self, job_id: &str) {
        self.finish(
            job_id,
            JobStatus::Timeout,
            None,
            Some("job exceeded its deadline".into()),
        );
    }

    fn finish(
        &self,
        job_id: &str,
        status: JobStatus,
        result: Option<serde_json::Value>,
        error: Option<String>,
    ) {
        if let Some(mut entry) = self.jobs.get_mut(job_id) {
            entry.record.status = status;
            entry.record.completed_at = Some(chrono::Utc::now().to_rfc3339());
            entry.record.result = result;
            entry.record.error = error;
            entry.finished = Some(Instant::now());
        }
    }

    pub fn get(&self, job_id: &str) -> Option<JobRecord> {
        self.jobs.get(job_id).map(|e| e.record.clone())
    }

    /// Whether the repository has a pending or running job.
    pub fn has_running_job(&self, repository: &str) -> bool {
        self.jobs.iter().any(|entry| {
            entry.record.repository == repository && !entry.record.status.is_finished()
        })
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Evict finished jobs beyond the max age. Idempotent.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let expired: Vec<String> = self
            .jobs
            .iter()
            .filter(|entry| {
                entry
                    .finished
                    .map(|at| now.duration_since(at) > self.max_age)
                    .unwrap_or(false)
            })
            .map(|entry| entry.key().clone())
            .collect();
        let count = expired.len();
        for job_id in expired {
            self.jobs.remove(&job_id);
        }
        count
    }

    /// Over the cap, the oldest finished jobs go first; live jobs are never
    /// evicted.
    fn enforce_cap(&self) {
        while self.jobs.len() > self.max_jobs {
            let oldest = self
                .jobs
                .iter()
                .filter_map(|entry| entry.finished.map(|at| (entry.key().clone(), at)))
                .min_by_key(|(_, at)| *at);
            match oldest {
                Some((job_id, _)) => {
                    self.jobs.remove(&job_id);
                }
                None => break,
            }
        }
    }

    /// Spawn the periodic age sweep.
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tick.tick().await;
                let swept = tracker.sweep();
                if swept > 0 {
                    debug!("job sweeper evicted {swept} jobs");
                }
            }
        })
    }
}

impl Default for JobTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_live_job_per_repository() {
        let tracker = JobTracker::new();
        let job = tracker.create("r1").unwrap();
        assert!(matches!(
            tracker.create("r1"),
            Err(ServeError::JobAlreadyRunning(_))
        ));
        // Other repositories are unaffected.
        tracker.create("r2").unwrap();

        tracker.complete(&job, serde_json::json!({"status": "updated"}));
        assert!(tracker.create("r1").is_ok());
    }

    #[test]
    fn lifecycle_states() {
        let tracker = JobTracker::new();
        let job = tracker.create("r").unwrap();
        assert_eq!(tracker.get(&job).unwrap().status, JobStatus::Pending);

        tracker.mark_running(&job);
        assert_eq!(tracker.get(&job).unwrap().status, JobStatus::Running);
        assert!(tracker.has_running_job("r"));

        tracker.fail(&job, "boom".into());
        let record = tracker.get(&job).unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.error.as_deref(), Some("boom"));
        assert!(record.completed_at.is_some());
        assert!(!tracker.has_running_job("r"));
    }

    #[test]
    fn age_sweep_evicts_finished_jobs() {
        let tracker = JobTracker::with_limits(100, Duration::from_millis(0));
        let done = tracker.create("a").unwrap();
        tracker.complete(&done, serde_json::json!({}));
        let live = tracker.create("b").unwrap();

        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(tracker.sweep(), 1);
        assert!(tracker.get(&done).is_none());
        assert!(tracker.get(&live).is_some());
    }

    #[test]
    fn cap_evicts_oldest_finished_first() {
        let tracker = JobTracker::with_limits(2, Duration::from_secs(3600));
        let first = tracker.create("a").unwrap();
        tracker.complete(&first, serde_json::json!({}));
        std::thread::sleep(Duration::from_millis(5));
        let second = tracker.create("b").unwrap();
        tracker.complete(&second, serde_json::json!({}));

        // Third job pushes over the cap; the oldest finished job goes.
        let third = tracker.create("c").unwrap();
        assert!(tracker.get(&first).is_none());
        assert!(tracker.get(&second).is_some());
        assert!(tracker.get(&third).is_some());
    }

    #[test]
    fn timeout_is_terminal() {
        let tracker = JobTracker::new();
        let job = tracker.create("r").unwrap();
        tracker.timeout(&job);
        let record = tracker.get(&job).unwrap();
        assert_eq!(record.status, JobStatus::Timeout);
        assert!(record.status.is_finished());
    }
}
