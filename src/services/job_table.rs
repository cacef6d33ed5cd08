//! In-memory job table backing the status endpoint.
//!
//! Process-wide and lost on restart. Terminal records leave the table when
//! the client picks them up, when they outlive the retention window, or when
//! the table is full and they are the oldest finished jobs. Queued and
//! running records are never evicted.

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::models::job::{JobError, JobId, JobState, TransformJob, TransformOutcome};

pub struct JobTable {
    jobs: Mutex<HashMap<JobId, TransformJob>>,
    capacity: usize,
    retention: Duration,
}

impl JobTable {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            jobs: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
            retention,
        }
    }

    /// Register a new queued job and return its id.
    ///
    /// `base` is used as-is unless a tracked job already has that id, in which
    /// case `_2`, `_3`, ... is appended.
    pub async fn register(&self, base: &str, input_len: usize) -> JobId {
        self.insert(base, input_len, false).await
    }

    /// Like [`register`](Self::register), for jobs whose result is written to
    /// storage before it may be picked up. A succeeded job stays pending
    /// until [`attach_paths`](Self::attach_paths) or
    /// [`fail_storage`](Self::fail_storage) closes the storage step.
    pub async fn register_awaiting_storage(&self, base: &str, input_len: usize) -> JobId {
        self.insert(base, input_len, true).await
    }

    async fn insert(&self, base: &str, input_len: usize, awaiting_storage: bool) -> JobId {
        let mut jobs = self.jobs.lock().await;
        self.evict(&mut jobs, Utc::now());

        let mut id = JobId::new(base);
        let mut counter = 2;
        while jobs.contains_key(&id) {
            id = JobId::new(format!("{base}_{counter}"));
            counter += 1;
        }

        let mut job = TransformJob::queued(id.clone(), input_len);
        job.awaiting_storage = awaiting_storage;
        jobs.insert(id.clone(), job);
        metrics::gauge!("booth_jobs_tracked").set(jobs.len() as f64);
        id
    }

    pub async fn mark_running(&self, id: &JobId) -> Result<(), JobTableError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobTableError::UnknownJob(id.clone()))?;
        transition(job, JobState::Running)?;
        job.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record the terminal outcome of a running job.
    pub async fn complete(&self, id: &JobId, outcome: &TransformOutcome) -> Result<(), JobTableError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobTableError::UnknownJob(id.clone()))?;

        match outcome {
            Ok(image) => {
                transition(job, JobState::Succeeded)?;
                job.result = Some(image.clone());
                job.error = None;
            }
            Err(error) => {
                transition(job, JobState::Failed)?;
                job.error = Some(error.clone());
                job.result = None;
                // Only the `_fail` backup is written; nothing to wait for.
                job.awaiting_storage = false;
            }
        }
        job.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Attach storage references once the async upload path has written
    /// them. The result becomes available to pollers from here on.
    pub async fn attach_paths(
        &self,
        id: &JobId,
        original_path: Option<String>,
        stylized_path: String,
    ) -> Result<(), JobTableError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobTableError::UnknownJob(id.clone()))?;
        job.original_path = original_path;
        job.stylized_path = Some(stylized_path);
        job.awaiting_storage = false;
        Ok(())
    }

    /// The stylized image could not be stored: the job fails with `error`.
    ///
    /// Only a succeeded job that is still waiting on storage can be failed
    /// this way; a result that was already handed out stays as it was.
    pub async fn fail_storage(&self, id: &JobId, error: JobError) -> Result<(), JobTableError> {
        let mut jobs = self.jobs.lock().await;
        let job = jobs
            .get_mut(id)
            .ok_or_else(|| JobTableError::UnknownJob(id.clone()))?;
        if job.state != JobState::Succeeded || !job.awaiting_storage {
            return Err(JobTableError::InvalidTransition {
                id: id.clone(),
                from: job.state,
                to: JobState::Failed,
            });
        }
        job.state = JobState::Failed;
        job.result = None;
        job.error = Some(error);
        job.awaiting_storage = false;
        Ok(())
    }

    pub async fn get(&self, id: &JobId) -> Option<TransformJob> {
        self.jobs.lock().await.get(id).cloned()
    }

    /// Remove a record; used when the client has picked up the outcome.
    pub async fn remove(&self, id: &JobId) -> Option<TransformJob> {
        let mut jobs = self.jobs.lock().await;
        let removed = jobs.remove(id);
        metrics::gauge!("booth_jobs_tracked").set(jobs.len() as f64);
        removed
    }

    /// Remove and return the record only if it has succeeded and its
    /// storage step, if any, is done.
    pub async fn take_succeeded(&self, id: &JobId) -> Option<TransformJob> {
        let mut jobs = self.jobs.lock().await;
        let ready = jobs
            .get(id)
            .is_some_and(|job| job.state == JobState::Succeeded && !job.awaiting_storage);
        if ready {
            let taken = jobs.remove(id);
            metrics::gauge!("booth_jobs_tracked").set(jobs.len() as f64);
            taken
        } else {
            None
        }
    }

    pub async fn len(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.jobs.lock().await.is_empty()
    }

    /// Number of jobs currently in `state`.
    pub async fn count_in_state(&self, state: JobState) -> usize {
        self.jobs
            .lock()
            .await
            .values()
            .filter(|job| job.state == state)
            .count()
    }

    fn evict(&self, jobs: &mut HashMap<JobId, TransformJob>, now: DateTime<Utc>) {
        let before = jobs.len();
        jobs.retain(|_, job| !self.is_expired(job, now));

        while jobs.len() >= self.capacity {
            let oldest = jobs
                .values()
                .filter(|job| job.is_settled())
                .min_by_key(|job| job.completed_at)
                .map(|job| job.id.clone());
            match oldest {
                Some(id) => {
                    jobs.remove(&id);
                }
                None => break,
            }
        }

        let evicted = before - jobs.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = jobs.len(), "Evicted finished jobs");
        }
    }

    fn is_expired(&self, job: &TransformJob, now: DateTime<Utc>) -> bool {
        if !job.is_settled() {
            return false;
        }
        job.completed_at
            .and_then(|done| (now - done).to_std().ok())
            .map(|age| age >= self.retention)
            .unwrap_or(false)
    }
}

fn transition(job: &mut TransformJob, next: JobState) -> Result<(), JobTableError> {
    if !job.state.can_transition_to(next) {
        return Err(JobTableError::InvalidTransition {
            id: job.id.clone(),
            from: job.state,
            to: next,
        });
    }
    job.state = next;
    Ok(())
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum JobTableError {
    #[error("Unknown job: {0}")]
    UnknownJob(JobId),

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: JobId,
        from: JobState,
        to: JobState,
    },
}
