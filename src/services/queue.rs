//! Serial job queue in front of the rate-limited image API.
//!
//! Exactly one worker task drains the FIFO, and it only exists while there
//! is work: `submit` spawns it when idle, and it exits once the queue is
//! empty. Each dispatch is followed by a fixed pause so consecutive calls to
//! the upstream API are at least `dispatch_delay` apart.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::{oneshot, Mutex};
use tokio::time::sleep;

use crate::models::job::{
    ErrorKind, JobError, JobId, JobState, StylizedImage, TransformJob, TransformOutcome,
};
use crate::services::job_table::JobTable;
use crate::services::stylize::{ImageTransform, StyleSet};

#[derive(Debug, Clone, Copy)]
pub struct QueueSettings {
    /// Pause after every dispatch before the next job is taken.
    pub dispatch_delay: Duration,
    /// Upper bound on a single transform call.
    pub transform_timeout: Duration,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            dispatch_delay: Duration::from_millis(1500),
            transform_timeout: Duration::from_secs(120),
        }
    }
}

/// One pending unit of work.
struct QueueEntry {
    id: JobId,
    input: Bytes,
    respond_to: oneshot::Sender<TransformOutcome>,
}

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueueEntry>,
    worker_active: bool,
}

struct QueueInner {
    state: Mutex<QueueState>,
    table: JobTable,
    transform: Arc<dyn ImageTransform>,
    style: Arc<StyleSet>,
    settings: QueueSettings,
}

/// Handle to the serial stylization queue. Cheap to clone.
#[derive(Clone)]
pub struct JobQueue {
    inner: Arc<QueueInner>,
}

/// Returned by [`JobQueue::submit`]; resolves once the job is finished.
pub struct JobHandle {
    id: JobId,
    receiver: oneshot::Receiver<TransformOutcome>,
}

impl JobHandle {
    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Wait for the job to finish.
    pub async fn outcome(self) -> TransformOutcome {
        self.receiver.await.unwrap_or_else(|_| {
            Err(JobError::new(
                ErrorKind::UpstreamError,
                "queue worker dropped the job before finishing it",
            ))
        })
    }
}

/// What a status poll sees.
#[derive(Debug)]
pub enum JobStatus {
    Pending(JobState),
    Done(TransformJob),
    Failed(JobError),
}

impl JobQueue {
    pub fn new(
        transform: Arc<dyn ImageTransform>,
        style: Arc<StyleSet>,
        table: JobTable,
        settings: QueueSettings,
    ) -> Self {
        Self {
            inner: Arc::new(QueueInner {
                state: Mutex::new(QueueState::default()),
                table,
                transform,
                style,
                settings,
            }),
        }
    }

    /// Append a job to the tail of the queue and return without waiting.
    ///
    /// `base_id` becomes the job id unless another tracked job already uses
    /// it, see [`JobTable::register`].
    pub async fn submit(&self, base_id: &str, input: Bytes) -> JobHandle {
        let id = self.inner.table.register(base_id, input.len()).await;
        self.enqueue(id, input).await
    }

    /// Submit a job whose result is stored before pollers may pick it up.
    ///
    /// Until the caller closes the storage step on the job table, a
    /// succeeded job reports as still running.
    pub async fn submit_for_polling(&self, base_id: &str, input: Bytes) -> JobHandle {
        let id = self
            .inner
            .table
            .register_awaiting_storage(base_id, input.len())
            .await;
        self.enqueue(id, input).await
    }

    async fn enqueue(&self, id: JobId, input: Bytes) -> JobHandle {
        let (respond_to, receiver) = oneshot::channel();

        let mut state = self.inner.state.lock().await;
        state.pending.push_back(QueueEntry {
            id: id.clone(),
            input,
            respond_to,
        });
        let depth = state.pending.len();
        metrics::counter!("booth_jobs_submitted_total").increment(1);
        metrics::gauge!("booth_queue_depth").set(depth as f64);

        if !state.worker_active {
            state.worker_active = true;
            tokio::spawn(run_worker(Arc::clone(&self.inner)));
        }
        drop(state);

        tracing::info!(job_id = %id, depth, "Job queued");
        JobHandle { id, receiver }
    }

    /// Current view of a job for pollers.
    ///
    /// A succeeded job is handed out once and then leaves the table. One
    /// that is still awaiting storage reads as `Pending(Running)`.
    pub async fn status(&self, id: &JobId) -> Result<JobStatus, QueueError> {
        if let Some(job) = self.inner.table.take_succeeded(id).await {
            return Ok(JobStatus::Done(job));
        }

        let job = self
            .inner
            .table
            .get(id)
            .await
            .ok_or_else(|| QueueError::NoSuchJob(id.clone()))?;

        match (job.state, job.error) {
            (JobState::Failed, Some(error)) => Ok(JobStatus::Failed(error)),
            (JobState::Failed, None) => Ok(JobStatus::Failed(JobError::new(
                ErrorKind::UpstreamError,
                "job failed without a recorded error",
            ))),
            // Result exists but is still being written to storage.
            (JobState::Succeeded, _) => Ok(JobStatus::Pending(JobState::Running)),
            (state, _) => Ok(JobStatus::Pending(state)),
        }
    }

    pub fn table(&self) -> &JobTable {
        &self.inner.table
    }

    /// Jobs waiting behind the one currently running.
    pub async fn depth(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub async fn is_worker_active(&self) -> bool {
        self.inner.state.lock().await.worker_active
    }

    pub fn settings(&self) -> QueueSettings {
        self.inner.settings
    }
}

async fn run_worker(inner: Arc<QueueInner>) {
    tracing::debug!("Queue worker started");

    loop {
        let entry = {
            let mut state = inner.state.lock().await;
            match state.pending.pop_front() {
                Some(entry) => {
                    metrics::gauge!("booth_queue_depth").set(state.pending.len() as f64);
                    entry
                }
                None => {
                    // Cleared under the same lock `submit` checks, so no job
                    // can be left behind without a worker.
                    state.worker_active = false;
                    break;
                }
            }
        };

        inner.dispatch(entry).await;
        sleep(inner.settings.dispatch_delay).await;
    }

    tracing::debug!("Queue drained, worker exiting");
}

impl QueueInner {
    async fn dispatch(&self, entry: QueueEntry) {
        let QueueEntry {
            id,
            input,
            respond_to,
        } = entry;

        if let Err(e) = self.table.mark_running(&id).await {
            tracing::warn!(job_id = %id, error = %e, "Job table out of sync");
        }
        tracing::info!(job_id = %id, input_bytes = input.len(), "Dispatching stylization");

        let start = Instant::now();
        let outcome = self.call_transform(input).await;
        let elapsed = start.elapsed();
        metrics::histogram!("booth_transform_seconds").record(elapsed.as_secs_f64());

        match &outcome {
            Ok(image) => {
                metrics::counter!("booth_jobs_completed_total").increment(1);
                tracing::info!(
                    job_id = %id,
                    duration_ms = elapsed.as_millis() as u64,
                    output_bytes = image.bytes.len(),
                    content_type = image.content_type,
                    "Stylization succeeded"
                );
            }
            Err(error) => {
                metrics::counter!("booth_jobs_failed_total", "kind" => error.kind.to_string())
                    .increment(1);
                match error.kind {
                    ErrorKind::RateLimited => tracing::warn!(
                        job_id = %id,
                        detail = %error.detail,
                        "Stylization rate limited"
                    ),
                    ErrorKind::NoImageReturned => tracing::error!(
                        job_id = %id,
                        detail = %error.detail,
                        "Stylization returned no image"
                    ),
                    _ => tracing::error!(
                        job_id = %id,
                        kind = %error.kind,
                        detail = %error.detail,
                        "Stylization failed"
                    ),
                }
            }
        }

        if let Err(e) = self.table.complete(&id, &outcome).await {
            tracing::warn!(job_id = %id, error = %e, "Job table out of sync");
        }

        if respond_to.send(outcome).is_err() {
            tracing::debug!(job_id = %id, "Submitter went away before the job finished");
        }
    }

    /// Run the transform in its own task so a panic or hang stays contained.
    async fn call_transform(&self, input: Bytes) -> Result<StylizedImage, JobError> {
        let transform = Arc::clone(&self.transform);
        let style = Arc::clone(&self.style);
        let mut call = tokio::spawn(async move { transform.transform(&input, &style).await });

        match tokio::time::timeout(self.settings.transform_timeout, &mut call).await {
            Ok(Ok(Ok(image))) if image.bytes.is_empty() => Err(JobError::new(
                ErrorKind::NoImageReturned,
                "image API returned an empty image",
            )),
            Ok(Ok(Ok(image))) => Ok(image),
            Ok(Ok(Err(error))) => Err(JobError::from(error)),
            Ok(Err(join_error)) => Err(JobError::new(
                ErrorKind::UpstreamError,
                format!("stylization task aborted: {join_error}"),
            )),
            Err(_) => {
                call.abort();
                Err(JobError::new(
                    ErrorKind::UpstreamError,
                    format!(
                        "image API did not answer within {}s",
                        self.settings.transform_timeout.as_secs()
                    ),
                ))
            }
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("No such job: {0}")]
    NoSuchJob(JobId),
}
