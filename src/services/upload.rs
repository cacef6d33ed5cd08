//! Upload orchestration: name the photo, queue it for stylization, store the
//! original and the result side by side.

use std::sync::Arc;

use bytes::Bytes;
use chrono::{FixedOffset, Utc};

use crate::models::job::{ErrorKind, JobError, JobId, StylizedImage, TransformOutcome};
use crate::services::naming::{self, SafeId};
use crate::services::queue::JobQueue;
use crate::services::storage::{BlobStore, StorageError};
use crate::services::stylize::sniff_image_type;

/// Storage folders for originals and stylized results.
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub originals_dir: String,
    pub outputs_dir: String,
}

impl Default for StorageLayout {
    fn default() -> Self {
        Self {
            originals_dir: "/booth_uploads".to_string(),
            outputs_dir: "/booth_outputs".to_string(),
        }
    }
}

impl StorageLayout {
    pub fn original_path(&self, id: &JobId, extension: &str) -> String {
        format!("{}/{}.{}", self.originals_dir.trim_end_matches('/'), id, extension)
    }

    pub fn stylized_path(&self, id: &JobId, extension: &str) -> String {
        format!("{}/{}_stylized.{}", self.outputs_dir.trim_end_matches('/'), id, extension)
    }

    /// Where the original goes when stylization failed.
    pub fn failed_path(&self, id: &JobId, extension: &str) -> String {
        format!("{}/{}_fail.{}", self.originals_dir.trim_end_matches('/'), id, extension)
    }
}

/// A validated photo ready to be queued.
struct PreparedUpload {
    safe_id: SafeId,
    photo: Bytes,
    content_type: &'static str,
    extension: &'static str,
}

/// Outcome of a completed synchronous upload.
#[derive(Debug, Clone)]
pub struct UploadReceipt {
    pub job_id: JobId,
    /// `None` when the backup write of the original failed.
    pub original_path: Option<String>,
    pub stylized_path: String,
    pub image: StylizedImage,
}

pub struct UploadHandler {
    store: Arc<dyn BlobStore>,
    queue: JobQueue,
    layout: StorageLayout,
    utc_offset: FixedOffset,
}

impl UploadHandler {
    pub fn new(
        store: Arc<dyn BlobStore>,
        queue: JobQueue,
        layout: StorageLayout,
        utc_offset: FixedOffset,
    ) -> Self {
        Self {
            store,
            queue,
            layout,
            utc_offset,
        }
    }

    /// Stylize a photo and wait for the stored result.
    pub async fn handle_upload(&self, nickname: &str, photo: Bytes) -> Result<UploadReceipt, UploadError> {
        let prepared = self.prepare(nickname, photo)?;

        let handle = self
            .queue
            .submit(&prepared.safe_id.to_string(), prepared.photo.clone())
            .await;
        let job_id = handle.id().clone();
        let outcome = handle.outcome().await;

        // The outcome is delivered directly; the status record is not needed.
        self.queue.table().remove(&job_id).await;

        persist(&*self.store, &self.layout, &job_id, &prepared, outcome).await
    }

    /// Queue a photo and return immediately; the result is fetched by polling.
    pub async fn submit_upload(&self, nickname: &str, photo: Bytes) -> Result<JobId, UploadError> {
        let prepared = self.prepare(nickname, photo)?;

        let handle = self
            .queue
            .submit_for_polling(&prepared.safe_id.to_string(), prepared.photo.clone())
            .await;
        let job_id = handle.id().clone();

        let store = Arc::clone(&self.store);
        let layout = self.layout.clone();
        let queue = self.queue.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            let outcome = handle.outcome().await;
            let table = queue.table();
            let recorded = match persist(&*store, &layout, &id, &prepared, outcome).await {
                Ok(receipt) => {
                    table
                        .attach_paths(&id, receipt.original_path, receipt.stylized_path)
                        .await
                }
                // Already recorded as failed by the queue worker.
                Err(UploadError::Job(_)) => Ok(()),
                Err(e) => {
                    tracing::error!(job_id = %id, error = %e, "Failed to store queued job result");
                    table
                        .fail_storage(&id, JobError::new(e.kind(), e.to_string()))
                        .await
                }
            };
            if let Err(e) = recorded {
                tracing::warn!(job_id = %id, error = %e, "Job record out of sync with storage");
            }
        });

        Ok(job_id)
    }

    fn prepare(&self, nickname: &str, photo: Bytes) -> Result<PreparedUpload, UploadError> {
        if photo.is_empty() {
            return Err(UploadError::NoFile);
        }
        let (content_type, extension) = sniff_image_type(&photo).ok_or(UploadError::InvalidImage)?;
        let safe_id = naming::make_identifier(nickname, Utc::now(), self.utc_offset);

        tracing::info!(
            safe_id = %safe_id,
            photo_bytes = photo.len(),
            content_type,
            "Upload accepted"
        );

        Ok(PreparedUpload {
            safe_id,
            photo,
            content_type,
            extension,
        })
    }
}

/// Write blobs for a finished job.
///
/// Success: the original is a backup (failure is logged, not fatal) and the
/// stylized image is the primary write. Failure: only the original is kept,
/// under a `_fail` name, and the job error is returned.
async fn persist(
    store: &dyn BlobStore,
    layout: &StorageLayout,
    job_id: &JobId,
    prepared: &PreparedUpload,
    outcome: TransformOutcome,
) -> Result<UploadReceipt, UploadError> {
    match outcome {
        Ok(image) => {
            let original_path = store_backup(
                store,
                &layout.original_path(job_id, prepared.extension),
                prepared,
            )
            .await;

            let stylized = store
                .put(
                    &layout.stylized_path(job_id, image.extension),
                    image.bytes.clone(),
                    image.content_type,
                )
                .await
                .map_err(|e| {
                    metrics::counter!("booth_store_failures_total", "blob" => "stylized").increment(1);
                    tracing::error!(job_id = %job_id, error = %e, "Failed to store stylized image");
                    UploadError::Store(e)
                })?;

            tracing::info!(
                job_id = %job_id,
                original_path = original_path.as_deref().unwrap_or("-"),
                stylized_path = %stylized.path,
                "Upload complete"
            );

            Ok(UploadReceipt {
                job_id: job_id.clone(),
                original_path,
                stylized_path: stylized.path,
                image,
            })
        }
        Err(error) => {
            store_backup(store, &layout.failed_path(job_id, prepared.extension), prepared).await;
            Err(UploadError::Job(error))
        }
    }
}

async fn store_backup(store: &dyn BlobStore, path: &str, prepared: &PreparedUpload) -> Option<String> {
    match store
        .put(path, prepared.photo.clone(), prepared.content_type)
        .await
    {
        Ok(stored) => Some(stored.path),
        Err(e) => {
            metrics::counter!("booth_store_failures_total", "blob" => "original").increment(1);
            tracing::warn!(path, error = %e, "Failed to back up original photo");
            None
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("No photo was attached")]
    NoFile,

    #[error("Photo is not a supported image format")]
    InvalidImage,

    #[error("Stylization failed: {0}")]
    Job(JobError),

    #[error("Failed to store result: {0}")]
    Store(#[from] StorageError),
}

impl UploadError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UploadError::NoFile => ErrorKind::NoFile,
            UploadError::InvalidImage => ErrorKind::InvalidImage,
            UploadError::Job(error) => error.kind,
            UploadError::Store(_) => ErrorKind::StoreError,
        }
    }
}
