use std::sync::Arc;

use chrono::FixedOffset;

use crate::services::{
    queue::JobQueue,
    storage::BlobStore,
    upload::{StorageLayout, UploadHandler},
};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub uploads: Arc<UploadHandler>,
    pub queue: JobQueue,
    pub store: Arc<dyn BlobStore>,
    /// Whether error bodies carry the internal detail string.
    pub expose_error_detail: bool,
}

impl AppState {
    pub fn new(
        store: Arc<dyn BlobStore>,
        queue: JobQueue,
        layout: StorageLayout,
        utc_offset: FixedOffset,
        expose_error_detail: bool,
    ) -> Self {
        let uploads = UploadHandler::new(Arc::clone(&store), queue.clone(), layout, utc_offset);
        Self {
            uploads: Arc::new(uploads),
            queue,
            store,
            expose_error_detail,
        }
    }
}
