use serde::Serialize;

use crate::models::job::{ErrorKind, JobId, JobState};

/// Response after a synchronous upload completes.
#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub ok: bool,
    /// Nickname exactly as the visitor typed it.
    pub user: String,
    pub job_id: JobId,
    pub original_path: Option<String>,
    pub stylized_path: String,
    pub status: &'static str,
}

/// Response after queueing an upload for later polling.
#[derive(Debug, Serialize)]
pub struct SubmitResponse {
    pub ok: bool,
    pub job_id: JobId,
    pub status: JobState,
}

/// Response for `GET /api/v1/jobs/{job_id}`.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum JobStatusResponse {
    Pending {
        done: bool,
        state: JobState,
    },
    Done {
        done: bool,
        content_type: &'static str,
        /// Base64-encoded stylized image.
        result: String,
        original_path: Option<String>,
        stylized_path: Option<String>,
    },
}

/// Structured failure body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub ok: bool,
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl ErrorResponse {
    pub fn new(kind: &str, message: impl Into<String>, detail: Option<String>) -> Self {
        Self {
            ok: false,
            error: kind.to_string(),
            message: message.into(),
            detail,
        }
    }
}

/// Message shown to visitors for a given failure kind.
pub fn user_message(kind: ErrorKind) -> &'static str {
    match kind {
        ErrorKind::NoFile => "No photo was attached. Please take a picture and try again.",
        ErrorKind::InvalidImage => "The photo could not be read. Please try again.",
        ErrorKind::RateLimited => {
            "The illustrator is busy right now. Please try again in a moment."
        }
        ErrorKind::UpstreamError | ErrorKind::NoImageReturned | ErrorKind::StoreError => {
            "Something went wrong while creating your illustration."
        }
    }
}
