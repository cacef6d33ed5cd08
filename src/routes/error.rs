use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::models::job::{ErrorKind, JobError, JobId};
use crate::models::upload::{user_message, ErrorResponse};
use crate::services::upload::UploadError;

/// HTTP status for each failure kind.
pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NoFile => StatusCode::BAD_REQUEST,
        ErrorKind::InvalidImage => StatusCode::UNSUPPORTED_MEDIA_TYPE,
        ErrorKind::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::UpstreamError | ErrorKind::NoImageReturned | ErrorKind::StoreError => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

/// Error code shown to callers. A missing image is an upstream failure from
/// the caller's side; the distinct kind only appears in logs and metrics.
fn public_kind(kind: ErrorKind) -> ErrorKind {
    match kind {
        ErrorKind::NoImageReturned => ErrorKind::UpstreamError,
        other => other,
    }
}

/// Structured JSON failure returned by every endpoint.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: String,
    message: String,
    detail: Option<String>,
}

impl ApiError {
    fn from_kind(kind: ErrorKind, detail: String, expose_detail: bool) -> Self {
        let kind = public_kind(kind);
        Self {
            status: status_for(kind),
            code: kind.to_string(),
            message: user_message(kind).to_string(),
            detail: expose_detail.then_some(detail),
        }
    }

    pub fn from_upload(error: UploadError, expose_detail: bool) -> Self {
        let kind = error.kind();
        match &error {
            UploadError::NoFile | UploadError::InvalidImage => {
                tracing::warn!(kind = %kind, "Upload rejected")
            }
            _ => tracing::error!(kind = %kind, error = %error, "Upload failed"),
        }
        let detail = match error {
            UploadError::Job(job) => job.detail,
            other => other.to_string(),
        };
        Self::from_kind(kind, detail, expose_detail)
    }

    pub fn from_job(error: JobError, expose_detail: bool) -> Self {
        Self::from_kind(error.kind, error.detail, expose_detail)
    }

    pub fn bad_request(detail: impl Into<String>, expose_detail: bool) -> Self {
        let detail = detail.into();
        tracing::warn!(detail = %detail, "Malformed request");
        Self {
            status: StatusCode::BAD_REQUEST,
            code: "bad_request".to_string(),
            message: "The upload could not be read.".to_string(),
            detail: expose_detail.then_some(detail),
        }
    }

    pub fn no_such_job(id: &JobId) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            code: "no_such_job".to_string(),
            message: format!("No job with id {id}"),
            detail: None,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorResponse::new(&self.code, self.message, self.detail);
        (self.status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(ErrorKind::NoFile), StatusCode::BAD_REQUEST);
        assert_eq!(status_for(ErrorKind::RateLimited), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(
            status_for(ErrorKind::NoImageReturned),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_detail_hidden_unless_exposed() {
        let job = JobError::new(ErrorKind::UpstreamError, "sk-secret leaked in message");
        let hidden = ApiError::from_job(job.clone(), false);
        assert!(hidden.detail.is_none());
        assert_eq!(hidden.code, "upstream_error");

        let shown = ApiError::from_job(job, true);
        assert_eq!(shown.detail.as_deref(), Some("sk-secret leaked in message"));
    }

    #[test]
    fn test_no_image_reported_as_upstream() {
        let job = JobError::new(ErrorKind::NoImageReturned, "response carried no image payload");
        let error = ApiError::from_job(job, false);
        assert_eq!(error.code, "upstream_error");
        assert_eq!(error.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
