use axum::extract::{Multipart, Path, State};
use axum::http::StatusCode;
use axum::Json;
use base64::Engine;

use crate::app_state::AppState;
use crate::models::job::{JobId, JobState};
use crate::models::upload::{JobStatusResponse, SubmitResponse};
use crate::routes::error::ApiError;
use crate::routes::upload::read_upload_form;
use crate::services::queue::{JobStatus, QueueError};

/// POST /api/v1/jobs: queue a photo and return its job id for polling.
pub async fn submit_job(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<(StatusCode, Json<SubmitResponse>), ApiError> {
    let expose = state.expose_error_detail;
    let form = read_upload_form(multipart)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text(), expose))?;

    let job_id = state
        .uploads
        .submit_upload(&form.name, form.photo)
        .await
        .map_err(|e| ApiError::from_upload(e, expose))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitResponse {
            ok: true,
            job_id,
            status: JobState::Queued,
        }),
    ))
}

/// GET /api/v1/jobs/{job_id}: poll a queued job.
pub async fn get_job_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<JobStatusResponse>, ApiError> {
    let job_id = JobId::new(job_id);

    match state.queue.status(&job_id).await {
        Ok(JobStatus::Pending(job_state)) => Ok(Json(JobStatusResponse::Pending {
            done: false,
            state: job_state,
        })),
        Ok(JobStatus::Done(job)) => {
            let Some(image) = job.result else {
                return Err(ApiError::no_such_job(&job_id));
            };
            tracing::info!(job_id = %job_id, "Job result picked up");
            Ok(Json(JobStatusResponse::Done {
                done: true,
                content_type: image.content_type,
                result: base64::engine::general_purpose::STANDARD.encode(&image.bytes),
                original_path: job.original_path,
                stylized_path: job.stylized_path,
            }))
        }
        Ok(JobStatus::Failed(error)) => Err(ApiError::from_job(error, state.expose_error_detail)),
        Err(QueueError::NoSuchJob(id)) => Err(ApiError::no_such_job(&id)),
    }
}
