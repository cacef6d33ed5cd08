use axum::extract::{Multipart, State};
use axum::Json;
use bytes::Bytes;

use crate::app_state::AppState;
use crate::models::upload::UploadResponse;
use crate::routes::error::ApiError;

/// Fields of the booth's multipart form.
pub struct UploadForm {
    /// Nickname as typed; may be empty or non-ASCII.
    pub name: String,
    /// Empty when no `photo` part was sent.
    pub photo: Bytes,
}

/// Read the `name` and `photo` parts; other parts are ignored.
pub async fn read_upload_form(mut multipart: Multipart) -> Result<UploadForm, axum::extract::multipart::MultipartError> {
    let mut form = UploadForm {
        name: String::new(),
        photo: Bytes::new(),
    };

    while let Some(field) = multipart.next_field().await? {
        match field.name() {
            Some("name") => form.name = field.text().await?,
            Some("photo") => form.photo = field.bytes().await?,
            _ => {}
        }
    }

    Ok(form)
}

/// POST /upload: stylize a photo and wait for the stored result.
pub async fn upload_photo(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Json<UploadResponse>, ApiError> {
    let expose = state.expose_error_detail;
    let form = read_upload_form(multipart)
        .await
        .map_err(|e| ApiError::bad_request(e.body_text(), expose))?;

    let receipt = state
        .uploads
        .handle_upload(&form.name, form.photo)
        .await
        .map_err(|e| ApiError::from_upload(e, expose))?;

    Ok(Json(UploadResponse {
        ok: true,
        user: form.name,
        job_id: receipt.job_id,
        original_path: receipt.original_path,
        stylized_path: receipt.stylized_path,
        status: "done",
    }))
}
