use std::path::Path;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::Deserialize;

use crate::models::job::{ErrorKind, JobError, StylizedImage};

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Prompt sent with every photo unless overridden.
pub const DEFAULT_INSTRUCTIONS: &str = concat!(
    "Redraw the FIRST image (a photo of a real person) as a polished character illustration. ",
    "Match the visual style of the remaining reference images: the same outline weight, ",
    "flat fills, simple cel shading with a single shadow tone, the same head-to-body ",
    "proportions and facial style. Keep the person's identity, hairstyle, clothing colors ",
    "and pose recognizable. Return only the finished illustration on a plain white ",
    "background with no text or watermark, as a square PNG."
);

/// Style references plus the instruction text that accompanies them.
pub struct StyleSet {
    references: Vec<Bytes>,
    instructions: String,
}

impl StyleSet {
    pub fn new(references: Vec<Bytes>, instructions: impl Into<String>) -> Self {
        Self {
            references,
            instructions: instructions.into(),
        }
    }

    /// Load every `style_ref_*` image in `dir`, sorted by file name.
    pub fn load(dir: &Path, instructions: Option<String>) -> Result<Self, TransformError> {
        let entries = std::fs::read_dir(dir)
            .map_err(|e| TransformError::StyleRefs(format!("{}: {e}", dir.display())))?;

        let mut paths: Vec<_> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with("style_ref_"))
            })
            .collect();
        paths.sort();

        let mut references = Vec::with_capacity(paths.len());
        for path in &paths {
            let data = std::fs::read(path)
                .map_err(|e| TransformError::StyleRefs(format!("{}: {e}", path.display())))?;
            if sniff_image_type(&data).is_none() {
                return Err(TransformError::StyleRefs(format!(
                    "{} is not a supported image",
                    path.display()
                )));
            }
            references.push(Bytes::from(data));
        }

        if references.is_empty() {
            return Err(TransformError::StyleRefs(format!(
                "no style_ref_* images found in {}",
                dir.display()
            )));
        }

        Ok(Self::new(
            references,
            instructions.unwrap_or_else(|| DEFAULT_INSTRUCTIONS.to_string()),
        ))
    }

    pub fn references(&self) -> &[Bytes] {
        &self.references
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }
}

/// Turns a subject photo into an illustration in the given style.
#[async_trait]
pub trait ImageTransform: Send + Sync {
    async fn transform(&self, subject: &[u8], style: &StyleSet) -> Result<StylizedImage, TransformError>;
}

/// MIME type and file extension of a recognizable image, if any.
pub fn sniff_image_type(data: &[u8]) -> Option<(&'static str, &'static str)> {
    let format = image::guess_format(data).ok()?;
    let extension = format.extensions_str().first().copied().unwrap_or("img");
    Some((format.to_mime_type(), extension))
}

fn data_url(data: &[u8]) -> String {
    let mime = sniff_image_type(data).map(|(mime, _)| mime).unwrap_or("image/png");
    format!(
        "data:{mime};base64,{}",
        base64::engine::general_purpose::STANDARD.encode(data)
    )
}

// ── Response decoding ───────────────────────────────────────────────

/// The shapes an image can come back in:
/// - `output[*]` of type `image_generation_call` with a base64 `result`
/// - `output[*].content[*].image`
/// - `data[*].b64_json` (images endpoint)
#[derive(Deserialize, Default)]
struct GenerationResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    data: Vec<DataItem>,
}

#[derive(Deserialize)]
struct OutputItem {
    #[serde(rename = "type")]
    kind: Option<String>,
    result: Option<String>,
    #[serde(default)]
    content: Vec<ContentPart>,
}

#[derive(Deserialize)]
struct ContentPart {
    image: Option<String>,
}

#[derive(Deserialize)]
struct DataItem {
    b64_json: Option<String>,
}

impl GenerationResponse {
    fn image_base64(&self) -> Option<&str> {
        self.output
            .iter()
            .filter(|item| item.kind.as_deref() == Some("image_generation_call"))
            .find_map(|item| non_blank(item.result.as_deref()))
            .or_else(|| {
                self.output
                    .iter()
                    .flat_map(|item| item.content.iter())
                    .find_map(|part| non_blank(part.image.as_deref()))
            })
            .or_else(|| {
                self.data
                    .iter()
                    .find_map(|item| non_blank(item.b64_json.as_deref()))
            })
    }
}

fn non_blank(encoded: Option<&str>) -> Option<&str> {
    encoded.filter(|encoded| !encoded.trim().is_empty())
}

/// Decode a successful generation response into an image.
pub fn decode_generation_response(body: &str) -> Result<StylizedImage, TransformError> {
    let response: GenerationResponse = serde_json::from_str(body).map_err(TransformError::Parse)?;

    let encoded = response
        .image_base64()
        .ok_or_else(|| TransformError::NoImageReturned("response carried no image payload".to_string()))?;

    // Some variants hand back a data URL instead of bare base64.
    let encoded = match encoded.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => encoded,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| TransformError::NoImageReturned(format!("image payload is not base64: {e}")))?;

    let (content_type, extension) = sniff_image_type(&bytes).ok_or_else(|| {
        TransformError::NoImageReturned(format!(
            "payload of {} bytes is not a recognizable image",
            bytes.len()
        ))
    })?;

    Ok(StylizedImage {
        bytes: Bytes::from(bytes),
        content_type,
        extension,
    })
}

#[derive(Deserialize)]
struct ApiErrorEnvelope {
    error: Option<ApiErrorBody>,
}

#[derive(Deserialize)]
struct ApiErrorBody {
    message: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
}

/// Map a non-2xx response to a transform error.
fn classify_failure(status: StatusCode, body: &str) -> TransformError {
    let error = serde_json::from_str::<ApiErrorEnvelope>(body)
        .ok()
        .and_then(|envelope| envelope.error);

    let message = error
        .as_ref()
        .and_then(|e| e.message.clone())
        .unwrap_or_else(|| body.chars().take(500).collect());
    let code = error
        .as_ref()
        .and_then(|e| e.code.as_deref().or(e.kind.as_deref()))
        .unwrap_or_default();

    // Exhausted billing quota also arrives as 429 but will not clear by waiting.
    if code == "insufficient_quota" {
        return TransformError::Upstream {
            status: Some(status.as_u16()),
            message,
        };
    }

    if status == StatusCode::TOO_MANY_REQUESTS || code.starts_with("rate_limit") {
        return TransformError::RateLimited(message);
    }

    TransformError::Upstream {
        status: Some(status.as_u16()),
        message,
    }
}

// ── OpenAI client ───────────────────────────────────────────────────

/// Client for the OpenAI Responses API with the image-generation tool.
pub struct OpenAiStylizer {
    http: Client,
    api_key: String,
    model: String,
    base_url: String,
}

impl OpenAiStylizer {
    pub fn new(api_key: &str, model: &str, base_url: &str) -> Result<Self, TransformError> {
        if api_key.trim().is_empty() {
            return Err(TransformError::Config("OpenAI API key is empty".to_string()));
        }
        let http = Client::builder()
            .user_agent(concat!("booth-stylize/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(TransformError::Http)?;

        Ok(Self {
            http,
            api_key: api_key.trim().to_string(),
            model: model.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn request_body(&self, subject: &[u8], style: &StyleSet) -> serde_json::Value {
        let mut content = Vec::with_capacity(style.references().len() + 2);
        content.push(serde_json::json!({
            "type": "input_image",
            "image_url": data_url(subject),
        }));
        for reference in style.references() {
            content.push(serde_json::json!({
                "type": "input_image",
                "image_url": data_url(reference),
            }));
        }
        content.push(serde_json::json!({
            "type": "input_text",
            "text": style.instructions(),
        }));

        serde_json::json!({
            "model": self.model,
            "input": [{ "role": "user", "content": content }],
            "tools": [{ "type": "image_generation" }],
        })
    }
}

#[async_trait]
impl ImageTransform for OpenAiStylizer {
    async fn transform(&self, subject: &[u8], style: &StyleSet) -> Result<StylizedImage, TransformError> {
        let url = format!("{}/responses", self.base_url);

        let response = self
            .http
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&self.request_body(subject, style))
            .send()
            .await
            .map_err(TransformError::Http)?;

        let status = response.status();
        let body = response.text().await.map_err(TransformError::Http)?;

        if !status.is_success() {
            let error = classify_failure(status, &body);
            tracing::warn!(status = status.as_u16(), error = %error, "Stylization request rejected");
            return Err(error);
        }

        decode_generation_response(&body).inspect_err(|e| {
            tracing::error!(
                error = %e,
                body_prefix = %body.chars().take(300).collect::<String>(),
                "Unexpected generation response shape"
            );
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    #[error("Rate limited by image API: {0}")]
    RateLimited(String),

    #[error("Image API error (status {status:?}): {message}")]
    Upstream { status: Option<u16>, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Image API returned no usable image: {0}")]
    NoImageReturned(String),

    #[error("Failed to parse image API response: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Style references unavailable: {0}")]
    StyleRefs(String),

    #[error("Stylizer configuration error: {0}")]
    Config(String),
}

impl TransformError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TransformError::RateLimited(_) => ErrorKind::RateLimited,
            TransformError::NoImageReturned(_) | TransformError::Parse(_) => {
                ErrorKind::NoImageReturned
            }
            TransformError::Upstream { .. }
            | TransformError::Http(_)
            | TransformError::StyleRefs(_)
            | TransformError::Config(_) => ErrorKind::UpstreamError,
        }
    }
}

impl From<TransformError> for JobError {
    fn from(error: TransformError) -> Self {
        JobError::new(error.kind(), error.to_string())
    }
}
