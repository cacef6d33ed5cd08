use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

/// Identifier of a stylization job. Doubles as the storage base name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(String);

impl JobId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle of a job: `Queued -> Running -> Succeeded | Failed`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum JobState {
    Queued,
    Running,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobState::Succeeded | JobState::Failed)
    }

    /// Whether the state machine allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: JobState) -> bool {
        matches!(
            (self, next),
            (JobState::Queued, JobState::Running)
                | (JobState::Running, JobState::Succeeded)
                | (JobState::Running, JobState::Failed)
        )
    }
}

/// Failure categories surfaced to callers.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Display, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ErrorKind {
    /// No photo was attached to the request.
    NoFile,
    /// The photo bytes are not a recognizable image.
    InvalidImage,
    /// The image-generation API refused the call for throughput reasons.
    RateLimited,
    UpstreamError,
    /// The image-generation API answered but without a usable image.
    NoImageReturned,
    StoreError,
}

/// Typed failure recorded on a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobError {
    pub kind: ErrorKind,
    pub detail: String,
}

impl JobError {
    pub fn new(kind: ErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl std::fmt::Display for JobError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.detail)
    }
}

impl std::error::Error for JobError {}

/// An image produced by the stylizer.
#[derive(Debug, Clone, PartialEq)]
pub struct StylizedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub extension: &'static str,
}

/// Result delivered to whoever submitted a job.
pub type TransformOutcome = Result<StylizedImage, JobError>;

/// A job as tracked by the job table.
#[derive(Debug, Clone)]
pub struct TransformJob {
    pub id: JobId,
    pub input_len: usize,
    pub state: JobState,
    pub result: Option<StylizedImage>,
    pub error: Option<JobError>,
    pub original_path: Option<String>,
    pub stylized_path: Option<String>,
    /// Set for polled jobs until the upload path has written the blobs.
    pub awaiting_storage: bool,
    pub submitted_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TransformJob {
    pub fn queued(id: JobId, input_len: usize) -> Self {
        Self {
            id,
            input_len,
            state: JobState::Queued,
            result: None,
            error: None,
            original_path: None,
            stylized_path: None,
            awaiting_storage: false,
            submitted_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    /// Terminal with nothing left to do; only settled records may be evicted.
    pub fn is_settled(&self) -> bool {
        self.state.is_terminal() && !self.awaiting_storage
    }
}
