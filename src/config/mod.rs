use std::time::Duration;

use chrono::{FixedOffset, Offset, Utc};
use garde::Validate;
use serde::Deserialize;

use crate::services::queue::QueueSettings;
use crate::services::upload::StorageLayout;

/// Which blob store receives originals and results.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Dropbox,
    R2,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AppConfig {
    /// Server bind address (e.g., "0.0.0.0:3000").
    #[serde(default = "default_bind_addr")]
    #[garde(length(min = 1))]
    pub bind_addr: String,

    #[serde(default = "default_storage_backend")]
    #[garde(skip)]
    pub storage_backend: StorageBackend,

    /// Dropbox access token, with or without the "Bearer " prefix
    #[garde(skip)]
    pub dropbox_token: Option<String>,

    /// R2 bucket name
    #[garde(skip)]
    pub r2_bucket: Option<String>,

    /// R2 endpoint URL
    #[garde(skip)]
    pub r2_endpoint: Option<String>,

    /// R2 access key ID (S3-compatible)
    #[garde(skip)]
    pub r2_access_key: Option<String>,

    /// R2 secret access key (S3-compatible)
    #[garde(skip)]
    pub r2_secret_key: Option<String>,

    #[garde(length(min = 1))]
    pub openai_api_key: String,

    #[serde(default = "default_openai_model")]
    #[garde(length(min = 1))]
    pub openai_model: String,

    #[serde(default = "default_openai_base_url")]
    #[garde(length(min = 1))]
    pub openai_base_url: String,

    /// Directory holding style_ref_*.png
    #[serde(default = "default_style_ref_dir")]
    #[garde(length(min = 1))]
    pub style_ref_dir: String,

    /// Replaces the built-in stylization prompt
    #[garde(skip)]
    pub style_prompt: Option<String>,

    #[serde(default = "default_originals_dir")]
    #[garde(length(min = 1))]
    pub originals_dir: String,

    #[serde(default = "default_outputs_dir")]
    #[garde(length(min = 1))]
    pub outputs_dir: String,

    /// Offset of the booth's local clock used in file names (KST by default)
    #[serde(default = "default_utc_offset_hours")]
    #[garde(range(min = -12, max = 14))]
    pub utc_offset_hours: i32,

    /// Pause between consecutive image API calls
    #[serde(default = "default_dispatch_delay_ms")]
    #[garde(range(max = 60_000))]
    pub dispatch_delay_ms: u64,

    #[serde(default = "default_transform_timeout_secs")]
    #[garde(range(min = 1, max = 900))]
    pub transform_timeout_secs: u64,

    /// How long finished jobs stay pollable
    #[serde(default = "default_job_retention_secs")]
    #[garde(range(min = 1))]
    pub job_retention_secs: u64,

    #[serde(default = "default_job_table_capacity")]
    #[garde(range(min = 1, max = 100_000))]
    pub job_table_capacity: usize,

    #[serde(default = "default_max_upload_bytes")]
    #[garde(range(min = 1024))]
    pub max_upload_bytes: usize,

    /// Include internal error text in API responses
    #[serde(default)]
    #[garde(skip)]
    pub expose_error_detail: bool,
}

fn default_bind_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_storage_backend() -> StorageBackend {
    StorageBackend::Dropbox
}

fn default_openai_model() -> String {
    crate::services::stylize::DEFAULT_MODEL.to_string()
}

fn default_openai_base_url() -> String {
    crate::services::stylize::DEFAULT_BASE_URL.to_string()
}

fn default_style_ref_dir() -> String {
    "style_refs".to_string()
}

fn default_originals_dir() -> String {
    "/booth_uploads".to_string()
}

fn default_outputs_dir() -> String {
    "/booth_outputs".to_string()
}

fn default_utc_offset_hours() -> i32 {
    9
}

fn default_dispatch_delay_ms() -> u64 {
    1500
}

fn default_transform_timeout_secs() -> u64 {
    120
}

fn default_job_retention_secs() -> u64 {
    600
}

fn default_job_table_capacity() -> usize {
    256
}

fn default_max_upload_bytes() -> usize {
    10 * 1024 * 1024
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from explicit key/value pairs (env-var names, any case).
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let config: AppConfig = envy::from_iter(vars)?;
        config.validate()?;
        config.check_storage()?;
        Ok(config)
    }

    fn check_storage(&self) -> Result<(), ConfigError> {
        let missing = match self.storage_backend {
            StorageBackend::Dropbox => [("DROPBOX_TOKEN", &self.dropbox_token)]
                .into_iter()
                .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
                .map(|(k, _)| k)
                .collect::<Vec<_>>(),
            StorageBackend::R2 => [
                ("R2_BUCKET", &self.r2_bucket),
                ("R2_ENDPOINT", &self.r2_endpoint),
                ("R2_ACCESS_KEY", &self.r2_access_key),
                ("R2_SECRET_KEY", &self.r2_secret_key),
            ]
            .into_iter()
            .filter(|(_, v)| v.as_deref().map_or(true, str::is_empty))
            .map(|(k, _)| k)
            .collect(),
        };

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::MissingStorage(missing.join(", ")))
        }
    }

    pub fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * 3600).unwrap_or_else(|| Utc.fix())
    }

    pub fn queue_settings(&self) -> QueueSettings {
        QueueSettings {
            dispatch_delay: Duration::from_millis(self.dispatch_delay_ms),
            transform_timeout: Duration::from_secs(self.transform_timeout_secs),
        }
    }

    pub fn job_retention(&self) -> Duration {
        Duration::from_secs(self.job_retention_secs)
    }

    pub fn storage_layout(&self) -> StorageLayout {
        StorageLayout {
            originals_dir: self.originals_dir.clone(),
            outputs_dir: self.outputs_dir.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read environment: {0}")]
    Env(#[from] envy::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] garde::Report),

    #[error("Missing settings for the selected storage backend: {0}")]
    MissingStorage(String),
}
