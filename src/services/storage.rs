use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, StatusCode};
use s3::creds::Credentials;
use s3::{Bucket, Region};
use serde::{Deserialize, Serialize};

const DROPBOX_CONTENT_URL: &str = "https://content.dropboxapi.com/2";
const DROPBOX_API_URL: &str = "https://api.dropboxapi.com/2";

/// Where a blob ended up. The store may rename on conflict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredBlob {
    pub path: String,
}

/// Named byte blobs in external storage.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Short backend name for logs and health output.
    fn backend(&self) -> &'static str;

    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<StoredBlob, StorageError>;

    async fn get(&self, path: &str) -> Result<Bytes, StorageError>;

    async fn health_check(&self) -> Result<(), StorageError>;
}

// ── Dropbox ─────────────────────────────────────────────────────────

/// Client for the Dropbox content API.
pub struct DropboxClient {
    http: Client,
    authorization: String,
    content_url: String,
    api_url: String,
}

#[derive(Serialize)]
struct UploadArg<'a> {
    path: &'a str,
    mode: &'static str,
    autorename: bool,
    mute: bool,
}

#[derive(Serialize)]
struct DownloadArg<'a> {
    path: &'a str,
}

#[derive(Deserialize)]
struct UploadMetadata {
    path_display: Option<String>,
    path_lower: Option<String>,
}

#[derive(Deserialize)]
struct DropboxErrorBody {
    error_summary: Option<String>,
}

impl DropboxClient {
    /// `token` may be given with or without the `Bearer ` prefix.
    pub fn new(token: &str) -> Result<Self, StorageError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(StorageError::Config("Dropbox token is empty".to_string()));
        }
        let authorization = if token.starts_with("Bearer ") {
            token.to_string()
        } else {
            format!("Bearer {token}")
        };

        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()
            .map_err(StorageError::Http)?;

        Ok(Self {
            http,
            authorization,
            content_url: DROPBOX_CONTENT_URL.to_string(),
            api_url: DROPBOX_API_URL.to_string(),
        })
    }

    /// Point the client at different hosts (local mocks, proxies).
    pub fn with_base_urls(mut self, content_url: &str, api_url: &str) -> Self {
        self.content_url = content_url.trim_end_matches('/').to_string();
        self.api_url = api_url.trim_end_matches('/').to_string();
        self
    }

    fn auth_header(&self) -> Result<HeaderValue, StorageError> {
        HeaderValue::from_str(&self.authorization)
            .map_err(|_| StorageError::Config("Dropbox token is not a valid header value".to_string()))
    }
}

/// JSON for the `Dropbox-API-Arg` header. Header values must be ASCII.
fn api_arg_header<T: Serialize>(path: &str, arg: &T) -> Result<HeaderValue, StorageError> {
    let json = serde_json::to_string(arg).map_err(|e| StorageError::Config(e.to_string()))?;
    HeaderValue::from_str(&json).map_err(|_| StorageError::InvalidPath(path.to_string()))
}

/// Map a failed Dropbox response to a storage error.
fn classify_dropbox_failure(path: &str, status: StatusCode, body: String) -> StorageError {
    let summary = serde_json::from_str::<DropboxErrorBody>(&body)
        .ok()
        .and_then(|b| b.error_summary)
        .unwrap_or_default();

    match status {
        StatusCode::UNAUTHORIZED => StorageError::Auth(body),
        StatusCode::CONFLICT if summary.starts_with("path/not_found") => {
            StorageError::NotFound(path.to_string())
        }
        _ => StorageError::Api {
            status: status.as_u16(),
            body,
        },
    }
}

#[async_trait]
impl BlobStore for DropboxClient {
    fn backend(&self) -> &'static str {
        "dropbox"
    }

    async fn put(&self, path: &str, data: Bytes, _content_type: &str) -> Result<StoredBlob, StorageError> {
        let arg = UploadArg {
            path,
            mode: "add",
            autorename: true,
            mute: false,
        };

        let response = self
            .http
            .post(format!("{}/files/upload", self.content_url))
            .header(AUTHORIZATION, self.auth_header()?)
            .header("Dropbox-API-Arg", api_arg_header(path, &arg)?)
            .header(CONTENT_TYPE, "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(StorageError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(path, status = status.as_u16(), body = %body, "Dropbox upload failed");
            return Err(classify_dropbox_failure(path, status, body));
        }

        let metadata: UploadMetadata = response.json().await.map_err(StorageError::Http)?;
        Ok(StoredBlob {
            path: metadata
                .path_display
                .or(metadata.path_lower)
                .unwrap_or_else(|| path.to_string()),
        })
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let response = self
            .http
            .post(format!("{}/files/download", self.content_url))
            .header(AUTHORIZATION, self.auth_header()?)
            .header("Dropbox-API-Arg", api_arg_header(path, &DownloadArg { path })?)
            .send()
            .await
            .map_err(StorageError::Http)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_dropbox_failure(path, status, body));
        }

        response.bytes().await.map_err(StorageError::Http)
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        let response = self
            .http
            .post(format!("{}/users/get_current_account", self.api_url))
            .header(AUTHORIZATION, self.auth_header()?)
            .send()
            .await
            .map_err(StorageError::Http)?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(classify_dropbox_failure("", status, body))
        }
    }
}

// ── Cloudflare R2 ───────────────────────────────────────────────────

/// Client for Cloudflare R2 object storage (S3-compatible).
pub struct R2Client {
    bucket: Box<Bucket>,
}

impl R2Client {
    pub fn new(
        bucket_name: &str,
        endpoint: &str,
        access_key: &str,
        secret_key: &str,
    ) -> Result<Self, StorageError> {
        let region = Region::Custom {
            region: "auto".to_string(),
            endpoint: endpoint.to_string(),
        };

        let credentials =
            Credentials::new(Some(access_key), Some(secret_key), None, None, None)
                .map_err(|e| StorageError::Config(e.to_string()))?;

        let bucket = Bucket::new(bucket_name, region, credentials)
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self { bucket })
    }
}

/// Object keys have no leading slash; booth paths do.
fn object_key(path: &str) -> &str {
    path.trim_start_matches('/')
}

/// Without `fail-on-err`, rust-s3 hands back non-2xx responses as data.
fn check_s3_status(path: &str, status: u16, body: &[u8]) -> Result<(), StorageError> {
    match status {
        200..=299 => Ok(()),
        404 => Err(StorageError::NotFound(path.to_string())),
        401 | 403 => Err(StorageError::Auth(String::from_utf8_lossy(body).into_owned())),
        _ => Err(StorageError::Api {
            status,
            body: String::from_utf8_lossy(body).into_owned(),
        }),
    }
}

#[async_trait]
impl BlobStore for R2Client {
    fn backend(&self) -> &'static str {
        "r2"
    }

    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<StoredBlob, StorageError> {
        let key = object_key(path);
        let response = self
            .bucket
            .put_object_with_content_type(key, &data, content_type)
            .await
            .map_err(StorageError::S3)?;
        check_s3_status(path, response.status_code(), response.as_slice())?;
        Ok(StoredBlob {
            path: key.to_string(),
        })
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        let key = object_key(path);
        let response = self.bucket.get_object(key).await.map_err(StorageError::S3)?;
        check_s3_status(path, response.status_code(), response.as_slice())?;
        Ok(Bytes::from(response.to_vec()))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        self.bucket
            .list_page(String::new(), None, None, None, Some(1))
            .await
            .map_err(StorageError::S3)?;
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Storage authentication failed: {0}")]
    Auth(String),

    #[error("Storage API returned {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Storage request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("S3 operation failed: {0}")]
    S3(#[from] s3::error::S3Error),

    #[error("Path cannot be sent to storage: {0}")]
    InvalidPath(String),

    #[error("Storage configuration error: {0}")]
    Config(String),
}
