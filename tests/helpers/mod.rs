//! Test doubles for the blob store and the image API

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use booth_stylize::app_state::AppState;
use booth_stylize::models::job::StylizedImage;
use booth_stylize::services::job_table::JobTable;
use booth_stylize::services::queue::{JobQueue, QueueSettings};
use booth_stylize::services::storage::{BlobStore, StorageError, StoredBlob};
use booth_stylize::services::stylize::{ImageTransform, StyleSet, TransformError};
use booth_stylize::services::upload::StorageLayout;
use bytes::Bytes;
use chrono::FixedOffset;

use crate::fixtures::png_photo;

/// In-memory blob store that renames on conflict the way Dropbox does.
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<BTreeMap<String, (Bytes, String)>>,
    puts: AtomicUsize,
    failing: Mutex<Vec<String>>,
    put_delay: Mutex<Duration>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every put whose path contains `fragment` fail.
    pub fn fail_on(&self, fragment: &str) {
        self.failing.lock().unwrap().push(fragment.to_string());
    }

    /// Make every put take `delay` before it lands.
    pub fn set_put_delay(&self, delay: Duration) {
        *self.put_delay.lock().unwrap() = delay;
    }

    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn paths(&self) -> Vec<String> {
        self.blobs.lock().unwrap().keys().cloned().collect()
    }

    pub fn blob(&self, path: &str) -> Option<(Bytes, String)> {
        self.blobs.lock().unwrap().get(path).cloned()
    }
}

fn renamed(path: &str, n: usize) -> String {
    match path.rsplit_once('.') {
        Some((stem, ext)) => format!("{stem} ({n}).{ext}"),
        None => format!("{path} ({n})"),
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn put(&self, path: &str, data: Bytes, content_type: &str) -> Result<StoredBlob, StorageError> {
        self.puts.fetch_add(1, Ordering::SeqCst);
        let delay = *self.put_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing.lock().unwrap().iter().any(|f| path.contains(f.as_str())) {
            return Err(StorageError::Api {
                status: 507,
                body: "insufficient_space".to_string(),
            });
        }

        let mut blobs = self.blobs.lock().unwrap();
        let mut target = path.to_string();
        let mut n = 1;
        while blobs.contains_key(&target) {
            target = renamed(path, n);
            n += 1;
        }
        blobs.insert(target.clone(), (data, content_type.to_string()));
        Ok(StoredBlob { path: target })
    }

    async fn get(&self, path: &str) -> Result<Bytes, StorageError> {
        self.blobs
            .lock()
            .unwrap()
            .get(path)
            .map(|(data, _)| data.clone())
            .ok_or_else(|| StorageError::NotFound(path.to_string()))
    }

    async fn health_check(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Scripted image API. Returns queued results in order, then succeeds.
pub struct FakeStylizer {
    script: Mutex<VecDeque<Result<StylizedImage, TransformError>>>,
    calls: Mutex<Vec<Vec<u8>>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl FakeStylizer {
    pub fn new() -> Arc<Self> {
        Self::with_latency(Duration::from_millis(250))
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            calls: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            latency,
        })
    }

    pub fn push_result(&self, result: Result<StylizedImage, TransformError>) {
        self.script.lock().unwrap().push_back(result);
    }

    pub fn push_rate_limit(&self) {
        self.push_result(Err(TransformError::RateLimited(
            "Rate limit reached for requests".to_string(),
        )));
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().unwrap().clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// What the fake returns when nothing is scripted.
pub fn stylized_png() -> StylizedImage {
    StylizedImage {
        bytes: Bytes::from(png_photo(64, 0xAA)),
        content_type: "image/png",
        extension: "png",
    }
}

#[async_trait]
impl ImageTransform for FakeStylizer {
    async fn transform(&self, subject: &[u8], _style: &StyleSet) -> Result<StylizedImage, TransformError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.lock().unwrap().push(subject.to_vec());

        tokio::time::sleep(self.latency).await;

        let scripted = self.script.lock().unwrap().pop_front();
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        scripted.unwrap_or_else(|| Ok(stylized_png()))
    }
}

pub fn kst() -> FixedOffset {
    FixedOffset::east_opt(9 * 3600).unwrap()
}

pub fn test_queue(stylizer: Arc<FakeStylizer>) -> JobQueue {
    JobQueue::new(
        stylizer,
        Arc::new(StyleSet::new(vec![Bytes::from(png_photo(32, 0x01))], "draw me")),
        JobTable::new(64, Duration::from_secs(600)),
        QueueSettings {
            dispatch_delay: Duration::from_millis(1500),
            transform_timeout: Duration::from_secs(30),
        },
    )
}

/// Application state wired to in-memory fakes.
pub fn test_state(store: Arc<MemoryStore>, stylizer: Arc<FakeStylizer>, expose_detail: bool) -> AppState {
    AppState::new(
        store,
        test_queue(stylizer),
        StorageLayout::default(),
        kst(),
        expose_detail,
    )
}
