//! HTTP surface tests: requests go straight into the router.

mod fixtures;
mod helpers;

use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use base64::Engine;
use booth_stylize::routes;
use fixtures::*;
use helpers::*;
use serde_json::Value;
use tower::ServiceExt;

const BOUNDARY: &str = "booth-test-boundary";

fn multipart_request(uri: &str, name: Option<&str>, photo: Option<&[u8]>) -> Request<Body> {
    let mut body = Vec::new();
    if let Some(name) = name {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\n{name}\r\n"
            )
            .as_bytes(),
        );
    }
    if let Some(photo) = photo {
        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"photo\"; filename=\"capture.png\"\r\nContent-Type: image/png\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(photo);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());

    Request::builder()
        .method("POST")
        .uri(uri)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .header(header::CONTENT_LENGTH, body.len())
        .body(Body::from(body))
        .unwrap()
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

fn app(store: std::sync::Arc<MemoryStore>, stylizer: std::sync::Arc<FakeStylizer>) -> Router {
    routes::router(test_state(store, stylizer, false), None, 10 * 1024 * 1024)
}

#[tokio::test(start_paused = true)]
async fn test_upload_success_payload() {
    let store = MemoryStore::new();
    let app = app(store.clone(), FakeStylizer::new());

    let photo = png_photo(100, 5);
    let (status, body) = send(&app, multipart_request("/upload", Some("김민수"), Some(&photo))).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], true);
    assert_eq!(body["status"], "done");
    // Display name comes back untouched; storage names are ASCII.
    assert_eq!(body["user"], "김민수");
    let original = body["original_path"].as_str().unwrap();
    let stylized = body["stylized_path"].as_str().unwrap();
    assert!(original.starts_with("/booth_uploads/guest_"));
    assert!(stylized.starts_with("/booth_outputs/guest_"));
    assert!(stylized.ends_with("_stylized.png"));
    assert_eq!(store.put_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_upload_without_photo() {
    let store = MemoryStore::new();
    let stylizer = FakeStylizer::new();
    let app = app(store.clone(), stylizer.clone());

    let (status, body) = send(&app, multipart_request("/upload", Some("guest"), None)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "no_file");
    assert!(body.get("detail").is_none());
    assert_eq!(store.put_count(), 0);
    assert!(stylizer.calls().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_upload_rate_limited() {
    let store = MemoryStore::new();
    let stylizer = FakeStylizer::new();
    stylizer.push_rate_limit();
    let app = app(store.clone(), stylizer);

    let (status, body) = send(
        &app,
        multipart_request("/upload", Some("guest"), Some(&png_photo(100, 1))),
    )
    .await;

    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "rate_limited");
    assert!(body["message"].as_str().unwrap().contains("try again"));
    let paths = store.paths();
    assert_eq!(paths.len(), 1);
    assert!(paths[0].contains("_fail"));
}

#[tokio::test(start_paused = true)]
async fn test_upstream_failure_detail_exposed_only_when_enabled() {
    use booth_stylize::services::stylize::TransformError;

    for expose in [false, true] {
        let stylizer = FakeStylizer::new();
        stylizer.push_result(Err(TransformError::Upstream {
            status: Some(500),
            message: "model overloaded".to_string(),
        }));
        let app = routes::router(
            test_state(MemoryStore::new(), stylizer, expose),
            None,
            1024 * 1024,
        );

        let (status, body) = send(
            &app,
            multipart_request("/upload", Some("guest"), Some(&png_photo(100, 1))),
        )
        .await;

        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "upstream_error");
        if expose {
            assert!(body["detail"].as_str().unwrap().contains("model overloaded"));
        } else {
            assert!(body.get("detail").is_none());
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_missing_image_reported_as_upstream_error() {
    use booth_stylize::services::stylize::TransformError;

    let store = MemoryStore::new();
    let stylizer = FakeStylizer::new();
    stylizer.push_result(Err(TransformError::NoImageReturned(
        "response carried no image payload".to_string(),
    )));
    let app = app(store.clone(), stylizer);

    let (status, body) = send(
        &app,
        multipart_request("/upload", Some("guest"), Some(&png_photo(100, 1))),
    )
    .await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "upstream_error");
    assert!(store.paths()[0].contains("_fail"));
}

#[tokio::test(start_paused = true)]
async fn test_oversized_upload_keeps_cors_headers() {
    let app = routes::router(
        test_state(MemoryStore::new(), FakeStylizer::new(), false),
        None,
        1024,
    );
    let mut request = multipart_request("/upload", Some("guest"), Some(&png_photo(4096, 1)));
    request
        .headers_mut()
        .insert(header::ORIGIN, "https://booth.framer.website".parse().unwrap());

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}

#[tokio::test(start_paused = true)]
async fn test_async_job_lifecycle() {
    let store = MemoryStore::new();
    let app = app(store.clone(), FakeStylizer::new());

    let (status, body) = send(
        &app,
        multipart_request("/api/v1/jobs", Some("jin"), Some(&png_photo(100, 1))),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let job_id = body["job_id"].as_str().unwrap().to_string();
    assert!(job_id.starts_with("jin_"));

    let done = loop {
        let (status, body) = send(&app, get_request(&format!("/api/v1/jobs/{job_id}"))).await;
        assert_eq!(status, StatusCode::OK);
        if body["done"] == true {
            break body;
        }
        assert!(body["state"] == "queued" || body["state"] == "running");
        tokio::time::sleep(Duration::from_millis(100)).await;
    };

    assert_eq!(done["content_type"], "image/png");
    assert!(done["original_path"].as_str().unwrap().starts_with("/booth_uploads/jin_"));
    assert!(done["stylized_path"].as_str().unwrap().ends_with("_stylized.png"));
    let image = base64::engine::general_purpose::STANDARD
        .decode(done["result"].as_str().unwrap())
        .unwrap();
    assert_eq!(image, stylized_png().bytes.to_vec());

    // Picked up once; afterwards the id is unknown.
    let (status, body) = send(&app, get_request(&format!("/api/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "no_such_job");
}

#[tokio::test(start_paused = true)]
async fn test_async_job_failure_reports_kind() {
    let stylizer = FakeStylizer::new();
    stylizer.push_rate_limit();
    let app = app(MemoryStore::new(), stylizer);

    let (_, body) = send(
        &app,
        multipart_request("/api/v1/jobs", Some("jin"), Some(&png_photo(100, 1))),
    )
    .await;
    let job_id = body["job_id"].as_str().unwrap().to_string();

    tokio::time::sleep(Duration::from_secs(1)).await;
    let (status, body) = send(&app, get_request(&format!("/api/v1/jobs/{job_id}"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["error"], "rate_limited");
}

#[tokio::test(start_paused = true)]
async fn test_unknown_job_is_404() {
    let app = app(MemoryStore::new(), FakeStylizer::new());
    let (status, body) = send(&app, get_request("/api/v1/jobs/nobody_000000")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["ok"], false);
    assert_eq!(body["error"], "no_such_job");
}

#[tokio::test(start_paused = true)]
async fn test_health_reports_queue() {
    let app = app(MemoryStore::new(), FakeStylizer::new());
    let (status, body) = send(&app, get_request("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["checks"]["storage"]["backend"], "memory");
    assert_eq!(body["queue"]["depth"], 0);
    assert_eq!(body["queue"]["worker_active"], false);
    assert_eq!(body["queue"]["dispatch_delay_ms"], 1500);
}

#[tokio::test(start_paused = true)]
async fn test_cors_preflight_allowed() {
    let app = app(MemoryStore::new(), FakeStylizer::new());
    let request = Request::builder()
        .method("OPTIONS")
        .uri("/upload")
        .header(header::ORIGIN, "https://booth.framer.website")
        .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response
        .headers()
        .contains_key(header::ACCESS_CONTROL_ALLOW_ORIGIN));
}
