use axum::http::header::CONTENT_TYPE;
use axum::response::IntoResponse;
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;

/// GET /metrics: Prometheus text exposition.
pub async fn prometheus_metrics(
    axum::extract::State(handle): axum::extract::State<Arc<PrometheusHandle>>,
) -> impl IntoResponse {
    (
        [(CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    )
}

/// Register descriptions for every metric the service emits.
pub fn describe_metrics() {
    metrics::describe_counter!("booth_jobs_submitted_total", "Stylization jobs submitted");
    metrics::describe_counter!(
        "booth_jobs_completed_total",
        "Stylization jobs that produced an image"
    );
    metrics::describe_counter!(
        "booth_jobs_failed_total",
        "Stylization jobs that failed, by error kind"
    );
    metrics::describe_counter!(
        "booth_store_failures_total",
        "Blob store writes that failed, by blob role"
    );
    metrics::describe_histogram!(
        "booth_transform_seconds",
        "Duration of a single image API call"
    );
    metrics::describe_gauge!("booth_queue_depth", "Jobs waiting for the worker");
    metrics::describe_gauge!("booth_jobs_tracked", "Jobs held in the status table");
}
