use std::path::Path;
use std::sync::Arc;

use booth_stylize::{
    app_state::AppState,
    config::{AppConfig, StorageBackend},
    routes,
    services::{
        job_table::JobTable,
        queue::JobQueue,
        storage::{BlobStore, DropboxClient, R2Client},
        stylize::{OpenAiStylizer, StyleSet},
    },
};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing booth-stylize server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    routes::metrics::describe_metrics();

    // Initialize blob storage
    let store: Arc<dyn BlobStore> = match config.storage_backend {
        StorageBackend::Dropbox => {
            tracing::info!("Initializing Dropbox storage client");
            Arc::new(
                DropboxClient::new(config.dropbox_token.as_deref().unwrap_or_default())
                    .expect("Failed to initialize Dropbox client"),
            )
        }
        StorageBackend::R2 => {
            tracing::info!("Initializing R2 storage client");
            Arc::new(
                R2Client::new(
                    config.r2_bucket.as_deref().unwrap_or_default(),
                    config.r2_endpoint.as_deref().unwrap_or_default(),
                    config.r2_access_key.as_deref().unwrap_or_default(),
                    config.r2_secret_key.as_deref().unwrap_or_default(),
                )
                .expect("Failed to initialize R2 client"),
            )
        }
    };

    // Load style references once; every job reuses them
    tracing::info!(dir = %config.style_ref_dir, "Loading style references");
    let style = StyleSet::load(Path::new(&config.style_ref_dir), config.style_prompt.clone())
        .expect("Failed to load style references");
    tracing::info!(count = style.references().len(), "Style references loaded");

    // Initialize the image generation client
    let stylizer = OpenAiStylizer::new(
        &config.openai_api_key,
        &config.openai_model,
        &config.openai_base_url,
    )
    .expect("Failed to initialize image generation client");

    let queue = JobQueue::new(
        Arc::new(stylizer),
        Arc::new(style),
        JobTable::new(config.job_table_capacity, config.job_retention()),
        config.queue_settings(),
    );

    let state = AppState::new(
        store,
        queue,
        config.storage_layout(),
        config.utc_offset(),
        config.expose_error_detail,
    );

    let app = routes::router(state, Some(Arc::new(prometheus_handle)), config.max_upload_bytes);

    tracing::info!(
        bind_addr = %config.bind_addr,
        model = %config.openai_model,
        dispatch_delay_ms = config.dispatch_delay_ms,
        "Starting booth-stylize"
    );

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
