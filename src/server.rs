//! HTTP Server and Task Wiring
//!
//! This module implements the Prometheus exporter HTTP server and starts the
//! background tasks that keep the snapshot inventory current.
//!
//! # Architecture
//!
//! - **HTTP Server**: Axum-based server exposing `/metrics`, `/health`, and `/` endpoints
//! - **Event Pipeline**: `zpool events -vfH` decoded on one task, applied to the store on another
//! - **Text File Output**: optional periodic render into a file
//! - **State Management**: Shared state (metrics, store, commands) using Arc for thread-safety
//!
//! # Endpoints
//!
//! - `GET /` - HTML landing page with links to metrics and health
//! - `GET /metrics` - Prometheus metrics in text format, collected on request
//! - `GET /health` - Health check (returns 200 while the event stream is consumed, 503 otherwise)
//!
//! # Startup
//!
//! Startup fails fast: the full snapshot listing and one complete scrape must
//! succeed before the event feed is started and the port is bound. Once running,
//! a dead event feed only freezes the snapshot metrics; scrapes keep working.

use crate::collectors::CollectionContext;
use crate::config::Config;
use crate::metrics::MetricsCollector;
use crate::textfile::{self, TextFileWriter};
use crate::zfs::events::{run_pipeline, EventConsumer};
use crate::zfs::{SnapshotFilter, SnapshotStore, ZfsCommands};
use anyhow::Context;
use axum::{
    extract::State,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    metrics: MetricsCollector,
    store: Arc<SnapshotStore>,
    zfs: ZfsCommands,
}

impl AppState {
    pub fn new(metrics: MetricsCollector, store: Arc<SnapshotStore>, zfs: ZfsCommands) -> Self {
        Self {
            metrics,
            store,
            zfs,
        }
    }

    pub fn context(&self) -> CollectionContext<'_> {
        CollectionContext {
            zfs: &self.zfs,
            metrics: &self.metrics,
            store: &self.store,
        }
    }
}

/// Runs the exporter until Ctrl-C
pub async fn start(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Shutdown signal received"),
            Err(e) => error!("Failed to listen for shutdown signal: {}", e),
        }
        shutdown.cancel();
    });

    run(config, cancel).await
}

/// Runs the exporter until `cancel` fires
pub async fn run(config: Config, cancel: CancellationToken) -> anyhow::Result<()> {
    let metrics = MetricsCollector::new()?;
    let filter = SnapshotFilter::new(config.snapshots.exclude_names.as_slice())?;
    let store = Arc::new(SnapshotStore::with_filter(filter));
    let zfs = ZfsCommands::new(&config.zfs);

    // Initial inventory; later changes arrive through the event stream
    let listing = zfs
        .list_all_snapshots()
        .await
        .context("Failed to list snapshots")?;
    let loaded = store
        .full_sync(&listing)
        .context("Failed to parse snapshot listing")?;
    info!("Loaded {} snapshots", loaded);

    let state = AppState::new(metrics, store, zfs);

    // Ensure a scrape works before accepting requests
    state
        .context()
        .scrape()
        .await
        .context("Initial metrics collection failed")?;

    let pipeline = spawn_event_pipeline(&state, cancel.clone())?;

    let textfile = match &config.textfile.path {
        Some(path) => Some(
            spawn_textfile_output(
                &state,
                TextFileWriter::new(path),
                Duration::from_secs(config.textfile.interval_seconds),
                cancel.clone(),
            )
            .await?,
        ),
        None => None,
    };

    let app = router(state);
    let addr = format!("{}:{}", config.server.addr, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;

    info!("Metrics server listening on {}", addr);
    info!("Metrics available at http://{}/metrics", addr);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(cancel.clone().cancelled_owned())
        .await;

    // Stop background tasks whether the server stopped cleanly or not
    cancel.cancel();
    if let Some(textfile) = textfile {
        if let Err(e) = textfile.await {
            warn!("Text file task ended abnormally: {}", e);
        }
    }
    pipeline.abort();

    served.context("HTTP server error")?;
    info!("Exporter stopped");
    Ok(())
}

/// Builds the HTTP routes over `state`
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Starts `zpool events` and the decoder/consumer pair reading it
///
/// The feed process is killed when the task ends.
fn spawn_event_pipeline(
    state: &AppState,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let mut child = state.zfs.spawn_event_feed()?;
    let stdout = child
        .stdout
        .take()
        .context("zpool events was started without a stdout pipe")?;
    let consumer = EventConsumer::new(
        state.store.clone(),
        state.zfs.clone(),
        state.metrics.clone(),
    );

    Ok(tokio::spawn(async move {
        // outcome already logged by the pipeline
        let _ = run_pipeline(BufReader::new(stdout), consumer, cancel).await;
        if let Ok(Some(status)) = child.try_wait() {
            warn!("zpool events exited with {}", status);
        }
    }))
}

/// Writes the first render (fatal on error) and starts the periodic writer
async fn spawn_textfile_output(
    state: &AppState,
    mut writer: TextFileWriter,
    interval: Duration,
    cancel: CancellationToken,
) -> anyhow::Result<JoinHandle<()>> {
    let first = state.context().scrape().await?;
    writer
        .update(&first)
        .await
        .with_context(|| format!("Failed to write {}", writer.path().display()))?;

    let state = state.clone();
    let render = move || {
        let state = state.clone();
        async move { state.context().scrape().await }
    };
    Ok(tokio::spawn(textfile::run(writer, interval, render, cancel)))
}

async fn root_handler() -> impl IntoResponse {
    axum::response::Html(
        r#"<html>
<head><title>ZFS Event Exporter</title></head>
<body>
<h1>ZFS Event Exporter</h1>
<p><a href="/metrics">Metrics</a></p>
<p><a href="/health">Health</a></p>
</body>
</html>"#,
    )
}

async fn metrics_handler(State(state): State<AppState>) -> Response {
    match state.context().scrape().await {
        Ok(metrics) => metrics.into_response(),
        Err(e) => {
            error!("Failed to collect metrics: {:#}", e);
            (
                axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                format!("Error collecting metrics: {:#}", e),
            )
                .into_response()
        }
    }
}

async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    if state.metrics.is_event_stream_up() {
        (axum::http::StatusCode::OK, "OK")
    } else {
        (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            "ZFS event stream down",
        )
    }
}
