//! Metrics dashboard
//!
//! Read-only view of the metrics event log written during training: HTML
//! pages with SVG charts, plus the same data as JSON. Only started when
//! `TRAIN_MODEL` selects dashboard mode; it never builds a model or touches
//! the image data.

pub mod charts;
pub mod pages;
pub mod routes;
pub mod runs;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{routing::get, Router};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::utils::error::{Error, Result};

/// Default bind address
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 6006;

/// State shared by all handlers
#[derive(Debug)]
pub struct AppState {
    pub log_dir: PathBuf,
    started: Instant,
}

impl AppState {
    pub fn new(log_dir: PathBuf) -> Self {
        Self {
            log_dir,
            started: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;

/// Routes of the dashboard
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/", get(routes::index))
        .route("/health", get(routes::health_check))
        .route("/runs", get(routes::list_runs))
        .route("/runs/:run", get(routes::run_overview))
        .route("/runs/:run/scalars.svg", get(routes::scalars_chart))
        .route("/runs/:run/histograms.svg", get(routes::histogram_chart))
        .route("/runs/:run/scalars", get(routes::get_scalars))
        .route("/runs/:run/histograms", get(routes::get_histograms))
        .route("/runs/:run/history", get(routes::get_history))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

/// Serve the metrics under `log_dir` until the process is stopped
pub fn serve(log_dir: PathBuf, host: &str, port: u16) -> Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| Error::Dashboard(format!("Invalid address {host}:{port}: {e}")))?;

    if !log_dir.exists() {
        warn!("Log directory {} does not exist yet", log_dir.display());
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| Error::Dashboard(format!("Failed to start runtime: {e}")))?;

    runtime.block_on(async move {
        let app = router(Arc::new(AppState::new(log_dir.clone())));

        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| Error::Dashboard(format!("Failed to bind {addr}: {e}")))?;
        info!("Serving metrics from {} on http://{}", log_dir.display(), addr);

        axum::serve(listener, app)
            .await
            .map_err(|e| Error::Dashboard(format!("Server error: {e}")))
    })
}
