use std::net::SocketAddr;

use axum::{
    Router,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::decompression::RequestDecompressionLayer;
use tracing::info;

use super::{
    services::{cancel_job, enqueue_job, get_job, health, list_jobs, materialize, retry_job},
    state::AppState,
};
use crate::artifact::ArtifactStore;
use crate::config::Config;
use crate::jobs::JobQueues;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Build the front-end router over an initialized state.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/jobs", post(enqueue_job).get(list_jobs))
        .route("/jobs/{id}", get(get_job))
        .route("/jobs/{id}/cancel", post(cancel_job))
        .route("/jobs/{id}/retry", post(retry_job))
        .route("/artifacts", post(materialize))
        .route("/health", get(health))
        .with_state(state)
        // Transparently decompress gzip request bodies.
        .layer(RequestDecompressionLayer::new())
}

pub async fn run(address: SocketAddr) -> Result<(), AnyError> {
    info!("Loading configuration");
    let config = Config::load().map_err(|e| format!("failed to load config: {e}"))?;

    info!(path = %config.store.path.display(), "Opening job repository");
    let queues = JobQueues::open(config.store.path.join("jobs"))
        .map_err(|e| format!("failed to open job repository: {e}"))?;

    let artifacts = ArtifactStore::from_config(&config.artifacts)
        .map_err(|e| format!("failed to initialize artifact store: {e}"))?;

    let state = AppState::new(config, queues, artifacts);

    // The job repository is embedded, so its worker loops live here too.
    let worker_handles = crate::worker::spawn_in_process(&state.config, state.queues.clone())
        .map_err(|e| format!("failed to start worker loops: {e}"))?;

    let app = router(state);

    let listener = TcpListener::bind(address).await?;
    info!(%address, "Ingestbox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    for handle in &worker_handles {
        handle.abort();
    }

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("failed to install signal handler");
        sigterm.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
