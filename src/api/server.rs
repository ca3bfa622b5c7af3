use std::sync::Arc;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, post},
};
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use super::{services, state::AppState, ws};
use crate::config::Config;
use crate::engine::MediaEngine;
use crate::jobs::spawn_retention_sweeper;
use crate::orchestrator::Orchestrator;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Every route of the service, with body limit, CORS and request tracing
pub fn router(state: AppState) -> Router {
    let body_limit = state.config.server.max_body_bytes.as_usize();
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/info", post(services::fetch_info))
        .route("/api/collection", post(services::list_collection))
        .route(
            "/api/jobs",
            post(services::start_job).get(services::list_jobs),
        )
        .route("/api/batches", post(services::start_batch))
        .route(
            "/api/jobs/{job_id}",
            get(services::get_job).delete(services::cancel_job),
        )
        .route("/ws", get(ws::events_ws))
        .route("/health", get(services::health))
        .with_state(state)
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}

/// Run the HTTP/WebSocket service until Ctrl+C or SIGTERM
pub async fn serve(config: Config, engine: Arc<dyn MediaEngine>) -> Result<(), AnyError> {
    let address = config.server.bind_addr;
    let orchestrator = Arc::new(Orchestrator::from_config(engine, &config));
    let sweeper = spawn_retention_sweeper(orchestrator.registry().clone(), &config.retention);

    let app = router(AppState::new(config, orchestrator.clone()));

    let listener = TcpListener::bind(address).await?;
    info!(%address, "reelbox listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    orchestrator.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
