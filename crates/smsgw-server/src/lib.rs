//! Bootstrap shared by the smsgw binaries: configuration, logging, database,
//! service context and signal handling.

use anyhow::{Context as _, Result};
use axum::{extract::State, http::header, response::IntoResponse, routing::get, Router};
use smsgw_common::logging::init_logging;
use smsgw_common::Config;
use smsgw_core::{Context, Metrics};
use smsgw_storage::DatabasePool;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};

/// Load configuration and install the log subscriber
pub fn load(config_path: Option<&Path>) -> Result<Arc<Config>> {
    let config = Config::load(config_path).context("loading configuration")?;
    init_logging(&config.logging)?;
    Ok(Arc::new(config))
}

/// Connect to PostgreSQL, migrate, and build the service context
pub async fn connect(config: Arc<Config>) -> Result<(Context, DatabasePool)> {
    let pool = DatabasePool::new(&config.database).await?;
    info!("Database connection established");

    pool.migrate().await?;
    info!("Database migrations completed");

    let ctx = Context::postgres(config, pool.clone())?;
    Ok((ctx, pool))
}

/// Resolves on SIGINT or SIGTERM
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

async fn render_metrics(State(metrics): State<Metrics>) -> impl IntoResponse {
    match metrics.render() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to render metrics: {}", e);
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Serve `GET /metrics` until `shutdown` resolves
pub async fn serve_metrics(
    port: u16,
    metrics: Metrics,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("binding metrics port {}", port))?;
    info!(port, "Serving metrics");
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    Ok(())
}
