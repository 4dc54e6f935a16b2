use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::sync::watch;
use tracing::info;

/// Build the liveness router: two fixed-body routes, no state. An external
/// uptime monitor treats any 200 as "process alive".
pub fn router() -> Router {
    Router::new()
        .route("/", get(|| async { "OK" }))
        .route("/health", get(|| async { "Healthy" }))
}

/// Serve the liveness endpoint until the shutdown signal fires.
pub async fn serve(bind: String, port: u16, mut shutdown: watch::Receiver<bool>) -> Result<()> {
    let addr = format!("{}:{}", bind, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind liveness listener on {}", addr))?;

    info!("Liveness endpoint listening on {}", addr);
    axum::serve(listener, router())
        .with_graceful_shutdown(async move {
            let _ = shutdown.changed().await;
        })
        .await
        .context("Liveness server error")
}
