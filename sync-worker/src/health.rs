use std::net::SocketAddr;
use std::sync::Arc;

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::consumer::ConsumerStatus;

/// Health check endpoint
///
/// Returns 503 once the consumer has failed too many poll cycles in a row
async fn health(State(status): State<Arc<ConsumerStatus>>) -> impl IntoResponse {
    let (code, label) = if status.is_healthy() {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        code,
        Json(json!({
            "status": label,
            "service": "sync-worker",
            "messages_deleted": status.messages_deleted(),
            "handler_failures": status.handler_failures(),
            "consecutive_poll_failures": status.consecutive_failures(),
        })),
    )
}

pub fn router(status: Arc<ConsumerStatus>) -> Router {
    Router::new()
        .route("/health", get(health))
        .with_state(status)
}

/// Start the health check HTTP server
///
/// # Errors
///
/// Returns an error if the server fails to bind to the specified port
pub async fn start_health_server(
    port: u16,
    status: Arc<ConsumerStatus>,
    shutdown_token: CancellationToken,
) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Health check server listening on {}", addr);

    axum::serve(listener, router(status))
        .with_graceful_shutdown(async move {
            shutdown_token.cancelled().await;
        })
        .await?;

    Ok(())
}
