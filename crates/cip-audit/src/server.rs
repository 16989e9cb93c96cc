//! HTTP endpoint for Pub/Sub push subscriptions.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Router;
use tracing::info;

use crate::auditor::Auditor;
use crate::error::{AuditError, Result};

/// Builds the router: `POST /` audits a push request and `GET /healthz`
/// reports liveness.
///
/// Push requests are always acknowledged with 200 so Pub/Sub does not
/// redeliver notifications that were already judged.
pub fn router(auditor: Arc<Auditor>) -> Router {
    Router::new()
        .route("/", post(handle_push))
        .route("/healthz", get(healthz))
        .with_state(auditor)
}

async fn handle_push(State(auditor): State<Arc<Auditor>>, body: Bytes) -> StatusCode {
    auditor.audit(&body).await;
    StatusCode::OK
}

async fn healthz() -> &'static str {
    "ok"
}

/// Serves the auditor on `addr` until the process exits.
///
/// # Errors
///
/// Returns an error if the address cannot be bound or the server fails.
pub async fn serve(addr: SocketAddr, auditor: Arc<Auditor>) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| AuditError::Serve { addr, source })?;
    info!(%addr, "auditor listening");
    axum::serve(listener, router(auditor))
        .await
        .map_err(|source| AuditError::Serve { addr, source })
}
