//! Health check endpoints.
//!
//! `/readyz` reports 503 until the first configuration has loaded, so load
//! balancers keep traffic away from a server that would refuse it.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::readiness::ServerState;
use crate::state::AppState;

/// Health check response.
#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct HealthResponse {
    /// Service status: "ok" or "unavailable".
    pub status: String,

    /// Service name.
    pub service: String,

    /// Service version.
    pub version: String,

    /// Current timestamp (ISO 8601).
    pub timestamp: String,

    /// Server id and lifecycle state, on readiness checks only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub server: Option<ServerHealth>,
}

#[derive(Debug, Serialize)]
#[cfg_attr(test, derive(serde::Deserialize))]
pub struct ServerHealth {
    pub id: String,
    pub state: String,
}

/// Create health check routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/livez", get(livez))
}

fn response(status: &str, server: Option<ServerHealth>) -> HealthResponse {
    HealthResponse {
        status: status.to_string(),
        service: "doorman".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now().to_rfc3339(),
        server,
    }
}

/// Basic health check. 200 whenever the process is serving.
async fn healthz() -> impl IntoResponse {
    Json(response("ok", None))
}

/// Readiness check. 200 only once configured and not closed.
async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let server = state.server();
    let current = server.state();
    let ready = current == ServerState::Configured;

    let body = response(
        if ready { "ok" } else { "unavailable" },
        Some(ServerHealth {
            id: server.id().to_string(),
            state: state_label(current).to_string(),
        }),
    );

    if ready {
        (StatusCode::OK, Json(body))
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(body))
    }
}

/// Liveness check.
async fn livez() -> impl IntoResponse {
    StatusCode::OK
}

fn state_label(state: ServerState) -> &'static str {
    match state {
        ServerState::Unconfigured => "unconfigured",
        ServerState::Configured => "configured",
        ServerState::Closed => "closed",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_healthz_returns_ok() {
        let response = healthz().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_livez_returns_ok() {
        let response = livez().await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }

    // readyz against a live server is covered in tests/http_api.rs.
}
