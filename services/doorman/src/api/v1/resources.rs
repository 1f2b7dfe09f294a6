//! Resource status endpoint.

use axum::{extract::State, routing::get, Json, Router};
use serde::Serialize;

use crate::readiness::ServerState;
use crate::resource::ResourceStatus;
use crate::state::AppState;

/// Create resource routes.
pub fn routes() -> Router<AppState> {
    Router::new().route("/", get(list_resources))
}

/// Every resource the server has seen, sorted by id.
#[derive(Debug, Serialize)]
pub struct ListResourcesResponse {
    pub server_id: String,
    pub state: ServerState,
    pub resources: Vec<ResourceStatus>,
}

async fn list_resources(State(state): State<AppState>) -> Json<ListResourcesResponse> {
    let server = state.server();
    Json(ListResourcesResponse {
        server_id: server.id().to_string(),
        state: server.state(),
        resources: server.status().await,
    })
}
