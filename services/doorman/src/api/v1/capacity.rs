//! Capacity lease endpoints.
//!
//! Clients call `POST /v1/capacity` on every refresh interval with what they
//! hold and what they want, and `POST /v1/capacity/release` when they are
//! done with a resource.

use axum::{extract::State, http::StatusCode, routing::post, Json, Router};
use tracing::debug;

use crate::api::error::ApiError;
use crate::api::request_context::RequestContext;
use crate::protocol::{GetCapacityRequest, GetCapacityResponse, ReleaseCapacityRequest};
use crate::state::AppState;

/// Create capacity routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", post(get_capacity))
        .route("/release", post(release_capacity))
}

async fn get_capacity(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<GetCapacityRequest>,
) -> Result<Json<GetCapacityResponse>, ApiError> {
    debug!(
        request_id = %ctx.request_id,
        client_id = %request.client_id,
        resources = request.resources.len(),
        "Capacity request"
    );

    state
        .server()
        .get_capacity(request, &ctx.call_context())
        .await
        .map(Json)
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))
}

async fn release_capacity(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<ReleaseCapacityRequest>,
) -> Result<StatusCode, ApiError> {
    state
        .server()
        .release_capacity(&request.client_id, &request.resource_ids)
        .await
        .map_err(|e| ApiError::from(e).with_request_id(ctx.request_id))?;

    Ok(StatusCode::NO_CONTENT)
}
