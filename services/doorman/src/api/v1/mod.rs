//! API v1 routes.

mod capacity;
mod resources;

use axum::Router;

use crate::state::AppState;

/// Create API v1 routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .nest("/capacity", capacity::routes())
        .nest("/resources", resources::routes())
}
