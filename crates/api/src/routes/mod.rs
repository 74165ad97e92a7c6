pub mod hooks;
pub mod preferences;

use axum::Router;

use crate::state::AppState;

/// Build the complete API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .merge(hooks::router())
        .merge(preferences::router())
        .with_state(state)
}
