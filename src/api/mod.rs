// =============================================================================
// HTTP API — router assembly
// =============================================================================
//
// Three route groups, mirroring the teacher's public/authenticated split in
// `api/rest.rs`: the bridge surface (bearer-gated, only mounted when the
// bridge is enabled), the administrative surface (bearer-gated, a distinct
// token), and the public health check. CORS is permissive for local/dev use,
// same as the teacher's `CorsLayer::new().allow_origin(Any)`.
// =============================================================================

pub mod admin;
pub mod auth;
pub mod bridge;

use std::sync::Arc;

use axum::Router;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let mut app = Router::new().merge(admin::router());

    if state.config.mt5_bridge_enabled {
        app = app.merge(bridge::router());
    }

    app.layer(cors).with_state(state)
}
