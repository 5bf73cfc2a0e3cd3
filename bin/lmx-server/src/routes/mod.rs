//! Axum router construction.
//!
//! Assembles middleware (trace-id, CORS, load shedding, auth), nests the
//! health/`v1`/`admin` sub-routers, and optionally mounts the Swagger UI.

mod admin;
pub mod doc;
mod health;
mod v1;

use std::sync::Arc;

use axum::middleware;
use axum::Router;
use utoipa_swagger_ui::SwaggerUi;

use crate::middleware::auth::{require_admin_key, require_inference_key};
use crate::middleware::load_shed::shed_under_pressure;
use crate::middleware::{cors, TraceLayer};
use crate::state::AppState;

pub fn build(state: Arc<AppState>) -> Router {
    let cors_layer = cors::cors_layer(&state.config);

    let v1_router = v1::router().layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        require_inference_key,
    ));

    let admin_router = admin::router().layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        require_admin_key,
    ));

    let api_router = Router::new()
        .merge(health::router())
        .nest("/v1", v1_router)
        .nest("/admin", admin_router);

    let mut app = Router::new().merge(api_router);

    if state.config.enable_swagger {
        app = app.merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", doc::get_docs()));
    }

    app.layer(middleware::from_fn_with_state(
        Arc::clone(&state),
        shed_under_pressure,
    ))
        .layer(TraceLayer::new())
        .layer(cors_layer)
        .with_state(state)
}
