//! Routes nested under `/admin`, protected by `X-Admin-Key` in
//! `routes::build` once a concrete state is available.

pub mod events;
pub mod health;
pub mod metrics;
pub mod models;

use std::sync::Arc;

use axum::Router;

use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(health::router())
        .merge(metrics::router())
        .merge(events::router())
        .merge(models::router())
}
