//! HTTP routes

use axum::{
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

mod accounts;
mod artifacts;
mod billing;
mod compare;
mod observations;

#[cfg(test)]
mod tests;

/// Build the API router
pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/accounts", post(accounts::signup))
        .route("/api/accounts/me", get(accounts::me))
        .route("/api/billing/webhook", post(billing::webhook))
        .route(
            "/api/observations",
            post(observations::create).get(observations::list),
        )
        .route("/api/observations/:id", get(observations::show))
        .route("/api/observations/:id/cancel", post(observations::cancel))
        .route("/api/observations/:id/retry", post(observations::retry))
        .route("/api/observations/:id/compare", get(compare::visual))
        .route("/api/observations/:id/compare-visual", get(compare::visual))
        .route("/api/observations/:id/compare-text", get(compare::text))
        .route("/artifacts/:key", get(artifacts::serve))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": viewtrace_common::VERSION,
    }))
}
