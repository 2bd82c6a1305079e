//! HTTP surface. Thin by design: every route delegates to the runtime and
//! returns JSON. Auth middleware and SSE streaming are intentionally not
//! part of this surface.

mod interventions;
mod status;
mod turns;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/turns", post(turns::run_turn))
        .route("/v1/status", get(status::status))
        .route("/v1/sessions/:id/context", get(status::session_context))
        .route("/v1/sessions/:id/stop", post(turns::stop_turn))
        .route(
            "/v1/interventions/:id/resolve",
            post(interventions::resolve),
        )
        .route("/v1/interventions", get(interventions::list))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn healthz() -> &'static str {
    "ok"
}
