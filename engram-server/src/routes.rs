//! Route table (spec.md §6). One flat router; `AppState` is cloned into
//! every handler's extractor rather than threaded through closures.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{jobs, settings, validation, websocket};
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/jobs", get(jobs::list_jobs))
        .route("/api/jobs/:job_id", get(jobs::get_job).delete(jobs::delete_job))
        .route("/api/jobs/:job_id/titles", get(jobs::list_titles))
        .route("/api/jobs/:job_id/cancel", post(jobs::cancel_job))
        .route("/api/jobs/:job_id/resolve_review", post(jobs::resolve_review))
        .route("/api/simulate_insert", post(jobs::simulate_insert))
        .route("/api/settings", get(settings::get_settings).patch(settings::update_settings))
        .route("/api/tools/detect", get(validation::detect_tools))
        .route("/api/tools/validate/makemkv", post(validation::validate_makemkv))
        .route("/api/tools/validate/ffmpeg", post(validation::validate_ffmpeg))
        .route("/ws", get(websocket::websocket_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
