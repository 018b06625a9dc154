//! Router assembly (spec §6 "Concrete intake routes"), grounded on
//! `file-storage-service/src/main.rs::create_router`'s layer stack. Unlike
//! the teacher's single `auth_middleware` gate, authentication here is a
//! per-handler `TenantContext` extractor (see `intake::auth`), so `/health`
//! and `/metrics` are unauthenticated simply by not taking it.

use axum::routing::{delete, get, post, put};
use axum::Router;
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::request_id::{MakeRequestUuid, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::intake::handlers;
use crate::intake::AppState;

pub fn build_router(state: AppState) -> Router {
    let request_timeout = state.config.request_timeout();

    Router::new()
        .route("/api/v1/reports", post(handlers::submit_report))
        .route("/api/v1/reports/:id", get(handlers::get_report_status))
        .route("/api/v1/reports/:id/download", get(handlers::download_report))
        .route("/api/v1/schedules", post(handlers::create_schedule))
        .route("/api/v1/schedules", get(handlers::list_schedules))
        .route("/api/v1/schedules/:id", get(handlers::get_schedule))
        .route("/api/v1/schedules/:id", put(handlers::update_schedule))
        .route("/api/v1/schedules/:id", delete(handlers::delete_schedule))
        .route("/health", get(handlers::health))
        .route("/metrics", get(handlers::metrics))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(CompressionLayer::new())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .with_state(state)
}
