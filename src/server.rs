use axum::{
    middleware as axum_mw,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::handlers;
use crate::metrics::stream;
use crate::middleware::timing;
use crate::AppState;

/// Builds the full Axum `Router`. Every route except the SSE feed is timed
/// and feeds the sample buffer.
pub fn create_router(state: Arc<AppState>) -> Router {
    let timed = Router::new()
        // ── Health ──────────────────────────────────────────────
        .route("/health", get(handlers::health::health_check))
        // ── Counter hooks ───────────────────────────────────────
        .route(
            "/api/telemetry/downloads",
            post(handlers::counters::add_download),
        )
        .route("/api/telemetry/views", post(handlers::counters::add_view))
        .route(
            "/api/telemetry/uploads",
            post(handlers::counters::add_upload),
        )
        // ── Stored series ───────────────────────────────────────
        .route("/api/telemetry/buckets", get(stream::get_buckets))
        .route("/api/telemetry/general", get(stream::get_general))
        .route("/api/telemetry/outliers", get(stream::get_outliers))
        .route("/api/telemetry/pending", get(stream::get_pending))
        // ── Timing only applies to matched routes ───────────────
        .route_layer(axum_mw::from_fn_with_state(
            state.clone(),
            timing::timing_middleware,
        ));

    Router::new()
        .merge(timed)
        // Long-lived; timing it would record one sample per disconnect
        .route("/api/telemetry/stream", get(stream::pending_stream))
        .with_state(state)
        .layer(CorsLayer::permissive())
}
