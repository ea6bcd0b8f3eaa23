use axum::{
    extract::{MatchedPath, Request, State},
    middleware::Next,
    response::Response,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

use crate::AppState;

/// Route-level middleware that feeds the sample buffer.
///
/// Records one sample per request, labelled `"<METHOD> <route template>"`
/// so `/api/videos/1` and `/api/videos/2` share a bucket, and adds two
/// response headers:
///
///   X-Response-Time-Ms  — total handler wall time in milliseconds
///   Server-Timing       — same value in the standard Server-Timing format
///
/// Must be installed with `route_layer` so the matched path is known.
pub async fn timing_middleware(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().clone();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| req.uri().path().to_owned());
    let query = req.uri().query().map(str::to_owned);

    let start = Instant::now();
    let mut response = next.run(req).await;
    let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

    // ── Inject response headers ─────────────────────────────────
    if let Ok(val) = format!("{latency_ms:.3}").parse() {
        response.headers_mut().insert("X-Response-Time-Ms", val);
    }
    if let Ok(val) = format!("total;dur={latency_ms:.3}").parse() {
        response.headers_mut().insert("Server-Timing", val);
    }

    // ── Record ──────────────────────────────────────────────────
    let status = response.status();
    if status.is_server_error() {
        state.buffer.increment_errors();
    }
    state.buffer.record_with_status(
        format!("{method} {route}"),
        latency_ms,
        status.as_u16(),
        json!({ "query": query, "status": status.as_u16() }),
    );

    tracing::debug!(%method, %route, status = status.as_u16(), latency_ms, "request timed");

    response
}
