use axum::{extract::State, http::StatusCode};
use std::sync::Arc;

use crate::AppState;

// Thin hooks for the business handlers that own downloads, views and
// uploads. Each one bumps a counter and returns immediately.

// ─── POST /api/telemetry/downloads ───────────────────────────────

pub async fn add_download(State(state): State<Arc<AppState>>) -> StatusCode {
    state.buffer.increment_downloads();
    StatusCode::NO_CONTENT
}

// ─── POST /api/telemetry/views ───────────────────────────────────

pub async fn add_view(State(state): State<Arc<AppState>>) -> StatusCode {
    state.buffer.increment_views();
    StatusCode::NO_CONTENT
}

// ─── POST /api/telemetry/uploads ─────────────────────────────────

pub async fn add_upload(State(state): State<Arc<AppState>>) -> StatusCode {
    state.buffer.increment_uploads();
    StatusCode::NO_CONTENT
}
