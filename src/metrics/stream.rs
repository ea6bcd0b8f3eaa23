use axum::{
    extract::{Query, State},
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Deserialize;
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;
use tokio_stream::StreamExt;

use super::collector::PendingSnapshot;
use super::Resolution;
use crate::handlers::AppError;
use crate::models::{Bucket, GeneralBucket, OutlierEvent};
use crate::AppState;

// ─── Query parameters ────────────────────────────────────────────

/// `?resolution=hour&from=2024-05-01T00:00:00Z&to=...&endpoint=GET%20/x`
#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub resolution: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub endpoint: Option<String>,
}

impl RangeQuery {
    /// `to` defaults to now, `from` to one day before `to`.
    fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let to = self.to.unwrap_or_else(Utc::now);
        let from = self.from.unwrap_or(to - ChronoDuration::days(1));
        (from, to)
    }

    fn resolution(&self) -> Result<Resolution, AppError> {
        match &self.resolution {
            None => Ok(Resolution::Minute),
            Some(raw) => raw.parse().map_err(AppError::BadRequest),
        }
    }
}

// ─── GET /api/telemetry/buckets ──────────────────────────────────

pub async fn get_buckets(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<Bucket>>, AppError> {
    let resolution = query.resolution()?;
    let (from, to) = query.window();
    let rows = state
        .store
        .buckets_in_range(resolution, query.endpoint.as_deref(), from, to)
        .await?;
    Ok(Json(rows))
}

// ─── GET /api/telemetry/general ──────────────────────────────────

pub async fn get_general(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<GeneralBucket>>, AppError> {
    let resolution = query.resolution()?;
    let (from, to) = query.window();
    let rows = state.store.general_in_range(resolution, from, to).await?;
    Ok(Json(rows))
}

// ─── GET /api/telemetry/outliers ─────────────────────────────────

pub async fn get_outliers(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Vec<OutlierEvent>>, AppError> {
    let (from, to) = query.window();
    let rows = state.store.outliers_in_range(from, to).await?;
    Ok(Json(rows))
}

// ─── GET /api/telemetry/pending ──────────────────────────────────
/// What the next minute tick will drain. Read-only.

pub async fn get_pending(State(state): State<Arc<AppState>>) -> Json<PendingSnapshot> {
    Json(state.buffer.pending())
}

// ─── GET /api/telemetry/stream ───────────────────────────────────
/// Server-Sent Events endpoint.
/// Pushes the pending snapshot as JSON once per second.

pub async fn pending_stream(
    State(state): State<Arc<AppState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let interval = tokio::time::interval(Duration::from_secs(1));

    let stream = IntervalStream::new(interval).map(move |_| {
        let snapshot = state.buffer.pending();
        let json = serde_json::to_string(&snapshot).unwrap_or_default();
        Ok(Event::default().data(json))
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
