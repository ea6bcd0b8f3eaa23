pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod models;
pub mod redis_client;
pub mod server;
pub mod storage;

pub mod middleware {
    pub mod timing;
}

use std::sync::Arc;

use metrics::SampleBuffer;
use storage::TelemetryStore;

/// Shared application state available to every handler via `State<Arc<AppState>>`.
pub struct AppState {
    /// Request handlers push samples and counters here; the minute tick drains it.
    pub buffer: Arc<SampleBuffer>,

    /// Where buckets, counters and outlier events live.
    pub store: Arc<dyn TelemetryStore>,
}
