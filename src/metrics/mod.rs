pub mod aggregator;
pub mod collector;
pub mod outliers;
pub mod percentiles;
pub mod resolution;
pub mod scheduler;
pub mod stream;

pub use aggregator::{Aggregator, Retention, TickReport};
pub use collector::{CounterSnapshot, PendingSnapshot, SampleBuffer};
pub use outliers::Baseline;
pub use resolution::Resolution;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque per-request record attached to a sample. Only ever copied into
/// an outlier event, never inspected.
pub type Metadata = serde_json::Value;

/// A single timing observation recorded when a request completes.
/// This is the "write" side — the timing layer creates these and pushes them in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// e.g. "GET /api/videos/:id"
    pub endpoint: String,
    /// When the request completed
    pub timestamp: DateTime<Utc>,
    /// Total handler wall time in milliseconds
    pub latency_ms: f64,
    /// HTTP status of the response (0 when unknown)
    pub status: u16,
    pub metadata: Metadata,
}
