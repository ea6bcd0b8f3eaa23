use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::percentiles::LatencyStats;
use crate::metrics::{CounterSnapshot, Metadata};

/// One aggregated latency row for one endpoint over one window.
/// Identical shape at minute, hour and day resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Bucket {
    pub endpoint: String,
    pub window_start: DateTime<Utc>,
    pub count: u64,
    pub median: f64,
    pub average: f64,
    pub p95: f64,
    pub p99: f64,
}

impl Bucket {
    pub fn from_stats(endpoint: impl Into<String>, window_start: DateTime<Utc>, stats: LatencyStats) -> Self {
        Self {
            endpoint: endpoint.into(),
            window_start,
            count: stats.count,
            median: stats.median,
            average: stats.average,
            p95: stats.p95,
            p99: stats.p99,
        }
    }
}

/// Usage counters for one window, independent of endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneralBucket {
    pub window_start: DateTime<Utc>,
    pub downloads: u64,
    pub views: u64,
    pub uploads: u64,
    pub errors: u64,
    /// Number of samples drained into this window
    pub requests: u64,
}

impl GeneralBucket {
    pub fn from_counters(window_start: DateTime<Utc>, counters: CounterSnapshot, requests: u64) -> Self {
        Self {
            window_start,
            downloads: counters.downloads,
            views: counters.views,
            uploads: counters.uploads,
            errors: counters.errors,
            requests,
        }
    }
}

/// A single sample that exceeded its endpoint's baseline. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutlierEvent {
    pub endpoint: String,
    pub timestamp: DateTime<Utc>,
    pub latency_ms: f64,
    pub metadata: Metadata,
}
