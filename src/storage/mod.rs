pub mod memory;
pub mod redis_store;

pub use memory::MemoryStore;
pub use redis_store::RedisStore;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::metrics::Resolution;
use crate::models::{Bucket, GeneralBucket, OutlierEvent};

/// Persistence consumed by the aggregators and the read API.
///
/// Ranges are half-open: `start <= window_start < end`. Inserts never
/// replace existing rows; deduplicating on `(endpoint, window_start,
/// resolution)` is left to the backend.
#[async_trait]
pub trait TelemetryStore: Send + Sync {
    async fn insert_bucket(&self, resolution: Resolution, bucket: &Bucket) -> Result<(), StoreError>;
    async fn insert_general(
        &self,
        resolution: Resolution,
        bucket: &GeneralBucket,
    ) -> Result<(), StoreError>;
    async fn insert_outlier(&self, event: &OutlierEvent) -> Result<(), StoreError>;

    async fn buckets_in_range(
        &self,
        resolution: Resolution,
        endpoint: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>, StoreError>;
    async fn general_in_range(
        &self,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GeneralBucket>, StoreError>;
    async fn outliers_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OutlierEvent>, StoreError>;

    /// Average p95 per endpoint over every day-resolution bucket ever stored.
    async fn day_p95_averages(&self) -> Result<HashMap<String, f64>, StoreError>;

    /// Delete buckets and general buckets at `resolution` older than `cutoff`.
    /// Returns the number of rows removed.
    async fn prune_before(&self, resolution: Resolution, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Group `(endpoint, p95)` pairs into per-endpoint averages.
pub(crate) fn average_p95<'a>(rows: impl IntoIterator<Item = &'a Bucket>) -> HashMap<String, f64> {
    let mut sums: HashMap<String, (f64, u64)> = HashMap::new();
    for row in rows {
        let entry = sums.entry(row.endpoint.clone()).or_insert((0.0, 0));
        entry.0 += row.p95;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(endpoint, (sum, n))| (endpoint, sum / n as f64))
        .collect()
}
