use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::{average_p95, TelemetryStore};
use crate::error::StoreError;
use crate::metrics::Resolution;
use crate::models::{Bucket, GeneralBucket, OutlierEvent};

/// In-process store. Backs the test suite and `STORAGE_BACKEND=memory`.
/// Rows are kept in insertion order; duplicates are kept as-is.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Tables>,
}

#[derive(Default)]
struct Tables {
    buckets: HashMap<Resolution, Vec<Bucket>>,
    general: HashMap<Resolution, Vec<GeneralBucket>>,
    outliers: Vec<OutlierEvent>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every bucket at `resolution`, in insertion order.
    pub fn buckets(&self, resolution: Resolution) -> Vec<Bucket> {
        self.inner
            .lock()
            .buckets
            .get(&resolution)
            .cloned()
            .unwrap_or_default()
    }

    pub fn general(&self, resolution: Resolution) -> Vec<GeneralBucket> {
        self.inner
            .lock()
            .general
            .get(&resolution)
            .cloned()
            .unwrap_or_default()
    }

    pub fn outliers(&self) -> Vec<OutlierEvent> {
        self.inner.lock().outliers.clone()
    }
}

fn in_range(ts: DateTime<Utc>, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
    start <= ts && ts < end
}

#[async_trait]
impl TelemetryStore for MemoryStore {
    async fn insert_bucket(&self, resolution: Resolution, bucket: &Bucket) -> Result<(), StoreError> {
        self.inner
            .lock()
            .buckets
            .entry(resolution)
            .or_default()
            .push(bucket.clone());
        Ok(())
    }

    async fn insert_general(
        &self,
        resolution: Resolution,
        bucket: &GeneralBucket,
    ) -> Result<(), StoreError> {
        self.inner
            .lock()
            .general
            .entry(resolution)
            .or_default()
            .push(bucket.clone());
        Ok(())
    }

    async fn insert_outlier(&self, event: &OutlierEvent) -> Result<(), StoreError> {
        self.inner.lock().outliers.push(event.clone());
        Ok(())
    }

    async fn buckets_in_range(
        &self,
        resolution: Resolution,
        endpoint: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>, StoreError> {
        let tables = self.inner.lock();
        let mut rows: Vec<Bucket> = tables
            .buckets
            .get(&resolution)
            .into_iter()
            .flatten()
            .filter(|b| in_range(b.window_start, start, end))
            .filter(|b| endpoint.map_or(true, |e| b.endpoint == e))
            .cloned()
            .collect();
        rows.sort_by_key(|b| b.window_start);
        Ok(rows)
    }

    async fn general_in_range(
        &self,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GeneralBucket>, StoreError> {
        let tables = self.inner.lock();
        let mut rows: Vec<GeneralBucket> = tables
            .general
            .get(&resolution)
            .into_iter()
            .flatten()
            .filter(|g| in_range(g.window_start, start, end))
            .cloned()
            .collect();
        rows.sort_by_key(|g| g.window_start);
        Ok(rows)
    }

    async fn outliers_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OutlierEvent>, StoreError> {
        let tables = self.inner.lock();
        let mut rows: Vec<OutlierEvent> = tables
            .outliers
            .iter()
            .filter(|o| in_range(o.timestamp, start, end))
            .cloned()
            .collect();
        rows.sort_by_key(|o| o.timestamp);
        Ok(rows)
    }

    async fn day_p95_averages(&self) -> Result<HashMap<String, f64>, StoreError> {
        let tables = self.inner.lock();
        Ok(average_p95(tables.buckets.get(&Resolution::Day).into_iter().flatten()))
    }

    async fn prune_before(&self, resolution: Resolution, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut tables = self.inner.lock();
        let mut removed = 0;

        if let Some(rows) = tables.buckets.get_mut(&resolution) {
            let before = rows.len();
            rows.retain(|b| b.window_start >= cutoff);
            removed += (before - rows.len()) as u64;
        }
        if let Some(rows) = tables.general.get_mut(&resolution) {
            let before = rows.len();
            rows.retain(|g| g.window_start >= cutoff);
            removed += (before - rows.len()) as u64;
        }

        Ok(removed)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn bucket(endpoint: &str, window_start: DateTime<Utc>, p95: f64) -> Bucket {
        Bucket {
            endpoint: endpoint.into(),
            window_start,
            count: 1,
            median: p95,
            average: p95,
            p95,
            p99: p95,
        }
    }

    #[tokio::test]
    async fn range_query_is_half_open_and_filters_endpoint() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 10, 0, 0).unwrap();
        for i in 0..3 {
            let ts = t0 + Duration::minutes(i);
            store.insert_bucket(Resolution::Minute, &bucket("GET /a", ts, 1.0)).await.unwrap();
            store.insert_bucket(Resolution::Minute, &bucket("GET /b", ts, 1.0)).await.unwrap();
        }

        let rows = store
            .buckets_in_range(Resolution::Minute, None, t0, t0 + Duration::minutes(2))
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);

        let rows = store
            .buckets_in_range(Resolution::Minute, Some("GET /b"), t0, t0 + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|b| b.endpoint == "GET /b"));

        let hours = store
            .buckets_in_range(Resolution::Hour, None, t0, t0 + Duration::hours(1))
            .await
            .unwrap();
        assert!(hours.is_empty());
    }

    #[tokio::test]
    async fn day_p95_average_groups_by_endpoint() {
        let store = MemoryStore::new();
        let d0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.insert_bucket(Resolution::Day, &bucket("GET /a", d0, 30.0)).await.unwrap();
        store
            .insert_bucket(Resolution::Day, &bucket("GET /a", d0 + Duration::days(1), 50.0))
            .await
            .unwrap();
        store.insert_bucket(Resolution::Day, &bucket("GET /b", d0, 7.0)).await.unwrap();
        // Hour rows never feed the baseline
        store.insert_bucket(Resolution::Hour, &bucket("GET /c", d0, 99.0)).await.unwrap();

        let averages = store.day_p95_averages().await.unwrap();
        assert_eq!(averages.len(), 2);
        assert_eq!(averages["GET /a"], 40.0);
        assert_eq!(averages["GET /b"], 7.0);
    }

    #[tokio::test]
    async fn prune_removes_only_older_rows_of_that_resolution() {
        let store = MemoryStore::new();
        let t0 = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        store.insert_bucket(Resolution::Minute, &bucket("GET /a", t0, 1.0)).await.unwrap();
        store
            .insert_bucket(Resolution::Minute, &bucket("GET /a", t0 + Duration::days(2), 1.0))
            .await
            .unwrap();
        store.insert_bucket(Resolution::Hour, &bucket("GET /a", t0, 1.0)).await.unwrap();

        let removed = store.prune_before(Resolution::Minute, t0 + Duration::days(1)).await.unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.buckets(Resolution::Minute).len(), 1);
        assert_eq!(store.buckets(Resolution::Hour).len(), 1);
    }
}
