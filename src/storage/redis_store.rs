use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{average_p95, TelemetryStore};
use crate::error::StoreError;
use crate::metrics::Resolution;
use crate::models::{Bucket, GeneralBucket, OutlierEvent};

// ─── Key layout ──────────────────────────────────────────────────
//
//   {prefix}:buckets:{minute|hour|day}   ZSET  score = window start (ms)
//   {prefix}:general:{minute|hour|day}   ZSET  score = window start (ms)
//   {prefix}:outliers                    ZSET  score = sample time (ms)
//
// Members are JSON rows tagged with a random id, so two identical rows
// stay two rows.

/// Redis-backed store. `ConnectionManager` is cheaply cloneable and
/// reconnects on its own, so every call works on a clone.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
    prefix: String,
}

#[derive(Serialize, Deserialize)]
struct StoredRow<T> {
    id: String,
    #[serde(flatten)]
    row: T,
}

impl RedisStore {
    pub fn new(conn: ConnectionManager, prefix: impl Into<String>) -> Self {
        Self {
            conn,
            prefix: prefix.into(),
        }
    }

    fn buckets_key(&self, resolution: Resolution) -> String {
        format!("{}:buckets:{}", self.prefix, resolution)
    }

    fn general_key(&self, resolution: Resolution) -> String {
        format!("{}:general:{}", self.prefix, resolution)
    }

    fn outliers_key(&self) -> String {
        format!("{}:outliers", self.prefix)
    }

    async fn add<T: Serialize>(&self, key: &str, ts: DateTime<Utc>, row: &T) -> Result<(), StoreError> {
        let member = serde_json::to_string(&StoredRow {
            id: Uuid::new_v4().to_string(),
            row,
        })?;

        tracing::debug!(key, score = ts.timestamp_millis(), "redis: ZADD");

        let mut conn = self.conn.clone();
        let _: () = redis::cmd("ZADD")
            .arg(key)
            .arg(ts.timestamp_millis())
            .arg(member)
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    /// Rows scored in `[start, end)`, oldest first.
    async fn range<T: DeserializeOwned>(
        &self,
        key: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<T>, StoreError> {
        self.range_raw(key, start.timestamp_millis().to_string(), format!("({}", end.timestamp_millis()))
            .await
    }

    async fn range_raw<T: DeserializeOwned>(
        &self,
        key: &str,
        min: String,
        max: String,
    ) -> Result<Vec<T>, StoreError> {
        tracing::debug!(key, %min, %max, "redis: ZRANGEBYSCORE");

        let mut conn = self.conn.clone();
        let members: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(key)
            .arg(min)
            .arg(max)
            .query_async(&mut conn)
            .await?;

        members
            .iter()
            .map(|m| {
                serde_json::from_str::<StoredRow<T>>(m)
                    .map(|stored| stored.row)
                    .map_err(StoreError::from)
            })
            .collect()
    }

    async fn remove_before(&self, key: &str, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut conn = self.conn.clone();
        let removed: u64 = redis::cmd("ZREMRANGEBYSCORE")
            .arg(key)
            .arg("-inf")
            .arg(format!("({}", cutoff.timestamp_millis()))
            .query_async(&mut conn)
            .await?;
        Ok(removed)
    }
}

#[async_trait]
impl TelemetryStore for RedisStore {
    async fn insert_bucket(&self, resolution: Resolution, bucket: &Bucket) -> Result<(), StoreError> {
        self.add(&self.buckets_key(resolution), bucket.window_start, bucket)
            .await
    }

    async fn insert_general(
        &self,
        resolution: Resolution,
        bucket: &GeneralBucket,
    ) -> Result<(), StoreError> {
        self.add(&self.general_key(resolution), bucket.window_start, bucket)
            .await
    }

    async fn insert_outlier(&self, event: &OutlierEvent) -> Result<(), StoreError> {
        self.add(&self.outliers_key(), event.timestamp, event).await
    }

    async fn buckets_in_range(
        &self,
        resolution: Resolution,
        endpoint: Option<&str>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bucket>, StoreError> {
        let rows: Vec<Bucket> = self.range(&self.buckets_key(resolution), start, end).await?;
        Ok(match endpoint {
            Some(endpoint) => rows.into_iter().filter(|b| b.endpoint == endpoint).collect(),
            None => rows,
        })
    }

    async fn general_in_range(
        &self,
        resolution: Resolution,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<GeneralBucket>, StoreError> {
        self.range(&self.general_key(resolution), start, end).await
    }

    async fn outliers_in_range(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<OutlierEvent>, StoreError> {
        self.range(&self.outliers_key(), start, end).await
    }

    async fn day_p95_averages(&self) -> Result<HashMap<String, f64>, StoreError> {
        let rows: Vec<Bucket> = self
            .range_raw(&self.buckets_key(Resolution::Day), "-inf".into(), "+inf".into())
            .await?;
        Ok(average_p95(&rows))
    }

    async fn prune_before(&self, resolution: Resolution, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let buckets = self.remove_before(&self.buckets_key(resolution), cutoff).await?;
        let general = self.remove_before(&self.general_key(resolution), cutoff).await?;
        Ok(buckets + general)
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        if pong == "PONG" {
            Ok(())
        } else {
            Err(StoreError::Unavailable(format!("unexpected PING reply '{pong}'")))
        }
    }
}
