use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::Mutex;

use super::outliers::{Baseline, DEFAULT_OUTLIER_FACTOR};
use super::percentiles::{median, percentile, LatencyStats};
use super::{Resolution, Sample, SampleBuffer};
use crate::models::{Bucket, GeneralBucket, OutlierEvent};
use crate::storage::TelemetryStore;

// ─── Configuration ───────────────────────────────────────────────

/// How long fine-grained history survives. Day rows are kept forever.
#[derive(Debug, Clone, Copy)]
pub struct Retention {
    pub minutes: Duration,
    pub hours: Duration,
}

impl Default for Retention {
    fn default() -> Self {
        Self {
            minutes: Duration::days(30),
            hours: Duration::days(183),
        }
    }
}

// ─── Public types ────────────────────────────────────────────────

/// What one tick did. Failures are counted here and logged, never returned.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TickReport {
    pub window_start: Option<DateTime<Utc>>,
    pub samples: usize,
    pub buckets_written: usize,
    pub buckets_failed: usize,
    pub outliers_written: usize,
    pub outliers_failed: usize,
    pub general_written: bool,
    pub pruned: u64,
}

/// Drives the minute, hour and day ticks against one buffer and one store.
pub struct Aggregator {
    buffer: Arc<SampleBuffer>,
    store: Arc<dyn TelemetryStore>,
    outlier_factor: f64,
    retention: Retention,
    // One guard per resolution: ticks of the same tier never overlap
    minute_guard: Mutex<()>,
    hour_guard: Mutex<()>,
    day_guard: Mutex<()>,
}

impl Aggregator {
    pub fn new(buffer: Arc<SampleBuffer>, store: Arc<dyn TelemetryStore>) -> Self {
        Self {
            buffer,
            store,
            outlier_factor: DEFAULT_OUTLIER_FACTOR,
            retention: Retention::default(),
            minute_guard: Mutex::new(()),
            hour_guard: Mutex::new(()),
            day_guard: Mutex::new(()),
        }
    }

    pub fn with_outlier_factor(mut self, factor: f64) -> Self {
        self.outlier_factor = factor;
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Run every tick due at the minute boundary `boundary`, in tier order.
    ///
    /// The minute tick is handed an instant inside the minute that just
    /// ended, so its rows carry the minute their samples fell in. At :00 the
    /// hour tick follows, and at 00:00 the day tick runs last, after the
    /// hour row it rolls up has been written.
    pub async fn run_boundary(&self, boundary: DateTime<Utc>) -> Vec<TickReport> {
        let mut reports = vec![self.run_minute_tick(boundary - Resolution::Minute.step()).await];
        for resolution in due_rollups(boundary) {
            let report = match resolution {
                Resolution::Hour => self.run_hour_tick(boundary).await,
                _ => self.run_day_tick(boundary).await,
            };
            reports.push(report);
        }
        reports
    }

    // ── Minute ──────────────────────────────────────────────────

    /// Drain the buffer into minute buckets for the window containing `tick`,
    /// flag outliers against the day-level baseline and persist counters.
    pub async fn run_minute_tick(&self, tick: DateTime<Utc>) -> TickReport {
        let _serial = self.minute_guard.lock().await;

        let (samples, counters) = self.buffer.drain_and_reset();
        let window_start = Resolution::Minute.truncate(tick);

        let mut report = TickReport {
            window_start: Some(window_start),
            samples: samples.len(),
            ..TickReport::default()
        };

        if !samples.is_empty() {
            for bucket in minute_buckets(&samples, window_start) {
                self.write_bucket(Resolution::Minute, &bucket, &mut report).await;
            }

            let baseline = self.load_baseline().await;
            for sample in samples.iter().filter(|s| baseline.is_outlier(&s.endpoint, s.latency_ms)) {
                let event = OutlierEvent {
                    endpoint: sample.endpoint.clone(),
                    timestamp: sample.timestamp,
                    latency_ms: sample.latency_ms,
                    metadata: sample.metadata.clone(),
                };
                match self.store.insert_outlier(&event).await {
                    Ok(()) => report.outliers_written += 1,
                    Err(e) => {
                        report.outliers_failed += 1;
                        tracing::warn!(endpoint = %event.endpoint, error = %e, "failed to persist outlier");
                    }
                }
            }
        }

        let general = GeneralBucket::from_counters(window_start, counters, samples.len() as u64);
        self.write_general(Resolution::Minute, &general, &mut report).await;

        tracing::info!(
            resolution = "minute",
            %window_start,
            samples = report.samples,
            buckets = report.buckets_written,
            failed = report.buckets_failed,
            outliers = report.outliers_written,
            "tick complete"
        );
        report
    }

    async fn load_baseline(&self) -> Baseline {
        match self.store.day_p95_averages().await {
            Ok(averages) => Baseline::from_day_p95(averages, self.outlier_factor),
            Err(e) => {
                tracing::warn!(error = %e, "failed to load outlier baseline; skipping outlier detection");
                Baseline::default()
            }
        }
    }

    // ── Hour / Day ──────────────────────────────────────────────

    /// Roll the previous hour's minute buckets up into hour buckets.
    pub async fn run_hour_tick(&self, tick: DateTime<Utc>) -> TickReport {
        let _serial = self.hour_guard.lock().await;
        self.rollup(Resolution::Hour, tick).await
    }

    /// Roll the previous day's hour buckets up into day buckets, then prune
    /// minute and hour history past its retention.
    pub async fn run_day_tick(&self, tick: DateTime<Utc>) -> TickReport {
        let _serial = self.day_guard.lock().await;
        let mut report = self.rollup(Resolution::Day, tick).await;

        for (resolution, keep) in [
            (Resolution::Minute, self.retention.minutes),
            (Resolution::Hour, self.retention.hours),
        ] {
            let cutoff = tick - keep;
            match self.store.prune_before(resolution, cutoff).await {
                Ok(removed) => {
                    report.pruned += removed;
                    if removed > 0 {
                        tracing::info!(%resolution, %cutoff, removed, "pruned expired rows");
                    }
                }
                Err(e) => tracing::warn!(%resolution, error = %e, "failed to prune expired rows"),
            }
        }

        report
    }

    async fn rollup(&self, resolution: Resolution, tick: DateTime<Utc>) -> TickReport {
        let (window_start, window_end) = resolution.previous_window(tick);
        let mut report = TickReport {
            window_start: Some(window_start),
            ..TickReport::default()
        };

        let Some(source) = resolution.finer() else {
            return report;
        };

        match self
            .store
            .buckets_in_range(source, None, window_start, window_end)
            .await
        {
            Ok(rows) => {
                for bucket in rollup_buckets(&rows, window_start) {
                    self.write_bucket(resolution, &bucket, &mut report).await;
                }
            }
            Err(e) => tracing::warn!(%resolution, %window_start, error = %e, "failed to read finer buckets"),
        }

        match self.store.general_in_range(source, window_start, window_end).await {
            Ok(rows) => {
                if let Some(general) = rollup_general(&rows, window_start) {
                    self.write_general(resolution, &general, &mut report).await;
                }
            }
            Err(e) => tracing::warn!(%resolution, %window_start, error = %e, "failed to read finer counters"),
        }

        tracing::info!(
            %resolution,
            %window_start,
            buckets = report.buckets_written,
            failed = report.buckets_failed,
            general = report.general_written,
            "tick complete"
        );
        report
    }

    // ── Writes ──────────────────────────────────────────────────

    async fn write_bucket(&self, resolution: Resolution, bucket: &Bucket, report: &mut TickReport) {
        match self.store.insert_bucket(resolution, bucket).await {
            Ok(()) => report.buckets_written += 1,
            Err(e) => {
                report.buckets_failed += 1;
                tracing::warn!(
                    %resolution,
                    endpoint = %bucket.endpoint,
                    window_start = %bucket.window_start,
                    error = %e,
                    "failed to persist bucket"
                );
            }
        }
    }

    async fn write_general(&self, resolution: Resolution, general: &GeneralBucket, report: &mut TickReport) {
        match self.store.insert_general(resolution, general).await {
            Ok(()) => report.general_written = true,
            Err(e) => tracing::warn!(
                %resolution,
                window_start = %general.window_start,
                error = %e,
                "failed to persist counters"
            ),
        }
    }
}

// ─── Pure aggregation ────────────────────────────────────────────

/// Rollup tiers whose boundary coincides with `boundary`, finest first.
pub fn due_rollups(boundary: DateTime<Utc>) -> Vec<Resolution> {
    [Resolution::Hour, Resolution::Day]
        .into_iter()
        .filter(|resolution| resolution.truncate(boundary) == boundary)
        .collect()
}

/// One minute bucket per endpoint, from raw samples.
pub fn minute_buckets(samples: &[Sample], window_start: DateTime<Utc>) -> Vec<Bucket> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for sample in samples {
        groups
            .entry(sample.endpoint.as_str())
            .or_default()
            .push(sample.latency_ms);
    }

    groups
        .into_iter()
        .filter_map(|(endpoint, latencies)| {
            LatencyStats::from_latencies(&latencies)
                .map(|stats| Bucket::from_stats(endpoint, window_start, stats))
        })
        .collect()
}

/// One coarser bucket per endpoint, from finer buckets.
///
/// `count` is summed. `average` is the plain mean of sub-averages, the
/// median is the median of sub-medians and p95/p99 are percentiles of the
/// sub-bucket p95/p99 values; none of them are weighted by `count`.
pub fn rollup_buckets(rows: &[Bucket], window_start: DateTime<Utc>) -> Vec<Bucket> {
    let mut groups: BTreeMap<&str, Vec<&Bucket>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.endpoint.as_str()).or_default().push(row);
    }

    groups
        .into_iter()
        .filter(|(_, subs)| !subs.is_empty())
        .map(|(endpoint, subs)| {
            let field = |f: fn(&Bucket) -> f64| subs.iter().map(|b| f(b)).collect::<Vec<f64>>();

            let averages = field(|b| b.average);
            Bucket {
                endpoint: endpoint.to_string(),
                window_start,
                count: subs.iter().map(|b| b.count).sum(),
                median: median(&field(|b| b.median)),
                average: averages.iter().sum::<f64>() / averages.len() as f64,
                p95: percentile(&field(|b| b.p95), 0.95),
                p99: percentile(&field(|b| b.p99), 0.99),
            }
        })
        .collect()
}

/// Sum of every counter across finer rows, or `None` when there are none.
pub fn rollup_general(rows: &[GeneralBucket], window_start: DateTime<Utc>) -> Option<GeneralBucket> {
    if rows.is_empty() {
        return None;
    }

    Some(rows.iter().fold(
        GeneralBucket {
            window_start,
            downloads: 0,
            views: 0,
            uploads: 0,
            errors: 0,
            requests: 0,
        },
        |mut acc, g| {
            acc.downloads += g.downloads;
            acc.views += g.views;
            acc.uploads += g.uploads;
            acc.errors += g.errors;
            acc.requests += g.requests;
            acc
        },
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    fn sample(endpoint: &str, latency_ms: f64) -> Sample {
        Sample {
            endpoint: endpoint.into(),
            timestamp: t0() + Duration::seconds(7),
            latency_ms,
            status: 200,
            metadata: json!(null),
        }
    }

    fn sub(count: u64, median: f64, average: f64, p95: f64, p99: f64) -> Bucket {
        Bucket {
            endpoint: "GET /v".into(),
            window_start: t0(),
            count,
            median,
            average,
            p95,
            p99,
        }
    }

    #[test]
    fn due_rollups_follow_tier_boundaries() {
        assert!(due_rollups(t0() + Duration::minutes(1)).is_empty());
        assert_eq!(due_rollups(t0()), vec![Resolution::Hour]);
        let midnight = Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap();
        assert_eq!(due_rollups(midnight), vec![Resolution::Hour, Resolution::Day]);
    }

    #[test]
    fn minute_buckets_group_by_endpoint() {
        let samples = vec![
            sample("GET /a", 10.0),
            sample("GET /b", 5.0),
            sample("GET /a", 30.0),
            sample("GET /a", 20.0),
        ];
        let buckets = minute_buckets(&samples, t0());

        assert_eq!(buckets.len(), 2);
        assert_eq!(buckets[0].endpoint, "GET /a");
        assert_eq!(buckets[0].count, 3);
        assert_eq!(buckets[0].median, 20.0);
        assert_eq!(buckets[0].average, 20.0);
        assert_eq!(buckets[1].endpoint, "GET /b");
        assert_eq!(buckets[1].p99, 5.0);
        assert!(buckets.iter().all(|b| b.window_start == t0()));
    }

    #[test]
    fn rollup_uses_unweighted_mean_of_averages() {
        let rows = vec![
            sub(5, 10.0, 10.0, 12.0, 13.0),
            sub(5, 20.0, 20.0, 22.0, 23.0),
            sub(5, 30.0, 30.0, 32.0, 33.0),
            sub(5, 40.0, 40.0, 42.0, 43.0),
        ];
        let hour = rollup_buckets(&rows, t0());
        assert_eq!(hour.len(), 1);
        assert_eq!(hour[0].count, 20);
        assert_eq!(hour[0].average, 25.0);
        assert_eq!(hour[0].median, 25.0);
        assert!((hour[0].p95 - percentile(&[12.0, 22.0, 32.0, 42.0], 0.95)).abs() < 1e-9);
        assert!((hour[0].p99 - percentile(&[13.0, 23.0, 33.0, 43.0], 0.99)).abs() < 1e-9);
    }

    #[test]
    fn rollup_ignores_sub_bucket_counts_for_average() {
        let rows = vec![sub(1, 10.0, 10.0, 10.0, 10.0), sub(99, 30.0, 30.0, 30.0, 30.0)];
        let hour = rollup_buckets(&rows, t0());
        assert_eq!(hour[0].count, 100);
        assert_eq!(hour[0].average, 20.0);
    }

    #[test]
    fn rollup_general_sums_every_counter() {
        let rows = vec![
            GeneralBucket {
                window_start: t0(),
                downloads: 1,
                views: 2,
                uploads: 3,
                errors: 4,
                requests: 5,
            },
            GeneralBucket {
                window_start: t0() + Duration::minutes(1),
                downloads: 10,
                views: 20,
                uploads: 30,
                errors: 40,
                requests: 50,
            },
        ];
        let hour = rollup_general(&rows, t0()).unwrap();
        assert_eq!(
            hour,
            GeneralBucket {
                window_start: t0(),
                downloads: 11,
                views: 22,
                uploads: 33,
                errors: 44,
                requests: 55,
            }
        );
        assert!(rollup_general(&[], t0()).is_none());
    }
}
