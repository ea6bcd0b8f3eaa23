use std::collections::HashMap;

/// Multiplier applied to the historical day-level p95 average.
pub const DEFAULT_OUTLIER_FACTOR: f64 = 2.0;

/// A sample is an outlier when it is strictly slower than the threshold.
pub fn is_outlier(latency_ms: f64, threshold: f64) -> bool {
    latency_ms > threshold
}

/// Per-endpoint latency thresholds for one minute tick.
///
/// Rebuilt at the start of every tick from the day-level p95 averages.
/// Endpoints without day history get an infinite threshold.
#[derive(Debug, Clone, Default)]
pub struct Baseline {
    thresholds: HashMap<String, f64>,
}

impl Baseline {
    pub fn from_day_p95(averages: HashMap<String, f64>, factor: f64) -> Self {
        let thresholds = averages
            .into_iter()
            .map(|(endpoint, avg_p95)| (endpoint, avg_p95 * factor))
            .collect();
        Self { thresholds }
    }

    pub fn threshold(&self, endpoint: &str) -> f64 {
        self.thresholds.get(endpoint).copied().unwrap_or(f64::INFINITY)
    }

    pub fn is_outlier(&self, endpoint: &str, latency_ms: f64) -> bool {
        is_outlier(latency_ms, self.threshold(endpoint))
    }
}
