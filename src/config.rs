use std::env;
use std::ops::RangeInclusive;
use std::str::FromStr;

use chrono::Duration;

use crate::metrics::Retention;

/// Which `TelemetryStore` the binary runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    Redis,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

pub struct Config {
    pub port: u16,
    pub redis_url: String,
    pub redis_key_prefix: String,
    pub storage_backend: StorageBackend,
    pub outlier_factor: f64,
    pub minute_retention_days: i64,
    pub hour_retention_days: i64,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            port: parsed("PORT", 3000),
            redis_url: env::var("REDIS_URL")
                .unwrap_or_else(|_| "redis://127.0.0.1:6379/".to_string()),
            redis_key_prefix: env::var("REDIS_KEY_PREFIX")
                .unwrap_or_else(|_| "telemetry".to_string()),
            storage_backend: parsed("STORAGE_BACKEND", StorageBackend::Redis),
            outlier_factor: parsed("OUTLIER_FACTOR", 2.0),
            minute_retention_days: retention_days("MINUTE_RETENTION_DAYS", 30),
            hour_retention_days: retention_days("HOUR_RETENTION_DAYS", 183),
        }
    }

    pub fn retention(&self) -> Retention {
        Retention {
            minutes: Duration::days(self.minute_retention_days),
            hours: Duration::days(self.hour_retention_days),
        }
    }
}

/// Retention windows accepted from the environment, in days.
const RETENTION_DAYS: RangeInclusive<i64> = 1..=3650;

fn retention_days(key: &str, default: i64) -> i64 {
    let days = parsed(key, default);
    if RETENTION_DAYS.contains(&days) {
        days
    } else {
        tracing::warn!(key, days, default, "retention outside 1..=3650 days; using default");
        default
    }
}

fn parsed<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
