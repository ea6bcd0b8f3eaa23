use std::mem;

use chrono::Utc;
use parking_lot::Mutex;
use serde::Serialize;

use super::{Metadata, Sample};

// ─── Public types ────────────────────────────────────────────────

/// Thread-safe sample buffer.
/// The timing layer calls `record_sample()`, the minute tick calls
/// `drain_and_reset()`. Nothing else ever empties it.
pub struct SampleBuffer {
    inner: Mutex<Inner>,
}

/// Usage counters accumulated between two minute ticks.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CounterSnapshot {
    pub downloads: u64,
    pub views: u64,
    pub uploads: u64,
    /// Requests that finished with a 5xx status
    pub errors: u64,
}

/// Non-draining view of the buffer for the live dashboard feed.
#[derive(Debug, Clone, Serialize)]
pub struct PendingSnapshot {
    pub pending_samples: usize,
    pub endpoints: usize,
    pub counters: CounterSnapshot,
}

// ─── Internal state ──────────────────────────────────────────────

#[derive(Default)]
struct Inner {
    samples: Vec<Sample>,
    counters: CounterSnapshot,
}

// ─── SampleBuffer impl ───────────────────────────────────────────

impl SampleBuffer {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Append a fully formed sample.
    pub fn record(&self, sample: Sample) {
        self.inner.lock().samples.push(sample);
    }

    /// Append a sample stamped with the current time.
    pub fn record_sample(&self, endpoint: impl Into<String>, latency_ms: f64, metadata: Metadata) {
        self.record_with_status(endpoint, latency_ms, 0, metadata);
    }

    /// Same as `record_sample`, keeping the response status alongside.
    pub fn record_with_status(
        &self,
        endpoint: impl Into<String>,
        latency_ms: f64,
        status: u16,
        metadata: Metadata,
    ) {
        // Build outside the lock so the critical section is a single push
        let sample = Sample {
            endpoint: endpoint.into(),
            timestamp: Utc::now(),
            latency_ms,
            status,
            metadata,
        };
        self.record(sample);
    }

    pub fn increment_downloads(&self) {
        self.inner.lock().counters.downloads += 1;
    }

    pub fn increment_views(&self) {
        self.inner.lock().counters.views += 1;
    }

    pub fn increment_uploads(&self) {
        self.inner.lock().counters.uploads += 1;
    }

    pub fn increment_errors(&self) {
        self.inner.lock().counters.errors += 1;
    }

    /// Take everything recorded so far and leave the buffer empty.
    ///
    /// Samples and counters are swapped out under one lock acquisition, so
    /// every concurrent `record`/`increment_*` lands either in this drain or
    /// in the next one, never both and never neither.
    pub fn drain_and_reset(&self) -> (Vec<Sample>, CounterSnapshot) {
        let taken = mem::take(&mut *self.inner.lock());
        (taken.samples, taken.counters)
    }

    pub fn pending(&self) -> PendingSnapshot {
        let (mut endpoints, counters) = {
            let inner = self.inner.lock();
            let endpoints: Vec<String> = inner.samples.iter().map(|s| s.endpoint.clone()).collect();
            (endpoints, inner.counters)
        };
        let pending_samples = endpoints.len();

        // Sorting happens with the lock released so ingestion is not held up
        endpoints.sort_unstable();
        endpoints.dedup();

        PendingSnapshot {
            pending_samples,
            endpoints: endpoints.len(),
            counters,
        }
    }
}

impl Default for SampleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn drain_returns_everything_and_empties() {
        let buffer = SampleBuffer::new();
        buffer.record_sample("GET /a", 12.0, json!({}));
        buffer.record_sample("GET /b", 3.0, json!({ "q": 1 }));
        buffer.increment_downloads();
        buffer.increment_views();
        buffer.increment_views();

        let (samples, counters) = buffer.drain_and_reset();
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].metadata, json!({ "q": 1 }));
        assert_eq!(
            counters,
            CounterSnapshot {
                downloads: 1,
                views: 2,
                uploads: 0,
                errors: 0
            }
        );

        let (samples, counters) = buffer.drain_and_reset();
        assert!(samples.is_empty());
        assert_eq!(counters, CounterSnapshot::default());
    }

    #[test]
    fn pending_does_not_drain() {
        let buffer = SampleBuffer::new();
        buffer.record_sample("GET /a", 1.0, json!(null));
        buffer.record_sample("GET /a", 2.0, json!(null));
        buffer.record_sample("POST /b", 2.0, json!(null));
        buffer.increment_uploads();

        let pending = buffer.pending();
        assert_eq!(pending.pending_samples, 3);
        assert_eq!(pending.endpoints, 2);
        assert_eq!(pending.counters.uploads, 1);
        assert_eq!(buffer.drain_and_reset().0.len(), 3);
    }

    #[test]
    fn pending_snapshots_while_writers_record() {
        const WRITERS: usize = 4;
        const PER_WRITER: usize = 2_000;

        let buffer = Arc::new(SampleBuffer::new());
        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        buffer.record_sample(format!("GET /w{w}"), i as f64, json!(null));
                    }
                })
            })
            .collect();

        let mut last = 0;
        while writers.iter().any(|h| !h.is_finished()) {
            let pending = buffer.pending();
            assert!(pending.pending_samples >= last);
            assert!(pending.endpoints <= WRITERS);
            last = pending.pending_samples;
        }
        for h in writers {
            h.join().unwrap();
        }

        let pending = buffer.pending();
        assert_eq!(pending.pending_samples, WRITERS * PER_WRITER);
        assert_eq!(pending.endpoints, WRITERS);
    }

    #[test]
    fn concurrent_ingest_and_drain_loses_nothing() {
        const WRITERS: usize = 8;
        const PER_WRITER: usize = 5_000;

        let buffer = Arc::new(SampleBuffer::new());

        let writers: Vec<_> = (0..WRITERS)
            .map(|w| {
                let buffer = buffer.clone();
                thread::spawn(move || {
                    for i in 0..PER_WRITER {
                        buffer.record_sample(format!("GET /w{w}"), i as f64, json!(i));
                        buffer.increment_views();
                    }
                })
            })
            .collect();

        let mut drained_samples = Vec::new();
        let mut drained_views = 0;
        while writers.iter().any(|h| !h.is_finished()) {
            let (samples, counters) = buffer.drain_and_reset();
            drained_samples.extend(samples);
            drained_views += counters.views;
            thread::yield_now();
        }
        for h in writers {
            h.join().unwrap();
        }
        let (samples, counters) = buffer.drain_and_reset();
        drained_samples.extend(samples);
        drained_views += counters.views;

        assert_eq!(drained_samples.len(), WRITERS * PER_WRITER);
        assert_eq!(drained_views, (WRITERS * PER_WRITER) as u64);

        // No duplicates: every (writer, index) pair shows up exactly once
        let mut keys: Vec<(String, i64)> = drained_samples
            .iter()
            .map(|s| (s.endpoint.clone(), s.metadata.as_i64().unwrap()))
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), WRITERS * PER_WRITER);
    }
}
