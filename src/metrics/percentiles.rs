use serde::Serialize;

/// Summary statistics for one group of latencies (milliseconds).
/// Written verbatim into a minute-resolution bucket.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyStats {
    pub count: u64,
    pub median: f64,
    pub average: f64,
    pub p95: f64,
    pub p99: f64,
}

impl LatencyStats {
    /// Summarise a group of raw latencies.
    /// Returns `None` for an empty group: empty groups are skipped, never
    /// summarised as zero.
    pub fn from_latencies(latencies: &[f64]) -> Option<Self> {
        if latencies.is_empty() {
            return None;
        }

        let mut sorted = latencies.to_vec();
        sorted.sort_by(f64::total_cmp);

        let sum: f64 = sorted.iter().sum();

        Some(Self {
            count: sorted.len() as u64,
            median: median_of_sorted(&sorted),
            average: sum / sorted.len() as f64,
            p95: percentile_of_sorted(&sorted, 0.95),
            p99: percentile_of_sorted(&sorted, 0.99),
        })
    }
}

// ─── Percentile ──────────────────────────────────────────────────

/// Linear-interpolation percentile (the spreadsheet `PERCENTILE` method).
///
/// `p` is a fraction in `[0, 1]`; values outside are clamped.
///
/// # Panics
/// Panics if `values` is empty. Callers skip empty groups.
pub fn percentile(values: &[f64], p: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    percentile_of_sorted(&sorted, p)
}

fn percentile_of_sorted(sorted: &[f64], p: f64) -> f64 {
    assert!(!sorted.is_empty(), "percentile of an empty sequence");

    let len = sorted.len();
    let p = p.clamp(0.0, 1.0);
    let rank = (len - 1) as f64 * p + 1.0;

    if rank <= 1.0 {
        return sorted[0];
    }
    if rank >= len as f64 {
        return sorted[len - 1];
    }

    let k = rank.floor() as usize;
    let d = rank - k as f64;
    sorted[k - 1] + d * (sorted[k] - sorted[k - 1])
}

// ─── Median ──────────────────────────────────────────────────────

/// Middle element for odd lengths, mean of the two middle elements for
/// even lengths.
///
/// # Panics
/// Panics if `values` is empty. Callers skip empty groups.
pub fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    median_of_sorted(&sorted)
}

fn median_of_sorted(sorted: &[f64]) -> f64 {
    assert!(!sorted.is_empty(), "median of an empty sequence");

    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn median_odd_and_even() {
        assert_eq!(median(&[1.0, 2.0, 3.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 4.0]), 2.5);
        assert_eq!(median(&[4.0, 1.0, 3.0, 2.0]), 2.5);
    }

    #[test]
    fn percentile_interpolates_between_neighbours() {
        // rank = 3 * 0.95 + 1 = 3.85 → 30 + 0.85 * 10
        let p95 = percentile(&[40.0, 10.0, 30.0, 20.0], 0.95);
        assert!((p95 - 38.5).abs() < 1e-9);
    }

    #[test]
    fn percentile_boundaries_return_exact_elements() {
        let values = [7.5, 3.25, 9.125, 1.0, 4.0];
        assert_eq!(percentile(&values, 0.0), 1.0);
        assert_eq!(percentile(&values, 1.0), 9.125);
        assert_eq!(percentile(&[42.0], 0.95), 42.0);
        assert_eq!(percentile(&[42.0], 0.0), 42.0);
    }

    #[test]
    fn percentile_of_one_is_max_for_many_lengths() {
        for len in 1..50usize {
            let values: Vec<f64> = (0..len).map(|i| ((i * 37) % 101) as f64 * 0.3).collect();
            let max = values.iter().cloned().fold(f64::MIN, f64::max);
            assert_eq!(percentile(&values, 1.0), max, "len={len}");
        }
    }

    #[test]
    fn percentile_half_agrees_with_median() {
        let values = [10.0, 20.0, 30.0, 40.0];
        assert_eq!(percentile(&values, 0.5), median(&values));
        assert_eq!(percentile(&values, 0.5), 25.0);

        let odd = [5.0, 1.0, 9.0];
        assert_eq!(percentile(&odd, 0.5), median(&odd));
    }

    #[test]
    fn stats_summarise_group() {
        let stats = LatencyStats::from_latencies(&[10.0, 20.0, 30.0, 40.0]).unwrap();
        assert_eq!(stats.count, 4);
        assert_eq!(stats.median, 25.0);
        assert_eq!(stats.average, 25.0);
        assert!((stats.p95 - 38.5).abs() < 1e-9);
        assert!((stats.p99 - 39.7).abs() < 1e-9);
    }

    #[test]
    fn stats_of_empty_group_is_none() {
        assert!(LatencyStats::from_latencies(&[]).is_none());
    }

    #[test]
    #[should_panic(expected = "empty")]
    fn percentile_of_empty_panics() {
        percentile(&[], 0.5);
    }
}
