use hdrhistogram::Histogram as HdrHistogram;

/// Percentile/summary snapshot of a `LatencyHistogram`, in whatever unit was recorded.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistogramStats {
    pub min: u64,
    pub max: u64,
    pub mean: f64,
    pub p25: u64,
    pub p50: u64,
    pub p75: u64,
    pub p90: u64,
    pub p95: u64,
    pub p99: u64,
    pub p99_9: u64,
    pub p100: u64,
}

impl HistogramStats {
    pub fn empty() -> Self {
        Self {
            min: 0,
            max: 0,
            mean: 0.0,
            p25: 0,
            p50: 0,
            p75: 0,
            p90: 0,
            p95: 0,
            p99: 0,
            p99_9: 0,
            p100: 0,
        }
    }

    /// Convert a microsecond-denominated snapshot to milliseconds.
    pub fn to_millis(self) -> Self {
        let us_to_ms = |v: u64| v / 1000;
        Self {
            min: us_to_ms(self.min),
            max: us_to_ms(self.max),
            mean: self.mean / 1000.0,
            p25: us_to_ms(self.p25),
            p50: us_to_ms(self.p50),
            p75: us_to_ms(self.p75),
            p90: us_to_ms(self.p90),
            p95: us_to_ms(self.p95),
            p99: us_to_ms(self.p99),
            p99_9: us_to_ms(self.p99_9),
            p100: us_to_ms(self.p100),
        }
    }
}

/// High-dynamic-range recorder of integer microsecond durations.
///
/// Not `Sync` by design: each histogram is owned by a single task that writes
/// into it. Histograms are written only by the owning task.
pub struct LatencyHistogram {
    inner: HdrHistogram<u64>,
}

impl LatencyHistogram {
    /// `sigfig` of 3 keeps values accurate to within 0.1% across the whole
    /// recordable range, which is the usual choice for latency histograms.
    pub fn new() -> Self {
        Self {
            // 1 hour in microseconds is comfortably above any sane request latency.
            inner: HdrHistogram::new_with_bounds(1, 60 * 60 * 1_000_000, 3)
                .expect("static histogram bounds are valid"),
        }
    }

    /// Record a duration in microseconds. Spec: zero is coerced to 1; negative
    /// durations (which should not occur on a monotonic clock) are clamped to 1 too.
    pub fn record_micros(&mut self, value: i64) {
        let v = if value <= 0 { 1 } else { value as u64 };
        let _ = self.inner.record(v);
    }

    pub fn len(&self) -> u64 {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn snapshot(&self) -> HistogramStats {
        if self.inner.is_empty() {
            return HistogramStats::empty();
        }

        HistogramStats {
            min: self.inner.min(),
            max: self.inner.max(),
            mean: self.inner.mean(),
            p25: self.inner.value_at_percentile(25.0),
            p50: self.inner.value_at_percentile(50.0),
            p75: self.inner.value_at_percentile(75.0),
            p90: self.inner.value_at_percentile(90.0),
            p95: self.inner.value_at_percentile(95.0),
            p99: self.inner.value_at_percentile(99.0),
            p99_9: self.inner.value_at_percentile(99.9),
            p100: self.inner.value_at_percentile(100.0),
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_is_coerced_to_one_microsecond() {
        let mut h = LatencyHistogram::new();
        h.record_micros(0);
        let stats = h.snapshot();
        assert_eq!(stats.min, 1);
        assert_eq!(stats.max, 1);
    }

    #[test]
    fn percentiles_deterministic_regardless_of_insertion_order() {
        let ascending: Vec<i64> = (1..=100).collect();
        let mut descending = ascending.clone();
        descending.reverse();

        let mut h1 = LatencyHistogram::new();
        for v in &ascending {
            h1.record_micros(*v);
        }

        let mut h2 = LatencyHistogram::new();
        for v in &descending {
            h2.record_micros(*v);
        }

        assert_eq!(h1.snapshot(), h2.snapshot());
    }

    #[test]
    fn empty_histogram_reports_zeroed_stats() {
        let h = LatencyHistogram::new();
        assert_eq!(h.snapshot(), HistogramStats::empty());
        assert!(h.is_empty());
    }

    #[test]
    fn to_millis_divides_every_field_by_a_thousand() {
        let mut h = LatencyHistogram::new();
        for v in [1_000, 2_000, 3_000, 4_000, 5_000] {
            h.record_micros(v);
        }
        let ms = h.snapshot().to_millis();
        assert_eq!(ms.min, 1);
        assert_eq!(ms.max, 5);
    }
}
