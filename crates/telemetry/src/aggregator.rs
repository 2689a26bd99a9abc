//! Bounded ring buffer of request samples and the rolling statistics the
//! alert rules and rollback triggers read.

use chrono::{DateTime, Duration, Utc};
use guard_core::types::{MetricSample, WebVitalsAvg, WindowStats};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

/// Requests slower than this count toward `slow_count`.
const SLOW_THRESHOLD_MS: u64 = 2000;

/// Fixed-capacity sample window. When full, the oldest sample is evicted;
/// appending is O(1) amortized.
pub struct MetricsAggregator {
    samples: Mutex<VecDeque<MetricSample>>,
    capacity: usize,
}

impl MetricsAggregator {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    pub fn with_defaults() -> Self {
        Self::new(1000)
    }

    pub fn record_sample(&self, sample: MetricSample) {
        let mut samples = self.samples.lock();
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(sample);
    }

    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    /// Rolling statistics over samples newer than `now - window_minutes`.
    /// An empty window yields zeroed stats rather than an error.
    pub fn compute_stats_at(&self, window_minutes: i64, now: DateTime<Utc>) -> WindowStats {
        let cutoff = now - Duration::minutes(window_minutes);
        let samples = self.samples.lock();
        let windowed: Vec<&MetricSample> =
            samples.iter().filter(|s| s.timestamp >= cutoff).collect();

        if windowed.is_empty() {
            return WindowStats::empty(window_minutes);
        }

        let request_count = windowed.len();
        let error_count = windowed.iter().filter(|s| s.is_error()).count();
        let slow_count = windowed
            .iter()
            .filter(|s| s.duration_ms > SLOW_THRESHOLD_MS)
            .count();
        let total_duration: u64 = windowed.iter().map(|s| s.duration_ms).sum();

        let mut vitals = WebVitalsAvg::default();
        let mut lcp_sum = 0.0;
        let mut lcp_n = 0usize;
        let mut delay_sum = 0.0;
        let mut delay_n = 0usize;
        let mut shift_sum = 0.0;
        let mut shift_n = 0usize;
        for s in &windowed {
            if let Some(v) = &s.web_vitals {
                vitals.sample_count += 1;
                if let Some(lcp) = v.largest_paint_ms {
                    lcp_sum += lcp;
                    lcp_n += 1;
                }
                if let Some(delay) = v.input_delay_ms {
                    delay_sum += delay;
                    delay_n += 1;
                }
                if let Some(shift) = v.layout_shift {
                    shift_sum += shift;
                    shift_n += 1;
                }
            }
        }
        if lcp_n > 0 {
            vitals.largest_paint_ms = lcp_sum / lcp_n as f64;
        }
        if delay_n > 0 {
            vitals.input_delay_ms = delay_sum / delay_n as f64;
        }
        if shift_n > 0 {
            vitals.layout_shift = shift_sum / shift_n as f64;
        }

        let stats = WindowStats {
            request_count,
            error_count,
            error_rate_pct: error_count as f64 / request_count as f64 * 100.0,
            avg_duration_ms: total_duration as f64 / request_count as f64,
            slow_count,
            vitals,
            window_minutes,
            computed_at: now,
        };
        debug!(
            requests = stats.request_count,
            error_rate_pct = stats.error_rate_pct,
            "Window stats computed"
        );
        stats
    }

    pub fn compute_stats(&self, window_minutes: i64) -> WindowStats {
        self.compute_stats_at(window_minutes, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guard_core::types::WebVitals;

    fn sample(age_secs: i64, duration_ms: u64, status: u16) -> MetricSample {
        MetricSample {
            timestamp: Utc::now() - Duration::seconds(age_secs),
            route: "/api/bookings".into(),
            method: "GET".into(),
            duration_ms,
            status_code: status,
            web_vitals: None,
        }
    }

    #[test]
    fn test_ring_buffer_evicts_oldest() {
        let agg = MetricsAggregator::new(3);
        for i in 0..5 {
            agg.record_sample(sample(0, i * 10, 200));
        }
        assert_eq!(agg.sample_count(), 3);
        let stats = agg.compute_stats(5);
        // oldest two (0ms, 10ms) evicted; 20+30+40 remain
        assert_eq!(stats.request_count, 3);
        assert!((stats.avg_duration_ms - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_empty_window_is_zeroed() {
        let agg = MetricsAggregator::with_defaults();
        let stats = agg.compute_stats(5);
        assert_eq!(stats.request_count, 0);
        assert_eq!(stats.error_rate_pct, 0.0);
        assert_eq!(stats.avg_duration_ms, 0.0);

        // samples outside the window are excluded
        agg.record_sample(sample(600, 100, 200));
        assert_eq!(agg.compute_stats(5).request_count, 0);
    }

    #[test]
    fn test_error_rate_two_of_ten() {
        let agg = MetricsAggregator::with_defaults();
        for _ in 0..8 {
            agg.record_sample(sample(10, 100, 200));
        }
        agg.record_sample(sample(5, 100, 500));
        agg.record_sample(sample(5, 100, 503));

        let stats = agg.compute_stats(5);
        assert_eq!(stats.request_count, 10);
        assert_eq!(stats.error_count, 2);
        assert!((stats.error_rate_pct - 20.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_slow_count_threshold() {
        let agg = MetricsAggregator::with_defaults();
        agg.record_sample(sample(1, 1999, 200));
        agg.record_sample(sample(1, 2000, 200));
        agg.record_sample(sample(1, 2001, 200));
        agg.record_sample(sample(1, 8000, 200));
        assert_eq!(agg.compute_stats(5).slow_count, 2);
    }

    #[test]
    fn test_web_vitals_averages() {
        let agg = MetricsAggregator::with_defaults();
        let mut s = sample(1, 100, 200);
        s.web_vitals = Some(WebVitals {
            largest_paint_ms: Some(1200.0),
            input_delay_ms: Some(40.0),
            layout_shift: Some(0.05),
        });
        agg.record_sample(s);
        let mut s = sample(1, 100, 200);
        s.web_vitals = Some(WebVitals {
            largest_paint_ms: Some(1800.0),
            input_delay_ms: None,
            layout_shift: Some(0.15),
        });
        agg.record_sample(s);
        agg.record_sample(sample(1, 100, 200)); // no vitals

        let stats = agg.compute_stats(5);
        assert_eq!(stats.vitals.sample_count, 2);
        assert!((stats.vitals.largest_paint_ms - 1500.0).abs() < f64::EPSILON);
        assert!((stats.vitals.input_delay_ms - 40.0).abs() < f64::EPSILON);
        assert!((stats.vitals.layout_shift - 0.1).abs() < 1e-9);
    }
}
