//! Lock-free reconciliation counters
//!
//! NOTE: All atomics use Relaxed ordering intentionally. These are statistical
//! counters only. Do NOT use these atomics for coordination or logic decisions.

use crate::domain::error::TwinError;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::info;

/// Update an atomic max value using compare-and-swap loop
#[inline]
fn update_atomic_max(atomic_max: &AtomicU64, new_value: u64) {
    let mut current_max = atomic_max.load(Ordering::Relaxed);
    while new_value > current_max {
        match atomic_max.compare_exchange_weak(
            current_max,
            new_value,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => break,
            Err(actual) => current_max = actual,
        }
    }
}

/// Lock-free metrics collector
///
/// Counters are monotonic; `report()` reads a snapshot without resetting so
/// the values can be scraped as Prometheus counters.
#[derive(Default)]
pub struct Metrics {
    /// Sensor events decoded and reconciled
    events_accepted: AtomicU64,
    /// Sensor events dropped as malformed
    events_rejected: AtomicU64,
    /// Anomaly batches received
    anomaly_batches: AtomicU64,
    /// Anomaly records that caused a twin write
    anomaly_records_applied: AtomicU64,
    /// Anomaly records already reflected in the twin
    anomaly_records_skipped: AtomicU64,
    /// Patch calls issued to the twin store
    patches_applied: AtomicU64,
    /// Reconciliations that produced an empty diff
    patches_skipped: AtomicU64,
    /// Individual properties written across all patches
    properties_written: AtomicU64,
    /// Room samples whose sensor values were older than the twin's
    stale_samples: AtomicU64,
    twin_not_found: AtomicU64,
    twin_unavailable: AtomicU64,
    twin_conflict: AtomicU64,
    twin_timeout: AtomicU64,
    /// Sum of per-event reconciliation latencies in microseconds
    reconcile_latency_sum_us: AtomicU64,
    /// Max per-event reconciliation latency in microseconds
    reconcile_latency_max_us: AtomicU64,
}

/// Point-in-time copy of all counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSummary {
    pub events_accepted: u64,
    pub events_rejected: u64,
    pub anomaly_batches: u64,
    pub anomaly_records_applied: u64,
    pub anomaly_records_skipped: u64,
    pub patches_applied: u64,
    pub patches_skipped: u64,
    pub properties_written: u64,
    pub stale_samples: u64,
    pub twin_not_found: u64,
    pub twin_unavailable: u64,
    pub twin_conflict: u64,
    pub twin_timeout: u64,
    pub avg_reconcile_latency_us: u64,
    pub max_reconcile_latency_us: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn record_event_accepted(&self, latency_us: u64) {
        self.events_accepted.fetch_add(1, Ordering::Relaxed);
        self.reconcile_latency_sum_us.fetch_add(latency_us, Ordering::Relaxed);
        update_atomic_max(&self.reconcile_latency_max_us, latency_us);
    }

    #[inline]
    pub fn record_event_rejected(&self) {
        self.events_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_anomaly_batch(&self, applied: usize, skipped: usize) {
        self.anomaly_batches.fetch_add(1, Ordering::Relaxed);
        self.anomaly_records_applied.fetch_add(applied as u64, Ordering::Relaxed);
        self.anomaly_records_skipped.fetch_add(skipped as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_patch_applied(&self, properties: usize) {
        self.patches_applied.fetch_add(1, Ordering::Relaxed);
        self.properties_written.fetch_add(properties as u64, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_patch_skipped(&self) {
        self.patches_skipped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_stale_sample(&self) {
        self.stale_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_twin_error(&self, error: &TwinError) {
        let counter = match error {
            TwinError::NotFound(_) => &self.twin_not_found,
            TwinError::Unavailable(_) => &self.twin_unavailable,
            TwinError::Conflict(_) => &self.twin_conflict,
            TwinError::Timeout(_) => &self.twin_timeout,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn report(&self) -> MetricsSummary {
        let events_accepted = self.events_accepted.load(Ordering::Relaxed);
        let latency_sum = self.reconcile_latency_sum_us.load(Ordering::Relaxed);
        let avg_reconcile_latency_us = latency_sum.checked_div(events_accepted).unwrap_or(0);

        MetricsSummary {
            events_accepted,
            events_rejected: self.events_rejected.load(Ordering::Relaxed),
            anomaly_batches: self.anomaly_batches.load(Ordering::Relaxed),
            anomaly_records_applied: self.anomaly_records_applied.load(Ordering::Relaxed),
            anomaly_records_skipped: self.anomaly_records_skipped.load(Ordering::Relaxed),
            patches_applied: self.patches_applied.load(Ordering::Relaxed),
            patches_skipped: self.patches_skipped.load(Ordering::Relaxed),
            properties_written: self.properties_written.load(Ordering::Relaxed),
            stale_samples: self.stale_samples.load(Ordering::Relaxed),
            twin_not_found: self.twin_not_found.load(Ordering::Relaxed),
            twin_unavailable: self.twin_unavailable.load(Ordering::Relaxed),
            twin_conflict: self.twin_conflict.load(Ordering::Relaxed),
            twin_timeout: self.twin_timeout.load(Ordering::Relaxed),
            avg_reconcile_latency_us,
            max_reconcile_latency_us: self.reconcile_latency_max_us.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            events_accepted = %self.events_accepted,
            events_rejected = %self.events_rejected,
            patches_applied = %self.patches_applied,
            patches_skipped = %self.patches_skipped,
            properties_written = %self.properties_written,
            stale_samples = %self.stale_samples,
            anomaly_batches = %self.anomaly_batches,
            twin_errors = %(self.twin_not_found + self.twin_unavailable + self.twin_conflict + self.twin_timeout),
            avg_latency_us = %self.avg_reconcile_latency_us,
            max_latency_us = %self.max_reconcile_latency_us,
            "metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_counters_accumulate() {
        let metrics = Metrics::new();
        metrics.record_event_accepted(100);
        metrics.record_event_accepted(300);
        metrics.record_event_rejected();
        metrics.record_patch_applied(3);
        metrics.record_patch_applied(1);
        metrics.record_patch_skipped();
        metrics.record_twin_error(&TwinError::NotFound("Door".to_string()));
        metrics.record_twin_error(&TwinError::Timeout(50));
        metrics.record_anomaly_batch(2, 1);

        let summary = metrics.report();
        assert_eq!(summary.events_accepted, 2);
        assert_eq!(summary.events_rejected, 1);
        assert_eq!(summary.patches_applied, 2);
        assert_eq!(summary.properties_written, 4);
        assert_eq!(summary.patches_skipped, 1);
        assert_eq!(summary.twin_not_found, 1);
        assert_eq!(summary.twin_timeout, 1);
        assert_eq!(summary.anomaly_batches, 1);
        assert_eq!(summary.anomaly_records_applied, 2);
        assert_eq!(summary.anomaly_records_skipped, 1);
        assert_eq!(summary.avg_reconcile_latency_us, 200);
        assert_eq!(summary.max_reconcile_latency_us, 300);
    }

    #[test]
    fn test_report_does_not_reset() {
        let metrics = Metrics::new();
        metrics.record_patch_skipped();
        assert_eq!(metrics.report().patches_skipped, 1);
        assert_eq!(metrics.report().patches_skipped, 1);
    }

    #[test]
    fn test_concurrent_max_latency() {
        let metrics = Arc::new(Metrics::new());
        let handles: Vec<_> = (1..=8u64)
            .map(|i| {
                let m = metrics.clone();
                std::thread::spawn(move || {
                    for j in 0..100 {
                        m.record_event_accepted(i * 1000 + j);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        let summary = metrics.report();
        assert_eq!(summary.events_accepted, 800);
        assert_eq!(summary.max_reconcile_latency_us, 8099);
    }
}
