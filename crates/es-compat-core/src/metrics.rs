//! Metrics for the ES compat client
//!
//! Recorded through the `metrics` facade; installing an exporter is left to
//! the host application.

use metrics::{counter, gauge, histogram};
use std::time::{Duration, Instant};

/// Metric names as constants for consistency
pub mod names {
    // Dispatcher metrics
    pub const DISPATCH_REQUESTS_TOTAL: &str = "es_compat_requests_total";
    pub const DISPATCH_LATENCY: &str = "es_compat_request_latency_seconds";
    pub const DISPATCH_ERRORS_TOTAL: &str = "es_compat_request_errors_total";
    pub const DISPATCH_TOLERATED_TOTAL: &str = "es_compat_tolerated_status_total";

    // Connection cache metrics
    pub const CACHE_HITS_TOTAL: &str = "es_compat_cache_hits_total";
    pub const CACHE_MISSES_TOTAL: &str = "es_compat_cache_misses_total";
    pub const CACHE_EVICTIONS_TOTAL: &str = "es_compat_cache_evictions_total";
    pub const CACHE_SIZE: &str = "es_compat_cache_connections";

    // Bulk metrics
    pub const BULK_REQUESTS: &str = "es_compat_bulk_requests_total";
    pub const BULK_DOCS_WRITTEN: &str = "es_compat_bulk_docs_written_total";
    pub const BULK_DOCS_FAILED: &str = "es_compat_bulk_docs_failed_total";
    pub const BULK_DOCS_RETRIED: &str = "es_compat_bulk_docs_retried_total";
    pub const BULK_LATENCY: &str = "es_compat_bulk_latency_seconds";
    pub const BULK_PENDING: &str = "es_compat_bulk_pending_actions";
}

/// Labels for metrics
pub mod labels {
    pub const ACTION: &str = "action";
    pub const VERSION: &str = "version";
    pub const POLICY: &str = "policy";
    pub const ERROR_TYPE: &str = "error_type";
    pub const STATUS: &str = "status";
}

/// Dispatcher metrics
#[derive(Clone)]
pub struct DispatcherMetrics {
    version: &'static str,
}

impl DispatcherMetrics {
    pub fn new(version: &'static str) -> Self {
        Self { version }
    }

    pub fn record_request(&self, action: &'static str) {
        counter!(
            names::DISPATCH_REQUESTS_TOTAL,
            labels::ACTION => action,
            labels::VERSION => self.version,
        )
        .increment(1);
    }

    pub fn record_latency(&self, action: &'static str, duration: Duration) {
        histogram!(
            names::DISPATCH_LATENCY,
            labels::ACTION => action,
            labels::VERSION => self.version,
        )
        .record(duration.as_secs_f64());
    }

    pub fn record_error(&self, action: &'static str, error_type: &'static str) {
        counter!(
            names::DISPATCH_ERRORS_TOTAL,
            labels::ACTION => action,
            labels::ERROR_TYPE => error_type,
        )
        .increment(1);
    }

    /// Non-2xx status read back as data
    pub fn record_tolerated(&self, action: &'static str, status: u16) {
        counter!(
            names::DISPATCH_TOLERATED_TOTAL,
            labels::ACTION => action,
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }
}

/// Connection cache metrics
#[derive(Clone)]
pub struct CacheMetrics {
    policy: &'static str,
}

impl CacheMetrics {
    pub fn new(policy: &'static str) -> Self {
        Self { policy }
    }

    pub fn record_hit(&self) {
        counter!(names::CACHE_HITS_TOTAL, labels::POLICY => self.policy).increment(1);
    }

    pub fn record_miss(&self) {
        counter!(names::CACHE_MISSES_TOTAL, labels::POLICY => self.policy).increment(1);
    }

    pub fn record_eviction(&self) {
        counter!(names::CACHE_EVICTIONS_TOTAL, labels::POLICY => self.policy).increment(1);
    }

    pub fn set_size(&self, size: u64) {
        gauge!(names::CACHE_SIZE, labels::POLICY => self.policy).set(size as f64);
    }
}

/// Bulk pipeline metrics
#[derive(Clone)]
pub struct BulkMetrics {
    component: String,
}

impl BulkMetrics {
    pub fn new(component: impl Into<String>) -> Self {
        Self {
            component: component.into(),
        }
    }

    pub fn record_bulk_request(&self, status: &str) {
        counter!(
            names::BULK_REQUESTS,
            "component" => self.component.clone(),
            labels::STATUS => status.to_string(),
        )
        .increment(1);
    }

    pub fn record_written(&self, count: u64) {
        counter!(names::BULK_DOCS_WRITTEN, "component" => self.component.clone()).increment(count);
    }

    pub fn record_failed(&self, count: u64) {
        counter!(names::BULK_DOCS_FAILED, "component" => self.component.clone()).increment(count);
    }

    pub fn record_retried(&self, count: u64) {
        counter!(names::BULK_DOCS_RETRIED, "component" => self.component.clone()).increment(count);
    }

    pub fn record_bulk_latency(&self, duration: Duration) {
        histogram!(names::BULK_LATENCY, "component" => self.component.clone())
            .record(duration.as_secs_f64());
    }

    pub fn set_pending(&self, pending: usize) {
        gauge!(names::BULK_PENDING, "component" => self.component.clone()).set(pending as f64);
    }
}

/// Timer guard for automatic latency recording
pub struct LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    start: Instant,
    on_drop: Option<F>,
}

impl<F> LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    pub fn start(on_drop: F) -> Self {
        Self {
            start: Instant::now(),
            on_drop: Some(on_drop),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop timer and record
    pub fn stop(mut self) -> Duration {
        let elapsed = self.start.elapsed();
        if let Some(f) = self.on_drop.take() {
            f(elapsed);
        }
        elapsed
    }
}

impl<F> Drop for LatencyTimer<F>
where
    F: FnOnce(Duration),
{
    fn drop(&mut self) {
        if let Some(f) = self.on_drop.take() {
            f(self.start.elapsed());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_latency_timer_records_once() {
        let mut calls = 0;
        {
            let timer = LatencyTimer::start(|_| calls += 1);
            std::thread::sleep(Duration::from_millis(5));
            assert!(timer.stop() >= Duration::from_millis(5));
        }
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_recording_without_exporter_is_noop() {
        let metrics = DispatcherMetrics::new("v5.6");
        metrics.record_request("search");
        metrics.record_tolerated("get", 404);
        CacheMetrics::new("always").set_size(3);
        BulkMetrics::new("test").record_written(10);
    }
}
