use crate::domain::Category;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts, Registry, TextEncoder,
};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),
}

/// Prometheus instruments for the write path, registered on a registry owned
/// by this struct so several writers can live in one process.
#[derive(Clone)]
pub struct WriterMetrics {
    registry: Registry,
    bytes: IntCounterVec,
    points: IntCounterVec,
    sink_points: IntCounterVec,
    api_requests: IntCounterVec,
    api_latency: HistogramVec,
    dropped_points: IntCounterVec,
    cache: IntCounterVec,
    beyond_usage: IntGauge,
}

impl WriterMetrics {
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let bytes = IntCounterVec::new(
            Opts::new("dataway_bytes_total", "Bytes sent to dataway"),
            &["category", "status"],
        )?;
        registry.register(Box::new(bytes.clone()))?;

        let points = IntCounterVec::new(
            Opts::new("dataway_points_total", "Points sent to dataway"),
            &["category", "status"],
        )?;
        registry.register(Box::new(points.clone()))?;

        let sink_points = IntCounterVec::new(
            Opts::new("dataway_sink_points_total", "Points sent through sink"),
            &["category", "status"],
        )?;
        registry.register(Box::new(sink_points.clone()))?;

        let api_requests = IntCounterVec::new(
            Opts::new("dataway_api_request_total", "Dataway API requests"),
            &["api", "status"],
        )?;
        registry.register(Box::new(api_requests.clone()))?;

        let api_latency = HistogramVec::new(
            HistogramOpts::new("dataway_api_latency_seconds", "Dataway API latency")
                .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["api", "status"],
        )?;
        registry.register(Box::new(api_latency.clone()))?;

        let dropped_points = IntCounterVec::new(
            Opts::new(
                "dataway_dropped_points_total",
                "Points dropped after failed delivery",
            ),
            &["category", "reason"],
        )?;
        registry.register(Box::new(dropped_points.clone()))?;

        let cache = IntCounterVec::new(
            Opts::new("dataway_cache_total", "Bodies handed to the overflow cache"),
            &["category", "result"],
        )?;
        registry.register(Box::new(cache.clone()))?;

        let beyond_usage = IntGauge::new(
            "dataway_beyond_usage",
            "Unix time the workspace ran out of data quota, 0 when within quota",
        )?;
        registry.register(Box::new(beyond_usage.clone()))?;

        Ok(Self {
            registry,
            bytes,
            points,
            sink_points,
            api_requests,
            api_latency,
            dropped_points,
            cache,
            beyond_usage,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_body(&self, category: Category, status: &str, npts: usize, bytes: usize, sink: bool) {
        let labels = [category.name(), status];
        self.bytes.with_label_values(&labels).inc_by(bytes as u64);
        self.points.with_label_values(&labels).inc_by(npts as u64);
        if sink {
            self.sink_points.with_label_values(&labels).inc_by(npts as u64);
        }
    }

    pub fn record_api(&self, api: &str, status: &str, latency: Duration) {
        let labels = [api, status];
        self.api_requests.with_label_values(&labels).inc();
        self.api_latency
            .with_label_values(&labels)
            .observe(latency.as_secs_f64());
    }

    pub fn record_dropped(&self, category: Category, reason: &str, npts: usize) {
        self.dropped_points
            .with_label_values(&[category.name(), reason])
            .inc_by(npts as u64);
    }

    pub fn record_cache(&self, category: Category, result: &str) {
        self.cache.with_label_values(&[category.name(), result]).inc();
    }

    pub fn set_beyond_usage(&self, since: i64) {
        self.beyond_usage.set(since);
    }

    pub fn points_total(&self, category: Category, status: &str) -> u64 {
        self.points.with_label_values(&[category.name(), status]).get()
    }

    pub fn bytes_total(&self, category: Category, status: &str) -> u64 {
        self.bytes.with_label_values(&[category.name(), status]).get()
    }

    pub fn sink_points_total(&self, category: Category, status: &str) -> u64 {
        self.sink_points
            .with_label_values(&[category.name(), status])
            .get()
    }

    pub fn api_requests_total(&self, api: &str, status: &str) -> u64 {
        self.api_requests.with_label_values(&[api, status]).get()
    }

    pub fn dropped_total(&self, category: Category, reason: &str) -> u64 {
        self.dropped_points
            .with_label_values(&[category.name(), reason])
            .get()
    }

    pub fn cache_total(&self, category: Category, result: &str) -> u64 {
        self.cache.with_label_values(&[category.name(), result]).get()
    }

    pub fn beyond_usage(&self) -> i64 {
        self.beyond_usage.get()
    }

    pub fn export(&self) -> Result<String, MetricsError> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;

        Ok(String::from_utf8_lossy(&buffer).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_counters_are_labeled() {
        let metrics = WriterMetrics::new().unwrap();
        metrics.record_body(Category::Metric, "OK", 3, 120, false);
        metrics.record_body(Category::Metric, "OK", 2, 80, true);
        metrics.record_body(Category::Logging, "Internal Server Error", 1, 10, false);

        assert_eq!(metrics.points_total(Category::Metric, "OK"), 5);
        assert_eq!(metrics.bytes_total(Category::Metric, "OK"), 200);
        assert_eq!(metrics.sink_points_total(Category::Metric, "OK"), 2);
        assert_eq!(metrics.points_total(Category::Logging, "Internal Server Error"), 1);
        assert_eq!(metrics.points_total(Category::Logging, "OK"), 0);
    }

    #[test]
    fn export_contains_registered_families() {
        let metrics = WriterMetrics::new().unwrap();
        metrics.record_api("/v1/write/metric", "OK", Duration::from_millis(12));
        metrics.record_dropped(Category::Object, "not_cacheable", 4);
        metrics.record_cache(Category::Logging, "cached");
        metrics.set_beyond_usage(1_700_000_000);

        let text = metrics.export().unwrap();
        assert!(text.contains("dataway_api_request_total"));
        assert!(text.contains("dataway_api_latency_seconds_bucket"));
        assert!(text.contains("dataway_dropped_points_total"));
        assert!(text.contains("dataway_beyond_usage 1700000000"));
        assert_eq!(metrics.beyond_usage(), 1_700_000_000);
    }

    #[test]
    fn registries_are_independent() {
        let a = WriterMetrics::new().unwrap();
        let b = WriterMetrics::new().unwrap();
        a.record_cache(Category::Rum, "cached");
        assert_eq!(a.cache_total(Category::Rum, "cached"), 1);
        assert_eq!(b.cache_total(Category::Rum, "cached"), 0);
    }
}
