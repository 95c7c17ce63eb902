use crate::config::{ConfigError, DatawayConfig};
use crate::domain::{Api, Category, Point};
use crate::reliability::cache::{CacheError, CacheQueue};
use crate::reliability::disk::DiskQueue;
use crate::reliability::health::DeliveryReporter;
use crate::reliability::metrics::{MetricsError, WriterMetrics};
use crate::reliability::quota::QuotaTracker;
use crate::sender::endpoint::{Endpoint, EndpointError, PullError, WriteError};
use crate::sender::request::WriteRequest;
use bytes::Bytes;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum DatawayError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("Endpoint error: {0}")]
    Endpoint(#[from] EndpointError),
    #[error("Metrics error: {0}")]
    Metrics(#[from] MetricsError),
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),
}

/// All configured gateways behind one write call. Endpoints share the quota
/// tracker, metrics and overflow queue.
pub struct Dataway {
    endpoints: Vec<Endpoint>,
    metrics: Arc<WriterMetrics>,
    quota: Arc<QuotaTracker>,
    disk_queue: Option<Arc<DiskQueue>>,
    gzip: bool,
}

impl Dataway {
    /// Build from config, opening the disk queue when caching is enabled.
    pub fn new(config: &DatawayConfig) -> Result<Self, DatawayError> {
        let disk_queue = if config.cache.enabled {
            Some(Arc::new(DiskQueue::new(config.cache.disk.clone())?))
        } else {
            None
        };
        let cache_queue = disk_queue
            .clone()
            .map(|q| q as Arc<dyn CacheQueue>);

        let mut dataway = Self::with_collaborators(config, cache_queue, None)?;
        dataway.disk_queue = disk_queue;
        Ok(dataway)
    }

    /// Build with a caller-supplied overflow queue and dial-testing reporter.
    pub fn with_collaborators(
        config: &DatawayConfig,
        cache_queue: Option<Arc<dyn CacheQueue>>,
        reporter: Option<Arc<dyn DeliveryReporter>>,
    ) -> Result<Self, DatawayError> {
        config.validate()?;

        let metrics = Arc::new(WriterMetrics::new()?);
        let quota = Arc::new(QuotaTracker::new());

        let mut base = config
            .endpoint_config()?
            .with_metrics(Arc::clone(&metrics))
            .with_quota_tracker(Arc::clone(&quota));
        base.cache_queue = cache_queue;
        base.reporter = reporter;

        let endpoints = config
            .urls
            .iter()
            .map(|url| Endpoint::new(url, base.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        for endpoint in &endpoints {
            info!("dataway endpoint {endpoint}");
        }

        Ok(Self {
            endpoints,
            metrics,
            quota,
            disk_queue: None,
            gzip: config.gzip,
        })
    }

    pub fn endpoints(&self) -> &[Endpoint] {
        &self.endpoints
    }

    pub fn metrics(&self) -> &Arc<WriterMetrics> {
        &self.metrics
    }

    pub fn quota_tracker(&self) -> &Arc<QuotaTracker> {
        &self.quota
    }

    /// Non-zero while the workspace is over its data quota.
    pub fn beyond_usage(&self) -> i64 {
        self.quota.get()
    }

    pub fn disk_queue(&self) -> Option<&Arc<DiskQueue>> {
        self.disk_queue.as_ref()
    }

    /// Start a request carrying the configured gzip default.
    pub fn request(&self, category: Category, points: Vec<Point>) -> WriteRequest {
        WriteRequest::new(category, points).gzip(self.gzip)
    }

    /// Send the batch to every endpoint in turn.
    pub async fn write_points(&self, req: &WriteRequest) -> Result<(), WriteError> {
        for endpoint in &self.endpoints {
            endpoint.write_points(req).await?;
        }
        Ok(())
    }

    pub async fn pull_log_filter(&self) -> Result<Bytes, PullError> {
        self.first(Api::LogFilterPull)?.pull_log_filter().await
    }

    pub async fn pull_config(&self, args: &str) -> Result<Bytes, PullError> {
        self.first(Api::ConfigPull)?.pull_config(args).await
    }

    pub fn export_metrics(&self) -> Result<String, MetricsError> {
        self.metrics.export()
    }

    fn first(&self, api: Api) -> Result<&Endpoint, PullError> {
        self.endpoints.first().ok_or(PullError::ApiMissing(api))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PayloadEncoding;
    use crate::sender::transport::ReqwestTransport;
    use std::time::Duration;

    fn config(urls: &[&str]) -> DatawayConfig {
        DatawayConfig {
            urls: urls.iter().map(ToString::to_string).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn builds_one_endpoint_per_url() {
        let dataway = Dataway::new(&config(&[
            "https://gw-a.example/?token=A",
            "https://gw-b.example/?token=B",
        ]))
        .unwrap();

        assert_eq!(dataway.endpoints().len(), 2);
        assert_eq!(dataway.endpoints()[1].token(), "B");
        assert!(dataway.disk_queue().is_none());
        assert_eq!(dataway.beyond_usage(), 0);
    }

    #[test]
    fn endpoints_share_quota_tracker() {
        let dataway = Dataway::new(&config(&[
            "https://gw-a.example/?token=A",
            "https://gw-b.example/?token=B",
        ]))
        .unwrap();

        dataway.endpoints()[0].quota_tracker().mark_exceeded_at(7);
        assert_eq!(dataway.endpoints()[1].quota_tracker().get(), 7);
        assert_eq!(dataway.beyond_usage(), 7);
    }

    #[test]
    fn invalid_config_is_rejected() {
        assert!(matches!(
            Dataway::new(&DatawayConfig::default()),
            Err(DatawayError::Config(_))
        ));
    }

    #[test]
    fn enabled_cache_opens_disk_queue() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&["https://gw.example/?token=T"]);
        cfg.cache.enabled = true;
        cfg.cache.disk.storage_path = dir.path().join("cache");

        let dataway = Dataway::new(&cfg).unwrap();
        assert!(dataway.disk_queue().is_some());
        assert!(dir.path().join("cache").exists());
    }

    #[test]
    fn request_uses_configured_gzip() {
        let mut cfg = config(&["https://gw.example/?token=T"]);
        cfg.gzip = false;
        let dataway = Dataway::new(&cfg).unwrap();

        let req = dataway.request(Category::Logging, vec![Bytes::from_static(b"x")]);
        assert!(!req.gzip);
        assert_eq!(req.encoding, PayloadEncoding::LineProtocol);
    }

    #[test]
    fn bad_dns_cache_intervals_fall_back_to_system_resolver() {
        let mut cfg = config(&["https://gw.example/?token=T"]);
        cfg.dns_cache.refresh_interval = Duration::ZERO;

        let dataway = Dataway::new(&cfg).unwrap();
        assert_eq!(dataway.endpoints().len(), 1);

        let transport = ReqwestTransport::new(&cfg.endpoint_config().unwrap().transport).unwrap();
        assert!(transport.dns_cache().is_none());
    }

    #[test]
    fn exports_shared_metrics() {
        let dataway = Dataway::new(&config(&["https://gw.example/?token=T"])).unwrap();
        dataway.quota_tracker().mark_exceeded_at(1_700_000_000);
        dataway.metrics().set_beyond_usage(dataway.beyond_usage());

        let text = dataway.export_metrics().unwrap();
        assert!(text.contains("dataway_beyond_usage 1700000000"));
    }
}
