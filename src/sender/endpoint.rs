use super::classify::{Outcome, classify, status_label};
use super::request::WriteRequest;
use super::segment::{Body, MAX_BODY_BYTES, SegmentError, build_bodies};
use super::transport::{
    HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError, TransportOptions,
};
use crate::domain::{Api, Category};
use crate::reliability::cache::{
    CacheError, CacheOutcome, CachePolicy, CacheQueue, CacheRecord, OverflowCache,
};
use crate::reliability::health::DeliveryReporter;
use crate::reliability::metrics::WriterMetrics;
use crate::reliability::quota::{QuotaConfig, QuotaTracker};
use crate::reliability::retry::{RetryError, RetryPolicy, RetryingTransport};
use bytes::Bytes;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Error, Debug)]
pub enum EndpointError {
    #[error("Invalid endpoint URL {url}: {reason}")]
    InvalidEndpointUrl { url: String, reason: String },
    #[error("Unsupported scheme {0:?}")]
    UnsupportedScheme(String),
    #[error("Invalid header {name}: {reason}")]
    InvalidHeader { name: String, reason: String },
    #[error("Invalid retry policy: {0}")]
    InvalidRetryPolicy(#[from] RetryError),
    #[error("HTTP transport setup failed: {0}")]
    Transport(#[from] TransportError),
}

/// Call-level failures of a write. Everything that goes wrong after the first
/// byte is on the wire is absorbed into caching, dropping, logs and metrics.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("No route for category {0}")]
    RouteNotFound(Category),
    #[error("Invalid dynamic URL {url}: {reason}")]
    InvalidDynamicUrl { url: String, reason: String },
    #[error("Segmentation failed: {0}")]
    Segment(#[from] SegmentError),
    #[error("Invalid cache record: {0}")]
    Cache(#[from] CacheError),
}

#[derive(Error, Debug)]
pub enum PullError {
    #[error("{0} API missing on this endpoint")]
    ApiMissing(Api),
    #[error("Request failed: {0}")]
    Transport(#[from] TransportError),
    #[error("Pull failed with status code {status}, body: {body}")]
    Status { status: u16, body: String },
}

/// Everything an [`Endpoint`] needs besides its URL. Defaults are applied
/// here once; the endpoint never changes them afterwards.
#[derive(Clone)]
pub struct EndpointConfig {
    /// Routes to build. Categories without a static path are skipped.
    pub apis: Vec<Api>,
    pub transport: TransportOptions,
    /// Static headers added to every write.
    pub extra_headers: BTreeMap<String, String>,
    /// Upper bound on a body's uncompressed size.
    pub max_body_bytes: usize,
    pub retry: RetryPolicy,
    pub cache_policy: CachePolicy,
    pub quota: QuotaConfig,
    pub cache_queue: Option<Arc<dyn CacheQueue>>,
    pub reporter: Option<Arc<dyn DeliveryReporter>>,
    pub metrics: Option<Arc<WriterMetrics>>,
    pub quota_tracker: Arc<QuotaTracker>,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            apis: Api::all_routable(),
            transport: TransportOptions::default(),
            extra_headers: BTreeMap::new(),
            max_body_bytes: MAX_BODY_BYTES,
            retry: RetryPolicy::default(),
            cache_policy: CachePolicy::default(),
            quota: QuotaConfig::default(),
            cache_queue: None,
            reporter: None,
            metrics: None,
            quota_tracker: Arc::new(QuotaTracker::new()),
        }
    }
}

impl EndpointConfig {
    pub fn with_apis(mut self, apis: impl IntoIterator<Item = Api>) -> Self {
        self.apis = apis.into_iter().collect();
        self
    }

    pub fn with_cache_queue(mut self, queue: Arc<dyn CacheQueue>) -> Self {
        self.cache_queue = Some(queue);
        self
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn DeliveryReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<WriterMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn with_quota_tracker(mut self, tracker: Arc<QuotaTracker>) -> Self {
        self.quota_tracker = tracker;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

struct Target {
    url: Url,
    dynamic: bool,
}

/// One configured gateway: token, host and a routing table from [`Api`] to
/// absolute URL, plus the shared transport used to reach it.
///
/// An endpoint is immutable after construction and can be shared between
/// tasks; the quota tracker is the only state written on the hot path.
pub struct Endpoint {
    token: String,
    host: String,
    scheme: String,
    apis: Vec<Api>,
    routes: HashMap<Api, Url>,
    transport: Arc<dyn Transport>,
    proxy: Option<String>,
    extra_headers: HeaderMap,
    max_body_bytes: usize,
    quota: QuotaConfig,
    quota_tracker: Arc<QuotaTracker>,
    cache: OverflowCache,
    reporter: Option<Arc<dyn DeliveryReporter>>,
    metrics: Option<Arc<WriterMetrics>>,
}

impl Endpoint {
    pub fn new(url: &str, config: EndpointConfig) -> Result<Self, EndpointError> {
        // scheme and routes are checked before a client is built
        parse_base_url(url)?;
        let transport = ReqwestTransport::new(&config.transport)?;
        Self::with_transport(url, config, Arc::new(transport))
    }

    /// Build an endpoint on top of a caller-supplied transport. The retry
    /// policy from `config` still wraps it.
    pub fn with_transport(
        url: &str,
        config: EndpointConfig,
        transport: Arc<dyn Transport>,
    ) -> Result<Self, EndpointError> {
        let base = parse_base_url(url)?;
        config.retry.validate()?;

        let token = base
            .query_pairs()
            .find(|(k, _)| k == "token")
            .map(|(_, v)| v.into_owned())
            .unwrap_or_default();
        let host = match base.port() {
            Some(port) => format!("{}:{port}", base.host_str().unwrap_or_default()),
            None => base.host_str().unwrap_or_default().to_string(),
        };
        let scheme = base.scheme().to_string();
        let query = base.query().filter(|q| !q.is_empty());

        let mut routes = HashMap::with_capacity(config.apis.len());
        for &api in &config.apis {
            let Some(path) = api.path() else {
                warn!("{api} has no static path, skipped");
                continue;
            };
            let raw = match query {
                Some(q) => format!("{scheme}://{host}{path}?{q}"),
                None => format!("{scheme}://{host}{path}"),
            };
            let route = Url::parse(&raw).map_err(|e| EndpointError::InvalidEndpointUrl {
                url: raw.clone(),
                reason: e.to_string(),
            })?;
            routes.insert(api, route);
        }

        let extra_headers = build_headers(&config.extra_headers)?;
        let transport: Arc<dyn Transport> =
            Arc::new(RetryingTransport::new(transport, config.retry.clone()));

        if let Some(metrics) = &config.metrics {
            metrics.set_beyond_usage(config.quota_tracker.get());
        }

        Ok(Self {
            token,
            host,
            scheme,
            apis: config.apis,
            routes,
            transport,
            proxy: config.transport.proxy,
            extra_headers,
            max_body_bytes: config.max_body_bytes,
            quota: config.quota,
            quota_tracker: config.quota_tracker,
            cache: OverflowCache::new(config.cache_queue, config.cache_policy),
            reporter: config.reporter,
            metrics: config.metrics,
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn scheme(&self) -> &str {
        &self.scheme
    }

    pub fn routes(&self) -> &HashMap<Api, Url> {
        &self.routes
    }

    pub fn category_url(&self, category: Category) -> Option<&Url> {
        self.routes.get(&Api::Write(category))
    }

    pub fn quota_tracker(&self) -> &Arc<QuotaTracker> {
        &self.quota_tracker
    }

    /// Segment and deliver a batch.
    ///
    /// Only request-level problems (no route, bad dynamic URL, malformed
    /// points) are returned, and always before anything is sent. Every body is
    /// delivered on its own; its failure is cached or dropped and never
    /// affects the other bodies or the result.
    pub async fn write_points(&self, req: &WriteRequest) -> Result<(), WriteError> {
        let target = self.resolve_target(req)?;
        let bodies = build_bodies(&req.points, req.encoding, self.max_body_bytes, req.gzip)?;

        debug!(
            "write {} pts on {} in {} bodies",
            req.points.len(),
            req.category,
            bodies.len()
        );

        for body in &bodies {
            self.write_body(req, &target, body).await;
        }
        Ok(())
    }

    async fn write_body(&self, req: &WriteRequest, target: &Target, body: &Body) -> Outcome {
        let outcome = self
            .deliver(req.category, target, body, req.sink, req.cancel.as_ref())
            .await;

        if outcome.is_transient() {
            self.cache_or_drop(req.category, body, req.cache_all).await;
        }
        outcome
    }

    /// Resend a record taken from the overflow cache. A record that fails
    /// again is not cached a second time.
    pub async fn send_cached(&self, record: &CacheRecord) -> Result<Outcome, WriteError> {
        let category = record.category()?;
        let encoding = record.encoding()?;
        let url = self
            .category_url(category)
            .ok_or(WriteError::RouteNotFound(category))?;

        let body = Body {
            buf: Bytes::from(record.payload.clone()),
            npts: 0,
            encoding,
            gzon: record.is_gzipped(),
            raw_len: record.payload.len(),
        };
        let target = Target {
            url: url.clone(),
            dynamic: false,
        };

        let outcome = self.deliver(category, &target, &body, false, None).await;
        if outcome.is_transient() {
            warn!("replay of cached {category} body failed, dropped");
        }
        Ok(outcome)
    }

    pub async fn pull_log_filter(&self) -> Result<Bytes, PullError> {
        self.pull(Api::LogFilterPull, None).await
    }

    /// Fetch remote configuration. `args` is appended to the route's query.
    pub async fn pull_config(&self, args: &str) -> Result<Bytes, PullError> {
        self.pull(Api::ConfigPull, Some(args)).await
    }

    fn resolve_target(&self, req: &WriteRequest) -> Result<Target, WriteError> {
        if let Some(url) = self.category_url(req.category) {
            return Ok(Target {
                url: url.clone(),
                dynamic: false,
            });
        }

        let Some(raw) = req.dynamic_url.as_deref() else {
            return Err(WriteError::RouteNotFound(req.category));
        };

        let url = Url::parse(raw).map_err(|e| WriteError::InvalidDynamicUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        })?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(WriteError::InvalidDynamicUrl {
                url: raw.to_string(),
                reason: format!("unsupported scheme {:?}", url.scheme()),
            });
        }

        debug!("try use dynamic URL {}{}", url.host_str().unwrap_or_default(), url.path());
        Ok(Target { url, dynamic: true })
    }

    async fn deliver(
        &self,
        category: Category,
        target: &Target,
        body: &Body,
        sink: bool,
        cancel: Option<&CancellationToken>,
    ) -> Outcome {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(body.encoding.content_type()),
        );
        if body.gzon {
            headers.insert(CONTENT_ENCODING, HeaderValue::from_static("gzip"));
        }
        for (name, value) in &self.extra_headers {
            headers.insert(name.clone(), value.clone());
        }

        let request = HttpRequest::post(target.url.clone(), headers, body.buf.clone());
        let path = target.url.path();

        let start = Instant::now();
        let result = self.send(request, cancel).await;
        let latency = start.elapsed();

        let outcome = classify(&result, &self.quota);
        let status = status_label(&result);

        if let Some(metrics) = &self.metrics {
            metrics.record_body(category, &status, body.npts, body.buf.len(), sink);
            metrics.record_api(path, &status, latency);
        }

        match (&outcome, &result) {
            (Outcome::Accepted, _) => {
                debug!(
                    "post {} bytes to {path} ok(gz: {}) in {latency:?}",
                    body.buf.len(),
                    body.gzon
                );
                if path.contains("/v1/write/") && self.quota_tracker.clear() {
                    info!("clear beyond usage");
                    self.publish_quota();
                }
            }
            (Outcome::Rejected { quota_exceeded }, Ok(response)) => {
                error!(
                    "post {} bytes to {path} failed(HTTP: {}): {}, data dropped",
                    body.buf.len(),
                    response.status,
                    response.body_text()
                );
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped(category, "rejected", body.npts);
                }
                if *quota_exceeded && self.quota_tracker.mark_exceeded() {
                    info!("set beyond usage");
                    self.publish_quota();
                }
            }
            (_, Ok(response)) => log_server_error(path, body, response),
            (_, Err(e)) => {
                error!(
                    "request url {path} failed(proxy: {:?}): {e}",
                    self.proxy.as_deref().unwrap_or_default()
                );
            }
        }

        if target.dynamic
            && let Some(reporter) = &self.reporter
        {
            reporter.report(target.url.as_str(), outcome.is_success());
        }

        outcome
    }

    async fn send(
        &self,
        request: HttpRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<HttpResponse, TransportError> {
        match cancel {
            Some(token) => {
                tokio::select! {
                    biased;
                    () = token.cancelled() => Err(TransportError::Cancelled),
                    result = self.transport.send(request) => result,
                }
            }
            None => self.transport.send(request).await,
        }
    }

    async fn cache_or_drop(&self, category: Category, body: &Body, cache_all: bool) {
        // queue writes may fsync; keep them off the async workers
        let cache = self.cache.clone();
        let pending = body.clone();
        let outcome =
            tokio::task::spawn_blocking(move || cache.handle(category, &pending, cache_all))
                .await
                .unwrap_or_else(|e| {
                    error!("cache task for {category} failed: {e}");
                    CacheOutcome::Failed
                });

        let Some(metrics) = &self.metrics else {
            return;
        };
        match outcome {
            CacheOutcome::Cached => metrics.record_cache(category, "cached"),
            CacheOutcome::Failed => {
                metrics.record_cache(category, "failed");
                metrics.record_dropped(category, "cache_failed", body.npts);
            }
            CacheOutcome::Dropped(reason) => {
                metrics.record_dropped(category, reason.as_str(), body.npts);
            }
        }
    }

    fn publish_quota(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.set_beyond_usage(self.quota_tracker.get());
        }
    }

    async fn pull(&self, api: Api, args: Option<&str>) -> Result<Bytes, PullError> {
        let mut url = self
            .routes
            .get(&api)
            .cloned()
            .ok_or(PullError::ApiMissing(api))?;

        if let Some(args) = args.filter(|a| !a.is_empty()) {
            let query = match url.query().filter(|q| !q.is_empty()) {
                Some(q) => format!("{q}&{args}"),
                None => args.to_string(),
            };
            url.set_query(Some(&query));
        }

        let path = url.path().to_string();
        let start = Instant::now();
        let result = self.transport.send(HttpRequest::get(url)).await;

        if let Some(metrics) = &self.metrics {
            metrics.record_api(&path, &status_label(&result), start.elapsed());
        }

        let response = result.map_err(|e| {
            error!("pull {path} failed: {e}");
            PullError::Transport(e)
        })?;

        if response.status != StatusCode::OK {
            return Err(PullError::Status {
                status: response.status.as_u16(),
                body: response.body_text(),
            });
        }
        Ok(response.body)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let apis: Vec<String> = self.apis.iter().map(ToString::to_string).collect();
        write!(
            f,
            "[host: {}][token: {}][apis: {}]",
            self.host,
            mask_token(&self.token),
            apis.join(",")
        )
    }
}

fn parse_base_url(raw: &str) -> Result<Url, EndpointError> {
    let url = Url::parse(raw).map_err(|e| {
        error!("parse dataway url {raw} failed: {e}");
        EndpointError::InvalidEndpointUrl {
            url: raw.to_string(),
            reason: e.to_string(),
        }
    })?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(EndpointError::UnsupportedScheme(url.scheme().to_string()));
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(EndpointError::InvalidEndpointUrl {
            url: raw.to_string(),
            reason: "missing host".to_string(),
        });
    }
    Ok(url)
}

fn build_headers(headers: &BTreeMap<String, String>) -> Result<HeaderMap, EndpointError> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers {
        let header_name =
            HeaderName::from_bytes(name.as_bytes()).map_err(|e| EndpointError::InvalidHeader {
                name: name.clone(),
                reason: e.to_string(),
            })?;
        let header_value = HeaderValue::from_str(value).map_err(|e| EndpointError::InvalidHeader {
            name: name.clone(),
            reason: e.to_string(),
        })?;
        map.insert(header_name, header_value);
    }
    Ok(map)
}

fn log_server_error(path: &str, body: &Body, response: &HttpResponse) {
    error!(
        "post {} bytes to {path} failed(HTTP: {}): {}",
        body.buf.len(),
        response.status,
        response.body_text()
    );
}

fn mask_token(token: &str) -> String {
    let visible: String = token.chars().take(4).collect();
    if token.chars().count() <= 4 {
        "****".to_string()
    } else {
        format!("{visible}****")
    }
}
