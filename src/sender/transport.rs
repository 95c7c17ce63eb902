use super::dns::{DnsCache, DnsCacheConfig};
use bytes::Bytes;
use futures::future::BoxFuture;
use reqwest::header::HeaderMap;
use reqwest::{Client, ClientBuilder, Method, Proxy, StatusCode};
use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Request timeout: {0}")]
    Timeout(String),
    #[error("Connection failed: {0}")]
    Connect(String),
    #[error("IO error: {0}")]
    Io(String),
    #[error("Request cancelled")]
    Cancelled,
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl TransportError {
    /// Whether sending the same request again could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TransportError::InvalidRequest(_) | TransportError::Cancelled)
    }

    /// Status label used in metrics when no HTTP response was received.
    pub fn status_label(&self) -> &'static str {
        match self {
            TransportError::Timeout(_) | TransportError::Cancelled => "Request Timeout",
            _ => "unknown",
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn get(url: Url) -> Self {
        Self {
            method: Method::GET,
            url,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }

    pub fn post(url: Url, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            method: Method::POST,
            url,
            headers,
            body,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Bytes,
    pub remote_addr: Option<SocketAddr>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
            remote_addr: None,
        }
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Anything that can carry one HTTP exchange to the gateway. The production
/// implementation is [`ReqwestTransport`]; tests inject scripted fakes.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Knobs for building the pooled reqwest client.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub http_timeout: Duration,
    pub max_idle_per_host: usize,
    pub proxy: Option<String>,
    pub dns_cache: Option<DnsCacheConfig>,
    pub http_trace: bool,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            http_timeout: Duration::from_secs(30),
            max_idle_per_host: 64,
            proxy: None,
            dns_cache: Some(DnsCacheConfig::default()),
            http_trace: false,
        }
    }
}

/// Per-request timing captured when HTTP tracing is on.
#[derive(Debug, Clone, Default)]
pub struct HttpTraceStat {
    pub ttfb: Duration,
    pub cost: Duration,
    pub remote_addr: Option<SocketAddr>,
    pub request_bytes: usize,
    pub response_bytes: usize,
}

impl fmt::Display for HttpTraceStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ttfb: {:?}, cost: {:?}, remote: {}, sent: {}B, recv: {}B",
            self.ttfb,
            self.cost,
            self.remote_addr
                .map_or_else(|| "unknown".to_string(), |addr| addr.to_string()),
            self.request_bytes,
            self.response_bytes,
        )
    }
}

#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    client: Client,
    proxy: Option<Url>,
    dns_cache: Option<Arc<DnsCache>>,
    http_trace: bool,
}

impl ReqwestTransport {
    pub fn new(options: &TransportOptions) -> Result<Self, TransportError> {
        let dns_cache = Self::resolve_dns_cache(options.dns_cache.as_ref());
        let proxy = Self::resolve_proxy(options.proxy.as_deref());

        let mut builder = ClientBuilder::new()
            .timeout(options.http_timeout)
            .connect_timeout(options.http_timeout)
            .pool_max_idle_per_host(options.max_idle_per_host)
            .user_agent(concat!("dataway-writer/", env!("CARGO_PKG_VERSION")));

        if let Some(cache) = &dns_cache {
            builder = builder.dns_resolver(Arc::clone(cache));
        }

        let proxy = match proxy {
            Some(url) => match Proxy::all(url.clone()) {
                Ok(p) => {
                    builder = builder.proxy(p);
                    info!("set dataway proxy to {url}");
                    Some(url)
                }
                Err(e) => {
                    warn!("proxy {url} rejected by client: {e}, no proxy set");
                    None
                }
            },
            None => None,
        };

        let client = builder
            .build()
            .map_err(|e| TransportError::InvalidRequest(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            proxy,
            dns_cache,
            http_trace: options.http_trace,
        })
    }

    /// Try to set up the caching resolver; fall back to the platform resolver
    /// when it cannot be built.
    fn resolve_dns_cache(config: Option<&DnsCacheConfig>) -> Option<Arc<DnsCache>> {
        let config = config?;
        match DnsCache::new(config.clone()) {
            Ok(cache) => Some(Arc::new(cache)),
            Err(e) => {
                warn!("DNS cache setup failed: {e}, using system resolver");
                None
            }
        }
    }

    /// Parse the proxy URL; a malformed one is ignored.
    fn resolve_proxy(proxy: Option<&str>) -> Option<Url> {
        let raw = proxy.map(str::trim).filter(|p| !p.is_empty())?;
        match Url::parse(raw) {
            Ok(url) if url.has_host() => Some(url),
            Ok(_) => {
                warn!("parse http proxy {raw:?} failed: missing host, ignored and no proxy set");
                None
            }
            Err(e) => {
                warn!("parse http proxy {raw:?} failed: {e}, ignored and no proxy set");
                None
            }
        }
    }

    pub fn proxy(&self) -> Option<&Url> {
        self.proxy.as_ref()
    }

    pub fn dns_cache(&self) -> Option<&Arc<DnsCache>> {
        self.dns_cache.as_ref()
    }

    async fn execute(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let start = Instant::now();
        let HttpRequest {
            method,
            url,
            headers,
            body,
        } = request;
        let path = url.path().to_string();
        let request_bytes = body.len();

        debug!("send request {method} {path} ({request_bytes} bytes), proxy: {:?}", self.proxy);

        let mut builder = self.client.request(method, url).headers(headers);
        if !body.is_empty() {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(map_reqwest_error)?;
        let ttfb = start.elapsed();
        let status = response.status();
        let remote_addr = response.remote_addr();
        let body = response.bytes().await.map_err(map_reqwest_error)?;

        if self.http_trace {
            let stat = HttpTraceStat {
                ttfb,
                cost: start.elapsed(),
                remote_addr,
                request_bytes,
                response_bytes: body.len(),
            };
            info!("{path}: {stat}");
        }

        Ok(HttpResponse {
            status,
            body,
            remote_addr,
        })
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(self.execute(request))
    }
}

fn map_reqwest_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout(e.to_string())
    } else if e.is_connect() {
        TransportError::Connect(e.to_string())
    } else if e.is_builder() {
        TransportError::InvalidRequest(e.to_string())
    } else {
        TransportError::Io(e.to_string())
    }
}
