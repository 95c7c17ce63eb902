use parking_lot::RwLock;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::timeout;

#[derive(Error, Debug)]
pub enum DnsCacheError {
    #[error("Invalid DNS cache configuration: {0}")]
    InvalidConfig(String),
    #[error("Lookup of {host} failed: {source}")]
    Lookup {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Lookup of {0} timed out")]
    Timeout(String),
    #[error("No address found for {0}")]
    NoAddress(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsCacheConfig {
    /// How long a resolved answer is served before it is looked up again.
    #[serde(with = "crate::config::serde_helpers")]
    pub refresh_interval: Duration,
    #[serde(with = "crate::config::serde_helpers")]
    pub lookup_timeout: Duration,
}

impl Default for DnsCacheConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(60),
            lookup_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone)]
struct CachedAddrs {
    addrs: Vec<SocketAddr>,
    resolved_at: Instant,
}

#[derive(Debug)]
struct DnsCacheInner {
    config: DnsCacheConfig,
    entries: RwLock<HashMap<String, CachedAddrs>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

/// Caching resolver plugged into the reqwest connector. Answers are reused
/// for `refresh_interval`; when a refresh fails the stale answer keeps being
/// served so a flaky resolver does not take the write path down.
#[derive(Debug, Clone)]
pub struct DnsCache {
    inner: Arc<DnsCacheInner>,
}

impl DnsCache {
    pub fn new(config: DnsCacheConfig) -> Result<Self, DnsCacheError> {
        if config.refresh_interval.is_zero() {
            return Err(DnsCacheError::InvalidConfig(
                "refresh interval must be greater than 0".to_string(),
            ));
        }
        if config.lookup_timeout.is_zero() {
            return Err(DnsCacheError::InvalidConfig(
                "lookup timeout must be greater than 0".to_string(),
            ));
        }

        Ok(Self {
            inner: Arc::new(DnsCacheInner {
                config,
                entries: RwLock::new(HashMap::new()),
                hits: AtomicU64::new(0),
                misses: AtomicU64::new(0),
            }),
        })
    }

    pub fn hits(&self) -> u64 {
        self.inner.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.inner.misses.load(Ordering::Relaxed)
    }

    fn cached(&self, host: &str, allow_stale: bool) -> Option<Vec<SocketAddr>> {
        let entries = self.inner.entries.read();
        let entry = entries.get(host)?;
        if allow_stale || entry.resolved_at.elapsed() < self.inner.config.refresh_interval {
            Some(entry.addrs.clone())
        } else {
            None
        }
    }

    pub async fn lookup(&self, host: &str) -> Result<Vec<SocketAddr>, DnsCacheError> {
        if let Some(addrs) = self.cached(host, false) {
            self.inner.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(addrs);
        }
        self.inner.misses.fetch_add(1, Ordering::Relaxed);

        let looked_up = timeout(
            self.inner.config.lookup_timeout,
            tokio::net::lookup_host((host, 0)),
        )
        .await;

        let error = match looked_up {
            Ok(Ok(addrs)) => {
                let addrs: Vec<SocketAddr> = addrs.collect();
                if addrs.is_empty() {
                    DnsCacheError::NoAddress(host.to_string())
                } else {
                    self.inner.entries.write().insert(
                        host.to_string(),
                        CachedAddrs {
                            addrs: addrs.clone(),
                            resolved_at: Instant::now(),
                        },
                    );
                    return Ok(addrs);
                }
            }
            Ok(Err(source)) => DnsCacheError::Lookup {
                host: host.to_string(),
                source,
            },
            Err(_) => DnsCacheError::Timeout(host.to_string()),
        };

        match self.cached(host, true) {
            Some(stale) => {
                tracing::warn!("DNS refresh failed ({error}), serving stale answer for {host}");
                Ok(stale)
            }
            None => Err(error),
        }
    }
}

impl Resolve for DnsCache {
    fn resolve(&self, name: Name) -> Resolving {
        let cache = self.clone();
        Box::pin(async move {
            let addrs = cache.lookup(name.as_str()).await?;
            let addrs: Addrs = Box::new(addrs.into_iter());
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(addrs)
        })
    }
}
