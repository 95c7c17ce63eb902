pub mod groups;
pub mod serde_helpers;
mod validation;

use crate::domain::Api;
use crate::logging::LoggingConfig;
use crate::reliability::cache::CachePolicy;
use crate::reliability::quota::QuotaConfig;
use crate::reliability::retry::RetryPolicy;
use crate::sender::endpoint::EndpointConfig;
use crate::sender::segment::MAX_BODY_BYTES;
use crate::sender::transport::TransportOptions;
use serde::{Deserialize, Serialize};
use serde_helpers::{
    load_env_list, load_env_millis, load_env_path, load_env_string_opt, load_env_var,
};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub use groups::{CacheGroup, DnsCacheGroup};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("File error: {0}")]
    FileError(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    ParseError(#[from] toml::de::Error),
    #[error("Environment error: {0}")]
    EnvError(String),
}

/// Writer configuration as loaded from TOML or the environment.
///
/// ```toml
/// urls = ["https://openway.example.com?token=tkn_xxx"]
/// http_timeout = 30000
/// gzip = true
///
/// [quota]
/// status = 403
/// marker = "beyondDataUsage"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatawayConfig {
    pub urls: Vec<String>,
    #[serde(with = "serde_helpers")]
    pub http_timeout: Duration,
    pub max_idle_conns_per_host: usize,
    pub proxy: Option<String>,
    pub dns_cache: DnsCacheGroup,
    pub http_trace: bool,
    pub extra_headers: BTreeMap<String, String>,
    pub max_body_bytes: usize,
    pub gzip: bool,
    pub retry: RetryPolicy,
    pub cache: CacheGroup,
    pub quota: QuotaConfig,
    /// Routes to build; names or paths. Empty means every known route.
    pub apis: Vec<String>,
    pub logging: LoggingConfig,
}

impl Default for DatawayConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            http_timeout: Duration::from_secs(30),
            max_idle_conns_per_host: 64,
            proxy: None,
            dns_cache: DnsCacheGroup::default(),
            http_trace: false,
            extra_headers: BTreeMap::new(),
            max_body_bytes: MAX_BODY_BYTES,
            gzip: true,
            retry: RetryPolicy::default(),
            cache: CacheGroup::default(),
            quota: QuotaConfig::default(),
            apis: Vec::new(),
            logging: LoggingConfig::default(),
        }
    }
}

impl DatawayConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: DatawayConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `DATAWAY_CONFIG` (a whole TOML document) when set, otherwise
    /// from individual `DATAWAY_*` variables layered over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        if let Ok(document) = std::env::var("DATAWAY_CONFIG") {
            return Self::from_toml_str(&document);
        }

        let mut config = DatawayConfig::default();

        load_env_list("DATAWAY_URLS", &mut config.urls);
        load_env_millis("DATAWAY_HTTP_TIMEOUT_MS", &mut config.http_timeout)?;
        load_env_var(
            "DATAWAY_MAX_IDLE_CONNS_PER_HOST",
            &mut config.max_idle_conns_per_host,
        )?;
        load_env_string_opt("DATAWAY_PROXY", &mut config.proxy);
        load_env_var("DATAWAY_ENABLE_DNS_CACHE", &mut config.dns_cache.enabled)?;
        load_env_millis(
            "DATAWAY_DNS_CACHE_REFRESH_MS",
            &mut config.dns_cache.refresh_interval,
        )?;
        load_env_var("DATAWAY_HTTP_TRACE", &mut config.http_trace)?;
        load_env_var("DATAWAY_MAX_BODY_BYTES", &mut config.max_body_bytes)?;
        load_env_var("DATAWAY_GZIP", &mut config.gzip)?;
        load_env_var("DATAWAY_MAX_RETRY_ATTEMPTS", &mut config.retry.max_attempts)?;
        load_env_var("DATAWAY_ENABLE_CACHE", &mut config.cache.enabled)?;
        load_env_path("DATAWAY_CACHE_PATH", &mut config.cache.disk.storage_path);
        load_env_list("DATAWAY_APIS", &mut config.apis);
        load_env_var("DATAWAY_LOG_LEVEL", &mut config.logging.level)?;

        if let Ok(headers) = std::env::var("DATAWAY_EXTRA_HEADERS") {
            config.extra_headers = parse_header_list(&headers)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn parsed_apis(&self) -> Result<Vec<Api>, ConfigError> {
        if self.apis.is_empty() {
            return Ok(Api::all_routable());
        }
        self.apis
            .iter()
            .map(|raw| {
                raw.parse::<Api>()
                    .map_err(|e| ConfigError::InvalidConfig(format!("apis: {e}")))
            })
            .collect()
    }

    /// Immutable per-endpoint settings. Shared collaborators (cache queue,
    /// metrics, quota tracker) are attached by the caller.
    pub fn endpoint_config(&self) -> Result<EndpointConfig, ConfigError> {
        Ok(EndpointConfig {
            apis: self.parsed_apis()?,
            transport: TransportOptions {
                http_timeout: self.http_timeout,
                max_idle_per_host: self.max_idle_conns_per_host,
                proxy: self.proxy.clone(),
                dns_cache: self.dns_cache.to_cache_config(),
                http_trace: self.http_trace,
            },
            extra_headers: self.extra_headers.clone(),
            max_body_bytes: self.max_body_bytes,
            retry: self.retry.clone(),
            cache_policy: CachePolicy {
                never_cache: self.cache.never_cache.clone(),
            },
            quota: self.quota.clone(),
            ..EndpointConfig::default()
        })
    }
}

/// `Name:value,Other:value`
fn parse_header_list(raw: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            item.split_once(':')
                .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
                .ok_or_else(|| {
                    ConfigError::EnvError(format!("Invalid DATAWAY_EXTRA_HEADERS item: {item}"))
                })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use crate::logging::LogLevel;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config =
            DatawayConfig::from_toml_str(r#"urls = ["https://gw.example/?token=T1"]"#).unwrap();

        assert_eq!(config.http_timeout, Duration::from_secs(30));
        assert_eq!(config.max_body_bytes, 10_000_000);
        assert_eq!(config.quota.marker, "beyondDataUsage");
        assert!(config.dns_cache.enabled);
        assert!(config.cache.never_cache.contains(&Category::Metric));
        assert_eq!(config.parsed_apis().unwrap(), Api::all_routable());
    }

    #[test]
    fn full_toml() {
        let config = DatawayConfig::from_toml_str(
            r#"
            urls = ["https://gw.example/?token=T1", "http://backup:9528?token=T2"]
            http_timeout = 5000
            proxy = "http://proxy:3128"
            apis = ["metric", "logging", "/v1/logfilter/pull"]
            max_body_bytes = 4096

            [extra_headers]
            X-Global-Tags = "env=prod"

            [dns_cache]
            enabled = false

            [retry]
            max_attempts = 2
            base_delay = 10
            max_delay = 100
            jitter = false

            [cache]
            enabled = true
            never_cache = ["metric"]

            [quota]
            status = 429
            marker = "quota"

            [logging]
            level = "debug"
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.http_timeout, Duration::from_millis(5000));
        assert_eq!(config.retry.base_delay, Duration::from_millis(10));
        assert_eq!(config.logging.level, LogLevel::Debug);

        let endpoint = config.endpoint_config().unwrap();
        assert_eq!(
            endpoint.apis,
            vec![
                Api::Write(Category::Metric),
                Api::Write(Category::Logging),
                Api::LogFilterPull
            ]
        );
        assert!(endpoint.transport.dns_cache.is_none());
        assert_eq!(endpoint.quota.status, 429);
        assert!(endpoint.cache_policy.is_cacheable(Category::Object));
        assert!(!endpoint.cache_policy.is_cacheable(Category::Metric));
        assert_eq!(endpoint.extra_headers["X-Global-Tags"], "env=prod");
    }

    #[test]
    fn unknown_api_is_rejected() {
        let err = DatawayConfig::from_toml_str(
            r#"
            urls = ["https://gw.example/?token=T1"]
            apis = ["bogus"]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConfig(_)));
    }

    #[test]
    fn malformed_toml_is_a_parse_error() {
        assert!(matches!(
            DatawayConfig::from_toml_str("urls = ["),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn header_list_parsing() {
        let headers = parse_header_list("X-A: 1, X-B:two").unwrap();
        assert_eq!(headers["X-A"], "1");
        assert_eq!(headers["X-B"], "two");
        assert!(parse_header_list("no-colon").is_err());
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dataway.toml");
        std::fs::write(&path, "urls = [\"http://localhost:9528?token=x\"]\n").unwrap();

        let config = DatawayConfig::from_file(&path).unwrap();
        assert_eq!(config.urls, vec!["http://localhost:9528?token=x"]);
        assert!(DatawayConfig::from_file(dir.path().join("missing.toml")).is_err());
    }
}
