use super::{ConfigError, DatawayConfig};
use url::Url;

impl DatawayConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.urls.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "At least one dataway URL is required".to_string(),
            ));
        }

        for raw in &self.urls {
            let url = Url::parse(raw)
                .map_err(|e| ConfigError::InvalidUrl(format!("Invalid dataway URL '{raw}': {e}")))?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidUrl(format!(
                    "Unsupported scheme in dataway URL '{raw}'"
                )));
            }
        }

        if self.http_timeout.is_zero() {
            return Err(ConfigError::InvalidConfig(
                "HTTP timeout must be greater than 0".to_string(),
            ));
        }

        if self.max_body_bytes == 0 {
            return Err(ConfigError::InvalidConfig(
                "Maximum body size must be greater than 0".to_string(),
            ));
        }

        if self.dns_cache.enabled
            && (self.dns_cache.refresh_interval.is_zero() || self.dns_cache.lookup_timeout.is_zero())
        {
            // the transport falls back to the system resolver
            tracing::warn!("DNS cache intervals must be greater than 0, system resolver will be used");
        }

        self.retry
            .validate()
            .map_err(|e| ConfigError::InvalidConfig(e.to_string()))?;

        if !(400..500).contains(&self.quota.status) {
            return Err(ConfigError::InvalidConfig(format!(
                "Quota status {} is not a 4xx code",
                self.quota.status
            )));
        }
        if self.quota.marker.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Quota marker must not be empty".to_string(),
            ));
        }

        if let Some(proxy) = self.proxy.as_deref()
            && Url::parse(proxy).is_err()
        {
            // the transport ignores a bad proxy; say so early
            tracing::warn!("proxy {proxy:?} is not a valid URL and will be ignored");
        }

        self.parsed_apis()?;
        Ok(())
    }
}
