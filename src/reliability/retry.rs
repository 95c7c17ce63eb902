use crate::sender::transport::{HttpRequest, HttpResponse, Transport, TransportError};
use futures::future::BoxFuture;
use rand::Rng;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum RetryError {
    #[error("Invalid retry configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetryStrategy {
    #[default]
    ExponentialBackoff,
    LinearBackoff,
    FixedDelay,
}

/// Bounded retry policy for network-level failures and 5xx responses.
///
/// `max_attempts` counts every try, the first one included, so `1` disables
/// retrying.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "crate::config::serde_helpers")]
    pub base_delay: Duration,
    #[serde(with = "crate::config::serde_helpers")]
    pub max_delay: Duration,
    pub strategy: RetryStrategy,
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            strategy: RetryStrategy::ExponentialBackoff,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<(), RetryError> {
        if self.max_attempts == 0 {
            return Err(RetryError::InvalidConfig(
                "max attempts must be greater than 0".to_string(),
            ));
        }
        if self.base_delay > self.max_delay {
            return Err(RetryError::InvalidConfig(format!(
                "base delay {:?} exceeds max delay {:?}",
                self.base_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// Whether another try is allowed after `attempt` tries (1-indexed).
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Delay to wait before retry number `attempt` (1-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let base = match self.strategy {
            RetryStrategy::ExponentialBackoff => self
                .base_delay
                .saturating_mul(2u32.saturating_pow(attempt - 1)),
            RetryStrategy::LinearBackoff => self.base_delay.saturating_mul(attempt),
            RetryStrategy::FixedDelay => self.base_delay,
        };

        let capped = base.min(self.max_delay);
        if self.jitter {
            Self::apply_jitter(capped).min(self.max_delay)
        } else {
            capped
        }
    }

    fn apply_jitter(delay: Duration) -> Duration {
        let mut rng = rand::rng();
        let jitter_factor = rng.random_range(0.5..1.5); // ±50% jitter
        delay.mul_f64(jitter_factor)
    }
}

/// 5xx responses worth another try. 501 means the gateway will never accept
/// the request.
pub fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() && status != StatusCode::NOT_IMPLEMENTED
}

/// Wraps a transport and re-drives retryable failures according to a
/// [`RetryPolicy`]. When every try fails with a 5xx the last response is
/// returned so the caller can still classify it.
pub struct RetryingTransport {
    inner: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn send_with_retry(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let mut attempt = 1;
        loop {
            let result = self.inner.send(request.clone()).await;

            let retryable = match &result {
                Ok(response) => is_retryable_status(response.status),
                Err(e) => e.is_retryable(),
            };

            if !retryable || !self.policy.should_retry(attempt) {
                if retryable && attempt > 1 {
                    warn!(
                        "{} {}: giving up after {attempt} attempts",
                        request.method,
                        request.url.path()
                    );
                }
                return result;
            }

            let delay = self.policy.delay_for_attempt(attempt);
            match &result {
                Ok(response) => debug!(
                    "{} {} returned {}, retrying in {delay:?} (attempt {})",
                    request.method,
                    request.url.path(),
                    response.status,
                    attempt + 1
                ),
                Err(e) => debug!(
                    "{} {} failed: {e}, retrying in {delay:?} (attempt {})",
                    request.method,
                    request.url.path(),
                    attempt + 1
                ),
            }

            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

impl Transport for RetryingTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        Box::pin(self.send_with_retry(request))
    }
}
