use super::transport::{HttpResponse, TransportError};
use crate::reliability::quota::QuotaConfig;
use reqwest::StatusCode;

/// What happened to one body on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx.
    Accepted,
    /// 4xx. Never retried or cached.
    Rejected { quota_exceeded: bool },
    /// 5xx or any other non-2xx, non-4xx status.
    ServerError,
    /// No response: connect failure, timeout, cancellation.
    Network,
}

impl Outcome {
    pub fn is_success(self) -> bool {
        self == Outcome::Accepted
    }

    /// Whether the body may go to the overflow cache.
    pub fn is_transient(self) -> bool {
        matches!(self, Outcome::ServerError | Outcome::Network)
    }
}

pub fn classify(result: &Result<HttpResponse, TransportError>, quota: &QuotaConfig) -> Outcome {
    let response = match result {
        Ok(response) => response,
        Err(_) => return Outcome::Network,
    };

    let status = response.status;
    if status.is_success() {
        Outcome::Accepted
    } else if status.is_client_error() {
        Outcome::Rejected {
            quota_exceeded: quota.matches(status.as_u16(), &response.body_text()),
        }
    } else {
        Outcome::ServerError
    }
}

/// Metric label for a send result: the canonical reason phrase of the
/// status, or a fixed label when nothing came back.
pub fn status_label(result: &Result<HttpResponse, TransportError>) -> String {
    match result {
        Ok(response) => status_text(response.status),
        Err(e) => e.status_label().to_string(),
    }
}

pub fn status_text(status: StatusCode) -> String {
    status
        .canonical_reason()
        .map_or_else(|| status.as_str().to_string(), str::to_string)
}
