use crate::domain::{Category, PayloadEncoding};
use crate::sender::segment::Body;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

#[cfg(test)]
use mockall::automock;

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Serialization error: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("Deserialization error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Disk space exceeded")]
    DiskSpaceExceeded,
    #[error("Invalid cache record: {0}")]
    InvalidRecord(String),
    #[error("Cache queue unavailable: {0}")]
    Unavailable(String),
}

/// Durable form of a body that failed delivery. Only what is needed to
/// rebuild the exact request is stored; the URL is derived again at replay
/// time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub category: u8,
    pub payload_encoding: u8,
    /// Payload was sent with `Content-Encoding: gzip`.
    pub gzip: bool,
    pub payload: Vec<u8>,
}

impl CacheRecord {
    pub fn from_body(category: Category, body: &Body) -> Self {
        Self {
            category: category.code(),
            payload_encoding: body.encoding.code(),
            gzip: body.gzon,
            payload: body.buf.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, CacheError> {
        let (record, read): (Self, usize) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        if read != bytes.len() {
            return Err(CacheError::InvalidRecord(format!(
                "{} trailing bytes after record",
                bytes.len() - read
            )));
        }
        Ok(record)
    }

    pub fn category(&self) -> Result<Category, CacheError> {
        Category::from_code(self.category)
            .ok_or_else(|| CacheError::InvalidRecord(format!("unknown category code {}", self.category)))
    }

    pub fn encoding(&self) -> Result<PayloadEncoding, CacheError> {
        PayloadEncoding::from_code(self.payload_encoding).ok_or_else(|| {
            CacheError::InvalidRecord(format!("unknown payload encoding {}", self.payload_encoding))
        })
    }

    /// Whether the payload was gzip-compressed when it was first sent.
    pub fn is_gzipped(&self) -> bool {
        self.gzip
    }
}

/// Durable queue that receives failed bodies. The writer calls `put` from
/// tokio's blocking pool, so implementations may do synchronous file I/O.
#[cfg_attr(test, automock)]
pub trait CacheQueue: Send + Sync {
    fn put(&self, record: &[u8]) -> Result<(), CacheError>;
}

/// Which categories may be written to the overflow cache when delivery fails
/// with a transient error. Categories in `never_cache` are high volume or
/// only meaningful when fresh, so replaying them later is not worth the I/O.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePolicy {
    pub never_cache: BTreeSet<Category>,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            never_cache: BTreeSet::from([
                Category::Metric,
                Category::MetricDeprecated,
                Category::Object,
                Category::CustomObject,
                Category::Dynamic,
            ]),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheDecision {
    Cache,
    Drop,
}

impl CachePolicy {
    pub fn is_cacheable(&self, category: Category) -> bool {
        !self.never_cache.contains(&category)
    }

    pub fn decide(&self, category: Category, cache_all: bool) -> CacheDecision {
        if cache_all || self.is_cacheable(category) {
            CacheDecision::Cache
        } else {
            CacheDecision::Drop
        }
    }

    /// The whole policy as a category → cacheable table.
    pub fn table(&self) -> Vec<(Category, bool)> {
        Category::ALL
            .iter()
            .map(|&c| (c, self.is_cacheable(c)))
            .collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    NotCacheable,
    NoCacheQueue,
}

impl DropReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DropReason::NotCacheable => "not_cacheable",
            DropReason::NoCacheQueue => "no_cache",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    Cached,
    Dropped(DropReason),
    Failed,
}

/// Hands transiently failed bodies to the durable queue according to the
/// cache policy.
#[derive(Clone)]
pub struct OverflowCache {
    queue: Option<Arc<dyn CacheQueue>>,
    policy: CachePolicy,
}

impl OverflowCache {
    pub fn new(queue: Option<Arc<dyn CacheQueue>>, policy: CachePolicy) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> &CachePolicy {
        &self.policy
    }

    /// Cache or drop one body. Enqueue failures are logged here and never
    /// reach the caller as errors.
    pub fn handle(&self, category: Category, body: &Body, cache_all: bool) -> CacheOutcome {
        let Some(queue) = &self.queue else {
            warn!("drop {} pts on {category}, no cache configured", body.npts);
            return CacheOutcome::Dropped(DropReason::NoCacheQueue);
        };

        if self.policy.decide(category, cache_all) == CacheDecision::Drop {
            warn!("drop {} pts on {category}, not cached", body.npts);
            return CacheOutcome::Dropped(DropReason::NotCacheable);
        }

        let result = CacheRecord::from_body(category, body)
            .encode()
            .and_then(|record| queue.put(&record));

        match result {
            Ok(()) => {
                info!("ok on cache {} pts on {category}", body.npts);
                CacheOutcome::Cached
            }
            Err(e) => {
                error!("cache {} pts on {category}: {e}", body.npts);
                CacheOutcome::Failed
            }
        }
    }
}
