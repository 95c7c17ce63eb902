#![allow(dead_code)]

use bytes::Bytes;
use dataway_writer::reliability::{CacheError, CacheQueue, CacheRecord, RetryPolicy, WriterMetrics};
use dataway_writer::{Api, Category, EndpointConfig};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Cache queue that keeps every record in memory.
#[derive(Default)]
pub struct RecordingQueue {
    records: Mutex<Vec<Vec<u8>>>,
    fail: bool,
}

impl RecordingQueue {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            records: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn count(&self) -> usize {
        self.records.lock().len()
    }

    pub fn decoded(&self) -> Vec<CacheRecord> {
        self.records
            .lock()
            .iter()
            .map(|r| CacheRecord::decode(r).unwrap())
            .collect()
    }
}

impl CacheQueue for RecordingQueue {
    fn put(&self, record: &[u8]) -> Result<(), CacheError> {
        if self.fail {
            return Err(CacheError::Unavailable("queue closed".to_string()));
        }
        self.records.lock().push(record.to_vec());
        Ok(())
    }
}

pub fn points(n: usize) -> Vec<Bytes> {
    (0..n)
        .map(|i| Bytes::from(format!("cpu,host=web-{i} usage_idle={i}.5 1700000000000000000")))
        .collect()
}

pub fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy {
        max_attempts,
        base_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        jitter: false,
        ..Default::default()
    }
}

/// Endpoint config routing every category, no retries, recording queue and
/// fresh metrics.
pub fn endpoint_config(
    queue: Arc<RecordingQueue>,
    metrics: Arc<WriterMetrics>,
) -> EndpointConfig {
    EndpointConfig::default()
        .with_retry(RetryPolicy::no_retry())
        .with_cache_queue(queue)
        .with_metrics(metrics)
}

pub fn scenario_apis() -> [Api; 2] {
    [Api::Write(Category::Metric), Api::Write(Category::Logging)]
}
