pub mod cache;
pub mod disk;
pub mod health;
pub mod metrics;
pub mod quota;
pub mod retry;

pub use cache::{
    CacheDecision, CacheError, CacheOutcome, CachePolicy, CacheQueue, CacheRecord, DropReason,
    OverflowCache,
};
pub use disk::{DiskConfig, DiskQueue};
pub use health::{DeliveryReporter, DialTestHealth, HealthConfig, TargetHealth};
pub use metrics::{MetricsError, WriterMetrics};
pub use quota::{QuotaConfig, QuotaTracker};
pub use retry::{RetryError, RetryPolicy, RetryStrategy, RetryingTransport};
