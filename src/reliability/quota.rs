use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};

/// Status code and body marker the gateway uses to report that the
/// workspace ran out of data quota.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    pub status: u16,
    pub marker: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            status: 403,
            marker: "beyondDataUsage".to_string(),
        }
    }
}

impl QuotaConfig {
    pub fn matches(&self, status: u16, body: &str) -> bool {
        status == self.status && body.contains(&self.marker)
    }
}

/// Process-wide backpressure flag raised when the gateway reports quota
/// exhaustion.
///
/// `0` means normal operation. Any other value is the unix timestamp (seconds)
/// at which exhaustion was first observed since the flag was last cleared.
/// Share it with `Arc` between endpoints and monitoring.
#[derive(Debug, Default)]
pub struct QuotaTracker {
    exceeded_since: AtomicI64,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current flag value; `0` when not exceeded.
    pub fn get(&self) -> i64 {
        self.exceeded_since.load(Ordering::Acquire)
    }

    pub fn is_exceeded(&self) -> bool {
        self.get() != 0
    }

    /// Raise the flag with the current time. Returns `true` if this call
    /// flipped it; a flag that is already set keeps its original timestamp.
    pub fn mark_exceeded(&self) -> bool {
        self.mark_exceeded_at(chrono::Utc::now().timestamp())
    }

    pub fn mark_exceeded_at(&self, unix_secs: i64) -> bool {
        // 0 is reserved for "normal"
        let since = unix_secs.max(1);
        self.exceeded_since
            .compare_exchange(0, since, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Reset to normal. Returns `true` if the flag was set.
    pub fn clear(&self) -> bool {
        if self.get() == 0 {
            return false;
        }
        self.exceeded_since.swap(0, Ordering::AcqRel) != 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn starts_normal() {
        let tracker = QuotaTracker::new();
        assert_eq!(tracker.get(), 0);
        assert!(!tracker.is_exceeded());
        assert!(!tracker.clear());
    }

    #[test]
    fn mark_is_idempotent_and_keeps_first_timestamp() {
        let tracker = QuotaTracker::new();
        assert!(tracker.mark_exceeded_at(1_700_000_000));
        assert!(!tracker.mark_exceeded_at(1_800_000_000));
        assert_eq!(tracker.get(), 1_700_000_000);
    }

    #[test]
    fn clear_resets_to_zero() {
        let tracker = QuotaTracker::new();
        tracker.mark_exceeded();
        assert!(tracker.is_exceeded());
        assert!(tracker.clear());
        assert_eq!(tracker.get(), 0);
    }

    #[test]
    fn concurrent_marks_flip_once() {
        let tracker = Arc::new(QuotaTracker::new());
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || tracker.mark_exceeded_at(100 + i))
            })
            .collect();

        let flipped = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|flipped| *flipped)
            .count();
        assert_eq!(flipped, 1);
        assert!(tracker.is_exceeded());
    }

    #[test]
    fn config_matches_status_and_marker() {
        let config = QuotaConfig::default();
        assert!(config.matches(403, r#"{"error":"beyondDataUsage"}"#));
        assert!(!config.matches(401, "beyondDataUsage"));
        assert!(!config.matches(403, "token not found"));
    }
}
