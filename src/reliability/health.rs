use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

#[cfg(test)]
use mockall::automock;

/// Receives per-target reachability for bodies sent through a dynamic URL.
#[cfg_attr(test, automock)]
pub trait DeliveryReporter: Send + Sync {
    fn report(&self, url: &str, ok: bool);
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetHealth {
    Healthy,
    Unhealthy(String),
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    pub unhealthy_threshold: u32,
    pub recovery_threshold: u32,
    pub history_len: usize,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            unhealthy_threshold: 3,
            recovery_threshold: 2,
            history_len: 100,
        }
    }
}

#[derive(Debug)]
struct TargetState {
    health: TargetHealth,
    recent: VecDeque<bool>,
    consecutive_failures: u32,
    consecutive_successes: u32,
    last_report: Instant,
}

impl TargetState {
    fn new() -> Self {
        Self {
            health: TargetHealth::Healthy,
            recent: VecDeque::new(),
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_report: Instant::now(),
        }
    }
}

/// Tracks reachability of dial-testing targets, keyed by the dynamic URL the
/// results were posted to.
pub struct DialTestHealth {
    config: HealthConfig,
    targets: RwLock<HashMap<String, TargetState>>,
}

impl DialTestHealth {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            targets: RwLock::new(HashMap::new()),
        }
    }

    pub fn health(&self, url: &str) -> Option<TargetHealth> {
        self.targets.read().get(url).map(|s| s.health.clone())
    }

    pub fn consecutive_failures(&self, url: &str) -> u32 {
        self.targets
            .read()
            .get(url)
            .map_or(0, |s| s.consecutive_failures)
    }

    pub fn history(&self, url: &str) -> Vec<bool> {
        self.targets
            .read()
            .get(url)
            .map(|s| s.recent.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn unhealthy_targets(&self) -> Vec<String> {
        self.targets
            .read()
            .iter()
            .filter(|(_, s)| matches!(s.health, TargetHealth::Unhealthy(_)))
            .map(|(url, _)| url.clone())
            .collect()
    }

    /// Forget targets that have not reported for longer than `max_age`.
    pub fn cleanup_stale(&self, max_age: Duration) {
        self.targets.write().retain(|url, state| {
            let keep = state.last_report.elapsed() <= max_age;
            if !keep {
                tracing::debug!("dropping stale dial target {url}");
            }
            keep
        });
    }
}

impl Default for DialTestHealth {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}

impl DeliveryReporter for DialTestHealth {
    fn report(&self, url: &str, ok: bool) {
        let mut targets = self.targets.write();
        let state = targets
            .entry(url.to_string())
            .or_insert_with(TargetState::new);

        state.recent.push_back(ok);
        if state.recent.len() > self.config.history_len {
            state.recent.pop_front();
        }
        state.last_report = Instant::now();

        if ok {
            state.consecutive_successes += 1;
            state.consecutive_failures = 0;
        } else {
            state.consecutive_failures += 1;
            state.consecutive_successes = 0;
        }

        let next = if state.consecutive_failures >= self.config.unhealthy_threshold {
            TargetHealth::Unhealthy(format!(
                "{} consecutive delivery failures",
                state.consecutive_failures
            ))
        } else if state.consecutive_successes >= self.config.recovery_threshold {
            TargetHealth::Healthy
        } else {
            state.health.clone()
        };

        if next != state.health {
            tracing::info!("dial target {url} changed from {:?} to {:?}", state.health, next);
            state.health = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://probe.example/v1/write/dialtesting?token=T";

    #[test]
    fn unknown_target_has_no_health() {
        let health = DialTestHealth::default();
        assert!(health.health(URL).is_none());
        assert_eq!(health.consecutive_failures(URL), 0);
    }

    #[test]
    fn becomes_unhealthy_after_threshold() {
        let health = DialTestHealth::default();
        health.report(URL, false);
        health.report(URL, false);
        assert_eq!(health.health(URL), Some(TargetHealth::Healthy));

        health.report(URL, false);
        assert!(matches!(health.health(URL), Some(TargetHealth::Unhealthy(_))));
        assert_eq!(health.unhealthy_targets(), vec![URL.to_string()]);
    }

    #[test]
    fn recovers_after_successes() {
        let health = DialTestHealth::new(HealthConfig {
            unhealthy_threshold: 1,
            recovery_threshold: 2,
            history_len: 3,
        });
        health.report(URL, false);
        health.report(URL, true);
        assert!(matches!(health.health(URL), Some(TargetHealth::Unhealthy(_))));

        health.report(URL, true);
        assert_eq!(health.health(URL), Some(TargetHealth::Healthy));
        assert_eq!(health.history(URL), vec![false, true, true]);

        health.report(URL, true);
        assert_eq!(health.history(URL).len(), 3);
    }

    #[test]
    fn stale_targets_are_removed() {
        let health = DialTestHealth::default();
        health.report(URL, true);
        health.cleanup_stale(Duration::from_secs(60));
        assert!(health.health(URL).is_some());

        std::thread::sleep(Duration::from_millis(2));
        health.cleanup_stale(Duration::ZERO);
        assert!(health.health(URL).is_none());
    }
}
