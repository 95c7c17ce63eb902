use crate::domain::Category;
use crate::reliability::disk::DiskConfig;
use crate::sender::dns::DnsCacheConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DnsCacheGroup {
    pub enabled: bool,
    #[serde(with = "super::serde_helpers")]
    pub refresh_interval: Duration,
    #[serde(with = "super::serde_helpers")]
    pub lookup_timeout: Duration,
}

impl Default for DnsCacheGroup {
    fn default() -> Self {
        let defaults = DnsCacheConfig::default();
        Self {
            enabled: true,
            refresh_interval: defaults.refresh_interval,
            lookup_timeout: defaults.lookup_timeout,
        }
    }
}

impl DnsCacheGroup {
    pub fn to_cache_config(&self) -> Option<DnsCacheConfig> {
        self.enabled.then(|| DnsCacheConfig {
            refresh_interval: self.refresh_interval,
            lookup_timeout: self.lookup_timeout,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheGroup {
    /// Build a disk-backed overflow queue.
    pub enabled: bool,
    /// Categories dropped instead of cached on transient failure.
    pub never_cache: BTreeSet<Category>,
    pub disk: DiskConfig,
}

impl Default for CacheGroup {
    fn default() -> Self {
        Self {
            enabled: false,
            never_cache: crate::reliability::cache::CachePolicy::default().never_cache,
            disk: DiskConfig::default(),
        }
    }
}
