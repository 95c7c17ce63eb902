use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unknown category: {0}")]
pub struct UnknownCategory(pub String);

/// Logical class of telemetry data. Decides the write path on the gateway and
/// whether failed bodies are eligible for the overflow cache.
///
/// The numeric codes are persisted inside cached records, so they must never
/// be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Category {
    Unknown = 0,
    /// Ad hoc target that is only reachable through a dynamic URL.
    #[serde(rename = "dynamic_dw")]
    Dynamic = 1,
    #[serde(rename = "metrics")]
    MetricDeprecated = 2,
    Metric = 3,
    Network = 4,
    #[serde(rename = "keyevent")]
    KeyEvent = 5,
    Object = 6,
    CustomObject = 7,
    Logging = 8,
    Tracing = 9,
    Rum = 10,
    Security = 11,
    Profiling = 12,
    #[serde(rename = "dialtesting")]
    DialTesting = 13,
}

impl Category {
    pub const ALL: [Category; 14] = [
        Category::Unknown,
        Category::Dynamic,
        Category::MetricDeprecated,
        Category::Metric,
        Category::Network,
        Category::KeyEvent,
        Category::Object,
        Category::CustomObject,
        Category::Logging,
        Category::Tracing,
        Category::Rum,
        Category::Security,
        Category::Profiling,
        Category::DialTesting,
    ];

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.code() == code)
    }

    /// Write path on the gateway. `None` for categories that have no static
    /// route and must be sent through a dynamic URL.
    pub fn url_path(self) -> Option<&'static str> {
        match self {
            Category::Unknown | Category::Dynamic => None,
            Category::MetricDeprecated => Some("/v1/write/metrics"),
            Category::Metric => Some("/v1/write/metric"),
            Category::Network => Some("/v1/write/network"),
            Category::KeyEvent => Some("/v1/write/keyevent"),
            Category::Object => Some("/v1/write/object"),
            Category::CustomObject => Some("/v1/write/custom_object"),
            Category::Logging => Some("/v1/write/logging"),
            Category::Tracing => Some("/v1/write/tracing"),
            Category::Rum => Some("/v1/write/rum"),
            Category::Security => Some("/v1/write/security"),
            Category::Profiling => Some("/v1/write/profiling"),
            Category::DialTesting => Some("/v1/write/dialtesting"),
        }
    }

    /// Short name used in metric labels and logs.
    pub fn name(self) -> &'static str {
        match self {
            Category::Unknown => "unknown",
            Category::Dynamic => "dynamic_dw",
            Category::MetricDeprecated => "metrics",
            Category::Metric => "metric",
            Category::Network => "network",
            Category::KeyEvent => "keyevent",
            Category::Object => "object",
            Category::CustomObject => "custom_object",
            Category::Logging => "logging",
            Category::Tracing => "tracing",
            Category::Rum => "rum",
            Category::Security => "security",
            Category::Profiling => "profiling",
            Category::DialTesting => "dialtesting",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Category {
    type Err = UnknownCategory;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.name() == lowered || c.url_path() == Some(lowered.as_str()))
            .ok_or(UnknownCategory(s.to_string()))
    }
}

/// Key of an endpoint's routing table: either a data write path or one of the
/// control paths that are fetched with GET.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Api {
    Write(Category),
    LogFilterPull,
    ConfigPull,
}

impl Api {
    pub fn path(self) -> Option<&'static str> {
        match self {
            Api::Write(category) => category.url_path(),
            Api::LogFilterPull => Some("/v1/logfilter/pull"),
            Api::ConfigPull => Some("/v1/datakit/pull"),
        }
    }

    /// Every write category with a static path plus both control paths.
    pub fn all_routable() -> Vec<Api> {
        Category::ALL
            .iter()
            .copied()
            .filter(|c| c.url_path().is_some())
            .map(Api::Write)
            .chain([Api::LogFilterPull, Api::ConfigPull])
            .collect()
    }
}

impl FromStr for Api {
    type Err = UnknownCategory;

    /// Accepts a control path (`/v1/logfilter/pull`), its short name
    /// (`logfilter`, `datakit_pull`) or anything [`Category`] parses.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "/v1/logfilter/pull" | "logfilter" | "log_filter_pull" => Ok(Api::LogFilterPull),
            "/v1/datakit/pull" | "datakit_pull" | "config_pull" => Ok(Api::ConfigPull),
            _ => s.parse::<Category>().map(Api::Write),
        }
    }
}

impl From<Category> for Api {
    fn from(category: Category) -> Self {
        Api::Write(category)
    }
}

impl fmt::Display for Api {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.path() {
            Some(path) => f.write_str(path),
            None => write!(f, "{self:?}"),
        }
    }
}
