use dataway_writer::logging::LogLevel;
use dataway_writer::{Api, Category, DatawayConfig};
use std::time::Duration;

const VARS: &[&str] = &[
    "DATAWAY_CONFIG",
    "DATAWAY_URLS",
    "DATAWAY_HTTP_TIMEOUT_MS",
    "DATAWAY_ENABLE_DNS_CACHE",
    "DATAWAY_GZIP",
    "DATAWAY_MAX_RETRY_ATTEMPTS",
    "DATAWAY_APIS",
    "DATAWAY_LOG_LEVEL",
    "DATAWAY_EXTRA_HEADERS",
];

fn clear() {
    for var in VARS {
        // SAFETY: this binary holds a single test, nothing reads the
        // environment concurrently.
        unsafe { std::env::remove_var(var) };
    }
}

fn set(var: &str, value: &str) {
    // SAFETY: see `clear`.
    unsafe { std::env::set_var(var, value) };
}

// One test on purpose: the process environment is shared by every test in a
// binary.
#[test]
fn loads_from_environment() {
    clear();
    set(
        "DATAWAY_URLS",
        "https://gw-a.example/?token=A, https://gw-b.example/?token=B",
    );
    set("DATAWAY_HTTP_TIMEOUT_MS", "1500");
    set("DATAWAY_ENABLE_DNS_CACHE", "false");
    set("DATAWAY_GZIP", "false");
    set("DATAWAY_MAX_RETRY_ATTEMPTS", "2");
    set("DATAWAY_APIS", "metric,logging,/v1/datakit/pull");
    set("DATAWAY_LOG_LEVEL", "debug");
    set("DATAWAY_EXTRA_HEADERS", "X-Global-Tags:env=prod,X-Region:cn");

    let config = DatawayConfig::from_env().unwrap();
    assert_eq!(config.urls.len(), 2);
    assert_eq!(config.urls[1], "https://gw-b.example/?token=B");
    assert_eq!(config.http_timeout, Duration::from_millis(1500));
    assert!(!config.dns_cache.enabled);
    assert!(!config.gzip);
    assert_eq!(config.retry.max_attempts, 2);
    assert_eq!(config.logging.level, LogLevel::Debug);
    assert_eq!(config.extra_headers["X-Region"], "cn");
    assert_eq!(
        config.parsed_apis().unwrap(),
        vec![
            Api::Write(Category::Metric),
            Api::Write(Category::Logging),
            Api::ConfigPull
        ]
    );

    set("DATAWAY_HTTP_TIMEOUT_MS", "soon");
    assert!(DatawayConfig::from_env().is_err());

    clear();
    assert!(DatawayConfig::from_env().is_err(), "urls are required");

    set(
        "DATAWAY_CONFIG",
        r#"
        urls = ["http://localhost:9528?token=x"]
        gzip = false
        "#,
    );
    set("DATAWAY_URLS", "https://ignored.example/?token=y");
    let config = DatawayConfig::from_env().unwrap();
    assert_eq!(config.urls, vec!["http://localhost:9528?token=x"]);
    assert!(!config.gzip);

    clear();
}
