mod common;

use common::{points, scenario_apis};
use dataway_writer::reliability::{DiskConfig, DiskQueue, RetryPolicy, WriterMetrics};
use dataway_writer::{Category, Endpoint, EndpointConfig, Outcome, WriteRequest};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn disk_queue(dir: &TempDir) -> Arc<DiskQueue> {
    Arc::new(
        DiskQueue::new(DiskConfig {
            storage_path: dir.path().join("cache"),
            max_disk_usage: 1024 * 1024,
            retention_period: Duration::from_secs(3600),
        })
        .unwrap(),
    )
}

fn endpoint(server: &MockServer, queue: Arc<DiskQueue>) -> Endpoint {
    let config = EndpointConfig::default()
        .with_apis(scenario_apis())
        .with_retry(RetryPolicy::no_retry())
        .with_cache_queue(queue)
        .with_metrics(Arc::new(WriterMetrics::new().unwrap()));
    Endpoint::new(&format!("{}/?token=T1", server.uri()), config).unwrap()
}

#[tokio::test]
async fn failed_body_survives_on_disk_and_replays() {
    let dir = TempDir::new().unwrap();
    let queue = disk_queue(&dir);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let ep = endpoint(&server, queue.clone());
    ep.write_points(&WriteRequest::new(Category::Logging, points(3)).gzip(true))
        .await
        .unwrap();

    let ids = queue.list().unwrap();
    assert_eq!(ids.len(), 1);
    assert!(queue.current_disk_usage() > 0);

    let record = queue.read(&ids[0]).unwrap();
    assert_eq!(record.category().unwrap(), Category::Logging);
    assert!(record.is_gzipped());

    server.reset().await;
    Mock::given(method("POST"))
        .and(path("/v1/write/logging"))
        .and(header("content-encoding", "gzip"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = ep.send_cached(&record).await.unwrap();
    assert_eq!(outcome, Outcome::Accepted);

    let replayed = server.received_requests().await.unwrap();
    assert_eq!(replayed.last().unwrap().body, record.payload);

    queue.remove(&ids[0]).unwrap();
    assert!(queue.list().unwrap().is_empty());
    assert_eq!(queue.current_disk_usage(), 0);
}

#[tokio::test]
async fn replay_failure_is_not_cached_again() {
    let dir = TempDir::new().unwrap();
    let queue = disk_queue(&dir);

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let ep = endpoint(&server, queue.clone());
    ep.write_points(&WriteRequest::new(Category::Logging, points(1)))
        .await
        .unwrap();

    let ids = queue.list().unwrap();
    let record = queue.read(&ids[0]).unwrap();
    let outcome = ep.send_cached(&record).await.unwrap();

    assert_eq!(outcome, Outcome::ServerError);
    assert_eq!(queue.list().unwrap(), ids);
}

#[tokio::test]
async fn full_disk_drops_without_error() {
    let dir = TempDir::new().unwrap();
    let queue = Arc::new(
        DiskQueue::new(DiskConfig {
            storage_path: dir.path().join("cache"),
            max_disk_usage: 16,
            retention_period: Duration::from_secs(3600),
        })
        .unwrap(),
    );

    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let ep = endpoint(&server, queue.clone());
    ep.write_points(&WriteRequest::new(Category::Logging, points(5)))
        .await
        .unwrap();

    assert!(queue.list().unwrap().is_empty());
    assert_eq!(queue.current_disk_usage(), 0);
}
