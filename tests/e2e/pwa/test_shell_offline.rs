//! E2E Test: Shell Offline Capability
//!
//! Tests that navigations keep working without a network:
//! 1. Online navigations are returned untouched and written to the cache
//! 2. HTTP errors count as answers and are cached too
//! 3. Offline navigations get the last cached shell
//! 4. The cache survives a worker restart

use std::sync::Arc;

use appshell_e2e::{navigate, url, HtmlFixtures, TestHarness};
use appshell_runtime::service_worker::{CacheStorage, MemoryCacheStorage};
use appshell_runtime::{FetchResult, FetchSource, Response, WorkerEvent};

#[tokio::test]
async fn test_online_navigation_written_through() {
    let harness = TestHarness::new();
    let page = Response::html(200, HtmlFixtures::shell("maps")).with_header("ETag", "\"v7\"");
    harness.network.route(&url("/apps/maps"), page.clone());

    let result = harness.worker.on_fetch(&navigate("/apps/maps")).await;
    assert_eq!(result, FetchResult::Response(page.clone(), FetchSource::Network));

    harness.worker.settle().await;
    assert_eq!(harness.worker.cached_shell().await, Some(page));
    assert_eq!(
        harness.storage.keys().await.unwrap(),
        vec!["app-shell".to_string()]
    );
}

#[tokio::test]
async fn test_not_found_is_cached() {
    let harness = TestHarness::new();
    let missing = Response::html(404, "<h1>Not Found</h1>");
    harness.network.route(&url("/apps/retired/"), missing.clone());

    let result = harness.worker.on_fetch(&navigate("/apps/retired/")).await;
    assert_eq!(result.response(), Some(&missing));

    harness.worker.settle().await;
    assert_eq!(harness.worker.cached_shell().await, Some(missing));
}

#[tokio::test]
async fn test_server_error_returned_as_is() {
    let harness = TestHarness::new();
    let broken = Response::html(500, HtmlFixtures::server_error());
    harness.network.route(&url("/apps/maps"), broken.clone());

    let result = harness.worker.on_fetch(&navigate("/apps/maps")).await;
    assert_eq!(result, FetchResult::Response(broken, FetchSource::Network));
}

#[tokio::test]
async fn test_offline_serves_previous_shell() {
    let harness = TestHarness::new();
    harness.worker.on_fetch(&navigate("/apps/maps")).await;
    harness.worker.settle().await;
    let stored = harness.worker.cached_shell().await.unwrap();

    harness.network.set_online(false);
    let result = harness.worker.on_fetch(&navigate("/apps/capture")).await;
    assert_eq!(result, FetchResult::Response(stored, FetchSource::Cache));
}

#[tokio::test]
async fn test_latest_fetch_wins() {
    let harness = TestHarness::new();
    harness.worker.on_fetch(&navigate("/apps/maps")).await;
    harness.worker.settle().await;
    harness.worker.on_fetch(&navigate("/apps/capture/")).await;
    harness.worker.settle().await;

    harness.network.set_online(false);
    let result = harness.worker.on_fetch(&navigate("/apps/maps")).await;
    let body = result.response().map(|r| r.body.clone()).unwrap();
    assert_eq!(body, HtmlFixtures::shell("capture").into_bytes());
}

#[tokio::test]
async fn test_offline_without_cache() {
    let harness = TestHarness::new();
    harness.network.set_online(false);

    let result = harness.worker.on_fetch(&navigate("/apps/maps")).await;
    assert_eq!(result, FetchResult::Unavailable);
    assert_eq!(harness.network.request_count(), 1);
}

#[tokio::test]
async fn test_cache_survives_restart() {
    let storage = Arc::new(MemoryCacheStorage::new());
    let mut harness = TestHarness::with_storage(storage.clone());
    harness.worker.on_fetch(&navigate("/apps/maps/")).await;
    harness.worker.settle().await;

    harness.restart();
    harness.network.set_online(false);
    harness.worker.handle(WorkerEvent::Install).await.unwrap();

    let result = harness.worker.on_fetch(&navigate("/apps/maps/")).await;
    assert!(matches!(result, FetchResult::Response(_, FetchSource::Cache)));
}

#[tokio::test]
async fn test_single_attempt_per_navigation() {
    let harness = TestHarness::new();
    harness.network.set_online(false);
    for _ in 0..3 {
        harness.worker.on_fetch(&navigate("/apps/maps")).await;
    }
    assert_eq!(harness.network.request_count(), 3);
}

#[tokio::test]
async fn test_offline_through_event_loop() {
    let harness = TestHarness::new();
    let handle = harness.worker.clone().start();
    handle.dispatch(WorkerEvent::Install);

    let online = handle.fetch(navigate("/apps/maps")).await;
    assert!(matches!(online, FetchResult::Response(_, FetchSource::Network)));
    harness.worker.settle().await;

    harness.network.set_online(false);
    let offline = handle.fetch(navigate("/apps/maps")).await;
    assert!(matches!(offline, FetchResult::Response(_, FetchSource::Cache)));

    handle.shutdown().await;
}
