//! E2E Test: Page Messages
//!
//! Tests the control messages pages can post to the worker:
//! 1. SKIP_WAITING activates a waiting worker
//! 2. CLIENTS_INFO answers the asking page with the controlled-page count,
//!    including pages opened after activation
//! 3. Anything else is ignored

use appshell_e2e::{navigate, TestHarness};
use appshell_runtime::service_worker::LifecycleEvent;
use appshell_runtime::{ClientType, MessageEvent, ServiceWorkerState, WorkerEvent};
use serde_json::json;

#[tokio::test]
async fn test_clients_info_reply_goes_to_sender_only() {
    let harness = TestHarness::new();
    let (asker, mut asker_rx) = harness.open_page("/apps/maps");
    let (_other, mut other_rx) = harness.open_page("/apps/capture/");
    harness.worker.handle(WorkerEvent::Install).await.unwrap();

    let message = MessageEvent::new(Some(json!({ "type": "CLIENTS_INFO" }))).from_client(asker);
    harness.worker.on_message(&message).await;

    assert_eq!(
        asker_rx.try_recv().unwrap(),
        json!({ "type": "CLIENTS_INFO", "clientsCount": 2 })
    );
    assert!(asker_rx.try_recv().is_err());
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_clients_info_counts_pages_opened_after_activation() {
    let harness = TestHarness::new();
    harness.worker.handle(WorkerEvent::Install).await.unwrap();

    let (asker, mut rx) = harness.open_page("/apps/maps");
    let (_other, _other_rx) = harness.open_page("/apps/capture/");
    harness.worker.on_fetch(&navigate("/apps/maps")).await;
    harness.worker.on_fetch(&navigate("/apps/capture/")).await;
    harness
        .clients
        .connect("https://elsewhere.example.net/apps/maps", ClientType::Window)
        .unwrap();

    let message = MessageEvent::new(Some(json!({ "type": "CLIENTS_INFO" }))).from_client(asker);
    harness.worker.on_message(&message).await;
    assert_eq!(
        rx.try_recv().unwrap(),
        json!({ "type": "CLIENTS_INFO", "clientsCount": 2 })
    );
}

#[tokio::test]
async fn test_clients_info_skips_pages_before_activation() {
    let harness = TestHarness::new();
    let (asker, mut rx) = harness.open_page("/apps/maps");

    let message = MessageEvent::new(Some(json!({ "type": "CLIENTS_INFO" }))).from_client(asker);
    harness.worker.on_message(&message).await;
    assert_eq!(rx.try_recv().unwrap()["clientsCount"], 0);
}

#[tokio::test]
async fn test_unknown_messages_ignored() {
    let harness = TestHarness::new();
    let (page, mut rx) = harness.open_page("/apps/maps");
    let before = harness.worker.lifecycle_events();

    for data in [
        Some(json!({ "type": "UNKNOWN" })),
        Some(json!({})),
        Some(json!("SKIP_WAITING")),
        Some(json!({ "kind": "CLIENTS_INFO" })),
        None,
    ] {
        harness
            .worker
            .on_message(&MessageEvent::new(data).from_client(page))
            .await;
    }

    assert!(rx.try_recv().is_err());
    assert_eq!(harness.worker.lifecycle_events(), before);
    assert_eq!(harness.worker.state(), ServiceWorkerState::Parsed);
}

#[tokio::test]
async fn test_skip_waiting_before_install_is_recorded() {
    let harness = TestHarness::new();
    let message = MessageEvent::new(Some(json!({ "type": "SKIP_WAITING" })));
    harness.worker.on_message(&message).await;

    assert!(harness
        .worker
        .lifecycle_events()
        .contains(&LifecycleEvent::SkipWaiting));
    assert_eq!(harness.worker.state(), ServiceWorkerState::Parsed);
}

#[tokio::test]
async fn test_skip_waiting_when_active_is_noop() {
    let harness = TestHarness::new();
    harness.worker.handle(WorkerEvent::Install).await.unwrap();
    let message = MessageEvent::new(Some(json!({ "type": "SKIP_WAITING" })));
    harness.worker.on_message(&message).await;
    assert_eq!(harness.worker.state(), ServiceWorkerState::Activated);
}

#[tokio::test]
async fn test_messages_through_event_loop() {
    let harness = TestHarness::new();
    let (asker, mut rx) = harness.open_page("/apps/maps/");
    let handle = harness.worker.clone().start();

    handle.dispatch(WorkerEvent::Install);
    handle.post_message(MessageEvent::new(Some(json!({ "type": "UNKNOWN" }))).from_client(asker));
    handle.post_message(
        MessageEvent::new(Some(json!({ "type": "CLIENTS_INFO", "extra": true }))).from_client(asker),
    );
    handle.shutdown().await;

    assert_eq!(
        rx.recv().await.unwrap(),
        json!({ "type": "CLIENTS_INFO", "clientsCount": 1 })
    );
    assert!(rx.try_recv().is_err());
}
