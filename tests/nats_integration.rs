//! NATS integration tests
//!
//! These tests require a running NATS server:
//!   nats-server
//!
//! Tests are skipped automatically if NATS is not available.

use a3s_realtime::{
    callback, ChangeKind, ConnectionStatus, EventFilter, NatsConfig, NatsTransport,
    RealtimeEvent, RealtimeManager,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Try to connect to NATS. Returns None if server is unavailable.
async fn try_nats_transport(suffix: &str) -> Option<NatsTransport> {
    let config = NatsConfig {
        url: "nats://127.0.0.1:4222".to_string(),
        subject_prefix: format!("test.{}", suffix),
        connect_timeout_secs: 2,
        ..Default::default()
    };

    match NatsTransport::connect(config).await {
        Ok(transport) => Some(transport),
        Err(_) => {
            eprintln!("NATS not available, skipping integration test");
            None
        }
    }
}

/// Helper to create a transport, or skip the test
macro_rules! nats_transport {
    ($suffix:expr) => {
        match try_nats_transport($suffix).await {
            Some(t) => t,
            None => return,
        }
    };
}

async fn wait_for_status(manager: &RealtimeManager, status: ConnectionStatus) -> bool {
    for _ in 0..50 {
        if manager.health().status == status {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

#[tokio::test]
async fn test_nats_subscribe_and_receive() {
    let transport = nats_transport!("receive");
    let publisher = transport.clone();
    let manager = RealtimeManager::new(transport).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager
        .subscribe(
            "orders",
            EventFilter::table("public", "orders").with_event(ChangeKind::Insert),
            callback(move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            }),
        )
        .unwrap();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected).await);

    let insert = RealtimeEvent::table_change(
        "orders",
        ChangeKind::Insert,
        "public",
        "orders",
        serde_json::json!({ "new": { "id": 42 } }),
    );
    let delete = RealtimeEvent::table_change(
        "orders",
        ChangeKind::Delete,
        "public",
        "orders",
        serde_json::json!({ "old": { "id": 7 } }),
    );
    publisher.publish(&delete).await.unwrap();
    publisher.publish(&insert).await.unwrap();

    for _ in 0..50 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].row()["id"], 42);
    drop(received);

    assert_eq!(manager.metrics()["orders"].samples, 1);
    manager.cleanup();
}

#[tokio::test]
async fn test_nats_heartbeat_latency() {
    let transport = nats_transport!("heartbeat");
    let manager = RealtimeManager::new(transport).unwrap();
    manager
        .subscribe("presence", EventFilter::broadcast("heartbeat"), callback(|_| Ok(())))
        .unwrap();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected).await);

    let latency = manager.probe_latency().await;
    assert!(latency.is_some());
    assert!(manager.health().latency_ms >= 0.0);
    manager.cleanup();
}

#[tokio::test]
async fn test_nats_heartbeat_is_not_delivered_to_own_subscribers() {
    let transport = nats_transport!("echo");
    let publisher = transport.clone();
    let manager = RealtimeManager::new(transport).unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = received.clone();
    manager
        .subscribe(
            "presence",
            EventFilter::broadcast("*"),
            callback(move |event| {
                sink.lock().unwrap().push(event.clone());
                Ok(())
            }),
        )
        .unwrap();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected).await);

    assert!(manager.probe_latency().await.is_some());

    // Messages from other publishers still arrive
    let joined = RealtimeEvent::broadcast("presence", "joined", serde_json::json!({ "user": "a" }));
    publisher.publish(&joined).await.unwrap();

    for _ in 0..50 {
        if !received.lock().unwrap().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    let received = received.lock().unwrap();
    assert_eq!(received.len(), 1);
    assert_eq!(received[0], joined);
    drop(received);

    let stats = manager.metrics();
    assert_eq!(stats["presence"].samples, 1);
    manager.cleanup();
}

#[tokio::test]
async fn test_nats_pause_and_resume() {
    let transport = nats_transport!("pause");
    let manager = RealtimeManager::new(transport).unwrap();
    manager
        .subscribe("orders", EventFilter::table("public", "orders"), callback(|_| Ok(())))
        .unwrap();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected).await);

    manager.pause();
    assert!(wait_for_status(&manager, ConnectionStatus::Disconnected).await);
    assert_eq!(manager.health().subscription_count, 1);

    manager.resume();
    assert!(wait_for_status(&manager, ConnectionStatus::Connected).await);
    manager.cleanup();
}

#[tokio::test]
async fn test_nats_unreachable_server() {
    let config = NatsConfig {
        url: "nats://127.0.0.1:1".to_string(),
        connect_timeout_secs: 1,
        ..Default::default()
    };
    assert!(NatsTransport::connect(config).await.is_err());
}
