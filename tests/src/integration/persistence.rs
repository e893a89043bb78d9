//! File-backed stores, restarts, and shutdown.

use std::sync::Arc;

use manifold_bus::{Bus, BusConfig, EventLogRecord, JsonFileStore, Wormhole, WormholeSpec};
use manifold_node::runtime::{AUDIT_LOG, SHIELD_EVENT};
use manifold_node::{NodeConfig, NodeRuntime};
use manifold_types::{BusError, Channel, PublishRequest};
use serde_json::json;

use super::{bus_with, bus_with_config, collect, drain, recv};

async fn file_bus(dir: &std::path::Path) -> Bus {
    Bus::builder()
        .channel(Channel::new("A"))
        .channel(Channel::new("B"))
        .wormhole_store(Arc::new(JsonFileStore::<Vec<Wormhole>>::new(
            dir.join("wormholes.json"),
        )))
        .log_store(Arc::new(JsonFileStore::<Vec<EventLogRecord>>::new(
            dir.join("event_log.json"),
        )))
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_wormholes_and_log_survive_restart() {
    let dir = tempfile::tempdir().unwrap();

    let bus = file_bus(dir.path()).await;
    let wormhole = bus
        .wormholes()
        .create(WormholeSpec::new("a-b", "A", "B"))
        .await
        .unwrap();
    let receipt = bus
        .publish(PublishRequest::new("System.Info", "A", json!({"persisted": true})))
        .await
        .unwrap();
    bus.log().mark_handled(receipt.id);
    let report = bus.shutdown().await;
    assert!(report.log_flushed);

    let bus = file_bus(dir.path()).await;
    let restored = bus.wormholes().get(wormhole.id).unwrap();
    assert_eq!(restored.wormhole.name, "a-b");
    assert_eq!(restored.stats.offered(), 0);

    let record = bus.log().by_id(receipt.id).unwrap();
    assert!(record.envelope.is_handled());
    assert_eq!(record.envelope.payload, json!({"persisted": true}));

    // The restored wormhole routes again.
    let (_b, mut b_rx) = collect(&bus, "B");
    bus.publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap();
    assert_eq!(recv(&mut b_rx).await.hop_count, 1);
    bus.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_queued_forwards() {
    let bus = bus_with(&["A", "B"]);
    let wormhole = bus
        .wormholes()
        .create(WormholeSpec::new("a-b", "A", "B"))
        .await
        .unwrap();
    let (_b, mut b_rx) = collect(&bus, "B");

    for n in 0..10 {
        bus.publish(PublishRequest::new("System.Info", "A", json!({ "n": n })))
            .await
            .unwrap();
    }
    let report = bus.shutdown().await;

    assert_eq!(report.discarded, 0);
    assert_eq!(bus.wormholes().get(wormhole.id).unwrap().stats.forwarded, 10);
    assert_eq!(drain(&mut b_rx).await.len(), 10);
}

#[tokio::test]
async fn test_shutdown_drains_chained_wormholes() {
    for _ in 0..20 {
        let bus = bus_with(&["A", "B", "C"]);
        bus.wormholes()
            .create(WormholeSpec::new("a-b", "A", "B"))
            .await
            .unwrap();
        bus.wormholes()
            .create(WormholeSpec::new("b-c", "B", "C"))
            .await
            .unwrap();
        let (_c, mut c_rx) = collect(&bus, "C");
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;

        for n in 0..3 {
            bus.publish(PublishRequest::new("System.Info", "A", json!({ "n": n })))
                .await
                .unwrap();
        }
        let report = bus.shutdown().await;

        assert_eq!(report.discarded, 0);
        let on_c = drain(&mut c_rx).await;
        assert_eq!(on_c.len(), 3);
        assert!(on_c.iter().all(|env| env.hop_count == 2));
    }
}

#[tokio::test]
async fn test_shutdown_accounts_for_every_queued_envelope() {
    let config = BusConfig {
        drain_timeout_ms: 0,
        ..BusConfig::default()
    };
    let bus = bus_with_config(config, &["A", "B"]);
    let wormhole = bus
        .wormholes()
        .create(WormholeSpec::new("a-b", "A", "B"))
        .await
        .unwrap();

    for _ in 0..20 {
        bus.publish(PublishRequest::new("System.Info", "A", json!(null)))
            .await
            .unwrap();
    }
    let report = bus.shutdown().await;

    let stats = bus.wormholes().get(wormhole.id).unwrap().stats;
    assert_eq!(stats.buffered, 0);
    assert_eq!(stats.forwarded + report.discarded as u64, 20);
}

#[tokio::test]
async fn test_publish_after_shutdown_rejected() {
    let bus = bus_with(&["A"]);
    bus.shutdown().await;
    let err = bus
        .publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::ShuttingDown));
}

#[tokio::test]
async fn test_node_routes_security_events_to_audit() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = NodeConfig {
        data_dir: dir.path().to_path_buf(),
        ..NodeConfig::default()
    };
    config.telemetry.metrics_enabled = false;

    let node = NodeRuntime::start(config).await.unwrap();
    let (_audit, mut audit_rx) = collect(node.bus(), AUDIT_LOG);

    let receipt = node
        .bus()
        .publish(PublishRequest::new(
            "Security.ThreatDetected",
            SHIELD_EVENT,
            json!({"ip": "10.0.0.1"}),
        ))
        .await
        .unwrap();

    let forwarded = recv(&mut audit_rx).await;
    assert_eq!(forwarded.correlation_id, receipt.correlation_id);
    assert_eq!(forwarded.hop_count, 1);
    node.shutdown().await;
}
