//! Event log queries, handling, replay, and reclassification.

use std::time::Duration;

use manifold_bus::{BusConfig, Reclassifier};
use manifold_types::{EnvelopeId, PublishRequest, MAX_HOPS};
use serde_json::json;

use super::{assert_quiet, bus_with, bus_with_config, collect, drain, recv};

#[tokio::test]
async fn test_mark_handled_is_idempotent() {
    let bus = bus_with(&["SYSTEM"]);
    let receipt = bus
        .publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
        .await
        .unwrap();

    assert!(bus.log().mark_handled(receipt.id));
    assert!(!bus.log().mark_handled(receipt.id));
    assert!(!bus.log().mark_handled(EnvelopeId::new()));

    assert_eq!(bus.log().len(), 1);
    let record = bus.log().by_id(receipt.id).unwrap();
    assert!(record.envelope.is_handled());
    assert_eq!(bus.log().recent(10).len(), 1);
}

#[tokio::test]
async fn test_log_is_bounded_newest_first() {
    let config = BusConfig {
        max_log: 3,
        ..BusConfig::default()
    };
    let bus = bus_with_config(config, &["SYSTEM"]);

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!({ "n": n })))
                .await
                .unwrap()
                .id,
        );
    }

    let recent: Vec<_> = bus.log().recent(10).iter().map(|r| r.envelope.id).collect();
    assert_eq!(recent, vec![ids[4], ids[3], ids[2]]);
    assert!(bus.log().by_id(ids[0]).is_none());
}

#[tokio::test]
async fn test_records_carry_analyzer_snapshot() {
    let bus = bus_with(&["SYSTEM"]);
    for _ in 0..3 {
        bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
            .await
            .unwrap();
    }
    let newest = &bus.log().recent(1)[0];
    assert_eq!(newest.snapshot.window_len, 3);
    assert!((0.0..=1.0).contains(&newest.snapshot.temperature));
}

#[tokio::test]
async fn test_replay_redelivers_only_unhandled() {
    let bus = bus_with(&["SYSTEM"]);
    let mut ids = Vec::new();
    for n in 0..3 {
        ids.push(
            bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!({ "n": n })))
                .await
                .unwrap()
                .id,
        );
    }
    bus.log().mark_handled(ids[1]);
    let (_late, mut rx) = collect(&bus, "SYSTEM");

    assert_eq!(bus.replay(10), 2);
    let mut replayed: Vec<_> = drain(&mut rx).await.iter().map(|env| env.id).collect();
    replayed.sort();
    let mut expected = vec![ids[0], ids[2]];
    expected.sort();
    assert_eq!(replayed, expected);
    assert_eq!(bus.stats().replayed, 2);
    assert_eq!(bus.log().len(), 3);
}

#[tokio::test]
async fn test_reclassifier_downgrades_errors_when_hot() {
    let bus = bus_with(&["SYSTEM", "AUDIT_LOG"]);
    let _reclassifier = Reclassifier::new(&bus, 0.0, "AUDIT_LOG")
        .attach("SYSTEM")
        .unwrap();
    let (_audit, mut audit_rx) = collect(&bus, "AUDIT_LOG");

    let receipt = bus
        .publish(PublishRequest::new("System.Error", "SYSTEM", json!({"disk": "full"})).priority(5))
        .await
        .unwrap();

    let info = recv(&mut audit_rx).await;
    assert_eq!(info.kind.as_str(), "System.Info");
    assert_eq!(info.priority.value(), bus.config().priority_min);
    assert_eq!(info.correlation_id, receipt.correlation_id);
    assert_eq!(info.source, "reclassifier");
    assert_eq!(info.payload["payload"], json!({"disk": "full"}));

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(bus.log().by_id(receipt.id).unwrap().envelope.is_handled());
}

#[tokio::test]
async fn test_reclassifier_feedback_is_bounded_by_hop_limit() {
    let bus = bus_with(&["SYSTEM"]);
    // Rewrite the republished info back into an error on the same channel,
    // so the reclassifier keeps seeing its own output.
    bus.wormholes()
        .create(
            manifold_bus::WormholeSpec::new("re-error", "SYSTEM", "SYSTEM")
                .filter(manifold_bus::WormholeFilter::Source("reclassifier".into()))
                .transform(manifold_bus::WormholeTransform {
                    kind: Some("System.Error".into()),
                    ..Default::default()
                }),
        )
        .await
        .unwrap();
    let _reclassifier = Reclassifier::new(&bus, 0.0, "SYSTEM")
        .attach("SYSTEM")
        .unwrap();
    let (_sub, mut rx) = collect(&bus, "SYSTEM");

    bus.publish(PublishRequest::new("System.Error", "SYSTEM", json!(null)))
        .await
        .unwrap();

    let received = drain(&mut rx).await;
    assert!(!received.is_empty());
    assert!(received.iter().all(|env| env.hop_count <= MAX_HOPS));
    assert_quiet(&mut rx).await;
}
