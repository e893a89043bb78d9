//! Wormhole routing end to end.

use std::time::Duration;

use manifold_bus::{
    OverflowPolicy, RouterDiagnostic, WormholeFilter, WormholePatch, WormholeSpec,
    WormholeTransform, MAX_HOPS,
};
use manifold_types::{BusError, PublishRequest};
use serde_json::json;

use super::{assert_quiet, bus_with, collect, drain, recv};

#[tokio::test]
async fn test_shield_to_audit_scenario() {
    let bus = bus_with(&["SHIELD_EVENT", "AUDIT_LOG"]);
    bus.wormholes()
        .create(
            WormholeSpec::new("threat-audit", "SHIELD_EVENT", "AUDIT_LOG")
                .filter(WormholeFilter::KindEquals("THREAT_DETECTED".into())),
        )
        .await
        .unwrap();
    let (_audit, mut audit_rx) = collect(&bus, "AUDIT_LOG");

    let receipt = bus
        .publish(PublishRequest::new("THREAT_DETECTED", "SHIELD_EVENT", json!({"ip": "10.0.0.1"})))
        .await
        .unwrap();

    let forwarded = recv(&mut audit_rx).await;
    assert_eq!(forwarded.correlation_id, receipt.correlation_id);
    assert_eq!(forwarded.hop_count, 1);
    assert_ne!(forwarded.id, receipt.id);
    assert_eq!(forwarded.kind.as_str(), "THREAT_DETECTED");
    assert_eq!(forwarded.payload, json!({"ip": "10.0.0.1"}));
    assert_quiet(&mut audit_rx).await;
}

#[tokio::test]
async fn test_glob_filter_forwards_only_matching_kinds() {
    let bus = bus_with(&["SHIELD_EVENT", "AUDIT_LOG"]);
    bus.wormholes()
        .create(
            WormholeSpec::new("security-only", "SHIELD_EVENT", "AUDIT_LOG")
                .filter(WormholeFilter::KindGlob("Security.*".into())),
        )
        .await
        .unwrap();
    let (_audit, mut audit_rx) = collect(&bus, "AUDIT_LOG");

    for kind in [
        "Security.ThreatDetected",
        "Treasury.Move",
        "Security.ShieldRotated",
        "System.Heartbeat",
        "SecurityTheatre",
    ] {
        bus.publish(PublishRequest::new(kind, "SHIELD_EVENT", json!(null)))
            .await
            .unwrap();
    }

    let mut kinds: Vec<String> = drain(&mut audit_rx)
        .await
        .iter()
        .map(|env| env.kind.to_string())
        .collect();
    kinds.sort();
    assert_eq!(kinds, vec!["Security.ShieldRotated", "Security.ThreatDetected"]);
}

#[tokio::test]
async fn test_self_loop_stops_at_hop_limit() {
    let bus = bus_with(&["A"]);
    let wormhole = bus
        .wormholes()
        .create(WormholeSpec::new("loop", "A", "A"))
        .await
        .unwrap();
    let (_sub, mut rx) = collect(&bus, "A");

    let receipt = bus
        .publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap();

    let received = drain(&mut rx).await;
    assert_eq!(received.len(), MAX_HOPS as usize + 1);
    assert!(received.iter().all(|env| env.correlation_id == receipt.correlation_id));
    let mut hops: Vec<u32> = received.iter().map(|env| env.hop_count).collect();
    hops.sort_unstable();
    assert_eq!(hops, (0..=MAX_HOPS).collect::<Vec<_>>());

    let stats = bus.wormholes().get(wormhole.id).unwrap().stats;
    assert_eq!(stats.forwarded, u64::from(MAX_HOPS));
    assert_eq!(stats.dropped, 1);
    assert_eq!(stats.offered(), u64::from(MAX_HOPS) + 1);

    let diagnostics = bus.wormholes().diagnostics(10);
    assert!(matches!(
        diagnostics.first(),
        Some(RouterDiagnostic::CycleDetected { hop_count, .. }) if *hop_count == MAX_HOPS
    ));
}

#[tokio::test]
async fn test_two_wormhole_cycle_is_bounded() {
    let bus = bus_with(&["A", "B"]);
    bus.wormholes()
        .create(WormholeSpec::new("a-b", "A", "B"))
        .await
        .unwrap();
    bus.wormholes()
        .create(WormholeSpec::new("b-a", "B", "A"))
        .await
        .unwrap();

    bus.publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    let totals = bus.wormholes().totals();
    assert_eq!(totals.forwarded, u64::from(MAX_HOPS));
    assert_eq!(totals.dropped, 1);
    assert_eq!(bus.log().len(), MAX_HOPS as usize + 1);
}

#[tokio::test]
async fn test_capacity_one_overflow_accounting() {
    let bus = bus_with(&["A", "B"]);
    let wormhole = bus
        .wormholes()
        .create(WormholeSpec::new("narrow", "A", "B").capacity(1))
        .await
        .unwrap();

    for n in 0..3 {
        bus.publish(PublishRequest::new("System.Info", "A", json!({ "n": n })))
            .await
            .unwrap();
    }

    let stats = bus.wormholes().get(wormhole.id).unwrap().stats;
    assert!(stats.buffered <= 1);
    assert!(stats.dropped >= 1);
    assert_eq!(stats.enqueued + stats.dropped, 3);
    assert!(bus
        .wormholes()
        .diagnostics(10)
        .iter()
        .any(|d| matches!(d, RouterDiagnostic::QueueFull { .. })));
}

#[tokio::test]
async fn test_drop_lowest_priority_keeps_urgent_items() {
    let bus = bus_with(&["A", "B"]);
    let wormhole = bus
        .wormholes()
        .create(
            WormholeSpec::new("urgent", "A", "B")
                .capacity(1)
                .overflow(OverflowPolicy::DropLowestPriority),
        )
        .await
        .unwrap();
    let (_sub, mut rx) = collect(&bus, "B");

    for priority in [1, 5, 2] {
        bus.publish(PublishRequest::new("System.Info", "A", json!(null)).priority(priority))
            .await
            .unwrap();
    }

    let received = drain(&mut rx).await;
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].priority.value(), 5);

    let stats = bus.wormholes().get(wormhole.id).unwrap().stats;
    assert_eq!(stats.enqueued, 2);
    assert_eq!(stats.evicted, 1);
    assert_eq!(stats.dropped, 1);
}

#[tokio::test]
async fn test_transform_rewrites_forwarded_envelope() {
    let bus = bus_with(&["TREASURY_MOVE", "AUDIT_LOG"]);
    bus.wormholes()
        .create(
            WormholeSpec::new("audit-moves", "TREASURY_MOVE", "AUDIT_LOG").transform(
                WormholeTransform {
                    kind: Some("Audit.EntryRecorded".into()),
                    priority: Some(9),
                    merge_payload: Some(json!({"audited": true})),
                },
            ),
        )
        .await
        .unwrap();
    let (_sub, mut rx) = collect(&bus, "AUDIT_LOG");

    bus.publish(PublishRequest::new("Treasury.Move", "TREASURY_MOVE", json!({"amount": 5})))
        .await
        .unwrap();

    let env = recv(&mut rx).await;
    assert_eq!(env.kind.as_str(), "Audit.EntryRecorded");
    assert_eq!(env.priority.value(), 5);
    assert_eq!(env.payload, json!({"amount": 5, "audited": true}));
}

#[tokio::test]
async fn test_crud_lifecycle() {
    let bus = bus_with(&["A", "B", "C"]);
    let router = bus.wormholes();

    let err = router
        .create(WormholeSpec::new("bad", "A", "MISSING"))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::UnknownChannel(_)));

    let created = router.create(WormholeSpec::new("a-b", "A", "B")).await.unwrap();
    assert_eq!(router.list().len(), 1);

    let updated = router
        .update(
            created.id,
            WormholePatch {
                to: Some("C".into()),
                ..WormholePatch::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.to.as_str(), "C");

    let (_c, mut c_rx) = collect(&bus, "C");
    bus.publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap();
    recv(&mut c_rx).await;

    router
        .update(created.id, WormholePatch::enabled(false))
        .await
        .unwrap();
    bus.publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap();
    assert_quiet(&mut c_rx).await;

    router.delete(created.id).await.unwrap();
    assert!(router.get(created.id).is_none());
    assert!(matches!(
        router.delete(created.id).await,
        Err(BusError::UnknownWormhole(_))
    ));
}
