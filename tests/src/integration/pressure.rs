//! Metabolic pressure and the backpressure analyzer.

use std::time::Duration;

use manifold_bus::BusConfig;
use manifold_types::PublishRequest;
use serde_json::json;

use super::{bus_with, bus_with_config};

async fn accepted(bus: &manifold_bus::Bus, priority: u8) -> bool {
    bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)).priority(priority))
        .await
        .unwrap()
        .accepted
}

#[tokio::test]
async fn test_shedding_thresholds() {
    let bus = bus_with(&["SYSTEM"]);

    bus.set_metabolic_pressure(50);
    assert!(accepted(&bus, 1).await);

    bus.set_metabolic_pressure(51);
    assert!(!accepted(&bus, 1).await);
    assert!(accepted(&bus, 2).await);

    bus.set_metabolic_pressure(80);
    assert!(accepted(&bus, 2).await);

    bus.set_metabolic_pressure(81);
    assert!(!accepted(&bus, 2).await);
    assert!(accepted(&bus, 3).await);

    let stats = bus.stats();
    assert_eq!(stats.shed, 2);
    assert_eq!(stats.published, 5);
    assert_eq!(stats.metabolic_pressure, 81);
}

#[tokio::test]
async fn test_pressure_is_clamped() {
    let bus = bus_with(&["SYSTEM"]);
    assert_eq!(bus.set_metabolic_pressure(u8::MAX), 100);
    assert_eq!(bus.metabolic_pressure(), 100);
}

#[tokio::test]
async fn test_shed_envelopes_are_not_logged_or_routed() {
    let bus = bus_with(&["SYSTEM", "AUDIT_LOG"]);
    let wormhole = bus
        .wormholes()
        .create(manifold_bus::WormholeSpec::new("copy", "SYSTEM", "AUDIT_LOG"))
        .await
        .unwrap();
    bus.set_metabolic_pressure(100);

    assert!(!accepted(&bus, 1).await);
    assert!(bus.log().is_empty());
    assert_eq!(bus.wormholes().get(wormhole.id).unwrap().stats.offered(), 0);
}

#[tokio::test]
async fn test_analyze_with_envelope_is_a_pure_read() {
    let bus = bus_with(&["SYSTEM"]);
    bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
        .await
        .unwrap();
    let hypothetical = bus.log().recent(1)[0].envelope.clone();

    let before = bus.analyze(None);
    let with = bus.analyze(Some(&hypothetical));
    let after = bus.analyze(None);

    assert_eq!(with.window_len, before.window_len + 1);
    assert_eq!(before, after);
    assert_eq!(bus.analyzer().window_len(), 1);
}

#[tokio::test]
async fn test_auto_pressure_follows_temperature() {
    let config = BusConfig {
        auto_pressure: true,
        scheduler_tick_ms: 10,
        rate_reference: 1.0,
        ..BusConfig::default()
    };
    let bus = bus_with_config(config, &["SYSTEM"]);
    bus.start();

    for _ in 0..5 {
        assert!(accepted(&bus, 5).await);
    }
    tokio::time::sleep(Duration::from_millis(100)).await;

    // Rate term saturated, mean priority at max, a single kind: 0.4 + 0.3.
    assert_eq!(bus.metabolic_pressure(), 70);
    assert!(!accepted(&bus, 1).await);
    bus.shutdown().await;
}
