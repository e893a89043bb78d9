//! Publish and subscribe semantics.

use std::sync::Arc;

use futures::StreamExt;
use manifold_bus::{from_fn, Transport};
use manifold_types::{BusError, ChannelId, Envelope, Priority, PublishRequest};
use parking_lot::Mutex;
use serde_json::json;
use tokio::time::timeout;

use super::{assert_quiet, bus_with, collect, recv, WAIT};

#[tokio::test]
async fn test_one_subscribe_one_publish_one_delivery_on_every_channel() {
    let channels = ["TREASURY_MOVE", "SHIELD_EVENT", "AUDIT_LOG", "SYSTEM"];
    let bus = bus_with(&channels);

    for channel in channels {
        let (_sub, mut rx) = collect(&bus, channel);
        let receipt = bus
            .publish(PublishRequest::new("System.Info", channel, json!({ "on": channel })))
            .await
            .unwrap();

        let env = recv(&mut rx).await;
        assert_eq!(env.id, receipt.id);
        assert_eq!(env.channel_id.as_str(), channel);
        assert_quiet(&mut rx).await;
    }
}

#[tokio::test]
async fn test_treasury_move_scenario() {
    let bus = bus_with(&["TREASURY_MOVE"]);
    let (_sub, mut rx) = collect(&bus, "TREASURY_MOVE");

    bus.publish(
        PublishRequest::new("Treasury.Move", "TREASURY_MOVE", json!({"amount": 1000})).priority(5),
    )
    .await
    .unwrap();

    let env = recv(&mut rx).await;
    assert_eq!(env.kind.as_str(), "Treasury.Move");
    assert_eq!(env.payload, json!({"amount": 1000}));
    assert_eq!(env.priority, Priority(5));
    assert_eq!(env.hop_count, 0);
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_unknown_channel_rejected_synchronously() {
    let bus = bus_with(&["SYSTEM"]);
    let err = bus
        .publish(PublishRequest::new("System.Info", "NOT_A_CHANNEL", json!(null)))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::UnknownChannel(ref id) if id.as_str() == "NOT_A_CHANNEL"));
    assert!(err.is_publish_rejection());
    assert!(bus.log().is_empty());
}

#[tokio::test]
async fn test_unsubscribe_stops_delivery() {
    let bus = bus_with(&["SYSTEM"]);
    let (sub, mut rx) = collect(&bus, "SYSTEM");

    assert!(sub.unsubscribe());
    assert!(!sub.unsubscribe());
    bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
        .await
        .unwrap();
    assert_quiet(&mut rx).await;
}

#[tokio::test]
async fn test_failing_subscriber_does_not_affect_siblings() {
    let bus = bus_with(&["SYSTEM"]);
    let _failing = bus
        .subscribe(
            "SYSTEM",
            from_fn("failing", |_env| async { Err(anyhow::anyhow!("rejected")) }),
        )
        .unwrap();
    let (_sub, mut rx) = collect(&bus, "SYSTEM");

    for _ in 0..3 {
        bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        recv(&mut rx).await;
    }
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    assert_eq!(bus.stats().subscriber_failures, 3);
}

struct Recording(Arc<Mutex<Vec<String>>>);

#[async_trait::async_trait]
impl Transport for Recording {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(&self, envelope: Arc<Envelope>) -> anyhow::Result<()> {
        self.0.lock().push(envelope.channel_id.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_transports_see_every_delivery() {
    let bus = bus_with(&["A", "B"]);
    let seen = Arc::new(Mutex::new(Vec::new()));
    bus.register_transport(Arc::new(Recording(seen.clone())));
    let (_sub, mut rx) = collect(&bus, "B");

    bus.publish(PublishRequest::new("System.Info", "A", json!(null)))
        .await
        .unwrap();
    bus.publish(PublishRequest::new("System.Info", "B", json!(null)))
        .await
        .unwrap();
    recv(&mut rx).await;
    tokio::time::sleep(std::time::Duration::from_millis(20)).await;

    let mut seen = seen.lock().clone();
    seen.sort();
    assert_eq!(seen, vec!["A", "B"]);
}

#[tokio::test]
async fn test_stream_yields_published_envelopes_in_order() {
    let bus = bus_with(&["SYSTEM"]);
    let mut stream = bus.stream("SYSTEM", 16).unwrap();

    for n in 0..3 {
        bus.publish(PublishRequest::new("System.Heartbeat", "SYSTEM", json!({ "n": n })))
            .await
            .unwrap();
    }

    for n in 0..3 {
        let env = timeout(WAIT, stream.next()).await.unwrap().unwrap();
        assert_eq!(env.payload["n"], n);
    }
    drop(stream);
    assert_eq!(bus.subscriber_count(Some(&ChannelId::from("SYSTEM"))), 0);
}
