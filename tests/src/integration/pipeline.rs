//! Middleware ordering, mutation, and aborts.

use std::sync::Arc;

use async_trait::async_trait;
use manifold_bus::{Middleware, Next, WormholeSpec};
use manifold_types::{BusError, Envelope, PublishRequest};
use parking_lot::Mutex;
use serde_json::json;

use super::{assert_quiet, bus_with, collect, recv};

struct Trace {
    name: &'static str,
    calls: Arc<Mutex<Vec<&'static str>>>,
}

#[async_trait]
impl Middleware for Trace {
    fn name(&self) -> &str {
        self.name
    }

    async fn handle(&self, envelope: &mut Envelope, next: Next<'_>) -> anyhow::Result<()> {
        self.calls.lock().push(self.name);
        tokio::task::yield_now().await;
        next.run(envelope).await
    }
}

/// Swallows envelopes whose payload says `drop: true`.
struct Gate;

#[async_trait]
impl Middleware for Gate {
    fn name(&self) -> &str {
        "gate"
    }

    async fn handle(&self, envelope: &mut Envelope, next: Next<'_>) -> anyhow::Result<()> {
        if envelope.payload["drop"] == json!(true) {
            return Ok(());
        }
        next.run(envelope).await
    }
}

struct Stamp;

#[async_trait]
impl Middleware for Stamp {
    fn name(&self) -> &str {
        "stamp"
    }

    async fn handle(&self, envelope: &mut Envelope, next: Next<'_>) -> anyhow::Result<()> {
        envelope.payload["stamped"] = json!(true);
        envelope.source = "stamp".to_string();
        next.run(envelope).await
    }
}

#[tokio::test]
async fn test_middleware_runs_in_registration_order() {
    let bus = bus_with(&["SYSTEM"]);
    let calls = Arc::new(Mutex::new(Vec::new()));
    for name in ["first", "second", "third"] {
        bus.use_middleware(Arc::new(Trace {
            name,
            calls: calls.clone(),
        }));
    }

    for _ in 0..2 {
        bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
            .await
            .unwrap();
    }
    assert_eq!(
        *calls.lock(),
        vec!["first", "second", "third", "first", "second", "third"]
    );
}

#[tokio::test]
async fn test_declined_next_blocks_fan_out_and_forwarding() {
    let bus = bus_with(&["SHIELD_EVENT", "AUDIT_LOG"]);
    bus.use_middleware(Arc::new(Gate));
    let wormhole = bus
        .wormholes()
        .create(WormholeSpec::new("audit", "SHIELD_EVENT", "AUDIT_LOG"))
        .await
        .unwrap();
    let (_src, mut src_rx) = collect(&bus, "SHIELD_EVENT");
    let (_dst, mut dst_rx) = collect(&bus, "AUDIT_LOG");

    let err = bus
        .publish(PublishRequest::new(
            "Security.ThreatDetected",
            "SHIELD_EVENT",
            json!({"drop": true}),
        ))
        .await
        .unwrap_err();
    assert!(matches!(err, BusError::MiddlewareAborted { ref middleware, .. } if middleware == "gate"));

    assert_quiet(&mut src_rx).await;
    assert_quiet(&mut dst_rx).await;
    let status = bus.wormholes().get(wormhole.id).unwrap();
    assert_eq!(status.stats.offered(), 0);
    assert_eq!(status.stats.forwarded, 0);
    assert_eq!(bus.stats().rejected, 1);

    // The gate only stops what it targets.
    bus.publish(PublishRequest::new("Security.ThreatDetected", "SHIELD_EVENT", json!({})))
        .await
        .unwrap();
    recv(&mut src_rx).await;
    recv(&mut dst_rx).await;
}

#[tokio::test]
async fn test_middleware_mutations_reach_subscribers() {
    let bus = bus_with(&["SYSTEM"]);
    bus.use_middleware(Arc::new(Stamp));
    let (_sub, mut rx) = collect(&bus, "SYSTEM");

    bus.publish(PublishRequest::new("System.Info", "SYSTEM", json!({"n": 1})))
        .await
        .unwrap();

    let env = recv(&mut rx).await;
    assert_eq!(env.payload, json!({"n": 1, "stamped": true}));
    assert_eq!(env.source, "stamp");
}

#[tokio::test]
async fn test_failing_middleware_surfaces_reason() {
    struct Deny;

    #[async_trait]
    impl Middleware for Deny {
        fn name(&self) -> &str {
            "deny"
        }

        async fn handle(&self, _envelope: &mut Envelope, _next: Next<'_>) -> anyhow::Result<()> {
            anyhow::bail!("not allowed")
        }
    }

    let bus = bus_with(&["SYSTEM"]);
    bus.use_middleware(Arc::new(Deny));
    let err = bus
        .publish(PublishRequest::new("System.Info", "SYSTEM", json!(null)))
        .await
        .unwrap_err();
    match err {
        BusError::MiddlewareAborted { middleware, reason } => {
            assert_eq!(middleware, "deny");
            assert!(reason.contains("not allowed"));
        }
        other => panic!("unexpected error: {other}"),
    }
}
