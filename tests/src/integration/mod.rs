//! Shared fixtures for the scenario tests.

#![cfg(test)]

mod delivery;
mod event_log;
mod persistence;
mod pipeline;
mod pressure;
mod wormholes;

use std::sync::Arc;
use std::time::Duration;

use manifold_bus::{from_fn, Bus, BusConfig, Subscription};
use manifold_types::{Channel, Envelope};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver};
use tokio::time::timeout;

/// Upper bound on any single expected delivery.
pub(crate) const WAIT: Duration = Duration::from_millis(500);

/// How long to watch for a delivery that must not happen.
pub(crate) const QUIET: Duration = Duration::from_millis(100);

/// In-memory bus with the given channels registered.
pub(crate) fn bus_with(channels: &[&str]) -> Bus {
    bus_with_config(BusConfig::default(), channels)
}

pub(crate) fn bus_with_config(config: BusConfig, channels: &[&str]) -> Bus {
    let bus = Bus::new(config).unwrap();
    for id in channels {
        bus.register_channel(Channel::new(*id));
    }
    bus
}

/// Subscribe a handler that forwards every envelope into a channel.
pub(crate) fn collect(bus: &Bus, channel: &str) -> (Subscription, UnboundedReceiver<Arc<Envelope>>) {
    let (tx, rx) = unbounded_channel();
    let subscription = bus
        .subscribe(
            channel,
            from_fn(format!("collect:{channel}"), move |env| {
                let tx = tx.clone();
                async move {
                    let _ = tx.send(env);
                    Ok(())
                }
            }),
        )
        .unwrap();
    (subscription, rx)
}

pub(crate) async fn recv(rx: &mut UnboundedReceiver<Arc<Envelope>>) -> Arc<Envelope> {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("subscriber channel closed")
}

pub(crate) async fn assert_quiet(rx: &mut UnboundedReceiver<Arc<Envelope>>) {
    if let Ok(Some(env)) = timeout(QUIET, rx.recv()).await {
        panic!("unexpected delivery: {} on {}", env.kind, env.channel_id);
    }
}

/// Receive until nothing arrives for `QUIET`.
pub(crate) async fn drain(rx: &mut UnboundedReceiver<Arc<Envelope>>) -> Vec<Arc<Envelope>> {
    let mut received = Vec::new();
    while let Ok(Some(env)) = timeout(QUIET, rx.recv()).await {
        received.push(env);
    }
    received
}
