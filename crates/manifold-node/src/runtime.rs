//! Node runtime: owns the bus and everything wired onto it.
//!
//! ## Startup Sequence
//!
//! 1. Create the data directory
//! 2. Build the bus over file-backed stores (restores wormholes and log)
//! 3. Register the well-known channels
//! 4. Create the default wormholes when none were persisted
//! 5. Install middleware, transports, the reclassifier, and metric export

use std::sync::Arc;

use anyhow::{Context, Result};
use manifold_bus::{
    Bus, EventLogRecord, JsonFileStore, Reclassifier, Subscription, TracingTransport, Wormhole,
    WormholeFilter, WormholeSpec,
};
use manifold_types::{Channel, Direction};
use tracing::{info, warn};

use crate::config::NodeConfig;
use crate::metrics::{install_stats_export, MetricsMiddleware};

pub const TREASURY_MOVE: &str = "TREASURY_MOVE";
pub const SHIELD_EVENT: &str = "SHIELD_EVENT";
pub const AUDIT_LOG: &str = "AUDIT_LOG";
pub const SYSTEM: &str = "SYSTEM";

/// Channels every node registers at startup.
#[must_use]
pub fn well_known_channels() -> Vec<Channel> {
    vec![
        Channel::new(TREASURY_MOVE)
            .with_label("Treasury movements")
            .with_direction(Direction::Bidirectional),
        Channel::new(SHIELD_EVENT)
            .with_label("Shield and threat events")
            .with_direction(Direction::In),
        Channel::new(AUDIT_LOG)
            .with_label("Audit trail")
            .with_direction(Direction::Out),
        Channel::new(SYSTEM)
            .with_label("System status and errors")
            .with_direction(Direction::Bidirectional),
    ]
}

/// Wormholes created on first start.
#[must_use]
pub fn default_wormholes() -> Vec<WormholeSpec> {
    vec![
        WormholeSpec::new("shield-audit", SHIELD_EVENT, AUDIT_LOG)
            .description("Copy security events into the audit trail")
            .filter(WormholeFilter::Namespace("Security".into())),
        WormholeSpec::new("treasury-audit", TREASURY_MOVE, AUDIT_LOG)
            .description("Audit high-priority treasury moves")
            .filter(WormholeFilter::MinPriority(4)),
    ]
}

/// A running node.
pub struct NodeRuntime {
    bus: Bus,
    config: NodeConfig,
    subscriptions: Vec<Subscription>,
}

impl NodeRuntime {
    /// Build and start the node.
    ///
    /// # Errors
    ///
    /// Fails if the data directory cannot be created, a store cannot be
    /// loaded, or a default wormhole is rejected.
    pub async fn start(config: NodeConfig) -> Result<Self> {
        info!("===========================================");
        info!("  Manifold Node v{}", env!("CARGO_PKG_VERSION"));
        info!("===========================================");

        tokio::fs::create_dir_all(&config.data_dir)
            .await
            .with_context(|| format!("Failed to create data dir {}", config.data_dir.display()))?;

        let mut builder = Bus::builder()
            .config(config.bus.clone())
            .wormhole_store(Arc::new(JsonFileStore::<Vec<Wormhole>>::new(
                config.wormhole_store_path(),
            )))
            .log_store(Arc::new(JsonFileStore::<Vec<EventLogRecord>>::new(
                config.event_log_path(),
            )));
        for channel in well_known_channels() {
            builder = builder.channel(channel);
        }
        let bus = builder.build().await.context("Failed to build bus")?;

        if config.default_wormholes && bus.wormholes().is_empty() {
            for spec in default_wormholes() {
                let wormhole = bus
                    .wormholes()
                    .create(spec)
                    .await
                    .context("Failed to create default wormhole")?;
                info!(wormhole = %wormhole.id, name = %wormhole.name, "Default wormhole created");
            }
        }

        bus.use_middleware(Arc::new(MetricsMiddleware));
        bus.register_transport(Arc::new(TracingTransport));
        install_stats_export(&bus, config.metrics_export);

        let mut subscriptions = Vec::new();
        if let Some(threshold) = config.reclassify_threshold {
            subscriptions.push(Reclassifier::new(&bus, threshold, AUDIT_LOG).attach(SYSTEM)?);
            info!(threshold, "Reclassifier attached");
        }

        info!(
            channels = bus.channels().len(),
            wormholes = bus.wormholes().len(),
            data_dir = %config.data_dir.display(),
            "Node started"
        );
        Ok(Self {
            bus,
            config,
            subscriptions,
        })
    }

    #[must_use]
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    #[must_use]
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Shut the bus down, draining wormholes and flushing the log.
    pub async fn shutdown(self) {
        info!("Initiating graceful shutdown...");
        for subscription in &self.subscriptions {
            subscription.unsubscribe();
        }
        let report = self.bus.shutdown().await;
        if report.discarded > 0 {
            warn!(discarded = report.discarded, "Shutdown discarded queued envelopes");
        }
        info!(log_flushed = report.log_flushed, "Shutdown complete");
    }
}
