//! # Bus
//!
//! The explicit bus value every producer and subscriber shares. Construct
//! once at process start and pass it around; it is cheap to clone.
//!
//! ## Publish Flow
//!
//! ```text
//! publish(request)
//!   ├─ reject: shutting down / unknown channel
//!   ├─ middleware chain (once, in order)       ─► MiddlewareAborted
//!   ├─ metabolic shedding                      ─► receipt.accepted = false
//!   ├─ sampled == false                        ─► counted, no fan-out
//!   └─ deliver
//!        ├─ analyzer observe
//!        ├─ event log append
//!        ├─ subscribers + transports (spawned, isolated)
//!        └─ wormhole router offer
//! ```
//!
//! Wormhole forwards enter at `deliver`, never at the middleware chain.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::FutureExt;
use manifold_types::{
    now_millis, BusError, Channel, ChannelId, Envelope, Priority, PublishReceipt,
    PublishRequest, MAX_HOPS,
};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::analyzer::{AnalyzerSnapshot, BackpressureAnalyzer};
use crate::config::BusConfig;
use crate::event_log::{EventLog, EventLogRecord, LogStore};
use crate::middleware::{panic_message, Middleware, MiddlewareChain};
use crate::registry::ChannelRegistry;
use crate::router::{Reentry, Wormhole, WormholeRouter, WormholeStore};
use crate::scheduler::Scheduler;
use crate::stats::{BusStats, StatsCollector};
use crate::store::MemoryStore;
use crate::subscriber::{
    EventStream, StreamForwarder, Subscriber, Subscription, SubscriptionTarget,
};
use crate::transport::Transport;

/// Pressure above which priorities below 3 are shed.
pub const CRITICAL_PRESSURE: u8 = 80;
/// Pressure above which priorities below 2 are shed.
pub const ELEVATED_PRESSURE: u8 = 50;

/// Shared publish/subscribe bus.
#[derive(Clone)]
pub struct Bus {
    inner: Arc<BusInner>,
}

/// Non-owning handle, for subscribers that publish back into the bus.
#[derive(Clone)]
pub struct WeakBus {
    inner: Weak<BusInner>,
}

impl WeakBus {
    #[must_use]
    pub fn upgrade(&self) -> Option<Bus> {
        self.inner.upgrade().map(|inner| Bus { inner })
    }
}

/// What `shutdown` did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Wormhole envelopes discarded after the drain timeout.
    pub discarded: usize,
    /// Whether the final log flush saved anything.
    pub log_flushed: bool,
}

struct BusInner {
    config: BusConfig,
    channels: Arc<ChannelRegistry>,
    middleware: MiddlewareChain,
    router: WormholeRouter,
    log: EventLog,
    analyzer: BackpressureAnalyzer,
    transports: RwLock<Vec<Arc<dyn Transport>>>,
    stats: Arc<StatsCollector>,
    scheduler: Scheduler,
    shutting_down: AtomicBool,
}

// =============================================================================
// CONSTRUCTION
// =============================================================================

/// Builder for a [`Bus`] with custom stores.
pub struct BusBuilder {
    config: BusConfig,
    wormhole_store: Option<WormholeStore>,
    log_store: Option<LogStore>,
    channels: Vec<Channel>,
}

impl BusBuilder {
    #[must_use]
    pub fn config(mut self, config: BusConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub fn wormhole_store(mut self, store: WormholeStore) -> Self {
        self.wormhole_store = Some(store);
        self
    }

    #[must_use]
    pub fn log_store(mut self, store: LogStore) -> Self {
        self.log_store = Some(store);
        self
    }

    /// Register a channel before persisted state is restored.
    #[must_use]
    pub fn channel(mut self, channel: Channel) -> Self {
        self.channels.push(channel);
        self
    }

    /// Build, restore persisted wormholes and log, and start the scheduler.
    ///
    /// # Errors
    ///
    /// `BusError::Config` for an invalid config, `BusError::Store` if a
    /// store fails to load.
    pub async fn build(self) -> Result<Bus, BusError> {
        let bus = Bus::assemble(
            self.config,
            self.wormhole_store
                .unwrap_or_else(|| Arc::new(MemoryStore::<Vec<Wormhole>>::new())),
            self.log_store
                .unwrap_or_else(|| Arc::new(MemoryStore::<Vec<EventLogRecord>>::new())),
        )?;
        for channel in self.channels {
            bus.register_channel(channel);
        }

        let wormholes = bus.inner.router.restore().await?;
        let records = bus.inner.log.restore().await?;
        bus.start();
        info!(wormholes, records, "Bus ready");
        Ok(bus)
    }
}

impl Bus {
    /// In-memory bus. Call [`Bus::start`] to run housekeeping jobs.
    ///
    /// # Errors
    ///
    /// `BusError::Config` if the config does not validate.
    pub fn new(config: BusConfig) -> Result<Self, BusError> {
        Self::assemble(
            config,
            Arc::new(MemoryStore::<Vec<Wormhole>>::new()),
            Arc::new(MemoryStore::<Vec<EventLogRecord>>::new()),
        )
    }

    #[must_use]
    pub fn builder() -> BusBuilder {
        BusBuilder {
            config: BusConfig::default(),
            wormhole_store: None,
            log_store: None,
            channels: Vec::new(),
        }
    }

    fn assemble(
        config: BusConfig,
        wormhole_store: WormholeStore,
        log_store: LogStore,
    ) -> Result<Self, BusError> {
        config.validate()?;

        let inner = Arc::new_cyclic(|weak: &Weak<BusInner>| {
            let channels = Arc::new(ChannelRegistry::new());
            let reentry: Weak<dyn Reentry> = weak.clone();
            BusInner {
                router: WormholeRouter::new(channels.clone(), reentry, wormhole_store, &config),
                log: EventLog::new(config.max_log, log_store),
                analyzer: BackpressureAnalyzer::new(&config),
                scheduler: Scheduler::new(config.scheduler_tick()),
                middleware: MiddlewareChain::new(),
                transports: RwLock::new(Vec::new()),
                stats: Arc::new(StatsCollector::default()),
                shutting_down: AtomicBool::new(false),
                channels,
                config,
            }
        });

        let bus = Self { inner };
        bus.register_housekeeping();
        Ok(bus)
    }

    fn register_housekeeping(&self) {
        let config = &self.inner.config;

        let weak = self.downgrade();
        self.inner
            .scheduler
            .every("analyzer.prune", Duration::from_secs(1), move || {
                let weak = weak.clone();
                async move {
                    if let Some(bus) = weak.upgrade() {
                        bus.inner.analyzer.prune(now_millis());
                    }
                }
                .boxed()
            });

        let weak = self.downgrade();
        self.inner
            .scheduler
            .every("log.flush", config.log_flush_interval(), move || {
                let weak = weak.clone();
                async move {
                    if let Some(bus) = weak.upgrade() {
                        if let Err(e) = bus.inner.log.flush().await {
                            warn!(error = %e, "Event log flush failed");
                        }
                    }
                }
                .boxed()
            });

        if config.auto_pressure {
            let weak = self.downgrade();
            self.inner
                .scheduler
                .every("pressure.refresh", config.scheduler_tick(), move || {
                    let weak = weak.clone();
                    async move {
                        if let Some(bus) = weak.upgrade() {
                            let temperature = bus.analyze(None).temperature;
                            bus.set_metabolic_pressure((temperature * 100.0).round() as u8);
                        }
                    }
                    .boxed()
                });
        }
    }

    /// Start the housekeeping scheduler. Idempotent.
    pub fn start(&self) {
        self.inner.scheduler.start();
    }

    #[must_use]
    pub fn downgrade(&self) -> WeakBus {
        WeakBus {
            inner: Arc::downgrade(&self.inner),
        }
    }

    #[must_use]
    pub fn config(&self) -> &BusConfig {
        &self.inner.config
    }

    // =========================================================================
    // CHANNELS & SUBSCRIBERS
    // =========================================================================

    /// Register a channel, or update its metadata. Returns `true` if new.
    pub fn register_channel(&self, channel: Channel) -> bool {
        self.inner.channels.register(channel)
    }

    #[must_use]
    pub fn channel(&self, id: &ChannelId) -> Option<Channel> {
        self.inner.channels.get(id)
    }

    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.inner.channels.list()
    }

    /// Attach a handler to one channel.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownChannel` if the channel is not registered.
    pub fn subscribe(
        &self,
        channel: impl Into<ChannelId>,
        handler: Arc<dyn Subscriber>,
    ) -> Result<Subscription, BusError> {
        let channel = channel.into();
        let id = self.inner.channels.add_subscriber(&channel, handler)?;
        Ok(Subscription::new(
            id,
            SubscriptionTarget::Channel(channel),
            Arc::downgrade(&self.inner.channels),
        ))
    }

    /// Attach a handler to every channel. It is dispatched before channel
    /// handlers.
    pub fn subscribe_all(&self, handler: Arc<dyn Subscriber>) -> Subscription {
        let id = self.inner.channels.add_global(handler);
        Subscription::new(
            id,
            SubscriptionTarget::All,
            Arc::downgrade(&self.inner.channels),
        )
    }

    /// Pull-based subscription with a bounded buffer; envelopes are dropped
    /// while the consumer lags.
    ///
    /// # Errors
    ///
    /// `BusError::UnknownChannel` if the channel is not registered.
    pub fn stream(
        &self,
        channel: impl Into<ChannelId>,
        buffer: usize,
    ) -> Result<EventStream, BusError> {
        let (sender, receiver) = tokio::sync::mpsc::channel(buffer.max(1));
        let subscription = self.subscribe(channel, Arc::new(StreamForwarder { sender }))?;
        Ok(EventStream::new(subscription, receiver))
    }

    #[must_use]
    pub fn subscriber_count(&self, channel: Option<&ChannelId>) -> usize {
        self.inner.channels.subscriber_count(channel)
    }

    /// Append to the global middleware chain.
    pub fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.inner.middleware.push(middleware);
    }

    pub fn register_transport(&self, transport: Arc<dyn Transport>) {
        info!(transport = transport.name(), "Transport registered");
        self.inner.transports.write().push(transport);
    }

    // =========================================================================
    // PUBLISHING
    // =========================================================================

    /// Publish an envelope.
    ///
    /// Resolves once middleware has run and fan-out has been dispatched;
    /// subscriber and routing outcomes are not awaited.
    ///
    /// # Errors
    ///
    /// - `BusError::ShuttingDown` after `shutdown` began
    /// - `BusError::UnknownChannel` for an unregistered channel
    /// - `BusError::MiddlewareAborted` if the chain did not complete
    pub async fn publish(&self, request: PublishRequest) -> Result<PublishReceipt, BusError> {
        let envelope = self.inner.prepare(request, 0)?;
        self.inner.admit(envelope).await
    }

    /// Publish a new envelope caused by `parent`.
    ///
    /// Runs the full middleware chain, inherits the parent's correlation id,
    /// and carries `parent.hop_count + 1`.
    ///
    /// # Errors
    ///
    /// `BusError::CycleDetected` if the parent is already at `MAX_HOPS`,
    /// plus every error of [`Bus::publish`].
    pub async fn publish_derived(
        &self,
        parent: &Envelope,
        request: PublishRequest,
    ) -> Result<PublishReceipt, BusError> {
        if parent.hop_count >= MAX_HOPS {
            warn!(
                correlation_id = %parent.correlation_id,
                hop_count = parent.hop_count,
                "Derived publish refused at hop limit"
            );
            return Err(BusError::CycleDetected {
                correlation_id: parent.correlation_id,
                hop_count: parent.hop_count,
            });
        }
        let request = request.correlation_id(parent.correlation_id);
        let envelope = self.inner.prepare(request, parent.hop_count + 1)?;
        self.inner.admit(envelope).await
    }

    /// Re-deliver the newest `limit` unhandled log records, oldest first, to
    /// their channel subscribers only. No middleware, wormholes, transports,
    /// or new log records. Returns how many envelopes were replayed.
    pub fn replay(&self, limit: usize) -> usize {
        let candidates = self.inner.log.replay_candidates(limit);
        for record in &candidates {
            let envelope = Arc::new(record.envelope.clone());
            for handler in self.inner.channels.channel_subscribers(&envelope.channel_id) {
                self.inner.spawn_handler(handler, Arc::clone(&envelope));
            }
        }
        self.inner.stats.record_replayed(candidates.len());
        info!(replayed = candidates.len(), "Event log replayed");
        candidates.len()
    }

    // =========================================================================
    // PRESSURE, STATS, ANALYSIS
    // =========================================================================

    /// Set the metabolic pressure, clamped to `0..=100`. Returns the stored
    /// value.
    pub fn set_metabolic_pressure(&self, score: u8) -> u8 {
        let pressure = score.min(100);
        let previous = self.inner.stats.pressure();
        self.inner.stats.set_pressure(pressure);
        if pressure > CRITICAL_PRESSURE && previous <= CRITICAL_PRESSURE {
            warn!(pressure, "Critical metabolic pressure, shedding priorities below 3");
        } else if pressure != previous {
            debug!(pressure, previous, "Metabolic pressure changed");
        }
        pressure
    }

    #[must_use]
    pub fn metabolic_pressure(&self) -> u8 {
        self.inner.stats.pressure()
    }

    #[must_use]
    pub fn stats(&self) -> BusStats {
        self.inner.stats.snapshot()
    }

    /// Analyzer reading; see [`BackpressureAnalyzer::analyze`].
    #[must_use]
    pub fn analyze(&self, envelope: Option<&Envelope>) -> AnalyzerSnapshot {
        self.inner.analyzer.analyze(envelope)
    }

    #[must_use]
    pub fn analyzer(&self) -> &BackpressureAnalyzer {
        &self.inner.analyzer
    }

    /// Wormhole CRUD, status, and diagnostics.
    #[must_use]
    pub fn wormholes(&self) -> &WormholeRouter {
        &self.inner.router
    }

    /// Event log queries and `mark_handled`.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.inner.log
    }

    /// Register extra periodic jobs.
    #[must_use]
    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    // =========================================================================
    // SHUTDOWN
    // =========================================================================

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        self.inner.shutting_down.load(Ordering::Acquire)
    }

    /// Stop accepting publishes, stop the scheduler, drain wormhole queues
    /// up to the configured timeout, and flush the log.
    ///
    /// Only the first call does anything.
    pub async fn shutdown(&self) -> ShutdownReport {
        if self.inner.shutting_down.swap(true, Ordering::AcqRel) {
            return ShutdownReport::default();
        }
        info!("Bus shutting down");

        self.inner.scheduler.shutdown().await;
        let discarded = self
            .inner
            .router
            .shutdown(self.inner.config.drain_timeout())
            .await;
        let log_flushed = match self.inner.log.flush().await {
            Ok(flushed) => flushed,
            Err(e) => {
                error!(error = %e, "Final event log flush failed");
                false
            }
        };

        info!(discarded, log_flushed, "Bus stopped");
        ShutdownReport {
            discarded,
            log_flushed,
        }
    }
}

// =============================================================================
// INTERNALS
// =============================================================================

impl BusInner {
    /// Turn a request into an envelope, rejecting early where possible.
    fn prepare(&self, request: PublishRequest, hop_count: u32) -> Result<Envelope, BusError> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Err(BusError::ShuttingDown);
        }
        if !self.channels.contains(&request.channel_id) {
            self.stats.record_rejected();
            debug!(channel = %request.channel_id, "Publish to unknown channel rejected");
            return Err(BusError::UnknownChannel(request.channel_id));
        }

        let priority = request
            .priority
            .unwrap_or(Priority(self.config.default_priority))
            .clamp_to(self.config.priority_min, self.config.priority_max);
        let mut envelope = Envelope::new(
            request.kind,
            request.channel_id,
            priority,
            request.payload,
            request
                .source
                .unwrap_or_else(|| Envelope::ANONYMOUS_SOURCE.to_string()),
            request.correlation_id.unwrap_or_default(),
            now_millis(),
        );
        envelope.hop_count = hop_count;
        envelope.sampled = request.sampled;
        Ok(envelope)
    }

    /// Middleware, shedding, then delivery.
    async fn admit(&self, mut envelope: Envelope) -> Result<PublishReceipt, BusError> {
        let hop_floor = envelope.hop_count;
        if let Err(e) = self.middleware.run(&mut envelope).await {
            self.stats.record_rejected();
            return Err(e);
        }

        // Middleware may rewrite metadata, but not below these bounds.
        envelope.hop_count = envelope.hop_count.max(hop_floor);
        envelope.priority = envelope
            .priority
            .clamp_to(self.config.priority_min, self.config.priority_max);
        if !self.channels.contains(&envelope.channel_id) {
            self.stats.record_rejected();
            return Err(BusError::UnknownChannel(envelope.channel_id));
        }

        let receipt = PublishReceipt {
            id: envelope.id,
            correlation_id: envelope.correlation_id,
            accepted: true,
        };

        if self.should_shed(&envelope) {
            self.stats.record_shed();
            debug!(
                envelope_id = %envelope.id,
                kind = %envelope.kind,
                priority = envelope.priority.value(),
                pressure = self.stats.pressure(),
                "Envelope shed under metabolic pressure"
            );
            return Ok(PublishReceipt {
                accepted: false,
                ..receipt
            });
        }

        self.stats.record_published();
        if !envelope.sampled {
            self.stats.record_unsampled();
            debug!(envelope_id = %envelope.id, kind = %envelope.kind, "Unsampled envelope not fanned out");
            return Ok(receipt);
        }
        debug!(
            envelope_id = %envelope.id,
            kind = %envelope.kind,
            channel = %envelope.channel_id,
            correlation_id = %envelope.correlation_id,
            "Envelope published"
        );
        self.deliver(envelope);
        Ok(receipt)
    }

    fn should_shed(&self, envelope: &Envelope) -> bool {
        let pressure = self.stats.pressure();
        let priority = envelope.priority.value();
        (pressure > CRITICAL_PRESSURE && priority < 3)
            || (pressure > ELEVATED_PRESSURE && priority < 2)
    }

    /// Fan-out stage shared by publishes and wormhole forwards.
    ///
    /// The log record exists before any handler runs, so handlers may
    /// `mark_handled` the envelope they receive.
    fn deliver(&self, envelope: Envelope) -> bool {
        if !self.channels.contains(&envelope.channel_id) {
            return false;
        }
        let envelope = Arc::new(envelope);
        self.stats.record_delivery(&envelope);

        self.analyzer.observe(&envelope);
        let snapshot = self.analyzer.analyze(None);
        self.log.append(EventLogRecord {
            envelope: Envelope::clone(&envelope),
            snapshot,
            recorded_at: now_millis(),
        });

        for handler in self.channels.dispatch_targets(&envelope.channel_id) {
            self.spawn_handler(handler, Arc::clone(&envelope));
        }
        let transports: Vec<Arc<dyn Transport>> = self.transports.read().clone();
        for transport in transports {
            self.spawn_transport(transport, Arc::clone(&envelope));
        }

        self.router.offer(&envelope);
        true
    }

    fn spawn_handler(&self, handler: Arc<dyn Subscriber>, envelope: Arc<Envelope>) {
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(handler.handle(Arc::clone(&envelope)))
                .catch_unwind()
                .await;
            let reason = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            stats.record_subscriber_failure();
            warn!(
                subscriber = handler.name(),
                envelope_id = %envelope.id,
                channel = %envelope.channel_id,
                error = %reason,
                "Subscriber failed"
            );
        });
    }

    fn spawn_transport(&self, transport: Arc<dyn Transport>, envelope: Arc<Envelope>) {
        let stats = Arc::clone(&self.stats);
        tokio::spawn(async move {
            let outcome = AssertUnwindSafe(transport.send(Arc::clone(&envelope)))
                .catch_unwind()
                .await;
            let reason = match outcome {
                Ok(Ok(())) => return,
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => format!("panicked: {}", panic_message(panic.as_ref())),
            };
            stats.record_subscriber_failure();
            warn!(
                transport = transport.name(),
                envelope_id = %envelope.id,
                error = %reason,
                "Transport failed"
            );
        });
    }
}

impl Reentry for BusInner {
    fn reenter(&self, envelope: Envelope) -> bool {
        self.deliver(envelope)
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.scheduler.stop();
        let discarded = self.router.abort_all();
        if discarded > 0 {
            warn!(discarded, "Bus dropped without shutdown, wormhole envelopes discarded");
        }
    }
}
