//! # Manifold Bus - In-Process Event Bus
//!
//! Typed publish/subscribe with a middleware pipeline, data-driven wormhole
//! routing between channels, a bounded event log, and a backpressure
//! analyzer driving metabolic load shedding.
//!
//! ## Architecture
//!
//! ```text
//!  producer ──publish()──►┌────────────┐   fan-out   ┌─────────────┐
//!                         │ middleware │ ──────────► │ subscribers │
//!                         │   chain    │             │ transports  │
//!                         └────────────┘             └─────────────┘
//!                               │                           ▲
//!                               ▼                           │ reenter (hop + 1)
//!                     ┌──────────────────┐   filter   ┌──────────┐
//!                     │ log + analyzer   │            │ wormhole │
//!                     └──────────────────┘  ────────► │  queues  │
//!                                                     └──────────┘
//! ```
//!
//! ## Error Surface
//!
//! - Only pre-fan-out failures reach the publisher: unknown channel,
//!   middleware abort, shutting down.
//! - Subscriber, transport, and routing failures are isolated and visible
//!   through [`BusStats`], [`WormholeStats`], and router diagnostics.
//!
//! ## Loop Protection
//!
//! Every wormhole forward and derived publish increments `hop_count`;
//! lineages at [`MAX_HOPS`] are dropped with a diagnostic.

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::panic))]

pub mod analyzer;
pub mod bus;
pub mod config;
pub mod event_log;
pub mod middleware;
pub mod reclassify;
pub mod registry;
pub mod router;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod subscriber;
pub mod transport;

pub use analyzer::{AnalyzerSnapshot, BackpressureAnalyzer};
pub use bus::{Bus, BusBuilder, ShutdownReport, WeakBus, CRITICAL_PRESSURE, ELEVATED_PRESSURE};
pub use config::BusConfig;
pub use event_log::{EventLog, EventLogRecord, LogStore};
pub use middleware::{Middleware, MiddlewareChain, Next};
pub use reclassify::Reclassifier;
pub use registry::ChannelRegistry;
pub use router::{
    OverflowPolicy, RouterDiagnostic, Wormhole, WormholeFilter, WormholePatch, WormholeRouter,
    WormholeSpec, WormholeStats, WormholeStatus, WormholeStore, WormholeTransform,
};
pub use scheduler::Scheduler;
pub use stats::BusStats;
pub use store::{JsonFileStore, MemoryStore, Store};
pub use subscriber::{from_fn, EventStream, Subscriber, Subscription, SubscriptionTarget};
pub use transport::{TracingTransport, Transport};

pub use manifold_types;
pub use manifold_types::MAX_HOPS;
