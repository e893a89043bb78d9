//! # Manifold Types Crate
//!
//! Domain types shared by the bus, the router, and every producer or
//! subscriber built on top of them.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: the `Envelope` is the only message shape
//!   that flows through the bus.
//! - **Typed kinds, data-driven routing**: well-known event kinds are a sum
//!   type, unknown kinds survive verbatim in `EventKind::Custom` so wormhole
//!   filters stay configurable at runtime.
//! - **Monotone lineage**: `hop_count` only ever grows and `handled` only
//!   ever flips from `false` to `true`.

pub mod channel;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod kind;

pub use channel::{Channel, Direction};
pub use envelope::{Envelope, Priority, PublishReceipt, PublishRequest};
pub use errors::{BusError, ConfigError, StoreError};
pub use ids::{ChannelId, CorrelationId, EnvelopeId, WormholeId};
pub use kind::{AuditKind, EventKind, SecurityKind, SystemKind, TreasuryKind};

/// Maximum number of wormhole forwards a single lineage may undergo.
pub const MAX_HOPS: u32 = 8;

/// Current wall-clock time as unix milliseconds.
#[must_use]
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
