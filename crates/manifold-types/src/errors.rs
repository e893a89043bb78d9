//! # Error Types
//!
//! Only pre-fan-out failures (`UnknownChannel`, `MiddlewareAborted`) reach a
//! publisher. Everything after fan-out is observable through stats and
//! diagnostics, never through these errors.

use thiserror::Error;

use crate::ids::{ChannelId, CorrelationId, WormholeId};

/// Errors surfaced by bus, registry, and router operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// Publish or subscribe against a channel that was never registered.
    #[error("Unknown channel: {0}")]
    UnknownChannel(ChannelId),

    /// A middleware failed, panicked, or declined to call `next`.
    #[error("Middleware '{middleware}' aborted delivery: {reason}")]
    MiddlewareAborted { middleware: String, reason: String },

    /// A derived publish would exceed the hop limit.
    #[error("Cycle detected: lineage {correlation_id} already at hop {hop_count}")]
    CycleDetected {
        correlation_id: CorrelationId,
        hop_count: u32,
    },

    /// No wormhole with this id.
    #[error("Unknown wormhole: {0}")]
    UnknownWormhole(WormholeId),

    /// Wormhole definition rejected at create/update time.
    #[error("Invalid wormhole: {0}")]
    InvalidWormhole(String),

    /// Persisting or loading state failed.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Bus configuration rejected at build time.
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The bus is shutting down and accepts no new publishes.
    #[error("Bus is shutting down")]
    ShuttingDown,
}

impl BusError {
    /// Whether the error is one of the synchronous publish rejections.
    #[must_use]
    pub fn is_publish_rejection(&self) -> bool {
        matches!(
            self,
            Self::UnknownChannel(_) | Self::MiddlewareAborted { .. } | Self::ShuttingDown
        )
    }
}

/// Errors from `Store` implementations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// Encoding or decoding failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Another process holds the store lock.
    #[error("Store locked: {0}")]
    Locked(String),
}

impl From<std::io::Error> for StoreError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Invalid configuration values.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// `priority_min > priority_max` or default outside the range.
    #[error("Invalid priority range [{min}, {max}] with default {default}")]
    PriorityRange { min: u8, max: u8, default: u8 },

    /// A size or interval that must be positive was zero.
    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    /// Temperature weights must be non-negative and sum to 1.
    #[error("Temperature weights must be non-negative and sum to 1.0 (got {0})")]
    Weights(f64),

    /// An environment override could not be parsed.
    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}
