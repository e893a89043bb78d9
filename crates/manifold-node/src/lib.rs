//! # Manifold Node
//!
//! Library half of the node binary: configuration, runtime wiring, and the
//! Prometheus bridge. Exposed so the scenario suite can start a real node.

pub mod config;
pub mod metrics;
pub mod runtime;

pub use config::NodeConfig;
pub use runtime::NodeRuntime;
