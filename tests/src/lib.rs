//! # Manifold Scenario Suite
//!
//! Cross-crate tests driving a real bus end to end.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── mod.rs          # Shared fixtures
//!     ├── delivery.rs     # Publish, subscribe, isolation, streams
//!     ├── pipeline.rs     # Middleware ordering and aborts
//!     ├── wormholes.rs    # Filtering, loops, overflow, transforms
//!     ├── event_log.rs    # Handling, replay, reclassification
//!     ├── pressure.rs     # Metabolic shedding and the analyzer
//!     └── persistence.rs  # File stores, restarts, shutdown drain
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p manifold-tests
//! cargo test -p manifold-tests integration::wormholes::
//! ```

pub mod integration;
