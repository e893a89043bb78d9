//! # Middleware Pipeline
//!
//! A single global chain of interceptors, run once per publish in
//! registration order, before any fan-out.
//!
//! A middleware receives the envelope mutably plus a [`Next`] handle. It may
//! mutate the envelope, await arbitrary work, and then call
//! [`Next::run`] to continue. Returning without calling `next`, returning an
//! error, or panicking aborts delivery for that publish with
//! `BusError::MiddlewareAborted`.
//!
//! Wormhole forwards re-enter the bus after this stage and never run the
//! chain again.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use manifold_types::{BusError, Envelope};
use parking_lot::RwLock;
use tracing::{debug, warn};

/// Interceptor in the global chain.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name reported in `MiddlewareAborted`.
    fn name(&self) -> &str;

    /// Inspect or mutate `envelope`, then call `next.run(envelope)` to continue.
    async fn handle(&self, envelope: &mut Envelope, next: Next<'_>) -> anyhow::Result<()>;
}

/// Abort raised at the middleware that failed, so outer layers that merely
/// propagate the error do not get blamed for it.
#[derive(Debug)]
struct Aborted {
    middleware: String,
    reason: String,
}

impl std::fmt::Display for Aborted {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.middleware, self.reason)
    }
}

impl std::error::Error for Aborted {}

#[derive(Default)]
struct ChainState {
    /// Set when the terminal of the chain is reached.
    reached: AtomicBool,
    /// Number of middlewares entered so far.
    entered: AtomicUsize,
}

/// Continuation handed to each middleware.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Middleware>],
    state: &'a ChainState,
}

impl Next<'_> {
    /// Run the rest of the chain.
    pub async fn run(self, envelope: &mut Envelope) -> anyhow::Result<()> {
        let Some((current, rest)) = self.remaining.split_first() else {
            self.state.reached.store(true, Ordering::Release);
            return Ok(());
        };

        self.state.entered.fetch_add(1, Ordering::AcqRel);
        let next = Next {
            remaining: rest,
            state: self.state,
        };

        match current.handle(envelope, next).await {
            Ok(()) => Ok(()),
            Err(e) if e.downcast_ref::<Aborted>().is_some() => Err(e),
            Err(e) => Err(Aborted {
                middleware: current.name().to_string(),
                reason: format!("{e:#}"),
            }
            .into()),
        }
    }
}

/// The ordered global chain. Additive only.
pub struct MiddlewareChain {
    middlewares: RwLock<Vec<Arc<dyn Middleware>>>,
}

impl MiddlewareChain {
    #[must_use]
    pub fn new() -> Self {
        Self {
            middlewares: RwLock::new(Vec::new()),
        }
    }

    /// Append to the end of the chain.
    pub fn push(&self, middleware: Arc<dyn Middleware>) {
        debug!(middleware = middleware.name(), "Middleware registered");
        self.middlewares.write().push(middleware);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.middlewares.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.middlewares.read().is_empty()
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.middlewares
            .read()
            .iter()
            .map(|m| m.name().to_string())
            .collect()
    }

    /// Run every middleware against `envelope`.
    ///
    /// The chain is snapshotted first, so a `push` racing with a publish
    /// applies from the next publish on.
    ///
    /// # Errors
    ///
    /// `BusError::MiddlewareAborted` when a middleware errors, panics, or
    /// returns without calling `next`.
    pub async fn run(&self, envelope: &mut Envelope) -> Result<(), BusError> {
        let snapshot: Vec<Arc<dyn Middleware>> = self.middlewares.read().clone();
        if snapshot.is_empty() {
            return Ok(());
        }

        let state = ChainState::default();
        let head = Next {
            remaining: &snapshot,
            state: &state,
        };
        let outcome = AssertUnwindSafe(head.run(envelope)).catch_unwind().await;

        let last_entered = || {
            let entered = state.entered.load(Ordering::Acquire);
            snapshot
                .get(entered.saturating_sub(1))
                .map_or_else(|| "unknown".to_string(), |m| m.name().to_string())
        };

        let error = match outcome {
            Ok(Ok(())) if state.reached.load(Ordering::Acquire) => return Ok(()),
            Ok(Ok(())) => BusError::MiddlewareAborted {
                middleware: last_entered(),
                reason: "declined to call next".to_string(),
            },
            Ok(Err(e)) => match e.downcast::<Aborted>() {
                Ok(aborted) => BusError::MiddlewareAborted {
                    middleware: aborted.middleware,
                    reason: aborted.reason,
                },
                Err(e) => BusError::MiddlewareAborted {
                    middleware: last_entered(),
                    reason: format!("{e:#}"),
                },
            },
            Err(panic) => BusError::MiddlewareAborted {
                middleware: last_entered(),
                reason: format!("panicked: {}", panic_message(panic.as_ref())),
            },
        };

        warn!(
            envelope_id = %envelope.id,
            kind = %envelope.kind,
            channel = %envelope.channel_id,
            error = %error,
            "Publish aborted by middleware"
        );
        Err(error)
    }
}

impl Default for MiddlewareChain {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
