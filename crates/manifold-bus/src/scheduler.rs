//! # Scheduler
//!
//! One periodic loop per bus for every housekeeping job (analyzer pruning,
//! log flushing, pressure refresh, metric export). A single ticking task
//! means a single place to stop on shutdown, and no timers drifting
//! independently.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::middleware::panic_message;

type JobFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

struct Job {
    name: String,
    period: Duration,
    next_due: Instant,
    run: JobFn,
}

/// Periodic job runner driven by one tokio task.
pub struct Scheduler {
    tick: Duration,
    jobs: Arc<Mutex<Vec<Job>>>,
    shutdown_tx: watch::Sender<bool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    #[must_use]
    pub fn new(tick: Duration) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            tick: tick.max(Duration::from_millis(1)),
            jobs: Arc::new(Mutex::new(Vec::new())),
            shutdown_tx,
            handle: Mutex::new(None),
        }
    }

    /// Run `job` every `period`, first after one period has elapsed.
    ///
    /// Periods shorter than the tick run once per tick. Jobs run one at a
    /// time, so a slow job delays the rest of that tick.
    pub fn every<F>(&self, name: impl Into<String>, period: Duration, job: F)
    where
        F: Fn() -> BoxFuture<'static, ()> + Send + Sync + 'static,
    {
        let name = name.into();
        debug!(job = %name, period_ms = period.as_millis() as u64, "Scheduler job registered");
        self.jobs.lock().push(Job {
            name,
            period,
            next_due: Instant::now() + period,
            run: Arc::new(job),
        });
    }

    #[must_use]
    pub fn job_names(&self) -> Vec<String> {
        self.jobs.lock().iter().map(|j| j.name.clone()).collect()
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }

    /// Start the loop. Calling it again while running does nothing.
    pub fn start(&self) {
        let mut handle = self.handle.lock();
        if handle.as_ref().is_some_and(|h| !h.is_finished()) || *self.shutdown_tx.borrow() {
            return;
        }

        let jobs = Arc::clone(&self.jobs);
        let tick = self.tick;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        *handle = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => run_due(&jobs).await,
                    _ = shutdown_rx.changed() => {
                        debug!("Scheduler shutdown signal received");
                        break;
                    }
                }
            }
        }));
        info!(tick_ms = tick.as_millis() as u64, "Scheduler started");
    }

    /// Stop the loop and wait for the in-flight tick to finish.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scheduler task ended abnormally");
            }
            info!("Scheduler stopped");
        }
    }

    /// Signal the loop to stop without waiting for it.
    pub(crate) fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

async fn run_due(jobs: &Mutex<Vec<Job>>) {
    let now = Instant::now();
    let due: Vec<(String, JobFn)> = {
        let mut jobs = jobs.lock();
        jobs.iter_mut()
            .filter(|j| j.next_due <= now)
            .map(|j| {
                j.next_due = now + j.period;
                (j.name.clone(), Arc::clone(&j.run))
            })
            .collect()
    };

    for (name, run) in due {
        if let Err(panic) = AssertUnwindSafe(run()).catch_unwind().await {
            warn!(job = %name, reason = %panic_message(panic.as_ref()), "Scheduler job panicked");
        }
    }
}
