// src/sweeper.rs

//! Periodic eviction of cold flows.
//!
//! A flow is cold once `now - last_seen` reaches the eviction threshold
//! (one window plus the configured grace). Each key is re-checked under its
//! shard lock at the moment of removal, so a concurrent admission that
//! refreshes the flow always wins over the sweep.

// dependencies
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audit_writer::{AuditHandle, AuditOp};
use crate::clock::Clock;
use crate::errors::FlowLimiterError;
use crate::stats::LimiterStats;
use crate::store::TrackingStore;

/// What one sweep did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Cold flows seen when the sweep started.
    pub candidates: usize,
    /// Flows actually removed.
    pub evicted: usize,
    /// True if a stop request cut the sweep short.
    pub interrupted: bool,
}

/// Eviction pass over the tracking store and the audit log.
pub struct Sweeper<C: Clock> {
    store: Arc<TrackingStore>,
    audit: Option<AuditHandle>,
    clock: Arc<C>,
    threshold_nanos: u64,
    stats: Arc<LimiterStats>,
}

impl<C: Clock> Sweeper<C> {
    pub(crate) fn new(
        store: Arc<TrackingStore>,
        audit: Option<AuditHandle>,
        clock: Arc<C>,
        threshold_nanos: u64,
        stats: Arc<LimiterStats>,
    ) -> Self {
        Self {
            store,
            audit,
            clock,
            threshold_nanos,
            stats,
        }
    }

    /// Sweep using the clock's current time.
    pub fn sweep(&self) -> Result<SweepReport, FlowLimiterError> {
        let now = self.clock.now()?;
        Ok(self.sweep_at(now))
    }

    /// Sweep as if the current time were `now`.
    pub fn sweep_at(&self, now: u64) -> SweepReport {
        self.sweep_until(now, || false)
    }

    fn sweep_until<S>(&self, now: u64, stop_requested: S) -> SweepReport
    where
        S: Fn() -> bool,
    {
        let threshold = self.threshold_nanos;
        let candidates = self.store.keys_where(|record| record.is_cold(now, threshold));
        let mut report = SweepReport {
            candidates: candidates.len(),
            ..SweepReport::default()
        };

        for key in &candidates {
            if stop_requested() {
                report.interrupted = true;
                break;
            }
            if self
                .store
                .remove_key_if(key, |record| record.is_cold(now, threshold))
            {
                report.evicted += 1;
                if let Some(audit) = &self.audit {
                    audit.submit(AuditOp::Remove(*key));
                }
            }
        }

        // log entries that outlived their record
        if !report.interrupted {
            if let (Some(audit), Some(cutoff)) = (&self.audit, now.checked_sub(threshold)) {
                audit.submit(AuditOp::Expire { cutoff });
            }
        }

        LimiterStats::add(&self.stats.evicted, report.evicted as u64);
        tracing::debug!(
            candidates = report.candidates,
            evicted = report.evicted,
            remaining = self.store.len(),
            interrupted = report.interrupted,
            "flow sweep complete"
        );
        report
    }
}

impl<C: Clock + 'static> Sweeper<C> {
    /// Run the sweep every `interval` on a background thread until the
    /// returned handle is stopped or dropped.
    pub fn spawn(self, interval: Duration) -> Result<SweeperHandle, FlowLimiterError> {
        let signal = Arc::new(StopSignal::default());
        let worker_signal = Arc::clone(&signal);

        let thread = thread::Builder::new()
            .name("flow-sweeper".into())
            .spawn(move || {
                tracing::info!(interval_ms = interval.as_millis() as u64, "flow sweeper started");
                while !worker_signal.wait(interval) {
                    match self.clock.now() {
                        Ok(now) => {
                            self.sweep_until(now, || worker_signal.is_stopped());
                        }
                        Err(err) => {
                            tracing::warn!(error = %err, "clock unavailable, skipping sweep");
                        }
                    }
                }
                tracing::info!("flow sweeper stopped");
            })
            .map_err(FlowLimiterError::SweeperSpawn)?;

        Ok(SweeperHandle {
            signal,
            thread: Some(thread),
        })
    }
}

#[derive(Debug, Default)]
struct StopSignal {
    stopped: AtomicBool,
    lock: Mutex<()>,
    wake: Condvar,
}

impl StopSignal {
    /// Sleep for up to `interval`; true if stop was requested.
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut guard = self.lock.lock();
        while !self.stopped.load(Ordering::Acquire) {
            if self.wake.wait_until(&mut guard, deadline).timed_out() {
                break;
            }
        }
        self.stopped.load(Ordering::Acquire)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    fn stop(&self) {
        let _guard = self.lock.lock();
        self.stopped.store(true, Ordering::Release);
        self.wake.notify_all();
    }
}

/// Lifecycle handle for a running sweeper. Dropping it stops the thread.
#[derive(Debug)]
pub struct SweeperHandle {
    signal: Arc<StopSignal>,
    thread: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Signal the sweeper and wait for it to exit. An in-progress sweep stops
    /// at the next entry boundary.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.thread
            .as_ref()
            .is_some_and(|thread| !thread.is_finished())
    }

    fn shutdown(&mut self) {
        self.signal.stop();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("flow sweeper thread panicked");
            }
        }
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
