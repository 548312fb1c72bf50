// src/flow_limiter.rs

// flow-limiter: per-flow connection-rate admission with a sliding-reset window.

// dependencies
use crate::audit_log::{AuditEntry, AuditLog, ScanOutcome};
use crate::audit_writer::{AuditOp, AuditWriter};
use crate::clock::{Clock, SystemClock};
use crate::config::{FlowLimiterConfig, TrackingMode};
use crate::errors::{AuditError, FlowLimiterError, StoreError};
use crate::flow::{Decision, FlowKey, FlowRecord};
use crate::stats::{LimiterStats, StatsSnapshot};
use crate::store::TrackingStore;
use crate::sweeper::{SweepReport, Sweeper, SweeperHandle};
use std::sync::Arc;
use std::time::Duration;

/// How an admitted attempt changed the flow's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Opened,
    Reset,
    Counted { last_seen: u64 },
    Rejected,
}

/// The admission engine.
///
/// Called synchronously from any number of threads with one connection
/// attempt at a time. The tracking store and the audit writer are owned
/// here and shared only with the sweeper this limiter hands out.
/// C is the clock type, defaulting to SystemClock.
#[derive(Debug)]
pub struct FlowLimiter<C = SystemClock>
where
    C: Clock,
{
    limit: u32,
    window_nanos: u64,
    eviction_threshold_nanos: u64,
    cleanup_interval: Duration,
    tracking_mode: TrackingMode,
    store: Arc<TrackingStore>,
    audit: Option<AuditWriter>,
    clock: Arc<C>,
    stats: Arc<LimiterStats>,
}

impl<C> FlowLimiter<C>
where
    C: Clock,
{
    /// Build a limiter from a validated config.
    ///
    /// If an audit path is configured but the log cannot be opened, the
    /// limiter starts with persistence disabled. When restore is enabled,
    /// flows still warm in the log are seeded into the tracking store.
    pub fn with_config(config: FlowLimiterConfig, clock: C) -> Result<Self, FlowLimiterError> {
        config.validate()?;

        let stats = Arc::new(LimiterStats::default());
        let store = Arc::new(TrackingStore::with_capacity(config.max_tracked_flows));
        let clock = Arc::new(clock);

        let mut limiter = Self {
            limit: config.limit,
            window_nanos: config.window_nanos(),
            eviction_threshold_nanos: config.eviction_threshold_nanos(),
            cleanup_interval: config.cleanup_interval,
            tracking_mode: config.tracking_mode,
            store,
            audit: None,
            clock,
            stats,
        };

        if let Some(path) = &config.audit_path {
            match AuditLog::open(path) {
                Ok(log) => {
                    LimiterStats::add(&limiter.stats.parse_errors, log.parse_errors() as u64);
                    if config.restore_from_audit {
                        limiter.restore(&log);
                    }
                    match AuditWriter::spawn(
                        log,
                        config.audit_queue_capacity,
                        Arc::clone(&limiter.stats),
                    ) {
                        Ok(writer) => limiter.audit = Some(writer),
                        Err(err) => {
                            LimiterStats::bump(&limiter.stats.audit_errors);
                            tracing::error!(error = %err, "could not start audit writer, persistence disabled");
                        }
                    }
                }
                Err(err) => {
                    LimiterStats::bump(&limiter.stats.audit_errors);
                    tracing::error!(
                        path = %path.display(),
                        error = %err,
                        "could not open audit log, persistence disabled"
                    );
                }
            }
        }

        tracing::info!(
            limit = limiter.limit,
            window_ms = config.window.as_millis() as u64,
            mode = ?limiter.tracking_mode,
            persistence = limiter.persistence_enabled(),
            "flow limiter ready"
        );
        Ok(limiter)
    }

    // accessor method to return the per-window attempt limit
    pub fn limit(&self) -> u32 {
        self.limit
    }

    // accessor method to return the window length
    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_nanos)
    }

    pub fn tracking_mode(&self) -> TrackingMode {
        self.tracking_mode
    }

    /// Decide whether the connection attempt `key` seen at `now` (nanoseconds)
    /// is admitted.
    ///
    /// Self-traffic is always accepted and never tracked. A full store fails
    /// open. Dropped attempts leave the flow's state untouched.
    pub fn evaluate(&self, key: FlowKey, now: u64) -> Decision {
        if key.is_self_traffic() {
            LimiterStats::bump(&self.stats.self_traffic);
            LimiterStats::bump(&self.stats.accepted);
            return Decision::Accept;
        }

        let key = self.tracking_mode.project(key);
        let limit = self.limit;
        let window = self.window_nanos;

        let result = self.store.upsert(key, |current| match current {
            None => (Some(FlowRecord::first(key, now)), Transition::Opened),
            Some(record) if record.window_expired(now, window) => {
                (Some(record.reset(now)), Transition::Reset)
            }
            Some(record) if record.count >= limit => (None, Transition::Rejected),
            Some(record) => {
                let next = record.observe(now);
                let last_seen = next.last_seen;
                (Some(next), Transition::Counted { last_seen })
            }
        });

        let transition = match result {
            Ok(transition) => transition,
            Err(StoreError::InsertFailed { capacity }) => {
                LimiterStats::bump(&self.stats.insert_failures);
                LimiterStats::bump(&self.stats.accepted);
                tracing::warn!(flow = %key, capacity, "tracking store full, admitting untracked");
                return Decision::Accept;
            }
        };

        match transition {
            Transition::Opened => {
                self.persist(AuditOp::Append(AuditEntry::new(key, now)));
            }
            Transition::Reset => {
                self.persist(AuditOp::Update {
                    key,
                    last_seen: now,
                });
            }
            Transition::Counted { last_seen } => {
                self.persist(AuditOp::Update { key, last_seen });
            }
            Transition::Rejected => {
                LimiterStats::bump(&self.stats.dropped);
                tracing::debug!(flow = %key, limit, "connection rate limit exceeded");
                return Decision::Drop;
            }
        }
        LimiterStats::bump(&self.stats.accepted);
        Decision::Accept
    }

    /// Evaluate `key` at the clock's current time. A failing clock admits.
    pub fn check_connection(&self, key: FlowKey) -> Decision {
        match self.clock.now() {
            Ok(now) => self.evaluate(key, now),
            Err(err) => {
                LimiterStats::bump(&self.stats.clock_failures);
                LimiterStats::bump(&self.stats.accepted);
                tracing::warn!(flow = %key, error = %err, "clock unavailable, admitting");
                Decision::Accept
            }
        }
    }

    /// Snapshot of the tracked state for `key`, after tracking-mode projection.
    pub fn lookup(&self, key: FlowKey) -> Option<FlowRecord> {
        self.store
            .lookup(&self.tracking_mode.project(key))
            .map(|record| *record)
    }

    pub fn tracked_flows(&self) -> usize {
        self.store.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Whether audit writes are still being persisted.
    pub fn persistence_enabled(&self) -> bool {
        self.audit.as_ref().is_some_and(AuditWriter::is_enabled)
    }

    /// Wait until queued audit writes have reached the log.
    pub fn flush_audit(&self) {
        if let Some(audit) = &self.audit {
            audit.flush();
        }
    }

    /// Current contents of the audit log. `None` without persistence.
    pub fn audit_entries(&self) -> Option<Result<ScanOutcome, AuditError>> {
        self.audit.as_ref().and_then(AuditWriter::scan)
    }

    /// A sweeper sharing this limiter's state.
    pub fn sweeper(&self) -> Sweeper<C> {
        Sweeper::new(
            Arc::clone(&self.store),
            self.audit.as_ref().map(AuditWriter::handle),
            Arc::clone(&self.clock),
            self.eviction_threshold_nanos,
            Arc::clone(&self.stats),
        )
    }

    // method to evict cold flows right now
    pub fn cleanup_stale_flows(&self) -> Result<SweepReport, FlowLimiterError> {
        self.sweeper().sweep()
    }

    /// Forget every tracked flow. The audit log is left as is.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Drain the audit queue and stop the writer. Admission keeps working
    /// afterwards without persistence.
    pub fn shutdown(&mut self) {
        if let Some(mut audit) = self.audit.take() {
            audit.shutdown();
        }
        tracing::info!(tracked = self.store.len(), "flow limiter shut down");
    }

    fn persist(&self, op: AuditOp) {
        if let Some(audit) = &self.audit {
            audit.submit(op);
        }
    }

    fn restore(&self, log: &AuditLog) {
        let now = match self.clock.now() {
            Ok(now) => now,
            Err(err) => {
                tracing::warn!(error = %err, "clock unavailable, skipping restore");
                return;
            }
        };
        let outcome = match log.scan() {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!(error = %err, "audit log unreadable, skipping restore");
                return;
            }
        };

        let mut restored = 0;
        for entry in outcome.entries {
            let key = self.tracking_mode.project(entry.key);
            // a projected key may look like self traffic; only full pairs are judged
            if self.tracking_mode == TrackingMode::SourceDestination && key.is_self_traffic() {
                continue;
            }
            let record = FlowRecord::first(key, entry.last_seen);
            if record.is_cold(now, self.window_nanos) {
                continue;
            }
            match self.store.insert_if_absent(record) {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(err) => {
                    tracing::warn!(error = %err, "stopping restore early");
                    break;
                }
            }
        }
        tracing::info!(
            path = %log.path().display(),
            restored,
            skipped_lines = outcome.errors.len(),
            "restored flows from audit log"
        );
    }
}

impl<C: Clock + 'static> FlowLimiter<C> {
    /// Start the background sweeper on the configured cleanup interval.
    pub fn start_sweeper(&self) -> Result<SweeperHandle, FlowLimiterError> {
        self.sweeper().spawn(self.cleanup_interval)
    }
}
