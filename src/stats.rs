// src/stats.rs

// operator-facing counters; errors on the admission path end up here instead of in a Result

// dependencies
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters shared by the limiter, the audit writer, and the sweeper.
#[derive(Debug, Default)]
pub(crate) struct LimiterStats {
    pub(crate) accepted: AtomicU64,
    pub(crate) dropped: AtomicU64,
    pub(crate) self_traffic: AtomicU64,
    pub(crate) insert_failures: AtomicU64,
    pub(crate) clock_failures: AtomicU64,
    pub(crate) evicted: AtomicU64,
    pub(crate) audit_queued: AtomicU64,
    pub(crate) audit_overflow: AtomicU64,
    pub(crate) audit_errors: AtomicU64,
    pub(crate) audit_missing: AtomicU64,
    pub(crate) parse_errors: AtomicU64,
}

impl LimiterStats {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> StatsSnapshot {
        let read = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            accepted: read(&self.accepted),
            dropped: read(&self.dropped),
            self_traffic: read(&self.self_traffic),
            insert_failures: read(&self.insert_failures),
            clock_failures: read(&self.clock_failures),
            evicted: read(&self.evicted),
            audit_queued: read(&self.audit_queued),
            audit_overflow: read(&self.audit_overflow),
            audit_errors: read(&self.audit_errors),
            audit_missing: read(&self.audit_missing),
            parse_errors: read(&self.parse_errors),
        }
    }
}

/// Point-in-time copy of the limiter counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Accept decisions, self-traffic included.
    pub accepted: u64,
    pub dropped: u64,
    pub self_traffic: u64,
    /// New flows admitted without tracking because the store was full.
    pub insert_failures: u64,
    /// `check_connection` calls admitted because the clock failed.
    pub clock_failures: u64,
    pub evicted: u64,
    pub audit_queued: u64,
    /// Audit operations discarded by the drop-oldest queue policy.
    pub audit_overflow: u64,
    pub audit_errors: u64,
    /// Updates or removals that found no matching log entry.
    pub audit_missing: u64,
    /// Malformed log lines skipped while opening the audit log.
    pub parse_errors: u64,
}
