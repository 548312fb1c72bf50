// src/audit_writer.rs

//! Background persistence for the audit log.
//!
//! Callers on the admission path only push onto a bounded in-memory queue;
//! a dedicated thread owns the [`AuditLog`] and applies operations in
//! submission order. When the queue is full the oldest pending operation
//! is discarded. The first I/O failure disables persistence for the rest of
//! the process; the limiter keeps enforcing without it.

// dependencies
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

use crate::audit_log::{AuditEntry, AuditLog, ScanOutcome};
use crate::errors::AuditError;
use crate::flow::FlowKey;
use crate::stats::LimiterStats;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AuditOp {
    Append(AuditEntry),
    Update { key: FlowKey, last_seen: u64 },
    Remove(FlowKey),
    /// Drop every entry last seen at or before the cutoff.
    Expire { cutoff: u64 },
}

#[derive(Debug, Default)]
struct Queue {
    ops: VecDeque<AuditOp>,
    in_flight: bool,
    closed: bool,
}

#[derive(Debug)]
struct Shared {
    queue: Mutex<Queue>,
    // signalled when work arrives or the writer is closed
    work: Condvar,
    // signalled when the writer goes idle
    idle: Condvar,
    log: Mutex<Option<AuditLog>>,
    disabled: AtomicBool,
    capacity: usize,
    stats: Arc<LimiterStats>,
}

/// Cloneable submission side of the writer.
#[derive(Debug, Clone)]
pub(crate) struct AuditHandle {
    shared: Arc<Shared>,
}

impl AuditHandle {
    /// Queue `op` without waiting on disk. Never fails; overflow and disabled
    /// persistence are only counted.
    pub(crate) fn submit(&self, op: AuditOp) {
        let shared = &self.shared;
        if shared.disabled.load(Ordering::Acquire) {
            return;
        }
        let mut queue = shared.queue.lock();
        if queue.closed {
            return;
        }
        if queue.ops.len() >= shared.capacity {
            queue.ops.pop_front();
            LimiterStats::bump(&shared.stats.audit_overflow);
            tracing::warn!(capacity = shared.capacity, "audit queue full, dropped oldest entry");
        }
        queue.ops.push_back(op);
        LimiterStats::bump(&shared.stats.audit_queued);
        drop(queue);
        shared.work.notify_one();
    }

    pub(crate) fn is_enabled(&self) -> bool {
        !self.shared.disabled.load(Ordering::Acquire)
    }
}

/// Owner of the writer thread. Dropping it drains the queue and joins.
#[derive(Debug)]
pub(crate) struct AuditWriter {
    handle: AuditHandle,
    thread: Option<JoinHandle<()>>,
}

impl AuditWriter {
    pub(crate) fn spawn(
        log: AuditLog,
        capacity: usize,
        stats: Arc<LimiterStats>,
    ) -> std::io::Result<Self> {
        let shared = Arc::new(Shared {
            queue: Mutex::new(Queue::default()),
            work: Condvar::new(),
            idle: Condvar::new(),
            log: Mutex::new(Some(log)),
            disabled: AtomicBool::new(false),
            capacity,
            stats,
        });

        let worker = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("flow-audit-writer".into())
            .spawn(move || run(&worker))?;

        Ok(Self {
            handle: AuditHandle { shared },
            thread: Some(thread),
        })
    }

    pub(crate) fn handle(&self) -> AuditHandle {
        self.handle.clone()
    }

    pub(crate) fn submit(&self, op: AuditOp) {
        self.handle.submit(op);
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.handle.is_enabled()
    }

    /// Block until everything queued so far has been applied.
    pub(crate) fn flush(&self) {
        let shared = &self.handle.shared;
        let mut queue = shared.queue.lock();
        while !queue.ops.is_empty() || queue.in_flight {
            if queue.closed && self.thread.is_none() {
                break;
            }
            shared.idle.wait(&mut queue);
        }
    }

    /// Re-read the log file. `None` once persistence is disabled.
    pub(crate) fn scan(&self) -> Option<Result<ScanOutcome, AuditError>> {
        let log = self.handle.shared.log.lock();
        log.as_ref().map(AuditLog::scan)
    }

    pub(crate) fn shutdown(&mut self) {
        {
            let mut queue = self.handle.shared.queue.lock();
            queue.closed = true;
        }
        self.handle.shared.work.notify_all();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("audit writer thread panicked");
            }
        }
    }
}

impl Drop for AuditWriter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: &Shared) {
    loop {
        let batch: Vec<AuditOp> = {
            let mut queue = shared.queue.lock();
            while queue.ops.is_empty() && !queue.closed {
                shared.work.wait(&mut queue);
            }
            if queue.ops.is_empty() {
                // closed and drained
                shared.idle.notify_all();
                return;
            }
            queue.in_flight = true;
            queue.ops.drain(..).collect()
        };

        apply_batch(shared, batch);

        let mut queue = shared.queue.lock();
        queue.in_flight = false;
        if queue.ops.is_empty() {
            shared.idle.notify_all();
        }
    }
}

fn apply_batch(shared: &Shared, batch: Vec<AuditOp>) {
    let mut slot = shared.log.lock();
    let Some(log) = slot.as_mut() else {
        return;
    };

    let mut result = Ok(());
    for op in batch {
        result = apply(log, op, &shared.stats);
        if result.is_err() {
            break;
        }
    }
    if result.is_ok() {
        result = log.sync();
    }

    if let Err(err) = result {
        LimiterStats::bump(&shared.stats.audit_errors);
        tracing::error!(
            path = %log.path().display(),
            error = %err,
            "audit log write failed, persistence disabled"
        );
        shared.disabled.store(true, Ordering::Release);
        *slot = None;
    }
}

fn apply(log: &mut AuditLog, op: AuditOp, stats: &LimiterStats) -> Result<(), AuditError> {
    let outcome = match op {
        AuditOp::Append(entry) => log.append(entry),
        AuditOp::Update { key, last_seen } => match log.update(&key, last_seen) {
            // the append was lost to overflow or an eviction race; put it back
            Err(AuditError::EntryNotFound(_)) => {
                LimiterStats::bump(&stats.audit_missing);
                log.append(AuditEntry::new(key, last_seen))
            }
            other => other,
        },
        AuditOp::Remove(key) => log.remove(&key),
        AuditOp::Expire { cutoff } => {
            let expired = log.expire(cutoff)?;
            if expired > 0 {
                tracing::debug!(expired, "expired stale audit entries");
            }
            if log.needs_compaction() {
                log.compact()?;
            }
            Ok(())
        }
    };

    match outcome {
        Err(AuditError::EntryNotFound(key)) => {
            LimiterStats::bump(&stats.audit_missing);
            tracing::debug!(flow = %key, "no audit entry to remove");
            Ok(())
        }
        other => other,
    }
}
