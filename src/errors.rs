// src/errors.rs

// error types for the limiter, the tracking store, and the audit log

// dependencies
use std::io;

use thiserror::Error;

use crate::clock::ClockError;
use crate::flow::FlowKey;

/// Errors surfaced to the operator by construction, explicit sweeps, and
/// sweeper lifecycle. The admission path never returns one.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum FlowLimiterError {
    #[error("Limit must be at least 1")]
    InvalidLimit,
    #[error("Window must be longer than zero")]
    InvalidWindow,
    #[error("Cleanup interval must be longer than zero")]
    InvalidCleanupInterval,
    #[error("Capacity must be at least 1")]
    InvalidCapacity,
    #[error("Clock error occurred: {0}")]
    ClockError(#[from] ClockError),
    #[error("Failed to spawn sweeper thread: {0}")]
    SweeperSpawn(#[source] io::Error),
}

/// Tracking store failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store is full; callers fail open.
    #[error("tracking store is full ({capacity} flows)")]
    InsertFailed { capacity: usize },
}

/// Audit log failures. None of these ever reach the admission decision.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("no audit entry for flow {0}")]
    EntryNotFound(FlowKey),
    #[error("audit log I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("malformed audit line {line}: {reason}")]
    Parse { line: usize, reason: String },
}
