// src/lib.rs

//! # Flow Limiter
//!
//! A per-flow connection-rate limiter for a packet fast path. Each new
//! connection attempt for a (source, destination) pair is admitted or
//! dropped in constant time against a sliding-reset window; cold flows are
//! evicted by a background sweeper, and an advisory on-disk audit log lets
//! the limiter pick up warm flows again after a restart.
//!
//! ## Quick Example
//!
//! ```rust
//! use flow_limiter::{Decision, FlowKey, FlowLimiter, FlowLimiterConfig, SystemClock};
//! use std::time::Duration;
//!
//! let config = FlowLimiterConfig::new(5, Duration::from_secs(5));
//! let limiter = FlowLimiter::with_config(config, SystemClock).unwrap();
//!
//! let key = FlowKey::new("10.0.0.1".parse().unwrap(), "10.0.0.2".parse().unwrap());
//! match limiter.check_connection(key) {
//!     Decision::Accept => println!("forward"),
//!     Decision::Drop => println!("reject"),
//! }
//! ```

// private modules
mod audit_log;
mod audit_writer;
mod clock;
mod config;
mod errors;
mod flow;
mod flow_limiter;
mod stats;
mod store;
mod sweeper;

// public API exports
pub use audit_log::{AuditEntry, AuditLog, ScanOutcome};
pub use clock::{Clock, ClockError, SystemClock};
pub use config::{FlowLimiterConfig, TrackingMode};
pub use errors::{AuditError, FlowLimiterError, StoreError};
pub use flow::{Decision, FlowKey, FlowRecord};
pub use flow_limiter::FlowLimiter;
pub use stats::StatsSnapshot;
pub use store::TrackingStore;
pub use sweeper::{SweepReport, Sweeper, SweeperHandle};
