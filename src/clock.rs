// src/clock.rs

// clock abstraction used by the limiter and the sweeper

// dependencies
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

/// Source of "now" for the limiter.
///
/// Timestamps are nanoseconds as a `u64`. The admission path can be driven
/// with explicit timestamps through `FlowLimiter::evaluate`; the clock is only
/// consulted by `check_connection`, recovery, and the sweeper.
/// Implementors must be thread-safe since the sweeper reads it from its own thread.
pub trait Clock: Send + Sync {
    fn now(&self) -> Result<u64, ClockError>;
}

/// Clock error type
#[derive(Debug, Error)]
pub enum ClockError {
    #[error("system time is before the unix epoch")]
    SystemTimeError,
}

/// Wall clock, nanoseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Result<u64, ClockError> {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .map_err(|_| ClockError::SystemTimeError)
    }
}
