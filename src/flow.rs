// src/flow.rs

//! Flow identity, per-flow window state, and the admission verdict.

// dependencies
use std::fmt;
use std::net::IpAddr;

/// A (source, destination) address pair being rate-limited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    pub source: IpAddr,
    pub destination: IpAddr,
}

impl FlowKey {
    pub fn new(source: IpAddr, destination: IpAddr) -> Self {
        Self {
            source,
            destination,
        }
    }

    /// Traffic a host sends to itself is never tracked.
    pub fn is_self_traffic(&self) -> bool {
        self.source == self.destination
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.source, self.destination)
    }
}

/// Window state for one flow. Owned by the tracking store once inserted and
/// never mutated in place: every transition builds a new record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlowRecord {
    pub key: FlowKey,
    /// When the current counting window began (nanoseconds).
    pub window_start: u64,
    /// Attempts admitted inside the current window. Always >= 1.
    pub count: u32,
    /// Most recent admitted attempt (nanoseconds).
    pub last_seen: u64,
}

impl FlowRecord {
    /// Record for the first observed attempt of a flow.
    pub fn first(key: FlowKey, now: u64) -> Self {
        Self {
            key,
            window_start: now,
            count: 1,
            last_seen: now,
        }
    }

    /// True once `window` nanoseconds have passed since the window began.
    /// A clock that steps backwards counts as zero elapsed time.
    pub fn window_expired(&self, now: u64, window: u64) -> bool {
        now.saturating_sub(self.window_start) >= window
    }

    /// True once `threshold` nanoseconds have passed since the last admitted attempt.
    pub fn is_cold(&self, now: u64, threshold: u64) -> bool {
        now.saturating_sub(self.last_seen) >= threshold
    }

    /// Start a fresh window at `now`. Nothing carries over from the old one.
    pub fn reset(&self, now: u64) -> Self {
        Self::first(self.key, now)
    }

    /// Count one more attempt inside the current window. `last_seen` never
    /// moves backwards, whatever the clock does.
    pub fn observe(&self, now: u64) -> Self {
        Self {
            count: self.count.saturating_add(1),
            last_seen: now.max(self.last_seen),
            ..*self
        }
    }
}

/// Verdict handed back to the packet pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Continue normal forwarding.
    Accept,
    /// Discard the packet / reject the connection.
    Drop,
}

impl Decision {
    pub fn is_accept(&self) -> bool {
        matches!(self, Decision::Accept)
    }
}
