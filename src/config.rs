// src/config.rs

//! Configuration types for the flow limiter

// dependencies
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;
use std::time::Duration;

use crate::errors::FlowLimiterError;
use crate::flow::FlowKey;

/// Which part of a flow key is counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackingMode {
    /// One counter per source address, whatever the destination.
    SourceOnly,
    /// One counter per (source, destination) pair.
    #[default]
    SourceDestination,
}

impl TrackingMode {
    /// Key actually stored for `key` under this mode.
    pub fn project(&self, key: FlowKey) -> FlowKey {
        match self {
            TrackingMode::SourceOnly => FlowKey {
                source: key.source,
                destination: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            },
            TrackingMode::SourceDestination => key,
        }
    }
}

/// Configuration for limiter behavior. Fixed once the limiter is built.
#[derive(Debug, Clone)]
pub struct FlowLimiterConfig {
    pub(crate) limit: u32,
    pub(crate) window: Duration,
    pub(crate) cleanup_interval: Duration,
    pub(crate) eviction_grace: Duration,
    pub(crate) tracking_mode: TrackingMode,
    pub(crate) max_tracked_flows: usize,
    pub(crate) audit_path: Option<PathBuf>,
    pub(crate) audit_queue_capacity: usize,
    pub(crate) restore_from_audit: bool,
}

impl Default for FlowLimiterConfig {
    fn default() -> Self {
        Self {
            limit: 5,
            window: Duration::from_secs(5),
            cleanup_interval: Duration::from_secs(60),
            eviction_grace: Duration::ZERO,
            tracking_mode: TrackingMode::default(),
            max_tracked_flows: 100_000,
            audit_path: None,
            audit_queue_capacity: 4096,
            restore_from_audit: true,
        }
    }
}

impl FlowLimiterConfig {
    /// Create a new configuration with limit and window settings
    pub fn new(limit: u32, window: Duration) -> Self {
        Self {
            limit,
            window,
            ..Self::default()
        }
    }

    /// Builder-style: set max attempts per window
    pub fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Builder-style: set window length
    pub fn window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }

    /// Builder-style: set sweeper period
    pub fn cleanup_interval(mut self, interval: Duration) -> Self {
        self.cleanup_interval = interval;
        self
    }

    /// Builder-style: extra idle time past one window before a flow is evicted
    pub fn eviction_grace(mut self, grace: Duration) -> Self {
        self.eviction_grace = grace;
        self
    }

    pub fn tracking_mode(mut self, mode: TrackingMode) -> Self {
        self.tracking_mode = mode;
        self
    }

    /// Builder-style: cap on live tracked flows
    pub fn max_tracked_flows(mut self, max: usize) -> Self {
        self.max_tracked_flows = max;
        self
    }

    /// Builder-style: enable the audit log at `path`
    pub fn audit_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_path = Some(path.into());
        self
    }

    pub fn audit_queue_capacity(mut self, capacity: usize) -> Self {
        self.audit_queue_capacity = capacity;
        self
    }

    /// Builder-style: seed tracked flows from the audit log on startup
    pub fn restore_from_audit(mut self, restore: bool) -> Self {
        self.restore_from_audit = restore;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), FlowLimiterError> {
        if self.limit == 0 {
            return Err(FlowLimiterError::InvalidLimit);
        }
        if self.window.is_zero() {
            return Err(FlowLimiterError::InvalidWindow);
        }
        if self.cleanup_interval.is_zero() {
            return Err(FlowLimiterError::InvalidCleanupInterval);
        }
        if self.max_tracked_flows == 0 {
            return Err(FlowLimiterError::InvalidCapacity);
        }
        if self.audit_path.is_some() && self.audit_queue_capacity == 0 {
            return Err(FlowLimiterError::InvalidCapacity);
        }
        Ok(())
    }

    pub(crate) fn window_nanos(&self) -> u64 {
        self.window.as_nanos() as u64
    }

    /// Idle time after which a flow is cold.
    pub(crate) fn eviction_threshold_nanos(&self) -> u64 {
        (self.window + self.eviction_grace).as_nanos() as u64
    }
}
