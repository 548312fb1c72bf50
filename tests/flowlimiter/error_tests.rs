// tests/flowlimiter/error_tests.rs

#[cfg(test)]
mod tests {
    use crate::{SEC, TestClock, key};
    use flow_limiter::{Decision, FlowLimiter, FlowLimiterConfig, FlowLimiterError};
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn full_store_fails_open() {
        let config = FlowLimiterConfig::new(1, Duration::from_secs(5)).max_tracked_flows(2);
        let limiter = FlowLimiter::with_config(config, TestClock::new(0.0)).unwrap();

        assert!(limiter.evaluate(key(1, 1), 0).is_accept());
        assert!(limiter.evaluate(key(2, 1), 0).is_accept());

        // no room for a third flow: admitted, never tracked
        for _ in 0..5 {
            assert_eq!(limiter.evaluate(key(3, 1), 0), Decision::Accept);
        }
        assert!(limiter.lookup(key(3, 1)).is_none());
        assert_eq!(limiter.tracked_flows(), 2);
        assert_eq!(limiter.stats().insert_failures, 5);

        // existing flows are still enforced
        assert_eq!(limiter.evaluate(key(1, 1), 0), Decision::Drop);
    }

    #[test]
    fn insert_failure_writes_nothing_to_audit_log() {
        let dir = TempDir::new().unwrap();
        let config = FlowLimiterConfig::new(1, Duration::from_secs(5))
            .max_tracked_flows(1)
            .audit_path(dir.path().join("flows.log"));
        let limiter = FlowLimiter::with_config(config, TestClock::new(0.0)).unwrap();

        limiter.evaluate(key(1, 1), 0);
        limiter.evaluate(key(2, 1), 0);
        limiter.flush_audit();

        let entries = limiter.audit_entries().unwrap().unwrap().entries;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].key, key(1, 1));
    }

    #[test]
    fn clock_failure_fails_open() {
        let clock = TestClock::new(0.0);
        let config = FlowLimiterConfig::new(1, Duration::from_secs(5));
        let limiter = FlowLimiter::with_config(config, clock.clone()).unwrap();

        assert!(limiter.check_connection(key(1, 1)).is_accept());
        assert!(!limiter.check_connection(key(1, 1)).is_accept());

        clock.fail_next_call();
        assert_eq!(limiter.check_connection(key(1, 1)), Decision::Accept);
        assert_eq!(limiter.stats().clock_failures, 1);

        // state untouched; clock recovers on its own
        assert_eq!(limiter.lookup(key(1, 1)).unwrap().count, 1);
        assert!(!limiter.check_connection(key(1, 1)).is_accept());
    }

    #[test]
    fn clock_error_propagates_in_cleanup() {
        let clock = TestClock::new(0.0);
        let config = FlowLimiterConfig::new(5, Duration::from_secs(5));
        let limiter = FlowLimiter::with_config(config, clock.clone()).unwrap();
        limiter.evaluate(key(1, 1), 0);

        clock.set_time(100.0);
        clock.fail_next_call();
        let result = limiter.cleanup_stale_flows();
        assert!(matches!(result, Err(FlowLimiterError::ClockError(_))));
        assert_eq!(limiter.tracked_flows(), 1);

        // works after recovery
        assert_eq!(limiter.cleanup_stale_flows().unwrap().evicted, 1);
    }

    #[test]
    fn unopenable_audit_log_disables_persistence() {
        let dir = TempDir::new().unwrap();
        // a directory cannot be opened as the log file
        let config = FlowLimiterConfig::new(1, Duration::from_secs(5)).audit_path(dir.path());
        let limiter = FlowLimiter::with_config(config, TestClock::new(0.0)).unwrap();

        assert!(!limiter.persistence_enabled());
        assert_eq!(limiter.stats().audit_errors, 1);

        // enforcement-only mode
        assert!(limiter.evaluate(key(1, 1), 0).is_accept());
        assert!(!limiter.evaluate(key(1, 1), SEC).is_accept());
    }

    #[test]
    fn error_display_formatting() {
        let err = FlowLimiterConfig::new(0, Duration::from_secs(1))
            .validate()
            .unwrap_err();
        assert!(err.to_string().to_lowercase().contains("limit"));

        let clock = TestClock::new(0.0);
        let limiter =
            FlowLimiter::with_config(FlowLimiterConfig::default(), clock.clone()).unwrap();
        clock.fail_next_call();
        let err = limiter.cleanup_stale_flows().unwrap_err();
        assert!(err.to_string().to_lowercase().contains("clock"));
    }

    #[test]
    fn audit_write_failure_keeps_enforcing() {
        let dir = TempDir::new().unwrap();
        let config = FlowLimiterConfig::new(2, Duration::from_secs(5))
            .audit_path(dir.path().join("flows.log"));
        let limiter = FlowLimiter::with_config(config, TestClock::new(0.0)).unwrap();

        limiter.evaluate(key(1, 1), 0);
        limiter.flush_audit();
        assert!(limiter.persistence_enabled());

        // the sweep's compaction cannot create its scratch file
        std::fs::create_dir(dir.path().join("flows.compact")).unwrap();
        let report = limiter.sweeper().sweep_at(10 * SEC);
        assert_eq!(report.evicted, 1);
        limiter.flush_audit();

        assert!(!limiter.persistence_enabled());
        assert!(limiter.audit_entries().is_none());
        let queued = limiter.stats().audit_queued;
        assert_eq!(limiter.stats().audit_errors, 1);

        assert_eq!(limiter.evaluate(key(1, 1), 10 * SEC), Decision::Accept);
        assert_eq!(limiter.evaluate(key(1, 1), 10 * SEC), Decision::Accept);
        assert_eq!(limiter.evaluate(key(1, 1), 10 * SEC), Decision::Drop);
        assert_eq!(limiter.stats().audit_queued, queued);
    }
}
