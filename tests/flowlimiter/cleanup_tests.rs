// tests/flowlimiter/cleanup_tests.rs

#[cfg(test)]
mod tests {
    use crate::{SEC, TestClock, key};
    use flow_limiter::{FlowLimiter, FlowLimiterConfig};
    use std::thread;
    use std::time::{Duration, Instant};

    fn limiter(clock: &TestClock) -> FlowLimiter<TestClock> {
        let config = FlowLimiterConfig::new(5, Duration::from_secs(5));
        FlowLimiter::with_config(config, clock.clone()).unwrap()
    }

    #[test]
    fn sweep_removes_exactly_cold_flows() {
        let clock = TestClock::new(0.0);
        let limiter = limiter(&clock);

        limiter.evaluate(key(1, 1), 0);
        limiter.evaluate(key(2, 1), 3 * SEC);
        limiter.evaluate(key(3, 1), 6 * SEC);
        // refreshed inside its window: last_seen moves, window_start does not
        limiter.evaluate(key(4, 1), 0);
        limiter.evaluate(key(4, 1), 4 * SEC);

        let report = limiter.sweeper().sweep_at(8 * SEC);
        assert_eq!(report.candidates, 2);
        assert_eq!(report.evicted, 2);
        assert!(!report.interrupted);

        assert!(limiter.lookup(key(1, 1)).is_none());
        assert!(limiter.lookup(key(2, 1)).is_none());
        assert!(limiter.lookup(key(3, 1)).is_some());
        assert!(limiter.lookup(key(4, 1)).is_some());
        assert_eq!(limiter.stats().evicted, 2);
    }

    #[test]
    fn sweep_is_idempotent() {
        let clock = TestClock::new(0.0);
        let limiter = limiter(&clock);
        limiter.evaluate(key(1, 1), 0);

        let sweeper = limiter.sweeper();
        assert_eq!(sweeper.sweep_at(10 * SEC).evicted, 1);
        assert_eq!(sweeper.sweep_at(10 * SEC).evicted, 0);
        assert_eq!(limiter.tracked_flows(), 0);
    }

    #[test]
    fn cleanup_handles_empty_state() {
        let clock = TestClock::new(0.0);
        let limiter = limiter(&clock);
        let report = limiter.cleanup_stale_flows().unwrap();
        assert_eq!(report.evicted, 0);
        assert_eq!(limiter.tracked_flows(), 0);
    }

    #[test]
    fn cleanup_preserves_recent_flows() {
        let clock = TestClock::new(100.0);
        let limiter = limiter(&clock);
        for n in 0..5 {
            assert!(limiter.check_connection(key(n, 1)).is_accept());
            clock.advance(0.01);
        }
        limiter.cleanup_stale_flows().unwrap();
        assert_eq!(limiter.tracked_flows(), 5);
    }

    #[test]
    fn grace_period_delays_eviction() {
        let config = FlowLimiterConfig::new(5, Duration::from_secs(5))
            .eviction_grace(Duration::from_secs(10));
        let limiter = FlowLimiter::with_config(config, TestClock::new(0.0)).unwrap();
        limiter.evaluate(key(1, 1), 0);

        assert_eq!(limiter.sweeper().sweep_at(14 * SEC).evicted, 0);
        assert_eq!(limiter.sweeper().sweep_at(15 * SEC).evicted, 1);
    }

    #[test]
    fn evicted_flow_starts_fresh() {
        let clock = TestClock::new(0.0);
        let limiter = limiter(&clock);
        let k = key(1, 1);
        for _ in 0..5 {
            limiter.evaluate(k, 0);
        }
        limiter.sweeper().sweep_at(5 * SEC);
        assert!(limiter.lookup(k).is_none());

        assert!(limiter.evaluate(k, 5 * SEC).is_accept());
        assert_eq!(limiter.lookup(k).unwrap().count, 1);
    }

    #[test]
    fn background_sweeper_evicts_and_stops() {
        let clock = TestClock::new(0.0);
        let config = FlowLimiterConfig::new(5, Duration::from_secs(5))
            .cleanup_interval(Duration::from_millis(10));
        let limiter = FlowLimiter::with_config(config, clock.clone()).unwrap();
        limiter.evaluate(key(1, 1), 0);

        let handle = limiter.start_sweeper().unwrap();
        assert!(handle.is_running());
        clock.set_time(60.0);

        let deadline = Instant::now() + Duration::from_secs(5);
        while limiter.tracked_flows() > 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(limiter.tracked_flows(), 0);

        handle.stop();
    }

    #[test]
    fn stop_is_honored_before_next_tick() {
        let clock = TestClock::new(0.0);
        let config = FlowLimiterConfig::new(5, Duration::from_secs(5))
            .cleanup_interval(Duration::from_secs(3600));
        let limiter = FlowLimiter::with_config(config, clock).unwrap();

        let handle = limiter.start_sweeper().unwrap();
        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(60));
    }
}
