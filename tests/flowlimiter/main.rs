// tests/flowlimiter/main.rs

mod cleanup_tests;
mod error_tests;

// Re-export common test utilities
pub use fixtures::flows::{SEC, key};
pub use fixtures::test_clock::TestClock;
