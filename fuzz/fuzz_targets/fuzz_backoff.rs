//! Fuzz target for backoff delay calculation.
//!
//! This tests that `delay_for_attempt` never panics and never exceeds
//! the configured ceiling, whatever the policy values.

#![no_main]

use libfuzzer_sys::fuzz_target;
use persist_supervisor::BackoffPolicy;
use std::time::Duration;

fuzz_target!(|data: (u64, u64, f64, u32)| {
    let (starting, max, factor, attempt) = data;
    let policy = BackoffPolicy {
        starting: Duration::from_millis(starting),
        max: Duration::from_millis(max),
        factor,
    };

    // Should never panic
    let delay = policy.delay_for_attempt(attempt);
    assert!(delay <= policy.max);
});
