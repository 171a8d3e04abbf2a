//! Resilience policies: reconnect backoff and link-loss classification.
//!
//! - [`BackoffPolicy`]: capped exponential delay between stream reopen attempts
//! - [`LinkLossPolicy`]: decides whether a stream error means "the link is gone"
//!
//! Both are pure and independent of the supervisor state machine.
//!
//! # Backoff Schedule (defaults)
//!
//! ```text
//! Attempt  Delay
//! -------  -----
//! 0        1000ms   (starting value, never waited)
//! 1        1100ms   (first reopen)
//! 2        1210ms
//! 3        1331ms
//! ...
//! 60+      300s     (cap)
//! ```

use crate::store::StreamError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Default starting value of the reopen delay.
pub const STARTING_RETRY_TIMEOUT: Duration = Duration::from_millis(1000);

/// Default ceiling for the reopen delay (5 minutes).
pub const MAX_RETRY_TIMEOUT: Duration = Duration::from_millis(300_000);

/// Default backoff multiplier.
pub const BACKOFF_FACTOR: f64 = 1.1;

/// Status code treated as link loss when nothing else is configured.
pub const DEFAULT_LINK_LOST_STATUS: u16 = 405;

/// Capped exponential backoff.
///
/// The n-th delay (0-indexed) is `min(max, floor(starting * factor^n))`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub starting: Duration,
    pub max: Duration,
    pub factor: f64,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            starting: STARTING_RETRY_TIMEOUT,
            max: MAX_RETRY_TIMEOUT,
            factor: BACKOFF_FACTOR,
        }
    }
}

impl BackoffPolicy {
    /// Fast policy for tests.
    pub fn testing() -> Self {
        Self {
            starting: Duration::from_millis(10),
            max: Duration::from_millis(100),
            factor: 2.0,
        }
    }

    /// Delay for the n-th consecutive reopen; 0 is the resting value a
    /// connection resets to.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let millis = (self.starting.as_millis() as f64 * self.factor.powi(exponent)).floor();
        let max_millis = self.max.as_millis() as f64;

        if !millis.is_finite() || millis >= max_millis {
            return self.max;
        }
        Duration::from_millis(millis.max(0.0) as u64)
    }
}

/// How a stream error is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The link is unreachable: tear down and retry with backoff.
    LinkLost,
    /// Hand the error to the direction's error handler, no state change.
    Forward,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorClass::LinkLost => write!(f, "link_lost"),
            ErrorClass::Forward => write!(f, "forward"),
        }
    }
}

/// Classifies stream errors.
///
/// Replace it to change what counts as a lost link without touching the
/// retry state machine.
pub trait LinkLossPolicy: Send + Sync + 'static {
    fn classify(&self, error: &StreamError) -> ErrorClass;
}

impl<F> LinkLossPolicy for F
where
    F: Fn(&StreamError) -> ErrorClass + Send + Sync + 'static,
{
    fn classify(&self, error: &StreamError) -> ErrorClass {
        self(error)
    }
}

/// Treats a fixed set of status codes as link loss.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusCodePolicy {
    statuses: Vec<u16>,
}

impl Default for StatusCodePolicy {
    fn default() -> Self {
        Self::new(vec![DEFAULT_LINK_LOST_STATUS])
    }
}

impl StatusCodePolicy {
    pub fn new(statuses: Vec<u16>) -> Self {
        Self { statuses }
    }

    pub fn statuses(&self) -> &[u16] {
        &self.statuses
    }
}

impl LinkLossPolicy for StatusCodePolicy {
    fn classify(&self, error: &StreamError) -> ErrorClass {
        match error.status {
            Some(status) if self.statuses.contains(&status) => ErrorClass::LinkLost,
            _ => ErrorClass::Forward,
        }
    }
}

/// Shared policy handle.
pub type SharedLinkLossPolicy = Arc<dyn LinkLossPolicy>;
