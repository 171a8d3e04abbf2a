//! Metrics for observability.
//!
//! Exports Prometheus-compatible metrics through the `metrics` facade for:
//! - Stream opens and reopen attempts per direction
//! - Stream errors by classification
//! - Per-direction and aggregate connection state
//! - Change feed baseline state
//!
//! # Metric Naming Convention
//!
//! All metrics are prefixed with `persist_` and follow Prometheus conventions:
//! - Counters end in `_total`
//! - Gauges represent current state
//! - Histograms track distributions (delays)
//!
//! Nothing is recorded unless the host installs a recorder.

use crate::aggregator::SupervisorEvent;
use crate::direction::Side;
use crate::resilience::ErrorClass;
use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record a replication stream being opened.
pub fn record_stream_opened(side: Side, success: bool) {
    let status = if success { "success" } else { "failure" };
    counter!("persist_streams_opened_total", "direction" => side.as_str(), "status" => status).increment(1);
}

/// Record a stream error and how it was classified.
pub fn record_stream_error(side: Side, class: ErrorClass) {
    counter!(
        "persist_stream_errors_total",
        "direction" => side.as_str(),
        "class" => class.to_string()
    )
    .increment(1);
}

/// Record a reopen being scheduled.
pub fn record_retry_scheduled(side: Side, delay: Duration) {
    counter!("persist_retries_scheduled_total", "direction" => side.as_str()).increment(1);
    histogram!("persist_retry_delay_seconds", "direction" => side.as_str()).record(delay.as_secs_f64());
}

/// Gauge for a direction's connected flag (1 = connected).
pub fn set_direction_connected(side: Side, connected: bool) {
    gauge!("persist_direction_connected", "direction" => side.as_str()).set(if connected { 1.0 } else { 0.0 });
}

/// Record an aggregate connect/disconnect emission.
pub fn record_link_event(event: SupervisorEvent) {
    counter!("persist_link_events_total", "event" => event.to_string()).increment(1);
    let value = match event {
        SupervisorEvent::Connect => 1.0,
        SupervisorEvent::Disconnect => 0.0,
    };
    gauge!("persist_link_connected").set(value);
}

/// Gauge for the change feed baseline (1 = feed open).
pub fn set_baseline_active(active: bool) {
    gauge!("persist_baseline_active").set(if active { 1.0 } else { 0.0 });
}

#[cfg(test)]
mod tests {
    use super::*;

    // No recorder installed: every call must be a silent no-op.
    #[test]
    fn test_metrics_without_recorder() {
        record_stream_opened(Side::To, true);
        record_stream_opened(Side::From, false);
        record_stream_error(Side::To, ErrorClass::LinkLost);
        record_retry_scheduled(Side::From, Duration::from_millis(1100));
        set_direction_connected(Side::To, true);
        record_link_event(SupervisorEvent::Connect);
        record_link_event(SupervisorEvent::Disconnect);
        set_baseline_active(false);
    }
}
