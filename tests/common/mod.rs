//! Shared test utilities for integration and property tests.
//!
//! This module provides:
//! - Mock DocumentStore for recording feeds and streams
//! - Helpers for driving a paused tokio clock

#![allow(dead_code)]

pub mod mock_store;

pub use mock_store::*;

use persist_supervisor::{PersistOptions, StreamError, StreamEvent, SupervisorEvent};
use std::time::Duration;
use tokio::sync::broadcast;

pub const URL: &str = "http://localhost:5984/remote";

/// Options for a manually started supervisor against [`URL`].
pub fn manual_options() -> PersistOptions {
    PersistOptions::new().with_url(URL).with_manual(true)
}

/// Let spawned pumps and timers run to quiescence.
pub async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock, then settle.
pub async fn advance(ms: u64) {
    tokio::time::advance(Duration::from_millis(ms)).await;
    settle().await;
}

/// Collect everything already published on `rx`.
pub fn drain(rx: &mut broadcast::Receiver<SupervisorEvent>) -> Vec<SupervisorEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// An error that marks the link as lost under the default policy.
pub fn link_lost() -> StreamEvent {
    StreamEvent::Error(StreamError::new("connection refused").with_status(405))
}

pub fn change() -> StreamEvent {
    StreamEvent::Change(serde_json::json!({"docs_written": 1}))
}
