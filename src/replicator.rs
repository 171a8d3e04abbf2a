// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Directional replication: one live stream per side.
//!
//! Each side owns its stream handle, its retry timer and its connected flag.
//! Both sides run the same state machine independently.
//!
//! # Direction Lifecycle
//!
//! ```text
//!            begin()                first change/complete/uptodate
//!   Idle ───────────→ AwaitingFirstActivity ─────────────→ Connected
//!    ↑                   ↑        │                           │
//!    │ end()             │        │ link lost                 │ link lost
//!    │ (any state)       │        ↓                           │
//!    │                   └─── Backoff ←───────────────────────┘
//!    │                   (timer fires)
//! ```
//!
//! The old stream is always canceled before a replacement is opened, so a
//! side never has two live streams. Every opened stream gets a new
//! generation number; events and timers carrying an older generation are
//! ignored, which keeps a late duplicate signal from transitioning twice.

use crate::config::StreamListener;
use crate::direction::Side;
use crate::error::PersistError;
use crate::metrics;
use crate::resilience::{BackoffPolicy, ErrorClass, LinkLossPolicy, StatusCodePolicy};
use crate::store::{CancelHandle, DocumentStore, ErrorHandler, StreamError, StreamEvent};
use crate::supervisor::{Shared, SupervisorState};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Phase of one direction.
///
/// See module docs for the transition diagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DirectionPhase {
    /// Not replicating.
    Idle,
    /// Stream open, waiting for the first sign of life.
    AwaitingFirstActivity,
    /// Stream has shown activity since it was opened.
    Connected,
    /// Link lost, waiting for the retry timer.
    Backoff,
}

impl fmt::Display for DirectionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirectionPhase::Idle => write!(f, "Idle"),
            DirectionPhase::AwaitingFirstActivity => write!(f, "AwaitingFirstActivity"),
            DirectionPhase::Connected => write!(f, "Connected"),
            DirectionPhase::Backoff => write!(f, "Backoff"),
        }
    }
}

/// A live stream owned by a direction. Dropping it cancels the stream.
pub(crate) struct ActiveStream {
    handle: Box<dyn CancelHandle>,
    pump: JoinHandle<()>,
    on_err: Option<ErrorHandler>,
    listeners: Vec<StreamListener>,
    fired: Vec<bool>,
}

impl ActiveStream {
    /// Run caller listeners registered for this event's kind.
    fn notify(&mut self, event: &StreamEvent) {
        let kind = event.kind();
        for (listener, fired) in self.listeners.iter().zip(self.fired.iter_mut()) {
            if listener.event != kind || (listener.once && *fired) {
                continue;
            }
            *fired = true;
            (listener.callback)(event);
        }
    }
}

impl Drop for ActiveStream {
    fn drop(&mut self) {
        self.handle.cancel();
        self.pump.abort();
    }
}

/// A pending reopen. Dropping it aborts the timer.
pub(crate) struct RetryTimer(Option<JoinHandle<()>>);

impl RetryTimer {
    /// Let the timer task finish on its own.
    fn disarm(mut self) {
        self.0.take();
    }
}

impl Drop for RetryTimer {
    fn drop(&mut self) {
        if let Some(task) = self.0.take() {
            task.abort();
        }
    }
}

/// Mutable per-direction state, reused across retries.
pub struct DirectionState {
    side: Side,
    phase: DirectionPhase,
    /// Delay of the pending (or most recent) reopen.
    retry_timeout: Duration,
    /// Consecutive reopens since the last connection.
    retry_attempt: u32,
    generation: u64,
    stream: Option<ActiveStream>,
    retry_timer: Option<RetryTimer>,
}

impl DirectionState {
    pub fn new(side: Side, starting_timeout: Duration) -> Self {
        Self {
            side,
            phase: DirectionPhase::Idle,
            retry_timeout: starting_timeout,
            retry_attempt: 0,
            generation: 0,
            stream: None,
            retry_timer: None,
        }
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn phase(&self) -> DirectionPhase {
        self.phase
    }

    /// `start()` was requested and not yet stopped.
    pub fn is_replicating(&self) -> bool {
        self.phase != DirectionPhase::Idle
    }

    /// First activity observed since the last (re)open.
    pub fn is_connected(&self) -> bool {
        self.phase == DirectionPhase::Connected
    }

    pub fn retry_timeout(&self) -> Duration {
        self.retry_timeout
    }

    pub fn retry_attempt(&self) -> u32 {
        self.retry_attempt
    }

    pub fn has_stream(&self) -> bool {
        self.stream.is_some()
    }

    pub fn has_pending_retry(&self) -> bool {
        self.retry_timer.is_some()
    }

    /// First activity: connected, backoff back to the starting delay.
    fn mark_connected(&mut self, starting_timeout: Duration) {
        self.phase = DirectionPhase::Connected;
        self.retry_attempt = 0;
        self.retry_timeout = starting_timeout;
    }

    /// Advance the schedule and return the delay for this reopen.
    fn next_retry_delay(&mut self, policy: &BackoffPolicy) -> Duration {
        self.retry_attempt = self.retry_attempt.saturating_add(1);
        self.retry_timeout = policy.delay_for_attempt(self.retry_attempt);
        self.retry_timeout
    }

    /// Back to `Idle`, canceling the stream and any pending retry.
    fn reset(&mut self) {
        self.phase = DirectionPhase::Idle;
        self.stream = None;
        self.retry_timer = None;
    }
}

impl<S: DocumentStore> Shared<S> {
    /// Start replicating in `side`. No-op if already replicating.
    pub(crate) fn begin(self: &Arc<Self>, state: &mut SupervisorState, side: Side) {
        if state.side(side).is_replicating() {
            debug!(direction = %side, "Already replicating");
            return;
        }
        info!(direction = %side, "Starting replication");
        self.open_stream(state, side);
    }

    /// Stop replicating in `side`. Idempotent.
    ///
    /// The aggregator's view is updated but not evaluated; callers decide
    /// what to emit.
    pub(crate) fn end(&self, state: &mut SupervisorState, side: Side) {
        let dir = state.side_mut(side);
        let was_replicating = dir.is_replicating();
        dir.reset();
        state.aggregator.observe(side, false);
        metrics::set_direction_connected(side, false);

        if was_replicating {
            info!(direction = %side, "Replication stopped");
        }
    }

    /// Cancel any current stream and open a fresh one.
    fn open_stream(self: &Arc<Self>, state: &mut SupervisorState, side: Side) {
        if self.is_shutdown() {
            return;
        }

        let config = state.config();
        let generation = {
            let dir = state.side_mut(side);
            dir.stream = None;
            dir.retry_timer = None;
            dir.generation += 1;
            dir.generation
        };

        let opened = config.stream_request(side).and_then(|request| {
            let url = request.url.clone();
            let on_err = request.on_err.clone();
            self.store
                .open_replication(request)
                .map(|stream| (url, on_err, stream))
                .map_err(PersistError::from)
        });

        match opened {
            Ok((url, on_err, stream)) => {
                let pump = tokio::spawn(pump_events(
                    Arc::clone(self),
                    side,
                    generation,
                    stream.events,
                    self.shutdown_rx.clone(),
                ));
                let listeners = config.direction(side).listeners.clone();
                let dir = state.side_mut(side);
                dir.stream = Some(ActiveStream {
                    handle: stream.handle,
                    pump,
                    on_err,
                    fired: vec![false; listeners.len()],
                    listeners,
                });
                dir.phase = DirectionPhase::AwaitingFirstActivity;

                metrics::record_stream_opened(side, true);
                debug!(direction = %side, url = %url, generation, "Replication stream opened");
            }
            Err(e) => {
                metrics::record_stream_opened(side, false);
                warn!(direction = %side, error = %e, "Failed to open replication stream");
                self.schedule_retry(state, side, generation);
            }
        }
    }

    /// Arrange a reopen of `side` after the current backoff delay.
    fn schedule_retry(self: &Arc<Self>, state: &mut SupervisorState, side: Side, generation: u64) {
        let policy = state.config().backoff;
        let dir = state.side_mut(side);
        dir.phase = DirectionPhase::Backoff;
        let delay = dir.next_retry_delay(&policy);
        let attempt = dir.retry_attempt;

        let shared = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown_rx.changed() => return,
            }
            shared.fire_retry(side, generation).await;
        });
        dir.retry_timer = Some(RetryTimer(Some(task)));

        metrics::record_retry_scheduled(side, delay);
        info!(
            direction = %side,
            delay_ms = delay.as_millis() as u64,
            attempt,
            "Reopen scheduled"
        );
    }

    /// Timer expiry: reopen only if nothing else happened to the side since.
    async fn fire_retry(self: &Arc<Self>, side: Side, generation: u64) {
        let mut state = self.state.lock().await;
        let dir = state.side_mut(side);
        if dir.phase != DirectionPhase::Backoff || dir.generation != generation {
            trace!(direction = %side, generation, "Ignoring stale retry timer");
            return;
        }
        if let Some(timer) = dir.retry_timer.take() {
            timer.disarm();
        }
        debug!(direction = %side, attempt = dir.retry_attempt, "Reopening replication stream");
        self.open_stream(&mut state, side);
    }

    /// Apply one stream event. Returns false when the pump should exit.
    fn handle_event(
        self: &Arc<Self>,
        state: &mut SupervisorState,
        side: Side,
        generation: u64,
        event: StreamEvent,
    ) -> bool {
        if self.is_shutdown() {
            return false;
        }

        let dir = state.side_mut(side);
        if dir.generation != generation {
            trace!(direction = %side, generation, "Dropping event from replaced stream");
            return false;
        }
        let Some(stream) = dir.stream.as_mut() else {
            return false;
        };
        stream.notify(&event);

        if event.is_activity() {
            trace!(direction = %side, kind = ?event.kind(), "Stream activity");
            self.handle_activity(state, side);
            return true;
        }
        match event {
            StreamEvent::Error(error) => self.handle_error(state, side, generation, error),
            _ => true,
        }
    }

    /// First activity detector. Later activity is ignored.
    fn handle_activity(&self, state: &mut SupervisorState, side: Side) {
        let starting = state.config().backoff.starting;
        let dir = state.side_mut(side);
        if dir.phase != DirectionPhase::AwaitingFirstActivity {
            return;
        }
        dir.mark_connected(starting);
        metrics::set_direction_connected(side, true);
        info!(direction = %side, "Replication stream connected");

        match state.aggregator.report(side, true) {
            Some(event) => self.emit(event),
            None if !state.aggregator.view(side.opposite()) => {
                debug!(
                    direction = %side,
                    waiting_on = %side.opposite(),
                    "Connected, waiting on other direction"
                );
            }
            None => {}
        }
    }

    fn handle_error(
        self: &Arc<Self>,
        state: &mut SupervisorState,
        side: Side,
        generation: u64,
        error: StreamError,
    ) -> bool {
        let class = self.classify(state, &error);
        metrics::record_stream_error(side, class);

        match class {
            ErrorClass::Forward => {
                debug!(direction = %side, error = %error, status = ?error.status, "Forwarding stream error");
                let handler = state
                    .side(side)
                    .stream
                    .as_ref()
                    .and_then(|s| s.on_err.clone());
                if let Some(handler) = handler {
                    handler(&error);
                }
                true
            }
            ErrorClass::LinkLost => {
                warn!(direction = %side, error = %error, status = ?error.status, "Link lost");
                // Runs on this stream's own pump, which exits right after.
                state.side_mut(side).stream = None;
                metrics::set_direction_connected(side, false);

                if let Some(event) = state.aggregator.report(side, false) {
                    self.emit(event);
                }
                self.schedule_retry(state, side, generation);
                false
            }
        }
    }

    fn classify(&self, state: &SupervisorState, error: &StreamError) -> ErrorClass {
        match &self.policy {
            Some(policy) => policy.classify(error),
            None => StatusCodePolicy::new(state.config().link_lost_statuses).classify(error),
        }
    }
}

/// Forward stream events into the state machine until the stream is replaced.
async fn pump_events<S: DocumentStore>(
    shared: Arc<Shared<S>>,
    side: Side,
    generation: u64,
    mut events: mpsc::UnboundedReceiver<StreamEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = shutdown_rx.changed() => None,
        };
        let Some(event) = event else {
            break;
        };

        let mut state = shared.state.lock().await;
        if !shared.handle_event(&mut state, side, generation, event) {
            break;
        }
    }
    trace!(direction = %side, generation, "Event pump finished");
}
