// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication supervisor.
//!
//! The public facade that ties together:
//! - Two directional replicators via [`crate::replicator`]
//! - The change-feed baseline via [`crate::change_feed::Baseline`]
//! - Aggregate connect/disconnect via [`crate::aggregator::ConnectionAggregator`]
//!
//! # Architecture
//!
//! All mutable state lives behind one async mutex. Caller operations, stream
//! events and retry timers each take the lock for one step, so transitions
//! never interleave. Stream pumps and timers are spawned tasks holding an
//! `Arc` to the shared state; they exit on the shutdown signal sent when the
//! [`Supervisor`] is dropped.
//!
//! # Example
//!
//! ```rust,no_run
//! use persist_supervisor::{persist, NoOpStore, PersistOptions, Direction};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = PersistOptions::new()
//!         .with_url("http://localhost:5984/db")
//!         .with_manual(true);
//!     let supervisor = persist(Arc::new(NoOpStore), options).expect("valid options");
//!
//!     let mut events = supervisor.subscribe();
//!     supervisor.start(Direction::Both).await.expect("setup failed");
//!
//!     while let Ok(event) = events.recv().await {
//!         println!("link {event}");
//!     }
//! }
//! ```

mod types;

pub use types::{DirectionStatus, LinkHealth, EVENT_CHANNEL_CAPACITY};

use crate::aggregator::{ConnectionAggregator, SupervisorEvent};
use crate::change_feed::Baseline;
use crate::config::{PersistOptions, SupervisorConfig};
use crate::direction::{Direction, Side};
use crate::error::{PersistError, Result};
use crate::metrics;
use crate::replicator::DirectionState;
use crate::resilience::{LinkLossPolicy, SharedLinkLossPolicy};
use crate::store::{DocumentStore, NoOpStore};
use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{debug, error, info};

/// Create a supervisor over `store`.
///
/// Unless `options.manual` is true, replication in both directions starts
/// right away on the current tokio runtime; failures of that automatic start
/// are logged. Returns [`PersistError::NoRuntime`] when auto-start is
/// requested outside a runtime.
pub fn persist<S: DocumentStore>(store: Arc<S>, options: PersistOptions) -> Result<Supervisor<S>> {
    Supervisor::build(store, options, None)
}

/// Like [`persist`], with a custom rule for what counts as a lost link.
///
/// The policy replaces the status-code list from `linkLostStatuses`.
pub fn persist_with_policy<S, P>(store: Arc<S>, options: PersistOptions, policy: P) -> Result<Supervisor<S>>
where
    S: DocumentStore,
    P: LinkLossPolicy,
{
    Supervisor::build(store, options, Some(Arc::new(policy)))
}

/// State guarded by the supervisor lock.
pub(crate) struct SupervisorState {
    pub(crate) options: PersistOptions,
    /// Set on the first start after creation or `cancel()`.
    pub(crate) session_started: bool,
    /// Bumped by `stop()` and `cancel()`; a start whose setup spans a bump
    /// is dropped.
    pub(crate) session_epoch: u64,
    pub(crate) baseline: Baseline,
    pub(crate) to: DirectionState,
    pub(crate) from: DirectionState,
    pub(crate) aggregator: ConnectionAggregator,
}

impl SupervisorState {
    fn new(options: PersistOptions) -> Self {
        let starting = SupervisorConfig::resolve(&options).backoff.starting;
        Self {
            options,
            session_started: false,
            session_epoch: 0,
            baseline: Baseline::new(),
            to: DirectionState::new(Side::To, starting),
            from: DirectionState::new(Side::From, starting),
            aggregator: ConnectionAggregator::new(),
        }
    }

    /// Current options resolved over defaults.
    pub(crate) fn config(&self) -> SupervisorConfig {
        SupervisorConfig::resolve(&self.options)
    }

    pub(crate) fn side(&self, side: Side) -> &DirectionState {
        match side {
            Side::To => &self.to,
            Side::From => &self.from,
        }
    }

    pub(crate) fn side_mut(&mut self, side: Side) -> &mut DirectionState {
        match side {
            Side::To => &mut self.to,
            Side::From => &mut self.from,
        }
    }

    fn any_replicating(&self) -> bool {
        self.to.is_replicating() || self.from.is_replicating()
    }
}

/// Everything the spawned tasks share with the facade.
pub(crate) struct Shared<S: DocumentStore> {
    pub(crate) store: Arc<S>,
    /// Custom classifier; `None` means the configured status codes.
    pub(crate) policy: Option<SharedLinkLossPolicy>,
    pub(crate) state: Mutex<SupervisorState>,
    events_tx: broadcast::Sender<SupervisorEvent>,
    connected_tx: watch::Sender<bool>,
    connected_rx: watch::Receiver<bool>,
    pub(crate) shutdown_tx: watch::Sender<bool>,
    pub(crate) shutdown_rx: watch::Receiver<bool>,
}

impl<S: DocumentStore> Shared<S> {
    pub(crate) fn is_shutdown(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Publish an aggregate event.
    pub(crate) fn emit(&self, event: SupervisorEvent) {
        info!(event = %event, "Link state changed");
        metrics::record_link_event(event);
        let _ = self.connected_tx.send(event == SupervisorEvent::Connect);
        // No subscribers is fine.
        let _ = self.events_tx.send(event);
    }

    async fn start(self: &Arc<Self>, direction: Direction) -> Result<()> {
        if self.is_shutdown() {
            return Ok(());
        }

        let mut state = self.state.lock().await;
        let config = state.config();
        for side in direction.sides() {
            config.url_for(*side)?;
        }

        if !state.session_started {
            let epoch = state.session_epoch;
            drop(state);

            // The store may take arbitrarily long here; hold no lock.
            let anchor = Baseline::anchor(self.store.as_ref(), &config).await?;

            state = self.state.lock().await;
            if state.session_epoch != epoch || self.is_shutdown() {
                debug!(direction = %direction, "Start superseded during setup");
                return Ok(());
            }
            // A concurrent start may have won the race; its anchor is kept.
            if !state.session_started {
                state.baseline.install(anchor);
                state.session_started = true;
                info!(direction = %direction, "Replication session started");
            }
        }

        for side in direction.sides() {
            self.begin(&mut state, *side);
        }
        Ok(())
    }

    async fn stop(&self, direction: Direction) {
        let mut state = self.state.lock().await;
        state.session_epoch = state.session_epoch.wrapping_add(1);
        for side in direction.sides() {
            self.end(&mut state, *side);
        }
        if !state.any_replicating() {
            state.baseline.cancel();
        }

        let event = state.aggregator.force_disconnect();
        self.emit(event);
        debug!(direction = %direction, "Stop requested");
    }

    async fn cancel(&self) {
        let mut state = self.state.lock().await;
        state.session_epoch = state.session_epoch.wrapping_add(1);
        state.baseline.cancel();
        for side in Side::ALL {
            self.end(&mut state, side);
        }
        state.session_started = false;

        if let Some(event) = state.aggregator.evaluate() {
            self.emit(event);
        }
        info!("Replication canceled");
    }
}

/// Keeps a local store replicating with one remote endpoint.
///
/// Dropping the supervisor stops its background tasks and cancels every
/// stream it holds.
pub struct Supervisor<S: DocumentStore = NoOpStore> {
    shared: Arc<Shared<S>>,
}

impl<S: DocumentStore> Supervisor<S> {
    fn build(store: Arc<S>, options: PersistOptions, policy: Option<SharedLinkLossPolicy>) -> Result<Self> {
        let auto_start = !SupervisorConfig::resolve(&options).manual;
        let runtime = if auto_start {
            let handle = tokio::runtime::Handle::try_current()
                .map_err(|e| PersistError::NoRuntime(e.to_string()))?;
            Some(handle)
        } else {
            None
        };

        let (events_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let (connected_tx, connected_rx) = watch::channel(false);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let shared = Arc::new(Shared {
            store,
            policy,
            state: Mutex::new(SupervisorState::new(options)),
            events_tx,
            connected_tx,
            connected_rx,
            shutdown_tx,
            shutdown_rx,
        });

        if let Some(runtime) = runtime {
            let task_shared = Arc::clone(&shared);
            runtime.spawn(async move {
                if let Err(e) = task_shared.start(Direction::Both).await {
                    error!(error = %e, "Automatic start failed");
                }
            });
        }

        Ok(Self { shared })
    }

    /// Reference to the local store.
    pub fn store(&self) -> &Arc<S> {
        &self.shared.store
    }

    /// Start replication in `direction`.
    ///
    /// The first start of a session anchors the change feed at the store's
    /// current sequence. Directions already replicating are left alone.
    /// A `stop()` or `cancel()` issued while the feed is being anchored wins:
    /// this call then returns `Ok(())` without opening any stream.
    ///
    /// # Errors
    ///
    /// - [`PersistError::Config`] if a requested direction has no URL.
    /// - [`PersistError::Setup`] if anchoring the change feed fails.
    pub async fn start(&self, direction: Direction) -> Result<()> {
        self.shared.start(direction).await
    }

    /// Stop replication in `direction`.
    ///
    /// Always emits one `Disconnect`, even if nothing was running.
    pub async fn stop(&self, direction: Direction) {
        self.shared.stop(direction).await
    }

    /// Tear everything down: change feed, both streams, pending retries.
    ///
    /// Emits `Disconnect` only if the link was connected. The next
    /// `start()` begins a new session.
    pub async fn cancel(&self) {
        self.shared.cancel().await
    }

    /// Merge `partial` into the current options.
    ///
    /// Takes effect on the next stream (re)open.
    pub async fn config(&self, partial: PersistOptions) {
        let mut state = self.shared.state.lock().await;
        state.options.merge(partial);
        debug!("Options updated");
    }

    /// Current options.
    pub async fn options(&self) -> PersistOptions {
        self.shared.state.lock().await.options.clone()
    }

    /// Subscribe to connect/disconnect events.
    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.shared.events_tx.subscribe()
    }

    /// Watch the aggregate connected flag.
    pub fn watch_connection(&self) -> watch::Receiver<bool> {
        self.shared.connected_rx.clone()
    }

    /// Last emitted aggregate state.
    pub fn is_connected(&self) -> bool {
        *self.shared.connected_rx.borrow()
    }

    /// Snapshot of one direction.
    pub async fn status(&self, side: Side) -> DirectionStatus {
        let state = self.shared.state.lock().await;
        DirectionStatus::from(state.side(side))
    }

    /// Snapshot of the whole supervisor.
    pub async fn health_check(&self) -> LinkHealth {
        let state = self.shared.state.lock().await;
        LinkHealth {
            connected: state.aggregator.is_connected(),
            to: DirectionStatus::from(&state.to),
            from: DirectionStatus::from(&state.from),
            baseline_active: state.baseline.is_active(),
            anchored_at: state.baseline.anchored_at().cloned(),
        }
    }
}

impl<S: DocumentStore> Drop for Supervisor<S> {
    fn drop(&mut self) {
        let _ = self.shared.shutdown_tx.send(true);
        // Idle supervisor: release streams now instead of on the last Arc.
        if let Ok(mut state) = self.shared.state.try_lock() {
            state.baseline.cancel();
            for side in Side::ALL {
                self.shared.end(&mut state, side);
            }
        }
    }
}
