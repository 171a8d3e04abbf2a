//! # Persist Supervisor
//!
//! Keeps a local document store continuously replicating with one remote
//! endpoint, in both directions, across network failures.
//!
//! ## Architecture
//!
//! The supervisor sits between the caller and a [`DocumentStore`], which does
//! the actual replication. It owns two directional streams and a change feed:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────┐
//! │                              Supervisor                               │
//! │                                                                       │
//! │  ┌──────────────┐   ┌────────────────────┐   ┌─────────────────────┐  │
//! │  │  Baseline    │   │ DirectionState(to) │──►│                     │  │
//! │  │ (changes     │   │ stream + backoff   │   │ ConnectionAggregator│──┼─► connect /
//! │  │  since seq)  │   ├────────────────────┤   │ (to && from)        │  │   disconnect
//! │  └──────────────┘   │ DirectionState(fr) │──►│                     │  │
//! │                     │ stream + backoff   │   └─────────────────────┘  │
//! │                     └────────────────────┘                            │
//! └───────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Reconnection
//!
//! A stream error whose status marks a lost link (405 by default) tears the
//! stream down and schedules a reopen after a capped exponential delay
//! (1.1s, 1.21s, 1.33s, ... up to 5 minutes). The first activity on the new
//! stream resets the delay. Other errors go to the caller's `on_err`.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use persist_supervisor::{persist, Direction, NoOpStore, PersistOptions, SupervisorEvent};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() {
//!     let options = PersistOptions::new()
//!         .with_url("http://localhost:5984/remote")
//!         .with_manual(true);
//!     let supervisor = persist(Arc::new(NoOpStore), options).expect("valid options");
//!
//!     let mut events = supervisor.subscribe();
//!     supervisor.start(Direction::Both).await.expect("failed to start");
//!
//!     if let Ok(SupervisorEvent::Connect) = events.recv().await {
//!         println!("replicating");
//!     }
//!
//!     supervisor.stop(Direction::Both).await;
//! }
//! ```

pub mod aggregator;
pub mod change_feed;
pub mod config;
pub mod direction;
pub mod error;
pub mod metrics;
pub mod replicator;
pub mod resilience;
pub mod store;
pub mod supervisor;

// Re-exports for convenience
pub use aggregator::{ConnectionAggregator, SupervisorEvent};
pub use config::{ChangesOptions, DirectionOptions, PersistOptions, StreamListener, SupervisorConfig};
pub use direction::{Direction, Side};
pub use error::{PersistError, Result};
pub use replicator::DirectionPhase;
pub use resilience::{BackoffPolicy, ErrorClass, LinkLossPolicy, StatusCodePolicy};
pub use store::{
    CancelHandle, DocumentStore, NoOpStore, ReplicationStream, StoreError, StreamError, StreamEvent,
    StreamEventKind, StreamRequest, UpdateSeq,
};
pub use supervisor::{persist, persist_with_policy, DirectionStatus, LinkHealth, Supervisor};
