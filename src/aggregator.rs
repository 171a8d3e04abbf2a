// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregate connection state.
//!
//! The link counts as connected only while both directions are connected.
//! The aggregator keeps the latest per-direction view plus the last value it
//! emitted, and turns reports into at most one event per transition.
//!
//! ```text
//!   to  from  overall   last emitted   →  event
//!   ──  ────  ───────   ────────────      ─────
//!   ✓    ✓      ✓          false          Connect
//!   ✗    ✓      ✗          true           Disconnect
//!   ✓    ✓      ✓          true           (none)
//!   ✗    ✗      ✗          false          (none)
//! ```

use crate::direction::Side;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Aggregate link events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupervisorEvent {
    /// Both directions are connected.
    Connect,
    /// At least one direction is no longer connected, or replication stopped.
    Disconnect,
}

impl fmt::Display for SupervisorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SupervisorEvent::Connect => write!(f, "connect"),
            SupervisorEvent::Disconnect => write!(f, "disconnect"),
        }
    }
}

/// Combines both directions into one connected flag.
#[derive(Debug, Default, Clone)]
pub struct ConnectionAggregator {
    to: bool,
    from: bool,
    last_emitted: bool,
}

impl ConnectionAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a direction's state and emit on a boundary crossing.
    pub fn report(&mut self, side: Side, connected: bool) -> Option<SupervisorEvent> {
        self.observe(side, connected);
        self.evaluate()
    }

    /// Record a direction's state without evaluating.
    pub fn observe(&mut self, side: Side, connected: bool) {
        match side {
            Side::To => self.to = connected,
            Side::From => self.from = connected,
        }
    }

    /// Recompute the overall state and emit if it differs from the last one.
    pub fn evaluate(&mut self) -> Option<SupervisorEvent> {
        let overall = self.to && self.from;
        if overall == self.last_emitted {
            return None;
        }
        self.last_emitted = overall;
        Some(if overall {
            SupervisorEvent::Connect
        } else {
            SupervisorEvent::Disconnect
        })
    }

    /// Record "not connected" and emit `Disconnect` regardless of history.
    pub fn force_disconnect(&mut self) -> SupervisorEvent {
        self.last_emitted = false;
        SupervisorEvent::Disconnect
    }

    /// Last emitted aggregate state.
    pub fn is_connected(&self) -> bool {
        self.last_emitted
    }

    /// Last reported state of one direction.
    pub fn view(&self, side: Side) -> bool {
        match side {
            Side::To => self.to,
            Side::From => self.from,
        }
    }
}
