//! Status snapshots returned by the supervisor.

use crate::direction::Side;
use crate::replicator::{DirectionPhase, DirectionState};
use crate::store::UpdateSeq;
use serde::Serialize;
use std::time::Duration;

/// Capacity of the connect/disconnect broadcast channel.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Point-in-time view of one direction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectionStatus {
    pub side: Side,
    pub phase: DirectionPhase,
    /// `start()` was requested and not yet stopped.
    pub replicating: bool,
    /// Activity observed since the last (re)open.
    pub connected: bool,
    /// Delay of the pending (or most recent) reopen; the starting delay when connected.
    pub retry_timeout: Duration,
    /// Consecutive reopens since the last connection.
    pub retry_attempt: u32,
    pub pending_retry: bool,
}

impl From<&DirectionState> for DirectionStatus {
    fn from(dir: &DirectionState) -> Self {
        Self {
            side: dir.side(),
            phase: dir.phase(),
            replicating: dir.is_replicating(),
            connected: dir.is_connected(),
            retry_timeout: dir.retry_timeout(),
            retry_attempt: dir.retry_attempt(),
            pending_retry: dir.has_pending_retry(),
        }
    }
}

/// Health snapshot of the whole supervisor.
///
/// `connected` is the last emitted aggregate state, so it agrees with the
/// most recent connect/disconnect event.
#[derive(Debug, Clone, Serialize)]
pub struct LinkHealth {
    pub connected: bool,
    pub to: DirectionStatus,
    pub from: DirectionStatus,
    /// Change feed held for the current session.
    pub baseline_active: bool,
    /// Sequence the change feed was anchored at.
    pub anchored_at: Option<UpdateSeq>,
}

impl LinkHealth {
    /// True when a started direction is waiting on a reopen.
    pub fn is_degraded(&self) -> bool {
        self.to.phase == DirectionPhase::Backoff || self.from.phase == DirectionPhase::Backoff
    }

    pub fn direction(&self, side: Side) -> &DirectionStatus {
        match side {
            Side::To => &self.to,
            Side::From => &self.from,
        }
    }
}
