//! Replication directions.
//!
//! [`Direction`] is what callers pass to `start()` / `stop()`; its numeric
//! codes (`To = 1`, `From = 2`, `Both = 3`) are part of the public surface.
//! [`Side`] is one concrete stream. `Both` is a request-time shorthand and is
//! never stored as state.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A replication direction as requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    /// Outbound: local store to the link.
    To = 1,
    /// Inbound: link to the local store.
    From = 2,
    /// Both directions.
    #[default]
    Both = 3,
}

impl Direction {
    /// Numeric code of this direction.
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// The concrete sides this request applies to.
    pub fn sides(self) -> &'static [Side] {
        match self {
            Direction::To => &[Side::To],
            Direction::From => &[Side::From],
            Direction::Both => &[Side::To, Side::From],
        }
    }

    /// Whether this request covers `side`.
    pub fn includes(self, side: Side) -> bool {
        self.sides().contains(&side)
    }
}

impl TryFrom<u8> for Direction {
    type Error = u8;

    fn try_from(code: u8) -> std::result::Result<Self, Self::Error> {
        match code {
            1 => Ok(Direction::To),
            2 => Ok(Direction::From),
            3 => Ok(Direction::Both),
            other => Err(other),
        }
    }
}

impl From<Side> for Direction {
    fn from(side: Side) -> Self {
        match side {
            Side::To => Direction::To,
            Side::From => Direction::From,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::To => write!(f, "to"),
            Direction::From => write!(f, "from"),
            Direction::Both => write!(f, "both"),
        }
    }
}

/// One of the two independently supervised streams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    To,
    From,
}

impl Side {
    pub const ALL: [Side; 2] = [Side::To, Side::From];

    /// Label used in logs and metrics.
    pub const fn as_str(self) -> &'static str {
        match self {
            Side::To => "to",
            Side::From => "from",
        }
    }

    /// The other side.
    pub const fn opposite(self) -> Side {
        match self {
            Side::To => Side::From,
            Side::From => Side::To,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
