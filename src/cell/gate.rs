//! Gate Module
//!
//! Activation policies deciding when a cell may begin loading.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

// == Gate ==
/// When a cell is allowed to start its first load.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Gate {
    /// Load on first read.
    #[default]
    Immediate,
    /// Load only after [`LazyCell::activate`](crate::LazyCell::activate).
    Inactive,
    /// Load once the delay has passed.
    Delayed(Delay),
}

/// Delay flavours for [`Gate::Delayed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delay {
    /// Open on the scheduler pass following the first read.
    NextTick,
    /// Open this long after the cell was built.
    For(Duration),
    /// Open at this wall-clock time.
    Until(DateTime<Utc>),
}

impl Delay {
    /// Maps a millisecond delay the way configuration expresses it: zero means
    /// the next scheduler pass.
    pub fn from_millis(ms: u64) -> Self {
        if ms == 0 {
            Delay::NextTick
        } else {
            Delay::For(Duration::from_millis(ms))
        }
    }
}

// == Gate State ==
/// Runtime form of a [`Gate`], owned by a cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum GateState {
    Open,
    Closed,
    NextTick { armed: bool },
    Deadline(Instant),
    WallClock(DateTime<Utc>),
}

/// What a read should do about the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum GateCheck {
    Open,
    Closed,
    /// Closed, and the caller must schedule the next-tick opening.
    Arm,
}

impl GateState {
    pub(crate) fn from_gate(gate: &Gate) -> Self {
        match gate {
            Gate::Immediate => GateState::Open,
            Gate::Inactive => GateState::Closed,
            Gate::Delayed(Delay::NextTick) => GateState::NextTick { armed: false },
            Gate::Delayed(Delay::For(d)) => GateState::Deadline(Instant::now() + *d),
            Gate::Delayed(Delay::Until(t)) => GateState::WallClock(*t),
        }
    }

    /// Checks the gate for a read. Time-based gates open here as soon as their
    /// deadline has passed, whether or not any timer ran.
    pub(crate) fn check(&mut self) -> GateCheck {
        match self {
            GateState::Open => GateCheck::Open,
            GateState::Closed => GateCheck::Closed,
            GateState::NextTick { armed: true } => GateCheck::Closed,
            GateState::NextTick { armed } => {
                *armed = true;
                GateCheck::Arm
            }
            GateState::Deadline(at) => {
                if Instant::now() >= *at {
                    self.open();
                    GateCheck::Open
                } else {
                    GateCheck::Closed
                }
            }
            GateState::WallClock(at) => {
                if Utc::now() >= *at {
                    self.open();
                    GateCheck::Open
                } else {
                    GateCheck::Closed
                }
            }
        }
    }

    pub(crate) fn open(&mut self) {
        *self = GateState::Open;
    }

    pub(crate) fn is_open(&self) -> bool {
        match self {
            GateState::Open => true,
            GateState::Deadline(at) => Instant::now() >= *at,
            GateState::WallClock(at) => Utc::now() >= *at,
            GateState::Closed | GateState::NextTick { .. } => false,
        }
    }
}
