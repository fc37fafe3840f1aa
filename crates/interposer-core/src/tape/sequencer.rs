//! Four-state write sequencer.
//!
//! The sequencer advances once per serviced status read while the control
//! register carries write intent. Writing the control register restarts it.

use super::TapeControl;

/// Sequencer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum WriteState {
    /// Idle, or the first cycle after a data-only control write.
    #[default]
    NoWrite,
    /// A sync cell is due on the next cycle.
    WriteSyncPending,
    /// One latency cycle passed; data commits from here on.
    WriteOnly,
    /// Steady state: every cycle commits the latched byte.
    WriteData,
}

/// What a single sequencer step stamps onto the current cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteAction {
    /// Nothing is written this cycle.
    Hold,
    /// Write a sync cell.
    Sync,
    /// Write the latched data byte.
    Data,
}

impl WriteState {
    /// Starting state derived from a freshly written control byte.
    #[must_use]
    pub const fn from_control(control: TapeControl) -> Self {
        if control.contains(TapeControl::WRITE_SYNC) {
            Self::WriteSyncPending
        } else {
            Self::NoWrite
        }
    }

    /// Advances one cycle, returning the action for the current cell.
    ///
    /// `NoWrite` takes the one latency cycle: it moves to `WriteOnly`, or
    /// to `WriteSyncPending` when the control byte asks for a sync cell,
    /// and commits nothing.
    pub fn step(&mut self, control: TapeControl) -> WriteAction {
        let (next, action) = match *self {
            Self::NoWrite if control.contains(TapeControl::WRITE_SYNC) => {
                (Self::WriteSyncPending, WriteAction::Hold)
            }
            Self::NoWrite => (Self::WriteOnly, WriteAction::Hold),
            Self::WriteSyncPending => (Self::WriteData, WriteAction::Sync),
            Self::WriteOnly | Self::WriteData => (Self::WriteData, WriteAction::Data),
        };
        *self = next;
        action
    }
}
