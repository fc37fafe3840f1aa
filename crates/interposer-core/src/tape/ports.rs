//! Interrupt-context side of the tape emulator: the register handlers.
//!
//! Everything here runs inside the bus-cycle handlers. It never touches the
//! backing store; a block miss is posted to the pending slot and serviced by
//! the background task.

use crate::config::BLOCK_SIZE_CELLS_U32;
use crate::{
    DiagCounters, FaultCode, IrqMutex, ReadHandler, TapeConfig, TapeGeometry, WriteHandler,
};

use super::{
    BlockCache, TapeCell, TapeControl, TapeStatus, WriteAction, WriteState, TAPE_CONTROL_PORT,
    TAPE_DATA_PORT, TAPE_STATUS_PORT,
};

/// State shared between the register handlers and the background task.
#[derive(Debug, Default)]
pub(super) struct TapeShared {
    pub(super) enabled: bool,
    pub(super) medium_loaded: bool,
    pub(super) insert_delay: u16,
    pub(super) control: TapeControl,
    pub(super) data_out: u8,
    pub(super) data_in: u8,
    pub(super) position: i32,
    pub(super) sequencer: WriteState,
    pub(super) cache: BlockCache,
    pub(super) last_gap: bool,
    pub(super) flush_countdown: Option<u16>,
    pub(super) diag: DiagCounters,
}

impl TapeShared {
    /// Drops the cached medium view after a file swap.
    pub(super) fn reset_medium(&mut self) {
        self.cache.reset();
        self.sequencer = WriteState::NoWrite;
        self.last_gap = false;
        self.flush_countdown = None;
    }
}

/// Register handlers for the tape controller ports.
///
/// Registered once in the dispatch table; a disabled drive answers reads
/// with "unhandled" and drops writes.
#[derive(Debug)]
pub struct TapePorts {
    pub(super) shared: IrqMutex<TapeShared>,
    geometry: TapeGeometry,
    write_protected: bool,
    flush_countdown_ticks: u16,
}

impl TapePorts {
    pub(super) fn new(config: &TapeConfig) -> Self {
        Self {
            shared: IrqMutex::new(TapeShared::default()),
            geometry: config.geometry,
            write_protected: config.write_protected,
            flush_countdown_ticks: config.flush_countdown_ticks,
        }
    }

    /// Services a status-register read.
    pub fn read_status(&self) -> Option<u8> {
        self.shared.lock(|state| {
            if !state.enabled {
                return None;
            }
            Some(self.service_status(state).bits())
        })
    }

    /// Reads the data latch filled by the last DATA cell passed over.
    pub fn read_data(&self) -> Option<u8> {
        self.shared
            .lock(|state| state.enabled.then_some(state.data_in))
    }

    /// Latches a control byte and restarts the write sequencer.
    pub fn write_control(&self, value: u8) {
        self.shared.lock(|state| {
            if !state.enabled {
                return;
            }
            let control = TapeControl::from_bits_retain(value);
            state.control = control;
            state.sequencer = WriteState::from_control(control);
        });
    }

    /// Latches the payload byte for the next data commit.
    pub fn write_data(&self, value: u8) {
        self.shared.lock(|state| {
            if state.enabled {
                state.data_out = value;
            }
        });
    }

    fn service_status(&self, state: &mut TapeShared) -> TapeStatus {
        let mut status = TapeStatus::empty();
        if !self.write_protected {
            status |= TapeStatus::WRITE_EN;
        }
        if !state.medium_loaded || state.insert_delay > 0 {
            return status | TapeStatus::CART_OUT;
        }

        let control = state.control;
        if !control.motor_on() {
            return status;
        }
        if let Some(fault) = self.check_position(state) {
            log::warn!("tape {fault}, head now at {}", state.position);
            state.diag.record_fault(fault);
            return status | TapeStatus::STALL;
        }

        let Some(absolute) = self.geometry.absolute_cell(control.track(), state.position) else {
            return status | TapeStatus::STALL;
        };
        let block = absolute / BLOCK_SIZE_CELLS_U32;
        let index = usize::try_from(absolute % BLOCK_SIZE_CELLS_U32).unwrap_or_default();

        if !state.cache.holds(block) {
            if state.last_gap {
                status |= TapeStatus::GAP;
            }
            if state.cache.post_request(block) {
                state.diag.record_miss();
            }
            return status;
        }

        if control.write_gap() {
            self.stamp(state, index, TapeCell::Gap);
            status |= TapeStatus::READY;
            state.last_gap = false;
        } else if control.write_intent() {
            let cell = match state.sequencer.step(control) {
                WriteAction::Hold => None,
                WriteAction::Sync => Some(TapeCell::Sync),
                WriteAction::Data => Some(TapeCell::Data(state.data_out)),
            };
            if let Some(cell) = cell {
                self.stamp(state, index, cell);
                status |= TapeStatus::READY;
            }
            state.last_gap = false;
        } else {
            let cell = state.cache.cell(index);
            match cell {
                TapeCell::Gap => status |= TapeStatus::GAP,
                TapeCell::Hole => status |= TapeStatus::HOLE,
                TapeCell::Data(byte) => {
                    state.data_in = byte;
                    if control.forward_normal_speed() {
                        status |= TapeStatus::READY;
                    }
                }
                TapeCell::Sync => {}
            }
            state.last_gap = cell == TapeCell::Gap;
        }

        state.position += control.step();
        if state.position & 1 != 0 {
            status |= TapeStatus::TACH;
        }
        status
    }

    /// Repairs an out-of-range head position, returning the fault it caused.
    fn check_position(&self, state: &mut TapeShared) -> Option<FaultCode> {
        let length = i32::try_from(self.geometry.track_length_cells).unwrap_or(i32::MAX);
        if state.position < 0 {
            state.position = self.safe_start();
            Some(FaultCode::PositionUnderflow)
        } else if state.position >= length {
            state.position = length - 1;
            Some(FaultCode::PositionOverrun)
        } else {
            None
        }
    }

    fn stamp(&self, state: &mut TapeShared, index: usize, cell: TapeCell) {
        if self.write_protected {
            return;
        }
        state.cache.set_cell(index, cell);
        state.flush_countdown = Some(self.flush_countdown_ticks);
    }

    pub(super) fn safe_start(&self) -> i32 {
        i32::try_from(self.geometry.safe_start_position()).unwrap_or(i32::MAX)
    }
}

impl ReadHandler for TapePorts {
    fn on_read(&self, address: u8) -> Option<u8> {
        match address {
            TAPE_STATUS_PORT => self.read_status(),
            TAPE_DATA_PORT => self.read_data(),
            _ => None,
        }
    }
}

impl WriteHandler for TapePorts {
    fn on_write(&self, address: u8, value: u8) {
        match address {
            TAPE_CONTROL_PORT => self.write_control(value),
            TAPE_DATA_PORT => self.write_data(value),
            _ => {}
        }
    }
}
