//! Virtual tape cartridge.
//!
//! The emulator is split along the two execution contexts: [`TapePorts`]
//! holds the register handlers that run on every host cycle, and
//! [`TapeDrive`] is the background task that owns the backing store.

mod cache;
mod cell;
mod drive;
mod image;
mod ports;
mod regs;
mod sequencer;

pub use cache::{BlockCache, DirtyBlock};
pub use cell::{TapeCell, CELL_DATA, CELL_GAP, CELL_HOLE, CELL_PAYLOAD_MASK, CELL_SYNC};
pub use drive::{TapeDrive, TapeError, TapeSnapshot};
pub use image::{decode_cells, format_blank_image, BlockSummary};
pub use ports::TapePorts;
pub use regs::{TapeControl, TapeStatus};
pub use sequencer::{WriteAction, WriteState};

/// Status register (read side of the shared port).
pub const TAPE_STATUS_PORT: u8 = 0x08;
/// Control register (write side of the shared port).
pub const TAPE_CONTROL_PORT: u8 = 0x08;
/// Data latch, readable and writable.
pub const TAPE_DATA_PORT: u8 = 0x09;
