//! Core firmware crate for the bus interposer.
//!
//! Provides the peripheral dispatch table, the shared-bus arbitration
//! handshake with its safe-access helpers, and the virtual tape cartridge
//! emulator that sits behind the dispatch table.

/// Fault taxonomy types for storage, head-position and arbitration faults.
pub mod fault;
pub use fault::{FaultClass, FaultCode};

/// Saturating diagnostic counters.
pub mod diag;
pub use diag::DiagCounters;

/// Background tick constants and conversions.
pub mod timing;
pub use timing::{
    ticks_to_millis, DEFAULT_FLUSH_COUNTDOWN_TICKS, DEFAULT_INSERT_DELAY_TICKS, POLL_TICK_MILLIS,
};

/// Top-level configuration with defaults and validation.
pub mod config;
pub use config::{
    ArbitrationConfig, ConfigError, InterposerConfig, TapeConfig, TapeGeometry, BLOCK_SIZE_CELLS,
    CELL_BYTES, MAX_IMAGE_CELLS,
};

/// Critical-section cell for state shared with the interrupt context.
pub mod irq;
pub use irq::IrqMutex;

/// Fixed 256-entry peripheral dispatch table.
pub mod dispatch;
pub use dispatch::{
    DispatchError, DispatchTable, DispatchTableBuilder, HandlerKind, ReadHandler, WriteHandler,
    DISPATCH_ADDRESSES,
};

/// Request/grant handshake for bus-mastered cycles.
pub mod arbitration;
pub use arbitration::{
    ArbitrationError, ArbitrationState, BusArbiter, BusGrant, GrantTransition, WaitPolicy,
    WaitTarget,
};

/// Host bus cycles, the bus-cycle decoder and instrumentation hooks.
pub mod bus;
pub use bus::{BusCycle, BusCycleDecoder, BusEvent, BusMaster, BusResponse, BusTraceSink};

/// Busy-aware bus-mastered transfers.
pub mod safe_access;
pub use safe_access::{BusyProbe, SafeAccess};

/// Backing-store collaborator for tape images.
pub mod store;
pub use store::{BackingStore, FileStore, MemoryStore, StoreError, StoreOp};

/// Virtual tape cartridge emulation.
pub mod tape;
pub use tape::{
    format_blank_image, BlockCache, BlockSummary, TapeCell, TapeControl, TapeDrive, TapeError,
    TapePorts, TapeSnapshot, TapeStatus, WriteAction, WriteState, TAPE_CONTROL_PORT,
    TAPE_DATA_PORT, TAPE_STATUS_PORT,
};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
#[cfg(test)]
use tempfile as _;
