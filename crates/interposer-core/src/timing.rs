//! Background tick timing.
//!
//! The background task is polled once per tick. Every countdown in the tape
//! emulator is expressed in ticks, never in wall-clock time, so the emulator
//! stays deterministic under test.

/// Resolution of the background polling tick in milliseconds.
pub const POLL_TICK_MILLIS: u32 = 100;

/// Ticks of write inactivity before a dirty block is flushed and the
/// backing file reopened (5 s).
pub const DEFAULT_FLUSH_COUNTDOWN_TICKS: u16 = 50;

/// Ticks a freshly inserted medium reports "cartridge out" (1 s).
pub const DEFAULT_INSERT_DELAY_TICKS: u16 = 10;

/// Converts a tick count into milliseconds at [`POLL_TICK_MILLIS`].
#[must_use]
pub const fn ticks_to_millis(ticks: u16) -> u32 {
    ticks as u32 * POLL_TICK_MILLIS
}
