use std::path::Path;
use std::sync::Arc;

use interposer_core::{
    BackingStore, BusArbiter, BusCycleDecoder, BusResponse, DiagCounters, DispatchTableBuilder,
    InterposerConfig, TapeControl, TapeDrive, TapeStatus, TAPE_CONTROL_PORT, TAPE_DATA_PORT,
    TAPE_STATUS_PORT,
};

use crate::ToolError;

const FORWARD: TapeControl = TapeControl::MOTOR_ON
    .union(TapeControl::DIR_FWD)
    .union(TapeControl::POWER_UP);
const RECORD: TapeControl = FORWARD
    .union(TapeControl::WRITE_SYNC)
    .union(TapeControl::WRITE_DATA);

/// Status reads allowed while waiting for one cell to become ready.
pub const READY_CYCLE_LIMIT: usize = 64;

/// Cells scanned for a sync marker before giving up.
pub const SYNC_SEARCH_CELLS: usize = 4096;

/// Host side of the bus: a drive wired into a sealed dispatch table and a
/// decoder, with the background task stepped inline whenever a status read
/// misses the cache.
pub struct HostSession<S: BackingStore> {
    decoder: BusCycleDecoder,
    drive: TapeDrive<S>,
}

impl<S: BackingStore> HostSession<S> {
    /// Inserts `image`, enables the drive and waits out the insertion delay.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Tape`] when the drive cannot be built or the image
    /// cannot be opened.
    pub fn open(config: &InterposerConfig, store: S, image: &Path) -> Result<Self, ToolError> {
        let mut drive = TapeDrive::new(config.tape, store)?;
        let mut builder = DispatchTableBuilder::new();
        drive.register_ports(&mut builder)?;
        drive.insert(image)?;
        drive.enable(true)?;
        let decoder = BusCycleDecoder::new(builder.seal(), Arc::new(BusArbiter::new()));
        let mut session = Self { decoder, drive };

        let ticks = usize::from(config.tape.insert_delay_ticks);
        for _ in 0..=ticks {
            if !session.status()?.contains(TapeStatus::CART_OUT) {
                return Ok(session);
            }
            session.drive.poll();
        }
        Err(ToolError::NeverReady { cycles: ticks + 1 })
    }

    /// The drive behind the session.
    #[must_use]
    pub const fn drive(&self) -> &TapeDrive<S> {
        &self.drive
    }

    /// Writes a sync cell followed by `payload` at the current head position.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NeverReady`] when a cell never commits.
    pub fn record(&mut self, payload: &[u8]) -> Result<(), ToolError> {
        log::info!(
            "recording {} bytes at cell {}",
            payload.len(),
            self.drive.position()
        );
        self.control(RECORD)?;
        self.wait_ready()?;
        for &byte in payload {
            self.write(TAPE_DATA_PORT, byte)?;
            self.wait_ready()?;
        }
        self.control(TapeControl::POWER_UP)
    }

    /// Scans forward for a sync cell and reads up to `len` data bytes after
    /// it. Reading stops early at the first non-data cell.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NoRecord`] when no sync cell is found.
    pub fn play(&mut self, len: usize) -> Result<Vec<u8>, ToolError> {
        self.control(FORWARD)?;
        let mut found = false;
        for _ in 0..SYNC_SEARCH_CELLS {
            if is_sync(self.step()?) {
                found = true;
                break;
            }
        }
        if !found {
            self.control(TapeControl::POWER_UP)?;
            return Err(ToolError::NoRecord {
                cells: SYNC_SEARCH_CELLS,
            });
        }

        let mut bytes = Vec::with_capacity(len);
        while bytes.len() < len {
            if !self.step()?.contains(TapeStatus::READY) {
                log::warn!("record ended after {} of {len} bytes", bytes.len());
                break;
            }
            bytes.push(self.read(TAPE_DATA_PORT)?);
        }
        self.control(TapeControl::POWER_UP)?;
        Ok(bytes)
    }

    /// Disables the drive, flushing any dirty block, and returns the final
    /// diagnostic counters.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::Tape`] when the drive refuses to disable.
    pub fn close(mut self) -> Result<DiagCounters, ToolError> {
        self.drive.enable(false)?;
        Ok(self.drive.diagnostics())
    }

    /// One serviced status read. Misses are resolved by stepping the
    /// background task and re-reading the same cell.
    fn step(&mut self) -> Result<TapeStatus, ToolError> {
        for _ in 0..READY_CYCLE_LIMIT {
            let status = self.status()?;
            if self.drive.snapshot().pending_block.is_none() {
                return Ok(status);
            }
            self.drive.poll();
        }
        Err(ToolError::NeverReady {
            cycles: READY_CYCLE_LIMIT,
        })
    }

    fn wait_ready(&mut self) -> Result<TapeStatus, ToolError> {
        for _ in 0..READY_CYCLE_LIMIT {
            let status = self.step()?;
            if status.contains(TapeStatus::READY) {
                return Ok(status);
            }
        }
        Err(ToolError::NeverReady {
            cycles: READY_CYCLE_LIMIT,
        })
    }

    fn status(&mut self) -> Result<TapeStatus, ToolError> {
        self.read(TAPE_STATUS_PORT).map(TapeStatus::from_bits_retain)
    }

    fn control(&mut self, control: TapeControl) -> Result<(), ToolError> {
        self.write(TAPE_CONTROL_PORT, control.bits())
    }

    fn read(&mut self, port: u8) -> Result<u8, ToolError> {
        match self.decoder.read(port) {
            BusResponse::Data(byte) => Ok(byte),
            _ => Err(ToolError::Unserviced { port }),
        }
    }

    fn write(&mut self, port: u8, value: u8) -> Result<(), ToolError> {
        match self.decoder.write(port, value) {
            BusResponse::Accepted => Ok(()),
            _ => Err(ToolError::Unserviced { port }),
        }
    }
}

fn is_sync(status: TapeStatus) -> bool {
    !status.intersects(
        TapeStatus::GAP
            | TapeStatus::HOLE
            | TapeStatus::READY
            | TapeStatus::STALL
            | TapeStatus::CART_OUT,
    )
}

#[cfg(test)]
mod tests {
    use super::HostSession;
    use crate::ToolError;
    use interposer_core::{format_blank_image, InterposerConfig, MemoryStore, TapeGeometry};
    use std::path::Path;

    fn session(config: &InterposerConfig) -> HostSession<MemoryStore> {
        let store = MemoryStore::new(format_blank_image(&TapeGeometry::default()));
        HostSession::open(config, store, Path::new("tape.img")).expect("session")
    }

    #[test]
    fn open_waits_out_insertion_delay() {
        let config = InterposerConfig::default();
        let session = session(&config);
        assert_eq!(session.drive().snapshot().insert_delay, 0);
        assert!(session.drive().snapshot().enabled);
    }

    #[test]
    fn closing_after_record_flushes_once() {
        let config = InterposerConfig::default();
        let mut writer = session(&config);
        writer.record(b"tape").expect("record");
        let counters = writer.close().expect("close");
        assert_eq!(counters.block_flushes, 1);
    }

    #[test]
    fn record_across_a_block_boundary_is_read_back() {
        let config = InterposerConfig::default();
        let mut session = session(&config);
        let payload: Vec<u8> = (0..=255).cycle().take(1500).collect();
        session.record(&payload).expect("record");
        assert!(session.drive().diagnostics().block_misses >= 1);

        session.drive.set_position(1024);
        let read = session.play(payload.len()).expect("play");
        assert_eq!(read, payload);
    }

    #[test]
    fn blank_tape_has_no_record() {
        let config = InterposerConfig::default();
        let mut session = session(&config);
        assert!(matches!(
            session.play(4),
            Err(ToolError::NoRecord { .. })
        ));
    }

    #[test]
    fn play_stops_at_end_of_record() {
        let config = InterposerConfig::default();
        let mut session = session(&config);
        session.record(&[1, 2, 3]).expect("record");
        session.drive.set_position(1024);
        assert_eq!(session.play(10).expect("play"), vec![1, 2, 3]);
    }
}
