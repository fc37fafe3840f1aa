//! Background-task side of the tape emulator.
//!
//! [`TapeDrive`] owns the backing store and the configuration. It services
//! block misses posted by the register handlers, runs the idle flush
//! countdown and handles medium swaps. Storage failures are logged and
//! counted; the drive keeps running on whatever the cache still holds.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;

use crate::config::{BLOCK_SIZE_BYTES, BLOCK_SIZE_CELLS_U32};
use crate::{
    BackingStore, ConfigError, DiagCounters, DispatchError, DispatchTableBuilder, ReadHandler,
    StoreError, TapeConfig, WriteHandler,
};

use super::cache::DirtyBlock;
use super::ports::TapePorts;
use super::{TapeControl, WriteState, TAPE_CONTROL_PORT, TAPE_DATA_PORT, TAPE_STATUS_PORT};

/// Failures surfaced by drive setup and medium handling.
#[derive(Debug, Error)]
pub enum TapeError {
    /// The configuration is inconsistent.
    #[error("invalid tape configuration: {0}")]
    Config(#[from] ConfigError),
    /// The backing store refused an operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The ports could not be registered.
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

/// Point-in-time view of the drive state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TapeSnapshot {
    /// Handlers are live.
    pub enabled: bool,
    /// A medium image is open.
    pub medium_loaded: bool,
    /// Remaining ticks of the insertion delay.
    pub insert_delay: u16,
    /// Head position on the selected track.
    pub position: i32,
    /// Last control byte written by the host.
    pub control: TapeControl,
    /// Write sequencer state.
    pub sequencer: WriteState,
    /// Block currently resident in the cache.
    pub resident_block: Option<u32>,
    /// Block posted by the last miss and not yet serviced.
    pub pending_block: Option<u32>,
    /// Resident block has unsaved changes.
    pub dirty: bool,
    /// Remaining ticks before the idle flush, when armed.
    pub flush_countdown: Option<u16>,
}

/// Tape cartridge emulator bound to a backing store.
pub struct TapeDrive<S: BackingStore> {
    ports: Arc<TapePorts>,
    store: S,
    config: TapeConfig,
    image_path: Option<PathBuf>,
    staging: Vec<u8>,
}

impl<S: BackingStore + std::fmt::Debug> std::fmt::Debug for TapeDrive<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TapeDrive")
            .field("store", &self.store)
            .field("image_path", &self.image_path)
            .field("snapshot", &self.snapshot())
            .finish_non_exhaustive()
    }
}

impl<S: BackingStore> TapeDrive<S> {
    /// Creates a disabled drive with no medium.
    ///
    /// # Errors
    ///
    /// Returns [`TapeError::Config`] when `config` does not validate.
    pub fn new(config: TapeConfig, store: S) -> Result<Self, TapeError> {
        config.validate()?;
        Ok(Self {
            ports: Arc::new(TapePorts::new(&config)),
            store,
            config,
            image_path: None,
            staging: vec![0; BLOCK_SIZE_BYTES],
        })
    }

    /// Registers the status/control and data port handlers.
    ///
    /// # Errors
    ///
    /// Returns [`TapeError::Dispatch`] when another peripheral already owns
    /// one of the ports.
    pub fn register_ports(&self, builder: &mut DispatchTableBuilder) -> Result<(), TapeError> {
        let read: Arc<dyn ReadHandler> = self.ports.clone();
        let write: Arc<dyn WriteHandler> = self.ports.clone();
        builder.register(TAPE_STATUS_PORT, Some(read.clone()), None)?;
        builder.register(TAPE_CONTROL_PORT, None, Some(write.clone()))?;
        builder.register(TAPE_DATA_PORT, Some(read), Some(write))?;
        Ok(())
    }

    /// Register handlers shared with the dispatch table.
    #[must_use]
    pub const fn ports(&self) -> &Arc<TapePorts> {
        &self.ports
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &TapeConfig {
        &self.config
    }

    /// Backing store.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Mutable backing store, for fault injection and tooling.
    #[allow(clippy::missing_const_for_fn)]
    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    /// Path of the inserted image.
    #[must_use]
    pub fn image_path(&self) -> Option<&Path> {
        self.image_path.as_deref()
    }

    /// Copy of the diagnostic counters.
    #[must_use]
    pub fn diagnostics(&self) -> DiagCounters {
        self.ports.shared.lock(|state| state.diag)
    }

    /// Current head position.
    #[must_use]
    pub fn position(&self) -> i32 {
        self.ports.shared.lock(|state| state.position)
    }

    /// Moves the head without any motion side effects.
    pub fn set_position(&self, position: i32) {
        self.ports.shared.lock(|state| state.position = position);
    }

    /// Current drive state.
    #[must_use]
    pub fn snapshot(&self) -> TapeSnapshot {
        self.ports.shared.lock(|state| TapeSnapshot {
            enabled: state.enabled,
            medium_loaded: state.medium_loaded,
            insert_delay: state.insert_delay,
            position: state.position,
            control: state.control,
            sequencer: state.sequencer,
            resident_block: state.cache.resident(),
            pending_block: state.cache.pending(),
            dirty: state.cache.is_dirty(),
            flush_countdown: state.flush_countdown,
        })
    }

    /// Swaps in the image at `path`.
    ///
    /// The current block is flushed and the old image closed first. Cache
    /// and sequencer start over and the insertion delay is re-armed.
    ///
    /// # Errors
    ///
    /// Returns [`TapeError::Store`] when the new image cannot be opened; the
    /// drive is then left without a medium.
    pub fn insert(&mut self, path: &Path) -> Result<(), TapeError> {
        self.flush();
        self.store.close();
        self.image_path = None;
        let safe_start = self.ports.safe_start();
        let enabled = self.ports.shared.lock(|state| {
            state.medium_loaded = false;
            state.reset_medium();
            state.position = safe_start;
            state.enabled
        });

        if let Err(error) = self.store.open(path, !self.config.write_protected) {
            self.record_store_fault(&error);
            return Err(error.into());
        }
        log::info!("inserted tape image {}", path.display());
        self.image_path = Some(path.to_path_buf());
        let delay = self.config.insert_delay_ticks;
        self.ports.shared.lock(|state| {
            state.medium_loaded = true;
            state.insert_delay = delay;
        });
        if enabled {
            self.load_now(safe_start);
        }
        Ok(())
    }

    /// Flushes and closes the current image, leaving the drive empty.
    pub fn eject(&mut self) {
        self.flush();
        self.store.close();
        if let Some(path) = self.image_path.take() {
            log::info!("ejected tape image {}", path.display());
        }
        self.ports.shared.lock(|state| {
            state.medium_loaded = false;
            state.reset_medium();
        });
    }

    /// Binds or unbinds the register handlers.
    ///
    /// Enabling a disabled drive repositions the head to the safe start and
    /// loads its block before returning. Disabling flushes and closes the
    /// backing store.
    ///
    /// # Errors
    ///
    /// Returns [`TapeError::Store`] when re-enabling cannot reopen the
    /// inserted image.
    pub fn enable(&mut self, on: bool) -> Result<(), TapeError> {
        let was_enabled = self.ports.shared.lock(|state| state.enabled);
        if !on {
            self.ports.shared.lock(|state| state.enabled = false);
            if was_enabled {
                self.flush();
                self.store.close();
                log::debug!("tape drive disabled");
            }
            return Ok(());
        }
        if was_enabled {
            return Ok(());
        }

        if let Some(path) = self.image_path.clone() {
            if !self.store.is_open() {
                if let Err(error) = self.store.open(&path, !self.config.write_protected) {
                    self.record_store_fault(&error);
                    return Err(error.into());
                }
            }
        }
        let safe_start = self.ports.safe_start();
        let delay = self.config.insert_delay_ticks;
        let loaded = self.ports.shared.lock(|state| {
            state.enabled = true;
            state.position = safe_start;
            state.sequencer = WriteState::NoWrite;
            state.last_gap = false;
            if state.medium_loaded {
                state.insert_delay = delay;
            }
            state.medium_loaded
        });
        if loaded {
            self.load_now(safe_start);
        }
        log::debug!("tape drive enabled, head at {safe_start}");
        Ok(())
    }

    /// One background tick.
    ///
    /// Counts down the insertion delay, services a pending block request and
    /// runs the idle flush countdown.
    pub fn poll(&mut self) {
        let (pending, expired) = self.ports.shared.lock(|state| {
            state.insert_delay = state.insert_delay.saturating_sub(1);
            let expired = match state.flush_countdown {
                Some(ticks) if ticks <= 1 => {
                    state.flush_countdown = None;
                    true
                }
                Some(ticks) => {
                    state.flush_countdown = Some(ticks - 1);
                    false
                }
                None => false,
            };
            (state.cache.pending(), expired)
        });

        if let Some(block) = pending {
            self.service_request(block);
        }
        if expired {
            self.flush_and_reopen();
        }
    }

    /// Writes the resident block back when it is dirty.
    pub fn flush(&mut self) {
        if let Some(dirty) = self.ports.shared.lock(|state| state.cache.take_dirty()) {
            self.write_back(&dirty);
        }
    }

    fn load_now(&mut self, position: i32) {
        let track = self.ports.shared.lock(|state| state.control.track());
        let Some(absolute) = self.config.geometry.absolute_cell(track, position) else {
            return;
        };
        let block = absolute / BLOCK_SIZE_CELLS_U32;
        self.ports.shared.lock(|state| state.cache.post_request(block));
        self.service_request(block);
    }

    /// Write-before-load block swap. Storage I/O runs outside the critical
    /// section; only the snapshot and the install take the lock.
    fn service_request(&mut self, block: u32) {
        if let Some(dirty) = self.ports.shared.lock(|state| state.cache.take_dirty()) {
            self.write_back(&dirty);
        }

        let loaded = self.read_block(block);
        let staging = &self.staging;
        let late = self.ports.shared.lock(|state| {
            let late = state.cache.take_dirty();
            state.cache.install(block, &staging[..loaded.unwrap_or(0)]);
            if loaded.is_some() {
                state.diag.record_load();
            }
            late
        });
        if let Some(dirty) = late {
            self.write_back(&dirty);
        }
    }

    fn read_block(&mut self, block: u32) -> Option<usize> {
        let offset = u64::from(block) * BLOCK_SIZE_BYTES as u64;
        let result = self
            .store
            .seek(offset)
            .and_then(|()| self.store.read(&mut self.staging));
        match result {
            Ok(len) => {
                if len < BLOCK_SIZE_BYTES {
                    log::info!("short read of block {block}: {len} of {BLOCK_SIZE_BYTES} bytes");
                }
                Some(len)
            }
            Err(error) => {
                log::error!("loading block {block} failed, keeping stale cells: {error}");
                self.record_store_fault(&error);
                None
            }
        }
    }

    fn write_back(&mut self, dirty: &DirtyBlock) {
        let offset = u64::from(dirty.block) * BLOCK_SIZE_BYTES as u64;
        if let Err(error) = self.store.seek(offset) {
            log::error!("skipping write-back of block {}: {error}", dirty.block);
            self.record_store_fault(&error);
            return;
        }
        match self.store.write(&dirty.bytes) {
            Ok(()) => self.ports.shared.lock(|state| state.diag.record_flush()),
            Err(error) => {
                log::error!("write-back of block {} failed: {error}", dirty.block);
                self.record_store_fault(&error);
            }
        }
    }

    fn flush_and_reopen(&mut self) {
        let Some(path) = self.image_path.clone() else {
            return;
        };
        if !self.store.is_open() {
            return;
        }
        self.flush();
        self.store.close();
        match self.store.open(&path, !self.config.write_protected) {
            Ok(()) => {
                log::debug!("idle flush reopened {}", path.display());
                self.ports.shared.lock(|state| state.diag.record_reopen());
            }
            Err(error) => {
                log::error!("reopening {} failed: {error}", path.display());
                self.record_store_fault(&error);
            }
        }
    }

    fn record_store_fault(&self, error: &StoreError) {
        let code = error.fault_code();
        self.ports.shared.lock(|state| state.diag.record_fault(code));
    }
}

#[cfg(test)]
mod tests {
    use super::{TapeDrive, TapeError};
    use crate::tape::format_blank_image;
    use crate::{
        BackingStore, ConfigError, DispatchTableBuilder, MemoryStore, StoreOp, TapeCell,
        TapeConfig, TapeControl, TapeGeometry, TapeStatus, TAPE_DATA_PORT,
    };
    use std::path::Path;

    fn config() -> TapeConfig {
        TapeConfig {
            insert_delay_ticks: 0,
            ..TapeConfig::default()
        }
    }

    fn ready_drive() -> TapeDrive<MemoryStore> {
        let image = format_blank_image(&TapeGeometry::default());
        let mut drive = TapeDrive::new(config(), MemoryStore::new(image)).expect("drive");
        drive.insert(Path::new("blank.tape")).expect("insert");
        drive.enable(true).expect("enable");
        drive
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = TapeConfig {
            flush_countdown_ticks: 0,
            ..TapeConfig::default()
        };
        let error = TapeDrive::new(config, MemoryStore::default()).expect_err("zero countdown");
        assert!(matches!(
            error,
            TapeError::Config(ConfigError::ZeroFlushCountdown)
        ));
    }

    #[test]
    fn enable_loads_safe_start_block_synchronously() {
        let drive = ready_drive();
        let snapshot = drive.snapshot();
        assert_eq!(snapshot.position, 1024);
        assert_eq!(snapshot.resident_block, Some(1));
        assert_eq!(snapshot.pending_block, None);
        assert_eq!(drive.diagnostics().block_loads, 1);
        assert_eq!(
            drive.store().journal().last(),
            Some(&StoreOp::Read {
                offset: 2048,
                len: 2048
            })
        );
    }

    #[test]
    fn disabled_drive_is_invisible_on_the_bus() {
        let mut drive = ready_drive();
        drive.enable(false).expect("disable");
        assert_eq!(drive.ports().read_status(), None);
        drive.ports().write_data(0x11);
        drive.ports().write_control(TapeControl::MOTOR_ON.bits());
        assert_eq!(drive.snapshot().control, TapeControl::empty());
        assert!(!drive.store().is_open());
    }

    #[test]
    fn insertion_delay_reports_cartridge_out() {
        let image = format_blank_image(&TapeGeometry::default());
        let config = TapeConfig {
            insert_delay_ticks: 2,
            ..TapeConfig::default()
        };
        let mut drive = TapeDrive::new(config, MemoryStore::new(image)).expect("drive");
        drive.enable(true).expect("enable");
        let status = TapeStatus::from_bits_retain(drive.ports().read_status().expect("status"));
        assert!(status.contains(TapeStatus::CART_OUT));

        drive.insert(Path::new("blank.tape")).expect("insert");
        for _ in 0..2 {
            let status = drive.ports().read_status().expect("status");
            assert!(TapeStatus::from_bits_retain(status).contains(TapeStatus::CART_OUT));
            drive.poll();
        }
        let status = drive.ports().read_status().expect("status");
        assert!(!TapeStatus::from_bits_retain(status).contains(TapeStatus::CART_OUT));
    }

    #[test]
    fn write_protect_clears_write_enable_and_blocks_stamps() {
        let image = format_blank_image(&TapeGeometry::default());
        let config = TapeConfig {
            write_protected: true,
            ..config()
        };
        let mut drive = TapeDrive::new(config, MemoryStore::new(image)).expect("drive");
        drive.insert(Path::new("blank.tape")).expect("insert");
        drive.enable(true).expect("enable");

        let ports = drive.ports().clone();
        ports.write_control(
            (TapeControl::MOTOR_ON | TapeControl::DIR_FWD | TapeControl::WRITE_GAP).bits(),
        );
        let status = TapeStatus::from_bits_retain(ports.read_status().expect("status"));
        assert!(!status.contains(TapeStatus::WRITE_EN));
        assert!(status.contains(TapeStatus::READY));
        assert!(!drive.snapshot().dirty);
        assert_eq!(drive.snapshot().position, 1025);
    }

    #[test]
    fn underflow_stalls_and_recovers_to_safe_start() {
        let drive = ready_drive();
        drive.set_position(-1);
        drive
            .ports()
            .write_control((TapeControl::MOTOR_ON | TapeControl::DIR_FWD).bits());
        let status = TapeStatus::from_bits_retain(drive.ports().read_status().expect("status"));
        assert!(status.contains(TapeStatus::STALL));
        assert_eq!(drive.position(), 1024);
        assert_eq!(drive.diagnostics().position_faults, 1);

        let status = TapeStatus::from_bits_retain(drive.ports().read_status().expect("status"));
        assert!(!status.contains(TapeStatus::STALL));
        assert_eq!(drive.position(), 1025);
    }

    #[test]
    fn overrun_clamps_to_last_cell() {
        let drive = ready_drive();
        drive.set_position(0x2_0000);
        drive.ports().write_control(TapeControl::MOTOR_ON.bits());
        let status = TapeStatus::from_bits_retain(drive.ports().read_status().expect("status"));
        assert!(status.contains(TapeStatus::STALL));
        assert_eq!(drive.position(), 0x1_FFFF);
    }

    #[test]
    fn data_port_reads_the_last_data_cell() {
        let mut image = format_blank_image(&TapeGeometry::default());
        let offset = 1024 * 2;
        image[offset..offset + 2].copy_from_slice(&TapeCell::Data(0xC3).to_le_bytes());
        let mut drive = TapeDrive::new(config(), MemoryStore::new(image)).expect("drive");
        drive.insert(Path::new("data.tape")).expect("insert");
        drive.enable(true).expect("enable");

        drive
            .ports()
            .write_control((TapeControl::MOTOR_ON | TapeControl::DIR_FWD).bits());
        let status = TapeStatus::from_bits_retain(drive.ports().read_status().expect("status"));
        assert!(status.contains(TapeStatus::READY));
        assert_eq!(drive.ports().read_data(), Some(0xC3));
    }

    #[test]
    fn ports_register_once_and_conflicts_are_reported() {
        let drive = ready_drive();
        let mut builder = DispatchTableBuilder::new();
        drive.register_ports(&mut builder).expect("first registration");
        assert!(matches!(
            drive.register_ports(&mut builder),
            Err(TapeError::Dispatch(_))
        ));
        let table = builder.seal();
        assert!(table.dispatch_read(TAPE_DATA_PORT).is_some());
    }

    #[test]
    fn eject_leaves_cartridge_out() {
        let mut drive = ready_drive();
        drive.eject();
        assert_eq!(drive.image_path(), None);
        let status = TapeStatus::from_bits_retain(drive.ports().read_status().expect("status"));
        assert!(status.contains(TapeStatus::CART_OUT));
    }
}
