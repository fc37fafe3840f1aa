//! Interposer configuration with defaults and validation.
//!
//! Configuration is immutable once a component is built from it. Loading and
//! persisting it is left to the host; enabling the `serde` feature derives
//! the (de)serialization needed for that.

use std::time::Duration;

use thiserror::Error;

use crate::timing::{DEFAULT_FLUSH_COUNTDOWN_TICKS, DEFAULT_INSERT_DELAY_TICKS};

/// Cells per resident cache block, as a cell-index type.
pub const BLOCK_SIZE_CELLS_U32: u32 = 1024;

/// Cells per resident cache block.
pub const BLOCK_SIZE_CELLS: usize = BLOCK_SIZE_CELLS_U32 as usize;

/// Largest image, in cells, a geometry may describe (32 MiB of packed cells).
pub const MAX_IMAGE_CELLS: u32 = 0x0100_0000;

/// Bytes per packed cell in the backing image.
pub const CELL_BYTES: usize = 2;

/// Bytes per block in the backing image.
pub const BLOCK_SIZE_BYTES: usize = BLOCK_SIZE_CELLS * CELL_BYTES;

const DEFAULT_TRACK_LENGTH_CELLS: u32 = 0x2_0000;
const DEFAULT_FIRST_HOLE_CELL: u32 = 256;
const DEFAULT_HOLE_LENGTH_CELLS: u32 = 32;
const DEFAULT_HOLE_CLEARANCE_CELLS: u32 = 736;

/// Physical layout of the emulated medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TapeGeometry {
    /// Usable cells per track.
    pub track_length_cells: u32,
    /// Absolute cell index at which track 1 starts in the image.
    pub track_offset_cells: u32,
    /// First cell of the leading hole marker on each track.
    pub first_hole_cell: u32,
    /// Length of each hole marker run.
    pub hole_length_cells: u32,
    /// Cells between the end of the leading hole and the safe start.
    pub hole_clearance_cells: u32,
}

impl Default for TapeGeometry {
    fn default() -> Self {
        Self {
            track_length_cells: DEFAULT_TRACK_LENGTH_CELLS,
            track_offset_cells: DEFAULT_TRACK_LENGTH_CELLS,
            first_hole_cell: DEFAULT_FIRST_HOLE_CELL,
            hole_length_cells: DEFAULT_HOLE_LENGTH_CELLS,
            hole_clearance_cells: DEFAULT_HOLE_CLEARANCE_CELLS,
        }
    }
}

impl TapeGeometry {
    /// Head position the drive starts at and recovers to after a fault.
    ///
    /// Saturates at `u32::MAX`; [`TapeGeometry::validate`] rejects any
    /// geometry where that happens.
    #[must_use]
    pub const fn safe_start_position(&self) -> u32 {
        self.first_hole_cell
            .saturating_add(self.hole_length_cells)
            .saturating_add(self.hole_clearance_cells)
    }

    /// Absolute cell index of `position` on `track`, or `None` when the
    /// position lies outside the track.
    #[must_use]
    pub const fn absolute_cell(&self, track: u8, position: i32) -> Option<u32> {
        if position < 0 {
            return None;
        }
        let position = position.unsigned_abs();
        if position >= self.track_length_cells {
            return None;
        }
        let base = if track == 0 {
            0
        } else {
            self.track_offset_cells
        };
        base.checked_add(position)
    }

    /// Total cells spanned by the image, including any inter-track padding.
    ///
    /// Saturates at `u32::MAX` for geometries that [`TapeGeometry::validate`]
    /// rejects.
    #[must_use]
    pub const fn image_cells(&self) -> u32 {
        self.track_offset_cells.saturating_add(self.track_length_cells)
    }

    /// Total image length in bytes.
    #[must_use]
    pub const fn image_len_bytes(&self) -> u64 {
        self.image_cells() as u64 * CELL_BYTES as u64
    }

    /// Number of blocks needed to cover the image.
    #[must_use]
    pub const fn block_count(&self) -> u32 {
        self.image_cells().div_ceil(BLOCK_SIZE_CELLS_U32)
    }

    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] describing the first violated constraint.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.track_length_cells == 0 {
            return Err(ConfigError::EmptyTrack);
        }
        if self.track_length_cells > i32::MAX.unsigned_abs() {
            return Err(ConfigError::TrackTooLong {
                cells: self.track_length_cells,
            });
        }
        if self.track_offset_cells < self.track_length_cells {
            return Err(ConfigError::OverlappingTracks {
                offset: self.track_offset_cells,
                length: self.track_length_cells,
            });
        }
        let fits = matches!(
            self.track_offset_cells.checked_add(self.track_length_cells),
            Some(cells) if cells <= MAX_IMAGE_CELLS
        );
        if !fits {
            return Err(ConfigError::ImageTooLarge {
                offset: self.track_offset_cells,
                length: self.track_length_cells,
            });
        }
        let safe = self.safe_start_position();
        let beyond = match safe.checked_add(self.hole_length_cells) {
            Some(end) => end >= self.track_length_cells,
            None => true,
        };
        if beyond {
            return Err(ConfigError::SafeStartBeyondTrack {
                safe_start: safe,
                length: self.track_length_cells,
            });
        }
        Ok(())
    }
}

/// Tape emulator configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TapeConfig {
    /// Medium layout.
    pub geometry: TapeGeometry,
    /// Background ticks a newly inserted medium reports "cartridge out".
    pub insert_delay_ticks: u16,
    /// Background ticks of write inactivity before a flush and reopen.
    pub flush_countdown_ticks: u16,
    /// Clears WRITE_EN and suppresses all medium mutations when set.
    pub write_protected: bool,
}

impl Default for TapeConfig {
    fn default() -> Self {
        Self {
            geometry: TapeGeometry::default(),
            insert_delay_ticks: DEFAULT_INSERT_DELAY_TICKS,
            flush_countdown_ticks: DEFAULT_FLUSH_COUNTDOWN_TICKS,
            write_protected: false,
        }
    }
}

impl TapeConfig {
    /// Checks internal consistency.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] when the geometry is inconsistent or the
    /// flush countdown is zero.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_countdown_ticks == 0 {
            return Err(ConfigError::ZeroFlushCountdown);
        }
        self.geometry.validate()
    }
}

/// Policy knobs for the arbitration and busy-poll spins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ArbitrationConfig {
    /// Upper bound on any single spin, in microseconds. `None` spins forever,
    /// matching the hardware handshake.
    pub wait_deadline_micros: Option<u64>,
}

impl ArbitrationConfig {
    /// Returns the configured deadline as a [`Duration`].
    #[must_use]
    pub const fn wait_deadline(&self) -> Option<Duration> {
        match self.wait_deadline_micros {
            Some(micros) => Some(Duration::from_micros(micros)),
            None => None,
        }
    }
}

/// Top-level immutable configuration for an interposer instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct InterposerConfig {
    /// Tape emulator settings.
    pub tape: TapeConfig,
    /// Arbitration spin policy.
    pub arbitration: ArbitrationConfig,
}

impl InterposerConfig {
    /// Checks every section.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        self.tape.validate()
    }
}

/// Configuration consistency failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ConfigError {
    /// Track length is zero.
    #[error("track length must be non-zero")]
    EmptyTrack,
    /// Track length does not fit a signed head position.
    #[error("track length {cells} exceeds the signed position range")]
    TrackTooLong {
        /// Configured track length.
        cells: u32,
    },
    /// Track 1 would overlap track 0 in the image.
    #[error("track offset {offset} is smaller than track length {length}")]
    OverlappingTracks {
        /// Configured inter-track offset.
        offset: u32,
        /// Configured track length.
        length: u32,
    },
    /// Track 1 would end past the largest supported image.
    #[error("track offset {offset} plus track length {length} exceeds the image limit")]
    ImageTooLarge {
        /// Configured inter-track offset.
        offset: u32,
        /// Configured track length.
        length: u32,
    },
    /// The safe start plus the trailing hole does not fit in the track.
    #[error("safe start {safe_start} leaves no room on a {length}-cell track")]
    SafeStartBeyondTrack {
        /// Computed safe start position.
        safe_start: u32,
        /// Configured track length.
        length: u32,
    },
    /// A zero countdown would flush on every tick.
    #[error("flush countdown must be at least one tick")]
    ZeroFlushCountdown,
}

#[cfg(test)]
mod tests {
    use super::{
        ArbitrationConfig, ConfigError, InterposerConfig, TapeConfig, TapeGeometry,
        BLOCK_SIZE_BYTES, MAX_IMAGE_CELLS,
    };
    use rstest::rstest;
    use std::time::Duration;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(InterposerConfig::default().validate(), Ok(()));
    }

    #[test]
    fn default_safe_start_lands_on_second_block() {
        let geometry = TapeGeometry::default();
        assert_eq!(geometry.safe_start_position(), 1024);
    }

    #[test]
    fn image_size_covers_both_tracks() {
        let geometry = TapeGeometry::default();
        assert_eq!(geometry.image_len_bytes(), 2 * 0x2_0000 * 2);
        assert_eq!(
            u64::from(geometry.block_count()) * BLOCK_SIZE_BYTES as u64,
            geometry.image_len_bytes()
        );
    }

    #[test]
    fn absolute_cell_applies_track_offset() {
        let geometry = TapeGeometry::default();
        assert_eq!(geometry.absolute_cell(0, 10), Some(10));
        assert_eq!(geometry.absolute_cell(1, 10), Some(0x2_0000 + 10));
        assert_eq!(geometry.absolute_cell(0, -1), None);
        assert_eq!(geometry.absolute_cell(1, 0x2_0000), None);
    }

    #[test]
    fn overlapping_tracks_are_rejected() {
        let geometry = TapeGeometry {
            track_offset_cells: 100,
            ..TapeGeometry::default()
        };
        assert!(matches!(
            geometry.validate(),
            Err(ConfigError::OverlappingTracks { .. })
        ));
    }

    #[test]
    fn safe_start_must_fit_on_track() {
        let geometry = TapeGeometry {
            track_length_cells: 1000,
            track_offset_cells: 1000,
            ..TapeGeometry::default()
        };
        assert!(matches!(
            geometry.validate(),
            Err(ConfigError::SafeStartBeyondTrack { .. })
        ));
    }

    #[rstest]
    #[case::wrapping_offset(u32::MAX - 10)]
    #[case::offset_at_limit(MAX_IMAGE_CELLS)]
    fn oversized_track_offset_is_rejected(#[case] offset: u32) {
        let geometry = TapeGeometry {
            track_offset_cells: offset,
            ..TapeGeometry::default()
        };
        assert!(matches!(
            geometry.validate(),
            Err(ConfigError::ImageTooLarge { .. })
        ));
        assert!(geometry.image_cells() >= offset);
    }

    #[test]
    fn wrapping_track_one_cell_is_out_of_range() {
        let geometry = TapeGeometry {
            track_offset_cells: u32::MAX - 10,
            ..TapeGeometry::default()
        };
        assert_eq!(geometry.absolute_cell(0, 100), Some(100));
        assert_eq!(geometry.absolute_cell(1, 5), Some(u32::MAX - 5));
        assert_eq!(geometry.absolute_cell(1, 100), None);
        assert_eq!(geometry.image_cells(), u32::MAX);
    }

    #[rstest]
    #[case::first_hole(TapeGeometry { first_hole_cell: u32::MAX - 10, ..TapeGeometry::default() })]
    #[case::hole_length(TapeGeometry { hole_length_cells: u32::MAX - 10, ..TapeGeometry::default() })]
    #[case::clearance(TapeGeometry { hole_clearance_cells: u32::MAX, ..TapeGeometry::default() })]
    fn wrapping_safe_start_is_rejected(#[case] geometry: TapeGeometry) {
        assert_eq!(geometry.safe_start_position(), u32::MAX);
        assert!(matches!(
            geometry.validate(),
            Err(ConfigError::SafeStartBeyondTrack { .. })
        ));
    }

    #[test]
    fn zero_flush_countdown_is_rejected() {
        let config = TapeConfig {
            flush_countdown_ticks: 0,
            ..TapeConfig::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::ZeroFlushCountdown));
    }

    #[test]
    fn arbitration_deadline_converts_to_duration() {
        assert_eq!(ArbitrationConfig::default().wait_deadline(), None);
        let bounded = ArbitrationConfig {
            wait_deadline_micros: Some(250),
        };
        assert_eq!(bounded.wait_deadline(), Some(Duration::from_micros(250)));
    }
}
