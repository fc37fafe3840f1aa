//! Blank-image formatting and block inspection.

use crate::config::{TapeGeometry, BLOCK_SIZE_BYTES, CELL_BYTES};

use super::TapeCell;

/// Builds a blank medium image for `geometry`.
///
/// Every cell is a gap except two hole runs per track: one at
/// `first_hole_cell` and one ending at the last cell of the track.
#[must_use]
pub fn format_blank_image(geometry: &TapeGeometry) -> Vec<u8> {
    let cells = geometry.image_cells() as usize;
    let mut image = Vec::with_capacity(cells * CELL_BYTES);
    for _ in 0..cells {
        image.extend_from_slice(&TapeCell::Gap.to_le_bytes());
    }

    let length = geometry.track_length_cells as usize;
    let hole = geometry.hole_length_cells as usize;
    for base in [0, geometry.track_offset_cells as usize] {
        let leading = base + geometry.first_hole_cell as usize;
        let trailing = base + length.saturating_sub(hole);
        for start in [leading, trailing] {
            stamp_run(&mut image, start, hole, TapeCell::Hole);
        }
    }
    image
}

fn stamp_run(image: &mut [u8], start: usize, len: usize, cell: TapeCell) {
    let bytes = cell.to_le_bytes();
    for index in start..start + len {
        let offset = index * CELL_BYTES;
        if let Some(slot) = image.get_mut(offset..offset + CELL_BYTES) {
            slot.copy_from_slice(&bytes);
        }
    }
}

/// Decodes packed cells, ignoring a trailing odd byte.
#[must_use]
pub fn decode_cells(bytes: &[u8]) -> Vec<TapeCell> {
    bytes
        .chunks_exact(CELL_BYTES)
        .map(|pair| TapeCell::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// Cell census of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct BlockSummary {
    /// Block number.
    pub block: u32,
    /// Gap cells.
    pub gaps: u32,
    /// Sync cells.
    pub syncs: u32,
    /// Data cells.
    pub data: u32,
    /// Hole cells.
    pub holes: u32,
}

impl BlockSummary {
    /// Counts the cell kinds in block `block` of `image`.
    ///
    /// Returns `None` when the block starts past the end of the image.
    #[must_use]
    pub fn of(image: &[u8], block: u32) -> Option<Self> {
        let start = block as usize * BLOCK_SIZE_BYTES;
        if start >= image.len() {
            return None;
        }
        let end = (start + BLOCK_SIZE_BYTES).min(image.len());
        let mut summary = Self {
            block,
            ..Self::default()
        };
        for cell in decode_cells(&image[start..end]) {
            match cell {
                TapeCell::Gap => summary.gaps += 1,
                TapeCell::Sync => summary.syncs += 1,
                TapeCell::Data(_) => summary.data += 1,
                TapeCell::Hole => summary.holes += 1,
            }
        }
        Some(summary)
    }

    /// `true` when the block holds only gaps and holes.
    #[must_use]
    pub const fn is_blank(&self) -> bool {
        self.syncs == 0 && self.data == 0
    }
}
