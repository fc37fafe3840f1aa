//! Single-block resident cache shared by the two execution contexts.
//!
//! The interrupt context reads and stamps cells and posts misses; the
//! background task snapshots dirty contents and installs freshly loaded
//! blocks. Both sides reach the cache only through the drive's critical
//! section.

use crate::config::BLOCK_SIZE_CELLS;

use super::TapeCell;

/// Encoded copy of a dirty block taken for write-back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirtyBlock {
    /// Block number the bytes belong to.
    pub block: u32,
    /// Packed little-endian cells, one full block.
    pub bytes: Vec<u8>,
}

/// The resident block plus its dirty flag and the pending-request slot.
#[derive(Debug, Clone)]
pub struct BlockCache {
    cells: Box<[TapeCell; BLOCK_SIZE_CELLS]>,
    resident: Option<u32>,
    dirty: bool,
    pending: Option<u32>,
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockCache {
    /// Creates an empty cache with no resident block.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cells: Box::new([TapeCell::Gap; BLOCK_SIZE_CELLS]),
            resident: None,
            dirty: false,
            pending: None,
        }
    }

    /// Block currently held, if any.
    #[must_use]
    pub const fn resident(&self) -> Option<u32> {
        self.resident
    }

    /// Block requested by the interrupt context and not yet installed.
    #[must_use]
    pub const fn pending(&self) -> Option<u32> {
        self.pending
    }

    /// `true` when the resident block has unsaved mutations.
    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// `true` when `block` is resident.
    #[must_use]
    pub fn holds(&self, block: u32) -> bool {
        self.resident == Some(block)
    }

    /// Posts a miss for `block`.
    ///
    /// Returns `false` when that block is already pending, so repeated
    /// status reads over the same miss post it once.
    pub fn post_request(&mut self, block: u32) -> bool {
        if self.pending == Some(block) {
            return false;
        }
        self.pending = Some(block);
        true
    }

    /// Cell at `index` within the resident block.
    #[must_use]
    pub fn cell(&self, index: usize) -> TapeCell {
        self.cells[index % BLOCK_SIZE_CELLS]
    }

    /// Stamps `cell` at `index` within the resident block and marks it dirty.
    pub fn set_cell(&mut self, index: usize, cell: TapeCell) {
        self.cells[index % BLOCK_SIZE_CELLS] = cell;
        self.dirty = true;
    }

    /// Clears the dirty flag and returns an encoded copy of the resident
    /// block, or `None` when there is nothing to write back.
    pub fn take_dirty(&mut self) -> Option<DirtyBlock> {
        if !self.dirty {
            return None;
        }
        self.dirty = false;
        let block = self.resident?;
        Some(DirtyBlock {
            block,
            bytes: self.encode(),
        })
    }

    /// Installs `block`, decoding the packed cells in `bytes`.
    ///
    /// Cells past the end of `bytes` keep their previous contents, which is
    /// what a short read at the end of the image or a failed read leaves
    /// behind. Clears the pending slot when it named this block.
    pub fn install(&mut self, block: u32, bytes: &[u8]) {
        for (cell, pair) in self.cells.iter_mut().zip(bytes.chunks_exact(2)) {
            *cell = TapeCell::from_le_bytes([pair[0], pair[1]]);
        }
        self.resident = Some(block);
        self.dirty = false;
        if self.pending == Some(block) {
            self.pending = None;
        }
    }

    /// Forgets the resident block, dirty state and any pending request.
    pub fn reset(&mut self) {
        self.cells.fill(TapeCell::Gap);
        self.resident = None;
        self.dirty = false;
        self.pending = None;
    }

    fn encode(&self) -> Vec<u8> {
        self.cells.iter().flat_map(|cell| cell.to_le_bytes()).collect()
    }
}
