//! Tape cell model and its packed 16-bit storage form.

/// Flag bit marking a blank inter-record gap.
pub const CELL_GAP: u16 = 0x0100;
/// Flag bit marking a synchronization marker.
pub const CELL_SYNC: u16 = 0x0200;
/// Flag bit marking a data byte carried in the low byte.
pub const CELL_DATA: u16 = 0x0400;
/// Flag bit marking a physical index hole.
pub const CELL_HOLE: u16 = 0x0800;
/// Payload bits of a packed cell.
pub const CELL_PAYLOAD_MASK: u16 = 0x00FF;

/// One time-slot of the medium.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum TapeCell {
    /// Blank gap. Erased or never-written medium reads as gap.
    #[default]
    Gap,
    /// Synchronization marker preceding a data record.
    Sync,
    /// A recorded data byte.
    Data(u8),
    /// Physical index hole.
    Hole,
}

impl TapeCell {
    /// Packs the cell into its storage word.
    #[must_use]
    pub const fn encode(self) -> u16 {
        match self {
            Self::Gap => CELL_GAP,
            Self::Sync => CELL_SYNC,
            Self::Data(byte) => CELL_DATA | byte as u16,
            Self::Hole => CELL_HOLE,
        }
    }

    /// Unpacks a storage word.
    ///
    /// Flags are checked in priority order HOLE, DATA, SYNC; anything else,
    /// including an all-zero word, is a gap.
    #[must_use]
    pub const fn decode(word: u16) -> Self {
        if word & CELL_HOLE != 0 {
            Self::Hole
        } else if word & CELL_DATA != 0 {
            Self::Data((word & CELL_PAYLOAD_MASK) as u8)
        } else if word & CELL_SYNC != 0 {
            Self::Sync
        } else {
            Self::Gap
        }
    }

    /// Little-endian storage bytes.
    #[must_use]
    pub const fn to_le_bytes(self) -> [u8; 2] {
        self.encode().to_le_bytes()
    }

    /// Decodes little-endian storage bytes.
    #[must_use]
    pub const fn from_le_bytes(bytes: [u8; 2]) -> Self {
        Self::decode(u16::from_le_bytes(bytes))
    }

    /// Payload byte when this is a data cell.
    #[must_use]
    pub const fn payload(self) -> Option<u8> {
        match self {
            Self::Data(byte) => Some(byte),
            _ => None,
        }
    }
}
