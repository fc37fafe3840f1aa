//! Stable fault codes and the classes diagnostics aggregate them into.

use thiserror::Error;

/// Fault classes used for diagnostics aggregation and policy decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub enum FaultClass {
    /// Head cursor left the usable medium.
    Position,
    /// Backing-store open/seek/read/write failure.
    Storage,
    /// Bus handshake or peripheral busy-poll failure.
    Arbitration,
}

/// Stable fault taxonomy recorded by the tape emulator and bus helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
#[repr(u8)]
pub enum FaultCode {
    /// Head position went negative.
    #[error("head position moved before the start of the medium")]
    PositionUnderflow = 0x01,
    /// Head position ran past the last cell of the track.
    #[error("head position moved past the end of the track")]
    PositionOverrun = 0x02,
    /// Backing image could not be opened.
    #[error("backing store open failed")]
    StoreOpen = 0x03,
    /// Seek to a block offset failed.
    #[error("backing store seek failed")]
    StoreSeek = 0x04,
    /// Block read failed.
    #[error("backing store read failed")]
    StoreRead = 0x05,
    /// Block write failed.
    #[error("backing store write failed")]
    StoreWrite = 0x06,
    /// A grant, release or busy wait hit its configured deadline.
    #[error("bus wait exceeded its deadline")]
    ArbitrationTimeout = 0x07,
    /// A second requester asked for the bus while a request was outstanding.
    #[error("bus requested while another request was outstanding")]
    ArbitrationContended = 0x08,
}

impl FaultCode {
    /// Converts a fault code to its stable byte value.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Converts a stable byte value back into a fault code.
    #[must_use]
    pub const fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::PositionUnderflow),
            0x02 => Some(Self::PositionOverrun),
            0x03 => Some(Self::StoreOpen),
            0x04 => Some(Self::StoreSeek),
            0x05 => Some(Self::StoreRead),
            0x06 => Some(Self::StoreWrite),
            0x07 => Some(Self::ArbitrationTimeout),
            0x08 => Some(Self::ArbitrationContended),
            _ => None,
        }
    }

    /// Returns the diagnostics fault class for this fault code.
    #[must_use]
    pub const fn class(self) -> FaultClass {
        match self {
            Self::PositionUnderflow | Self::PositionOverrun => FaultClass::Position,
            Self::StoreOpen | Self::StoreSeek | Self::StoreRead | Self::StoreWrite => {
                FaultClass::Storage
            }
            Self::ArbitrationTimeout | Self::ArbitrationContended => FaultClass::Arbitration,
        }
    }

    /// Faults that indicate a broken hardware handshake rather than a
    /// recoverable condition. Only an external watchdog can clear these.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::ArbitrationTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::{FaultClass, FaultCode};

    #[test]
    fn stable_code_roundtrip_is_bijective_for_defined_values() {
        for code in 0x01u8..=0x08 {
            let fault = FaultCode::from_u8(code).expect("defined taxonomy code");
            assert_eq!(fault.as_u8(), code);
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert!(FaultCode::from_u8(0x00).is_none());
        assert!(FaultCode::from_u8(0x09).is_none());
        assert!(FaultCode::from_u8(0xFF).is_none());
    }

    #[test]
    fn only_wait_timeouts_are_terminal() {
        assert!(FaultCode::ArbitrationTimeout.is_terminal());
        assert!(!FaultCode::ArbitrationContended.is_terminal());
        assert!(!FaultCode::PositionUnderflow.is_terminal());
        assert!(!FaultCode::StoreWrite.is_terminal());
    }

    #[test]
    fn class_mapping_matches_fault_taxonomy() {
        assert_eq!(FaultCode::PositionUnderflow.class(), FaultClass::Position);
        assert_eq!(FaultCode::PositionOverrun.class(), FaultClass::Position);
        assert_eq!(FaultCode::StoreOpen.class(), FaultClass::Storage);
        assert_eq!(FaultCode::StoreSeek.class(), FaultClass::Storage);
        assert_eq!(FaultCode::StoreRead.class(), FaultClass::Storage);
        assert_eq!(FaultCode::StoreWrite.class(), FaultClass::Storage);
        assert_eq!(
            FaultCode::ArbitrationTimeout.class(),
            FaultClass::Arbitration
        );
        assert_eq!(
            FaultCode::ArbitrationContended.class(),
            FaultClass::Arbitration
        );
    }

    #[test]
    fn display_messages_are_lowercase_phrases() {
        assert_eq!(
            FaultCode::StoreSeek.to_string(),
            "backing store seek failed"
        );
    }
}
