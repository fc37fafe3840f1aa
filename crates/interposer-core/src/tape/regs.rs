//! Tape controller register bit layouts.

bitflags::bitflags! {
    /// Status register, read at the status/control port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TapeStatus: u8 {
        /// Motion fault: the head left the usable medium.
        const STALL = 0x01;
        /// Head is over an index hole.
        const HOLE = 0x02;
        /// No medium loaded, or the insertion delay is still running.
        const CART_OUT = 0x04;
        /// Tachometer pulse, set on odd cells.
        const TACH = 0x08;
        /// Head is over a gap.
        const GAP = 0x10;
        /// Motor current limit. Never asserted by the emulator.
        const ILIM = 0x20;
        /// Medium accepts writes.
        const WRITE_EN = 0x40;
        /// Data byte ready to read, or ready to accept the next byte.
        const READY = 0x80;
    }
}

bitflags::bitflags! {
    /// Control register, written at the status/control port.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TapeControl: u8 {
        /// Erase the current cell to gap.
        const WRITE_GAP = 0x01;
        /// Start a record with a sync cell.
        const WRITE_SYNC = 0x02;
        /// Write data cells.
        const WRITE_DATA = 0x04;
        /// Fast wind.
        const FAST = 0x08;
        /// Forward direction when set, reverse when clear.
        const DIR_FWD = 0x10;
        /// Capstan motor on.
        const MOTOR_ON = 0x20;
        /// Drive electronics powered.
        const POWER_UP = 0x40;
        /// Selects track 1.
        const TRACK = 0x80;
    }
}

impl TapeControl {
    /// Bits that engage the write sequencer.
    pub const WRITE_INTENT: Self = Self::WRITE_SYNC.union(Self::WRITE_DATA);

    /// `true` when the sequencer should run on this cycle.
    #[must_use]
    pub const fn write_intent(self) -> bool {
        self.intersects(Self::WRITE_INTENT)
    }

    /// `true` when erasing to gap.
    #[must_use]
    pub const fn write_gap(self) -> bool {
        self.contains(Self::WRITE_GAP)
    }

    /// Motor running forward at normal (not fast-wind) speed.
    #[must_use]
    pub const fn forward_normal_speed(self) -> bool {
        self.contains(Self::MOTOR_ON.union(Self::DIR_FWD)) && !self.contains(Self::FAST)
    }

    /// Motor running in either direction.
    #[must_use]
    pub const fn motor_on(self) -> bool {
        self.contains(Self::MOTOR_ON)
    }

    /// Head step for one serviced status read.
    #[must_use]
    pub const fn step(self) -> i32 {
        if self.contains(Self::DIR_FWD) {
            1
        } else {
            -1
        }
    }

    /// Selected track, 0 or 1.
    #[must_use]
    pub const fn track(self) -> u8 {
        if self.contains(Self::TRACK) {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{TapeControl, TapeStatus};
    use rstest::rstest;

    #[rstest]
    #[case(TapeControl::MOTOR_ON | TapeControl::DIR_FWD, true)]
    #[case(TapeControl::MOTOR_ON | TapeControl::DIR_FWD | TapeControl::FAST, false)]
    #[case(TapeControl::MOTOR_ON, false)]
    #[case(TapeControl::DIR_FWD, false)]
    fn forward_normal_speed_needs_motor_direction_and_no_fast(
        #[case] control: TapeControl,
        #[case] expected: bool,
    ) {
        assert_eq!(control.forward_normal_speed(), expected);
    }

    #[rstest]
    #[case(TapeControl::WRITE_SYNC, true)]
    #[case(TapeControl::WRITE_DATA, true)]
    #[case(TapeControl::WRITE_GAP, false)]
    #[case(TapeControl::empty(), false)]
    fn write_intent_covers_sync_and_data(#[case] control: TapeControl, #[case] expected: bool) {
        assert_eq!(control.write_intent(), expected);
    }

    #[test]
    fn track_and_step_follow_their_bits() {
        assert_eq!(TapeControl::empty().track(), 0);
        assert_eq!(TapeControl::TRACK.track(), 1);
        assert_eq!(TapeControl::DIR_FWD.step(), 1);
        assert_eq!(TapeControl::empty().step(), -1);
    }

    #[test]
    fn raw_bytes_survive_register_latch() {
        let control = TapeControl::from_bits_retain(0xB4);
        assert_eq!(control.bits(), 0xB4);
        assert!(control.contains(TapeControl::TRACK | TapeControl::MOTOR_ON));
        assert_eq!((TapeStatus::GAP | TapeStatus::WRITE_EN).bits(), 0x50);
    }
}
