//! Saturating diagnostic counters for the tape emulator and bus helpers.

use crate::{FaultClass, FaultCode};

/// Diagnostic counters sampled by hosts and tests.
///
/// Every counter saturates instead of wrapping so a long-running unit never
/// reports a misleadingly small value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Deserialize, serde::Serialize))]
pub struct DiagCounters {
    /// The last fault recorded, if any.
    pub last_fault: Option<FaultCode>,
    /// Head-position faults (underflow and overrun).
    pub position_faults: u16,
    /// Backing-store failures of any kind.
    pub storage_faults: u16,
    /// Arbitration timeouts and contention rejections.
    pub arbitration_faults: u16,
    /// Status reads that found the required block not resident.
    pub block_misses: u16,
    /// Blocks read from the backing store into the cache.
    pub block_loads: u16,
    /// Dirty blocks written back to the backing store.
    pub block_flushes: u16,
    /// Idle-countdown reopen cycles of the backing store.
    pub reopens: u16,
}

impl DiagCounters {
    /// Creates a zeroed set of counters.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a fault occurrence, updating the last fault and its class
    /// counter.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_fault(&mut self, code: FaultCode) {
        self.last_fault = Some(code);
        let counter = match code.class() {
            FaultClass::Position => &mut self.position_faults,
            FaultClass::Storage => &mut self.storage_faults,
            FaultClass::Arbitration => &mut self.arbitration_faults,
        };
        *counter = counter.saturating_add(1);
    }

    /// Records a block miss posted by the interrupt context.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_miss(&mut self) {
        self.block_misses = self.block_misses.saturating_add(1);
    }

    /// Records a block read into the cache.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_load(&mut self) {
        self.block_loads = self.block_loads.saturating_add(1);
    }

    /// Records a dirty block write-back.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_flush(&mut self) {
        self.block_flushes = self.block_flushes.saturating_add(1);
    }

    /// Records a countdown-driven reopen of the backing store.
    #[allow(clippy::missing_const_for_fn)]
    pub fn record_reopen(&mut self) {
        self.reopens = self.reopens.saturating_add(1);
    }

    /// Resets all counters.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::DiagCounters;
    use crate::FaultCode;

    #[test]
    fn record_fault_routes_by_class() {
        let mut diag = DiagCounters::new();
        diag.record_fault(FaultCode::PositionUnderflow);
        diag.record_fault(FaultCode::StoreRead);
        diag.record_fault(FaultCode::StoreSeek);
        diag.record_fault(FaultCode::ArbitrationContended);

        assert_eq!(diag.position_faults, 1);
        assert_eq!(diag.storage_faults, 2);
        assert_eq!(diag.arbitration_faults, 1);
        assert_eq!(diag.last_fault, Some(FaultCode::ArbitrationContended));
    }

    #[test]
    fn counters_saturate() {
        let mut diag = DiagCounters {
            block_misses: u16::MAX,
            storage_faults: u16::MAX,
            ..DiagCounters::default()
        };
        diag.record_miss();
        diag.record_fault(FaultCode::StoreWrite);
        assert_eq!(diag.block_misses, u16::MAX);
        assert_eq!(diag.storage_faults, u16::MAX);
    }

    #[test]
    fn reset_clears_everything() {
        let mut diag = DiagCounters::new();
        diag.record_load();
        diag.record_flush();
        diag.record_reopen();
        diag.record_fault(FaultCode::PositionOverrun);
        diag.reset();
        assert_eq!(diag, DiagCounters::default());
    }
}
