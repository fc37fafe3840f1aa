//! Bus-mastered transfers that respect a target peripheral's busy flag.
//!
//! Two tiers:
//!
//! - [`SafeAccess`] negotiates the bus around every single transfer. Simple,
//!   but pays a full request/grant/release round trip per byte.
//! - The `*_held` methods take a [`BusGrant`] as proof the caller already
//!   owns the bus and only poll the busy flag between transfers. Use them
//!   for bulk sequences.

use crate::{
    ArbitrationError, BusArbiter, BusGrant, BusMaster, DiagCounters, IrqMutex, WaitPolicy,
    WaitTarget,
};

/// Where and how to read a peripheral's busy indication.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusyProbe {
    /// Status register address polled before each transfer.
    pub status_address: u16,
    /// Bits of the status register that signal "busy".
    pub busy_mask: u8,
    /// `true` when a set bit means busy, `false` when a clear bit does.
    pub busy_when_set: bool,
}

impl BusyProbe {
    /// Probe for a peripheral that raises `busy_mask` while busy.
    #[must_use]
    pub const fn active_high(status_address: u16, busy_mask: u8) -> Self {
        Self {
            status_address,
            busy_mask,
            busy_when_set: true,
        }
    }

    /// Probe for a peripheral that drops `ready_mask` while busy.
    #[must_use]
    pub const fn ready_high(status_address: u16, ready_mask: u8) -> Self {
        Self {
            status_address,
            busy_mask: ready_mask,
            busy_when_set: false,
        }
    }

    /// Interprets a status byte.
    #[must_use]
    pub const fn is_busy(&self, status: u8) -> bool {
        let bits_set = status & self.busy_mask != 0;
        bits_set == self.busy_when_set
    }

    /// Spins on the status register until the peripheral is idle.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when the policy deadline expires.
    pub fn wait_ready<B: BusMaster + ?Sized>(
        &self,
        bus: &mut B,
        policy: &WaitPolicy,
    ) -> Result<(), ArbitrationError> {
        policy.spin_until(WaitTarget::PeripheralReady, || {
            !self.is_busy(bus.read(self.status_address))
        })
    }
}

/// Arbitration-naive helpers: one negotiated transfer per call.
///
/// Failures are counted in the attached diagnostics, if any.
#[derive(Debug, Clone, Copy)]
pub struct SafeAccess<'a> {
    arbiter: &'a BusArbiter,
    policy: WaitPolicy,
    diagnostics: Option<&'a IrqMutex<DiagCounters>>,
}

impl<'a> SafeAccess<'a> {
    /// Creates helpers over `arbiter` with the given spin policy.
    #[must_use]
    pub const fn new(arbiter: &'a BusArbiter, policy: WaitPolicy) -> Self {
        Self {
            arbiter,
            policy,
            diagnostics: None,
        }
    }

    /// Records every arbitration failure into `diagnostics`.
    #[must_use]
    pub const fn with_diagnostics(mut self, diagnostics: &'a IrqMutex<DiagCounters>) -> Self {
        self.diagnostics = Some(diagnostics);
        self
    }

    /// Acquires the bus for a bulk sequence of `*_held` transfers.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] when the bus is contended or the grant
    /// times out.
    pub fn acquire(&self) -> Result<BusGrant<'a>, ArbitrationError> {
        self.arbiter
            .acquire(self.policy)
            .map_err(|error| self.record(error))
    }

    fn record(&self, error: ArbitrationError) -> ArbitrationError {
        let code = error.fault_code();
        if code.is_terminal() {
            log::error!("{code}: bus handshake needs an external reset");
        }
        if let Some(diagnostics) = self.diagnostics {
            diagnostics.lock(|diag| diag.record_fault(code));
        }
        error
    }

    /// Negotiates the bus, waits for `probe` to report idle, writes one byte
    /// and hands the bus back.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] on contention or an expired deadline.
    pub fn write<B: BusMaster + ?Sized>(
        &self,
        bus: &mut B,
        probe: &BusyProbe,
        address: u16,
        value: u8,
    ) -> Result<(), ArbitrationError> {
        let grant = self.acquire()?;
        grant
            .write_held(bus, probe, address, value)
            .and_then(|()| grant.release())
            .map_err(|error| self.record(error))
    }

    /// Negotiates the bus, waits for `probe` to report idle, reads one byte
    /// and hands the bus back.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError`] on contention or an expired deadline.
    pub fn read<B: BusMaster + ?Sized>(
        &self,
        bus: &mut B,
        probe: &BusyProbe,
        address: u16,
    ) -> Result<u8, ArbitrationError> {
        let grant = self.acquire()?;
        grant
            .read_held(bus, probe, address)
            .and_then(|value| grant.release().map(|()| value))
            .map_err(|error| self.record(error))
    }
}

impl BusGrant<'_> {
    /// Waits for `probe` to report idle, then writes one byte.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when the busy poll expires.
    pub fn write_held<B: BusMaster + ?Sized>(
        &self,
        bus: &mut B,
        probe: &BusyProbe,
        address: u16,
        value: u8,
    ) -> Result<(), ArbitrationError> {
        probe.wait_ready(bus, self.policy())?;
        bus.write(address, value);
        Ok(())
    }

    /// Waits for `probe` to report idle, then reads one byte.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when the busy poll expires.
    pub fn read_held<B: BusMaster + ?Sized>(
        &self,
        bus: &mut B,
        probe: &BusyProbe,
        address: u16,
    ) -> Result<u8, ArbitrationError> {
        probe.wait_ready(bus, self.policy())?;
        Ok(bus.read(address))
    }

    /// Streams `data` to a single data port, polling busy before each byte.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] on the first expired busy poll;
    /// bytes before it have been written.
    pub fn write_all_held<B: BusMaster + ?Sized>(
        &self,
        bus: &mut B,
        probe: &BusyProbe,
        address: u16,
        data: &[u8],
    ) -> Result<(), ArbitrationError> {
        for &byte in data {
            self.write_held(bus, probe, address, byte)?;
        }
        Ok(())
    }
}
