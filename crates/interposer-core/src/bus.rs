//! Host bus cycles and the decoder that routes them.
//!
//! The lower layer (edge detection, signal levels) is external. It hands the
//! decoder one [`BusCycle`] per host access in the emulated peripheral window
//! and drives [`BusMaster`] cycles on the firmware's behalf while the bus is
//! granted.

use std::fmt;
use std::sync::Arc;

use crate::{BusArbiter, DispatchTable, GrantTransition};

/// A host access in the peripheral window, addressed by its low byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusCycle {
    /// Host reads from `address`.
    Read {
        /// Peripheral address.
        address: u8,
    },
    /// Host writes `value` to `address`.
    Write {
        /// Peripheral address.
        address: u8,
        /// Data byte driven by the host.
        value: u8,
    },
}

/// Decoder answer for one host cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusResponse {
    /// A read handler produced a byte to drive onto the bus.
    Data(u8),
    /// No handler claimed the read.
    Unhandled,
    /// The write was delivered (or dropped when unregistered).
    Accepted,
    /// The firmware owns the bus; host servicing is suspended.
    Suppressed,
}

/// Instrumentation events emitted by the decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BusEvent {
    /// The grantor raised `active`.
    Granted,
    /// The grantor dropped `active`.
    Relinquished,
    /// A host cycle reached the dispatch table.
    Serviced {
        /// The serviced cycle.
        cycle: BusCycle,
    },
    /// A host cycle arrived while the firmware owned the bus.
    CycleSuppressed {
        /// The suppressed cycle.
        cycle: BusCycle,
    },
}

/// Sink for decoder instrumentation.
pub trait BusTraceSink: Send {
    /// Records an event in bus order.
    fn on_event(&mut self, event: BusEvent);
}

/// Bus-mastered cycles driven by the lower layer while the firmware holds
/// the grant.
pub trait BusMaster {
    /// Performs one bus-mastered read.
    fn read(&mut self, address: u16) -> u8;

    /// Performs one bus-mastered write.
    fn write(&mut self, address: u16, value: u8);
}

/// Routes host cycles through the sealed dispatch table and runs the
/// grantor side of the arbitration handshake.
pub struct BusCycleDecoder {
    table: DispatchTable,
    arbiter: Arc<BusArbiter>,
    trace: Option<Box<dyn BusTraceSink>>,
}

impl fmt::Debug for BusCycleDecoder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BusCycleDecoder")
            .field("table", &self.table)
            .field("arbiter", &self.arbiter)
            .field("tracing", &self.trace.is_some())
            .finish()
    }
}

impl BusCycleDecoder {
    /// Creates a decoder over a sealed table.
    #[must_use]
    pub const fn new(table: DispatchTable, arbiter: Arc<BusArbiter>) -> Self {
        Self {
            table,
            arbiter,
            trace: None,
        }
    }

    /// Attaches an instrumentation sink.
    #[must_use]
    pub fn with_trace(mut self, sink: impl BusTraceSink + 'static) -> Self {
        self.trace = Some(Box::new(sink));
        self
    }

    /// The arbiter shared with requesters.
    #[must_use]
    pub const fn arbiter(&self) -> &Arc<BusArbiter> {
        &self.arbiter
    }

    /// The sealed dispatch table.
    #[must_use]
    pub const fn table(&self) -> &DispatchTable {
        &self.table
    }

    /// Runs the grantor step at a safe boundary with no host cycle attached,
    /// e.g. while the host is halted for DMA.
    pub fn boundary(&mut self) -> Option<GrantTransition> {
        let transition = self.arbiter.service_boundary();
        match transition {
            Some(GrantTransition::Granted) => self.emit(BusEvent::Granted),
            Some(GrantTransition::Relinquished) => self.emit(BusEvent::Relinquished),
            None => {}
        }
        transition
    }

    /// Services one host cycle.
    ///
    /// The grantor step runs first, so a pending request is granted at this
    /// boundary and the cycle is then suppressed.
    pub fn on_cycle(&mut self, cycle: BusCycle) -> BusResponse {
        self.boundary();
        if self.arbiter.is_active() {
            self.emit(BusEvent::CycleSuppressed { cycle });
            return BusResponse::Suppressed;
        }

        self.emit(BusEvent::Serviced { cycle });
        match cycle {
            BusCycle::Read { address } => self
                .table
                .dispatch_read(address)
                .map_or(BusResponse::Unhandled, BusResponse::Data),
            BusCycle::Write { address, value } => {
                self.table.dispatch_write(address, value);
                BusResponse::Accepted
            }
        }
    }

    /// Convenience wrapper for a host read.
    pub fn read(&mut self, address: u8) -> BusResponse {
        self.on_cycle(BusCycle::Read { address })
    }

    /// Convenience wrapper for a host write.
    pub fn write(&mut self, address: u8, value: u8) -> BusResponse {
        self.on_cycle(BusCycle::Write { address, value })
    }

    fn emit(&mut self, event: BusEvent) {
        if let Some(sink) = self.trace.as_mut() {
            sink.on_event(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BusCycle, BusCycleDecoder, BusEvent, BusResponse, BusTraceSink};
    use crate::{BusArbiter, DispatchTableBuilder};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedTrace(Arc<Mutex<Vec<BusEvent>>>);

    impl BusTraceSink for SharedTrace {
        fn on_event(&mut self, event: BusEvent) {
            self.0.lock().expect("trace lock").push(event);
        }
    }

    fn decoder_with_echo() -> (BusCycleDecoder, SharedTrace) {
        let mut builder = DispatchTableBuilder::new();
        builder
            .register_read(0x01, |address: u8| Some(address + 0x10))
            .expect("register");
        let trace = SharedTrace::default();
        let decoder = BusCycleDecoder::new(builder.seal(), Arc::new(BusArbiter::new()))
            .with_trace(trace.clone());
        (decoder, trace)
    }

    #[test]
    fn idle_bus_dispatches_host_cycles() {
        let (mut decoder, trace) = decoder_with_echo();
        assert_eq!(decoder.read(0x01), BusResponse::Data(0x11));
        assert_eq!(decoder.read(0x02), BusResponse::Unhandled);
        assert_eq!(decoder.write(0x02, 0xAA), BusResponse::Accepted);

        let events = trace.0.lock().expect("trace lock").clone();
        assert_eq!(
            events,
            vec![
                BusEvent::Serviced {
                    cycle: BusCycle::Read { address: 0x01 }
                },
                BusEvent::Serviced {
                    cycle: BusCycle::Read { address: 0x02 }
                },
                BusEvent::Serviced {
                    cycle: BusCycle::Write {
                        address: 0x02,
                        value: 0xAA
                    }
                },
            ]
        );
    }

    #[test]
    fn pending_request_is_granted_at_next_cycle_and_suppresses_it() {
        let (mut decoder, trace) = decoder_with_echo();
        decoder.arbiter().request_bus().expect("request");

        assert_eq!(decoder.read(0x01), BusResponse::Suppressed);
        decoder.arbiter().release();
        assert_eq!(decoder.read(0x01), BusResponse::Data(0x11));

        let events = trace.0.lock().expect("trace lock").clone();
        assert_eq!(events[0], BusEvent::Granted);
        assert!(matches!(events[1], BusEvent::CycleSuppressed { .. }));
        assert_eq!(events[2], BusEvent::Relinquished);
        assert!(matches!(events[3], BusEvent::Serviced { .. }));
    }
}
