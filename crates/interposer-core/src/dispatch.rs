//! Fixed 256-entry peripheral dispatch table.
//!
//! The table is built once with [`DispatchTableBuilder`] and then sealed into
//! an immutable [`DispatchTable`]. Sealing is the only way to obtain a table
//! that can dispatch, so registration can never race with dispatch.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Number of peripheral addresses covered by the table.
pub const DISPATCH_ADDRESSES: usize = 256;

/// Handler invoked for a host read cycle.
///
/// Runs in interrupt context: it must not block or perform storage I/O.
pub trait ReadHandler: Send + Sync {
    /// Returns the byte to drive onto the bus, or `None` to let the decoder
    /// treat the address as unimplemented.
    fn on_read(&self, address: u8) -> Option<u8>;
}

/// Handler invoked for a host write cycle.
///
/// Runs in interrupt context: it must not block or perform storage I/O.
pub trait WriteHandler: Send + Sync {
    /// Consumes a byte written by the host.
    fn on_write(&self, address: u8, value: u8);
}

impl<F> ReadHandler for F
where
    F: Fn(u8) -> Option<u8> + Send + Sync,
{
    fn on_read(&self, address: u8) -> Option<u8> {
        self(address)
    }
}

impl<F> WriteHandler for F
where
    F: Fn(u8, u8) + Send + Sync,
{
    fn on_write(&self, address: u8, value: u8) {
        self(address, value);
    }
}

/// Which side of an entry a registration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandlerKind {
    /// Read handler.
    Read,
    /// Write handler.
    Write,
}

impl fmt::Display for HandlerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Read => f.write_str("read"),
            Self::Write => f.write_str("write"),
        }
    }
}

/// Registration failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum DispatchError {
    /// The address already has a handler of this kind.
    #[error("address {address:#04x} already has a {kind} handler")]
    AlreadyRegistered {
        /// Conflicting address.
        address: u8,
        /// Conflicting handler kind.
        kind: HandlerKind,
    },
}

#[derive(Clone, Default)]
struct DispatchEntry {
    read: Option<Arc<dyn ReadHandler>>,
    write: Option<Arc<dyn WriteHandler>>,
}

fn empty_entries() -> Box<[DispatchEntry; DISPATCH_ADDRESSES]> {
    Box::new(std::array::from_fn(|_| DispatchEntry::default()))
}

/// Setup-phase view of the dispatch table.
pub struct DispatchTableBuilder {
    entries: Box<[DispatchEntry; DISPATCH_ADDRESSES]>,
}

impl Default for DispatchTableBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for DispatchTableBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTableBuilder")
            .field("registered", &registered_count(&self.entries))
            .finish()
    }
}

impl DispatchTableBuilder {
    /// Creates a builder with no handlers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: empty_entries(),
        }
    }

    /// Registers an optional read and an optional write handler at `address`.
    ///
    /// Nothing is registered when either side conflicts with an existing
    /// handler.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] for the first conflicting
    /// side.
    pub fn register(
        &mut self,
        address: u8,
        read: Option<Arc<dyn ReadHandler>>,
        write: Option<Arc<dyn WriteHandler>>,
    ) -> Result<(), DispatchError> {
        let entry = &mut self.entries[usize::from(address)];
        if read.is_some() && entry.read.is_some() {
            return Err(DispatchError::AlreadyRegistered {
                address,
                kind: HandlerKind::Read,
            });
        }
        if write.is_some() && entry.write.is_some() {
            return Err(DispatchError::AlreadyRegistered {
                address,
                kind: HandlerKind::Write,
            });
        }
        if read.is_some() {
            entry.read = read;
        }
        if write.is_some() {
            entry.write = write;
        }
        Ok(())
    }

    /// Registers a read handler at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] on conflict.
    pub fn register_read(
        &mut self,
        address: u8,
        handler: impl ReadHandler + 'static,
    ) -> Result<(), DispatchError> {
        self.register(address, Some(Arc::new(handler)), None)
    }

    /// Registers a write handler at `address`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyRegistered`] on conflict.
    pub fn register_write(
        &mut self,
        address: u8,
        handler: impl WriteHandler + 'static,
    ) -> Result<(), DispatchError> {
        self.register(address, None, Some(Arc::new(handler)))
    }

    /// Ends the setup phase.
    #[must_use]
    pub fn seal(self) -> DispatchTable {
        log::debug!(
            "dispatch table sealed with {} populated addresses",
            registered_count(&self.entries)
        );
        DispatchTable {
            entries: self.entries,
        }
    }
}

/// Sealed, read-only dispatch table consulted on every bus cycle.
pub struct DispatchTable {
    entries: Box<[DispatchEntry; DISPATCH_ADDRESSES]>,
}

impl fmt::Debug for DispatchTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchTable")
            .field("registered", &registered_count(&self.entries))
            .finish()
    }
}

impl DispatchTable {
    /// Runs the read handler at `address`.
    ///
    /// Returns `None` when no handler is registered or the handler declined.
    #[must_use]
    pub fn dispatch_read(&self, address: u8) -> Option<u8> {
        self.entries[usize::from(address)]
            .read
            .as_ref()
            .and_then(|handler| handler.on_read(address))
    }

    /// Runs the write handler at `address`; unregistered writes are dropped.
    pub fn dispatch_write(&self, address: u8, value: u8) {
        if let Some(handler) = &self.entries[usize::from(address)].write {
            handler.on_write(address, value);
        }
    }

    /// Returns `true` when `address` has a handler of `kind`.
    #[must_use]
    pub fn is_registered(&self, address: u8, kind: HandlerKind) -> bool {
        let entry = &self.entries[usize::from(address)];
        match kind {
            HandlerKind::Read => entry.read.is_some(),
            HandlerKind::Write => entry.write.is_some(),
        }
    }
}

fn registered_count(entries: &[DispatchEntry; DISPATCH_ADDRESSES]) -> usize {
    entries
        .iter()
        .filter(|entry| entry.read.is_some() || entry.write.is_some())
        .count()
}
