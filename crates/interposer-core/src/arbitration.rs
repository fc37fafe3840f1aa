//! Request/grant handshake that lets the firmware master the host bus.
//!
//! Two flags carry the whole protocol. The requester owns `request`, the
//! grantor (the bus-cycle layer) owns `active`:
//!
//! ```text
//!   Idle ──request_bus()──▶ Requested ──grantor boundary──▶ Active
//!    ▲                                                        │
//!    └──grantor boundary◀── Releasing ◀──────release()────────┘
//! ```
//!
//! `active` is raised only in answer to a pending request and dropped only
//! after the requester has released. Spins never time out unless a
//! [`WaitPolicy`] deadline is configured.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::ArbitrationConfig;
use crate::FaultCode;

/// Observable handshake state derived from the two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArbitrationState {
    /// No request, grantor servicing live host cycles.
    Idle,
    /// Request raised, grant not yet given.
    Requested,
    /// Firmware owns the bus.
    Active,
    /// Requester released; grantor has not handed the bus back yet.
    Releasing,
}

/// Edge produced by one grantor boundary step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrantTransition {
    /// `active` was raised.
    Granted,
    /// `active` was dropped after a release.
    Relinquished,
}

/// What a spin was waiting for when it gave up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WaitTarget {
    /// Grantor raising `active`.
    Grant,
    /// Grantor dropping `active` after release.
    Release,
    /// Target peripheral clearing its busy flag.
    PeripheralReady,
}

/// Handshake failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ArbitrationError {
    /// Another requester already holds or awaits the bus.
    #[error("bus already requested by another owner")]
    Contended,
    /// A spin exceeded the configured deadline.
    #[error("timed out waiting for {target:?} after {waited:?}")]
    Timeout {
        /// What the spin was waiting for.
        target: WaitTarget,
        /// Time spent spinning.
        waited: Duration,
    },
}

impl ArbitrationError {
    /// Maps the error onto the diagnostics fault taxonomy.
    #[must_use]
    pub const fn fault_code(self) -> FaultCode {
        match self {
            Self::Contended => FaultCode::ArbitrationContended,
            Self::Timeout { .. } => FaultCode::ArbitrationTimeout,
        }
    }
}

/// Bounding policy applied to every spin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct WaitPolicy {
    deadline: Option<Duration>,
}

impl WaitPolicy {
    /// Spins forever, as the hardware handshake does.
    pub const UNBOUNDED: Self = Self { deadline: None };

    /// Gives up after `deadline`.
    #[must_use]
    pub const fn with_deadline(deadline: Duration) -> Self {
        Self {
            deadline: Some(deadline),
        }
    }

    /// Builds the policy from configuration.
    #[must_use]
    pub const fn from_config(config: &ArbitrationConfig) -> Self {
        Self {
            deadline: config.wait_deadline(),
        }
    }

    /// Returns the configured deadline.
    #[must_use]
    pub const fn deadline(&self) -> Option<Duration> {
        self.deadline
    }

    /// Spins until `ready` returns `true`.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when a deadline is set and
    /// expires first.
    pub fn spin_until(
        &self,
        target: WaitTarget,
        mut ready: impl FnMut() -> bool,
    ) -> Result<(), ArbitrationError> {
        let started = self.deadline.map(|_| Instant::now());
        loop {
            if ready() {
                return Ok(());
            }
            if let (Some(deadline), Some(started)) = (self.deadline, started) {
                let waited = started.elapsed();
                if waited >= deadline {
                    return Err(ArbitrationError::Timeout { target, waited });
                }
            }
            std::hint::spin_loop();
        }
    }
}

/// The shared request/active flag pair.
#[derive(Debug, Default)]
pub struct BusArbiter {
    request: AtomicBool,
    active: AtomicBool,
}

impl BusArbiter {
    /// Creates an idle arbiter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            request: AtomicBool::new(false),
            active: AtomicBool::new(false),
        }
    }

    /// Raises the request flag without waiting for the grant.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Contended`] when a request is already
    /// outstanding.
    pub fn request_bus(&self) -> Result<(), ArbitrationError> {
        self.request
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| ArbitrationError::Contended)
    }

    /// Drops the request flag. The grantor hands the bus back at its next
    /// boundary.
    pub fn release(&self) {
        self.request.store(false, Ordering::Release);
    }

    /// Returns `true` while the grantor has the bus handed to the firmware.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Returns `true` while a request is raised.
    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.request.load(Ordering::Acquire)
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> ArbitrationState {
        match (self.is_requested(), self.is_active()) {
            (false, false) => ArbitrationState::Idle,
            (true, false) => ArbitrationState::Requested,
            (true, true) => ArbitrationState::Active,
            (false, true) => ArbitrationState::Releasing,
        }
    }

    /// Grantor step, run by the bus-cycle layer at each safe boundary in the
    /// live bus stream.
    pub fn service_boundary(&self) -> Option<GrantTransition> {
        let requested = self.is_requested();
        let active = self.is_active();
        if requested && !active {
            self.active.store(true, Ordering::Release);
            Some(GrantTransition::Granted)
        } else if !requested && active {
            self.active.store(false, Ordering::Release);
            Some(GrantTransition::Relinquished)
        } else {
            None
        }
    }

    /// Spins until the grantor raises `active`.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when the policy deadline expires.
    pub fn wait_for_grant(&self, policy: &WaitPolicy) -> Result<(), ArbitrationError> {
        policy.spin_until(WaitTarget::Grant, || self.is_active())
    }

    /// Spins until the grantor drops `active`.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when the policy deadline expires.
    pub fn wait_for_idle(&self, policy: &WaitPolicy) -> Result<(), ArbitrationError> {
        policy.spin_until(WaitTarget::Release, || !self.is_active())
    }

    /// Requests the bus and spins until it is granted.
    ///
    /// On timeout the request is withdrawn so the grantor never hands the
    /// bus to an owner that has stopped waiting.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Contended`] or
    /// [`ArbitrationError::Timeout`].
    pub fn acquire(&self, policy: WaitPolicy) -> Result<BusGrant<'_>, ArbitrationError> {
        self.request_bus()?;
        if let Err(error) = self.wait_for_grant(&policy) {
            self.release();
            log::error!("bus grant never arrived: {error}");
            return Err(error);
        }
        Ok(BusGrant {
            arbiter: self,
            policy,
            released: false,
        })
    }
}

/// Proof that the firmware currently owns the bus.
///
/// Release explicitly with [`BusGrant::release`] to wait for the hand-back.
/// Dropping the grant only withdraws the request.
#[derive(Debug)]
pub struct BusGrant<'a> {
    arbiter: &'a BusArbiter,
    policy: WaitPolicy,
    released: bool,
}

impl BusGrant<'_> {
    /// Spin policy inherited from [`BusArbiter::acquire`].
    #[must_use]
    pub const fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Releases the bus and spins until the grantor has handed it back to
    /// live host servicing.
    ///
    /// # Errors
    ///
    /// Returns [`ArbitrationError::Timeout`] when the policy deadline expires.
    pub fn release(mut self) -> Result<(), ArbitrationError> {
        self.released = true;
        self.arbiter.release();
        self.arbiter.wait_for_idle(&self.policy)
    }
}

impl Drop for BusGrant<'_> {
    fn drop(&mut self) {
        if !self.released {
            self.arbiter.release();
        }
    }
}
