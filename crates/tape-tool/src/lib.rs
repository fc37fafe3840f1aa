//! Host-side tooling for virtual tape images.
//!
//! The tool drives the real register protocol through the bus-cycle decoder,
//! so an image written here is byte-for-byte what the firmware would produce.

use env_logger as _;

/// Configuration file loading.
pub mod config;
pub use config::load_config;

/// Tool error type.
pub mod error;
pub use error::ToolError;

/// Register-level host session over a tape drive.
pub mod session;
pub use session::HostSession;

#[cfg(test)]
use tempfile as _;
