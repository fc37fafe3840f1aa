use std::io;
use std::path::PathBuf;

use interposer_core::{ConfigError, TapeError};
use thiserror::Error;

/// Failures reported by the tape tool.
#[derive(Debug, Error)]
pub enum ToolError {
    /// A file could not be read or written.
    #[error("{}: {source}", path.display())]
    Io {
        /// File involved.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// A configuration file is not valid JSON for the expected shape.
    #[error("{}: invalid configuration: {source}", path.display())]
    ConfigParse {
        /// Configuration file.
        path: PathBuf,
        /// Parser error.
        source: serde_json::Error,
    },
    /// The configuration parsed but is inconsistent.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The drive rejected a setup or medium operation.
    #[error(transparent)]
    Tape(#[from] TapeError),
    /// A register access reached no handler.
    #[error("port {port:#04x} did not answer")]
    Unserviced {
        /// Port address.
        port: u8,
    },
    /// The drive stayed busy for longer than the session allows.
    #[error("drive not ready after {cycles} status reads")]
    NeverReady {
        /// Status reads performed.
        cycles: usize,
    },
    /// No sync cell was found within the search window.
    #[error("no record found within {cells} cells of the start position")]
    NoRecord {
        /// Cells searched.
        cells: usize,
    },
}
