//! Backing-store collaborator holding the on-disk tape image.
//!
//! The image is a headerless sequence of little-endian 16-bit cells. Only the
//! background task touches a store; the interrupt context never does.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::FaultCode;

/// Storage failures. All of them are recoverable from the emulator's point
/// of view.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An operation other than `open` was attempted on a closed store.
    #[error("backing store is not open")]
    NotOpen,
    /// The image could not be opened.
    #[error("failed to open {}: {source}", path.display())]
    Open {
        /// Image path.
        path: PathBuf,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Seeking to a block offset failed.
    #[error("failed to seek to byte {offset}: {source}")]
    Seek {
        /// Requested byte offset.
        offset: u64,
        /// Underlying I/O error.
        source: io::Error,
    },
    /// Reading failed.
    #[error("read failed: {0}")]
    Read(#[source] io::Error),
    /// Writing failed.
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
}

impl StoreError {
    /// Maps the error onto the diagnostics fault taxonomy.
    #[must_use]
    pub const fn fault_code(&self) -> FaultCode {
        match self {
            Self::NotOpen | Self::Open { .. } => FaultCode::StoreOpen,
            Self::Seek { .. } => FaultCode::StoreSeek,
            Self::Read(_) => FaultCode::StoreRead,
            Self::Write(_) => FaultCode::StoreWrite,
        }
    }
}

/// File-like storage for the medium image.
pub trait BackingStore {
    /// Opens the image at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Open`] when the image cannot be opened.
    fn open(&mut self, path: &Path, writable: bool) -> Result<(), StoreError>;

    /// Moves the cursor to `offset` bytes from the start of the image.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Seek`] or [`StoreError::NotOpen`].
    fn seek(&mut self, offset: u64) -> Result<(), StoreError>;

    /// Reads up to `buf.len()` bytes, returning fewer only at end of image.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Read`] or [`StoreError::NotOpen`].
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError>;

    /// Writes all of `buf`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Write`] or [`StoreError::NotOpen`].
    fn write(&mut self, buf: &[u8]) -> Result<(), StoreError>;

    /// Closes the image, committing buffered writes. Closing a closed store
    /// is a no-op.
    fn close(&mut self);

    /// Returns `true` between a successful `open` and `close`.
    fn is_open(&self) -> bool;
}

/// [`BackingStore`] over a host file.
#[derive(Debug, Default)]
pub struct FileStore {
    file: Option<File>,
}

impl FileStore {
    /// Creates a closed store.
    #[must_use]
    pub const fn new() -> Self {
        Self { file: None }
    }

    fn file(&mut self) -> Result<&mut File, StoreError> {
        self.file.as_mut().ok_or(StoreError::NotOpen)
    }
}

impl BackingStore for FileStore {
    fn open(&mut self, path: &Path, writable: bool) -> Result<(), StoreError> {
        self.close();
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .open(path)
            .map_err(|source| StoreError::Open {
                path: path.to_path_buf(),
                source,
            })?;
        self.file = Some(file);
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<(), StoreError> {
        self.file()?
            .seek(SeekFrom::Start(offset))
            .map(|_| ())
            .map_err(|source| StoreError::Seek { offset, source })
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        let file = self.file()?;
        let mut filled = 0;
        while filled < buf.len() {
            match file.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(StoreError::Read(error)),
            }
        }
        Ok(filled)
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), StoreError> {
        self.file()?.write_all(buf).map_err(StoreError::Write)
    }

    fn close(&mut self) {
        if let Some(file) = self.file.take() {
            if let Err(error) = file.sync_all() {
                log::warn!("sync on close failed: {error}");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.file.is_some()
    }
}

/// One recorded [`MemoryStore`] operation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StoreOp {
    /// `open` succeeded.
    Open {
        /// Whether the image was opened for writing.
        writable: bool,
    },
    /// `seek` to a byte offset.
    Seek(u64),
    /// `read` at `offset` returning `len` bytes.
    Read {
        /// Cursor before the read.
        offset: u64,
        /// Bytes delivered.
        len: usize,
    },
    /// `write` of `len` bytes at `offset`.
    Write {
        /// Cursor before the write.
        offset: u64,
        /// Bytes written.
        len: usize,
    },
    /// `close`.
    Close,
}

/// In-memory [`BackingStore`] that journals every operation.
///
/// Used by host tooling and tests to observe exactly what the emulator asked
/// of its storage. Failures can be injected per operation kind.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    image: Vec<u8>,
    cursor: u64,
    open: bool,
    writable: bool,
    journal: Vec<StoreOp>,
    fail_seeks: u32,
    fail_reads: u32,
    fail_writes: u32,
}

impl MemoryStore {
    /// Creates a store over `image`.
    #[must_use]
    pub const fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            cursor: 0,
            open: false,
            writable: false,
            journal: Vec::new(),
            fail_seeks: 0,
            fail_reads: 0,
            fail_writes: 0,
        }
    }

    /// Current image contents.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// Operations performed since creation or the last [`Self::clear_journal`].
    #[must_use]
    pub fn journal(&self) -> &[StoreOp] {
        &self.journal
    }

    /// Forgets recorded operations.
    pub fn clear_journal(&mut self) {
        self.journal.clear();
    }

    /// Makes the next `count` seeks fail.
    #[allow(clippy::missing_const_for_fn)]
    pub fn fail_next_seeks(&mut self, count: u32) {
        self.fail_seeks = count;
    }

    /// Makes the next `count` reads fail.
    #[allow(clippy::missing_const_for_fn)]
    pub fn fail_next_reads(&mut self, count: u32) {
        self.fail_reads = count;
    }

    /// Makes the next `count` writes fail.
    #[allow(clippy::missing_const_for_fn)]
    pub fn fail_next_writes(&mut self, count: u32) {
        self.fail_writes = count;
    }

    fn injected(counter: &mut u32) -> Option<io::Error> {
        if *counter == 0 {
            return None;
        }
        *counter -= 1;
        Some(io::Error::other("injected failure"))
    }

    fn cursor_index(&self) -> usize {
        usize::try_from(self.cursor).unwrap_or(usize::MAX)
    }
}

impl BackingStore for MemoryStore {
    fn open(&mut self, _path: &Path, writable: bool) -> Result<(), StoreError> {
        self.open = true;
        self.writable = writable;
        self.cursor = 0;
        self.journal.push(StoreOp::Open { writable });
        Ok(())
    }

    fn seek(&mut self, offset: u64) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        if let Some(source) = Self::injected(&mut self.fail_seeks) {
            return Err(StoreError::Seek { offset, source });
        }
        self.cursor = offset;
        self.journal.push(StoreOp::Seek(offset));
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, StoreError> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        if let Some(source) = Self::injected(&mut self.fail_reads) {
            return Err(StoreError::Read(source));
        }
        let start = self.cursor_index().min(self.image.len());
        let len = buf.len().min(self.image.len() - start);
        buf[..len].copy_from_slice(&self.image[start..start + len]);
        self.journal.push(StoreOp::Read {
            offset: self.cursor,
            len,
        });
        self.cursor += len as u64;
        Ok(len)
    }

    fn write(&mut self, buf: &[u8]) -> Result<(), StoreError> {
        if !self.open {
            return Err(StoreError::NotOpen);
        }
        if !self.writable {
            return Err(StoreError::Write(io::Error::new(
                io::ErrorKind::PermissionDenied,
                "image opened read-only",
            )));
        }
        if let Some(source) = Self::injected(&mut self.fail_writes) {
            return Err(StoreError::Write(source));
        }
        let start = self.cursor_index();
        let end = start + buf.len();
        if self.image.len() < end {
            self.image.resize(end, 0);
        }
        self.image[start..end].copy_from_slice(buf);
        self.journal.push(StoreOp::Write {
            offset: self.cursor,
            len: buf.len(),
        });
        self.cursor += buf.len() as u64;
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.journal.push(StoreOp::Close);
        }
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
