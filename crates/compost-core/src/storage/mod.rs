//! Storage abstraction and the append-only CSV stores built on top of it.
//!
//! The SD card driver is blocking, so [`FileSystem`] is a plain synchronous
//! trait. All paths are flat names in the root directory of the volume.

pub mod store;

#[cfg(test)]
pub(crate) mod mem;

pub use store::*;

use thiserror_no_std::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage volume unavailable")]
    Unavailable,
    #[error("file not found")]
    NotFound,
    #[error("I/O failure during {operation}")]
    Io { operation: &'static str },
    #[error("invalid file name")]
    InvalidName,
    #[error("volume full")]
    Full,
}

/// Minimal flat file system the master needs from its storage medium.
pub trait FileSystem {
    fn exists(&self, name: &str) -> Result<bool, StorageError>;

    /// Create `name`, replacing any previous content, and write `contents`.
    fn create(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError>;

    /// Append `data` to `name`, creating the file when missing.
    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError>;

    /// Read up to `buf.len()` bytes starting at `offset`. Returns 0 at end of file.
    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError>;

    /// Delete every entry of the volume root. Returns how many were removed.
    fn remove_all(&mut self) -> Result<usize, StorageError>;
}

impl<F: FileSystem + ?Sized> FileSystem for &mut F {
    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        (**self).exists(name)
    }

    fn create(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        (**self).create(name, contents)
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        (**self).append(name, data)
    }

    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        (**self).read_at(name, offset, buf)
    }

    fn remove_all(&mut self) -> Result<usize, StorageError> {
        (**self).remove_all()
    }
}
