//! RAM-backed [`FileSystem`] used by the unit tests.

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::{FileSystem, StorageError};

#[derive(Default)]
pub struct MemFileSystem {
    files: BTreeMap<String, Vec<u8>>,
    pub unavailable: bool,
    pub fail_appends: bool,
    pub fail_reads_of: Option<&'static str>,
}

impl MemFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self, name: &str) -> Option<&[u8]> {
        self.files.get(name).map(Vec::as_slice)
    }

    pub fn text(&self, name: &str) -> &str {
        self.contents(name)
            .map(|b| core::str::from_utf8(b).unwrap())
            .unwrap_or("")
    }

    fn check(&self) -> Result<(), StorageError> {
        if self.unavailable {
            return Err(StorageError::Unavailable);
        }
        Ok(())
    }
}

impl FileSystem for MemFileSystem {
    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        self.check()?;
        Ok(self.files.contains_key(name))
    }

    fn create(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        self.files.insert(name.to_string(), contents.to_vec());
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        self.check()?;
        if self.fail_appends {
            return Err(StorageError::Io {
                operation: "append",
            });
        }
        self.files
            .entry(name.to_string())
            .or_default()
            .extend_from_slice(data);
        Ok(())
    }

    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        self.check()?;
        if self.fail_reads_of == Some(name) {
            return Err(StorageError::Io { operation: "read" });
        }
        let file = self.files.get(name).ok_or(StorageError::NotFound)?;
        let start = (offset as usize).min(file.len());
        let n = buf.len().min(file.len() - start);
        buf[..n].copy_from_slice(&file[start..start + n]);
        Ok(n)
    }

    fn remove_all(&mut self) -> Result<usize, StorageError> {
        self.check()?;
        let removed = self.files.len();
        self.files.clear();
        Ok(removed)
    }
}
