//! A host directory standing in for the storage card.

use std::fs::{self, File, OpenOptions};
use std::io::{self, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use compost_core::storage::{FileSystem, StorageError};

pub struct HostFileSystem {
    root: PathBuf,
}

impl HostFileSystem {
    /// Use `root` as the volume, creating it when missing.
    pub fn open(root: &Path) -> Result<Self, StorageError> {
        fs::create_dir_all(root).map_err(|e| {
            log::error!("[SD] cannot create {}: {}", root.display(), e);
            StorageError::Unavailable
        })?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn path(&self, name: &str) -> Result<PathBuf, StorageError> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            return Err(StorageError::InvalidName);
        }
        Ok(self.root.join(name))
    }
}

fn map_io(operation: &'static str) -> impl Fn(io::Error) -> StorageError {
    move |e| match e.kind() {
        ErrorKind::NotFound => StorageError::NotFound,
        ErrorKind::StorageFull => StorageError::Full,
        _ => {
            log::debug!("[SD] {} failed: {}", operation, e);
            StorageError::Io { operation }
        }
    }
}

impl FileSystem for HostFileSystem {
    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let path = self.path(name)?;
        path.try_exists().map_err(map_io("stat"))
    }

    fn create(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        let path = self.path(name)?;
        fs::write(path, contents).map_err(map_io("create"))
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let path = self.path(name)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(map_io("open"))?;
        file.write_all(data).map_err(map_io("append"))
    }

    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        let path = self.path(name)?;
        let mut file = File::open(path).map_err(map_io("open"))?;
        file.seek(SeekFrom::Start(offset as u64))
            .map_err(map_io("seek"))?;
        file.read(buf).map_err(map_io("read"))
    }

    fn remove_all(&mut self) -> Result<usize, StorageError> {
        let mut removed = 0;
        for entry in fs::read_dir(&self.root).map_err(map_io("list"))? {
            let entry = entry.map_err(map_io("list"))?;
            if entry.file_type().map_err(map_io("stat"))?.is_dir() {
                fs::remove_dir_all(entry.path()).map_err(map_io("remove dir"))?;
            } else {
                fs::remove_file(entry.path()).map_err(map_io("remove"))?;
            }
            removed += 1;
        }
        Ok(removed)
    }
}
