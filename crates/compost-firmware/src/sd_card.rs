use compost_core::storage::{FileSystem, StorageError};
use embedded_sdmmc::{
    Directory, Error, Mode, SdCard, SdCardError, ShortFileName, TimeSource, Timestamp,
    VolumeIdx, VolumeManager,
};

/// Entries collected per listing pass; a full batch triggers another pass.
const ERASE_BATCH: usize = 16;

/// Directory levels below the root an erase descends into. The volume
/// manager holds four open directories, the root included.
const MAX_DEPTH: usize = 3;

type SdDirectory<'v, S, D> = Directory<'v, SdCard<S, D>, FixedTimeSource, 4, 4, 1>;

/// Files carry a fixed date; record timestamps live in the CSV rows.
#[derive(Clone, Copy, Debug, Default)]
pub struct FixedTimeSource;

impl TimeSource for FixedTimeSource {
    fn get_timestamp(&self) -> Timestamp {
        // 2026-01-17 00:00:00
        Timestamp {
            year_since_1970: 56,
            zero_indexed_month: 0,
            zero_indexed_day: 16,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

/// The master's stores on the FAT volume of the SD card.
///
/// Operations are blocking; every call opens the volume and root directory,
/// does its work and closes them again, so nothing is left open across a
/// deep sleep.
pub struct SdFileSystem<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    volume_mgr: VolumeManager<SdCard<S, D>, FixedTimeSource, 4, 4, 1>,
}

impl<S, D> SdFileSystem<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    /// Probe the card and wrap it. Fails when no card answers.
    pub fn new(sd_card: SdCard<S, D>) -> Result<Self, StorageError> {
        let size = sd_card.num_bytes().map_err(|e| {
            log::error!("[SD] card not detected: {:?}", e);
            StorageError::Unavailable
        })?;
        log::info!("[SD] card detected, {} MiB", size / (1024 * 1024));

        let volume_mgr = VolumeManager::new(sd_card, FixedTimeSource);
        Ok(Self { volume_mgr })
    }
}

fn map_err(operation: &'static str) -> impl Fn(Error<SdCardError>) -> StorageError {
    move |e| match e {
        Error::NotFound => StorageError::NotFound,
        Error::DiskFull | Error::NotEnoughSpace => StorageError::Full,
        Error::FilenameError(_) => StorageError::InvalidName,
        Error::DeviceError(_) | Error::NoSuchVolume | Error::FormatError(_) => {
            log::error!("[SD] {} failed: {:?}", operation, e);
            StorageError::Unavailable
        }
        _ => {
            log::error!("[SD] {} failed: {:?}", operation, e);
            StorageError::Io { operation }
        }
    }
}

impl<S, D> FileSystem for SdFileSystem<S, D>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    fn exists(&self, name: &str) -> Result<bool, StorageError> {
        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(map_err("open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(map_err("open root"))?;

        let found = match root_dir.find_directory_entry(name) {
            Ok(_) => true,
            Err(Error::NotFound) => false,
            Err(e) => return Err(map_err("stat")(e)),
        };

        root_dir.close().map_err(map_err("close root"))?;
        volume0.close().map_err(map_err("close volume"))?;
        Ok(found)
    }

    fn create(&mut self, name: &str, contents: &[u8]) -> Result<(), StorageError> {
        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(map_err("open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(map_err("open root"))?;

        let file = root_dir
            .open_file_in_dir(name, Mode::ReadWriteCreateOrTruncate)
            .map_err(map_err("create"))?;
        file.write(contents).map_err(map_err("write"))?;

        file.close().map_err(map_err("close file"))?;
        root_dir.close().map_err(map_err("close root"))?;
        volume0.close().map_err(map_err("close volume"))?;
        Ok(())
    }

    fn append(&mut self, name: &str, data: &[u8]) -> Result<(), StorageError> {
        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(map_err("open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(map_err("open root"))?;

        let file = root_dir
            .open_file_in_dir(name, Mode::ReadWriteCreateOrAppend)
            .map_err(map_err("open"))?;
        file.write(data).map_err(map_err("append"))?;

        // Closing flushes the directory entry; a sleep right after must not lose the row.
        file.close().map_err(map_err("close file"))?;
        root_dir.close().map_err(map_err("close root"))?;
        volume0.close().map_err(map_err("close volume"))?;
        Ok(())
    }

    fn read_at(&self, name: &str, offset: u32, buf: &mut [u8]) -> Result<usize, StorageError> {
        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(map_err("open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(map_err("open root"))?;

        let file = root_dir
            .open_file_in_dir(name, Mode::ReadOnly)
            .map_err(map_err("open"))?;

        let read = if offset >= file.length() {
            0
        } else {
            file.seek_from_start(offset).map_err(map_err("seek"))?;
            file.read(buf).map_err(map_err("read"))?
        };

        file.close().map_err(map_err("close file"))?;
        root_dir.close().map_err(map_err("close root"))?;
        volume0.close().map_err(map_err("close volume"))?;
        Ok(read)
    }

    fn remove_all(&mut self) -> Result<usize, StorageError> {
        let volume0 = self
            .volume_mgr
            .open_volume(VolumeIdx(0))
            .map_err(map_err("open volume"))?;
        let root_dir = volume0.open_root_dir().map_err(map_err("open root"))?;

        let removed = clear_dir(&root_dir, MAX_DEPTH);

        root_dir.close().map_err(map_err("close root"))?;
        volume0.close().map_err(map_err("close volume"))?;
        removed
    }
}

/// Delete every file below `dir`, descending at most `depth` levels.
///
/// embedded-sdmmc cannot remove directories, so emptied subdirectories stay
/// on the card. Files are listed and deleted in batches until a pass finds
/// none. Anything that cannot be emptied fails the erase.
fn clear_dir<S, D>(dir: &SdDirectory<'_, S, D>, depth: usize) -> Result<usize, StorageError>
where
    S: embedded_hal::spi::SpiDevice<u8>,
    D: embedded_hal::delay::DelayNs,
{
    let mut removed = 0;

    let mut subdirs: heapless::Vec<ShortFileName, ERASE_BATCH> = heapless::Vec::new();
    let mut too_many_dirs = false;
    dir.iterate_dir(|entry| {
        if entry.attributes.is_directory()
            && entry.name != ShortFileName::this_dir()
            && entry.name != ShortFileName::parent_dir()
            && subdirs.push(entry.name.clone()).is_err()
        {
            too_many_dirs = true;
        }
    })
    .map_err(map_err("list"))?;

    if too_many_dirs || (!subdirs.is_empty() && depth == 0) {
        log::error!("[SD] directory tree too wide or deep to erase");
        return Err(StorageError::Io { operation: "erase" });
    }

    for name in subdirs.iter() {
        let child = dir.open_dir(name).map_err(map_err("open dir"))?;
        let result = clear_dir(&child, depth - 1);
        child.close().map_err(map_err("close dir"))?;
        removed += result?;
        log::warn!("[SD] directory {} emptied but left in place", name);
    }

    loop {
        let mut files: heapless::Vec<ShortFileName, ERASE_BATCH> = heapless::Vec::new();
        let mut full = false;
        dir.iterate_dir(|entry| {
            if entry.attributes.is_directory() || entry.attributes.is_volume() {
                return;
            }
            if files.push(entry.name.clone()).is_err() {
                full = true;
            }
        })
        .map_err(map_err("list"))?;

        for name in files.iter() {
            dir.delete_file_in_dir(name).map_err(map_err("delete"))?;
        }
        removed += files.len();

        if !full {
            break;
        }
    }

    Ok(removed)
}
