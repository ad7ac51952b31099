//! Append-only semicolon CSV stores, one per node class plus one for the
//! master's own sensor.

use core::fmt::Write;

use super::{FileSystem, StorageError};

/// Size of the blocks read while streaming a store.
pub const STREAM_BLOCK: usize = 128;

/// Capacity of one rendered record line.
pub const RECORD_CAPACITY: usize = 160;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Store {
    /// The master's onboard temperature.
    Master,
    /// Node 1: fresh material, with oxygen.
    Apport,
    /// Node 2: maturing pile.
    Maturation,
    /// Node 3: ambient reference outside the pile.
    Exterior,
}

impl Store {
    /// Streaming order.
    pub const ALL: [Store; 4] = [Self::Master, Self::Apport, Self::Maturation, Self::Exterior];

    /// 8.3 file name in the volume root.
    pub const fn file_name(self) -> &'static str {
        match self {
            Self::Master => "MASTER.CSV",
            Self::Apport => "APPORT.CSV",
            Self::Maturation => "MATURAT.CSV",
            Self::Exterior => "EXTERIOR.CSV",
        }
    }

    /// Name announced to the companion app.
    pub const fn label(self) -> &'static str {
        match self {
            Self::Master => "master",
            Self::Apport => "apport",
            Self::Maturation => "maturation",
            Self::Exterior => "exterieur",
        }
    }

    pub const fn header(self) -> &'static str {
        match self {
            Self::Master => "date;temperature;\n",
            Self::Apport => "date;temperature;humidity;oxygene;\n",
            Self::Maturation | Self::Exterior => "date;temperature;humidity;\n",
        }
    }

    /// Number of value columns after the date.
    pub const fn columns(self) -> usize {
        match self {
            Self::Master => 1,
            Self::Apport => 3,
            Self::Maturation | Self::Exterior => 2,
        }
    }
}

/// One line of a store: `{timestamp};{v1};{v2}[;{v3}];\n`.
///
/// Missing values become empty cells so the column layout never shifts.
#[derive(Debug, Clone, Copy)]
pub struct LogRecord<'a> {
    pub timestamp: &'a str,
    pub values: &'a [Option<f32>],
}

impl<'a> LogRecord<'a> {
    pub const fn new(timestamp: &'a str, values: &'a [Option<f32>]) -> Self {
        Self { timestamp, values }
    }

    pub fn render(&self) -> Result<heapless::String<RECORD_CAPACITY>, StorageError> {
        let overflow = |_| StorageError::Io {
            operation: "format record",
        };

        let mut line = heapless::String::new();
        write!(line, "{};", self.timestamp).map_err(overflow)?;
        for value in self.values {
            match value {
                Some(v) => write!(line, "{:.2};", v).map_err(overflow)?,
                None => line.write_char(';').map_err(overflow)?,
            }
        }
        line.write_char('\n').map_err(overflow)?;
        Ok(line)
    }
}

/// Receiver of [`PersistentLog::stream_all`].
///
/// `segment` is called with consecutive slices of one store. A slice ends
/// either right after a `\n` or at a read block boundary, so a line may span
/// several segments.
pub trait LogSink {
    fn begin_store(&mut self, store: Store) -> impl Future<Output = ()>;
    fn segment(&mut self, bytes: &[u8]) -> impl Future<Output = ()>;
    fn end_store(&mut self, store: Store) -> impl Future<Output = ()>;
    fn store_failed(&mut self, store: Store, error: StorageError) -> impl Future<Output = ()>;
}

/// The four CSV stores on one volume.
pub struct PersistentLog<F> {
    fs: F,
}

impl<F: FileSystem> PersistentLog<F> {
    /// Take ownership of the volume and make sure every store exists.
    pub fn open(fs: F) -> Result<Self, StorageError> {
        let mut log = Self { fs };
        log.ensure_initialized()?;
        Ok(log)
    }

    /// Create missing stores with their header row. Existing stores are
    /// never touched. Returns how many stores were created.
    pub fn ensure_initialized(&mut self) -> Result<usize, StorageError> {
        let mut created = 0;
        for store in Store::ALL {
            if !self.fs.exists(store.file_name())? {
                self.fs.create(store.file_name(), store.header().as_bytes())?;
                log::info!("[SD] created {}", store.file_name());
                created += 1;
            }
        }
        Ok(created)
    }

    /// Append exactly one terminated line to `store`.
    pub fn append(&mut self, store: Store, record: &LogRecord<'_>) -> Result<(), StorageError> {
        if record.values.len() != store.columns() {
            log::warn!(
                "[SD] {} expects {} values, got {}",
                store.label(),
                store.columns(),
                record.values.len()
            );
        }
        let line = record.render()?;
        self.fs.append(store.file_name(), line.as_bytes())
    }

    /// Feed every existing store to `sink`, in [`Store::ALL`] order.
    ///
    /// Missing stores are skipped. A store whose first block cannot be read
    /// is reported through [`LogSink::store_failed`] instead of being framed;
    /// a later read failure aborts that store the same way. Returns the
    /// number of stores streamed completely.
    pub async fn stream_all<S: LogSink>(&self, sink: &mut S) -> usize {
        let mut streamed = 0;
        let mut block = [0u8; STREAM_BLOCK];

        for store in Store::ALL {
            let name = store.file_name();
            match self.fs.exists(name) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(e) => {
                    sink.store_failed(store, e).await;
                    continue;
                }
            }

            let mut offset = 0u32;
            let mut read = match self.fs.read_at(name, offset, &mut block) {
                Ok(n) => n,
                Err(e) => {
                    log::error!("[SD] cannot read {}: {}", name, e);
                    sink.store_failed(store, e).await;
                    continue;
                }
            };

            sink.begin_store(store).await;
            let mut failed = false;
            while read > 0 {
                for line in block[..read].split_inclusive(|&b| b == b'\n') {
                    sink.segment(line).await;
                }
                offset += read as u32;

                read = match self.fs.read_at(name, offset, &mut block) {
                    Ok(n) => n,
                    Err(e) => {
                        log::error!("[SD] read of {} failed at {}: {}", name, offset, e);
                        sink.store_failed(store, e).await;
                        failed = true;
                        break;
                    }
                };
            }

            if !failed {
                sink.end_store(store).await;
                streamed += 1;
            }
        }

        streamed
    }

    /// Delete everything on the volume and recreate the stores.
    pub fn erase_all(&mut self) -> Result<(), StorageError> {
        let removed = self.fs.remove_all()?;
        log::warn!("[SD] erased {} entries", removed);
        self.ensure_initialized()?;
        Ok(())
    }

    /// The underlying volume, for other state files such as the clock.
    pub fn volume(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn volume_ref(&self) -> &F {
        &self.fs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::mem::MemFileSystem;
    use alloc::string::String;
    use alloc::vec::Vec;
    use embassy_futures::block_on;

    #[derive(Default)]
    struct Collect {
        events: Vec<String>,
        bytes: Vec<u8>,
    }

    impl LogSink for Collect {
        async fn begin_store(&mut self, store: Store) {
            self.events.push(alloc::format!("begin {}", store.label()));
        }

        async fn segment(&mut self, bytes: &[u8]) {
            self.bytes.extend_from_slice(bytes);
        }

        async fn end_store(&mut self, store: Store) {
            self.events.push(alloc::format!("end {}", store.label()));
        }

        async fn store_failed(&mut self, store: Store, _error: StorageError) {
            self.events.push(alloc::format!("failed {}", store.label()));
        }
    }

    #[test]
    fn test_record_rendering() {
        let line = LogRecord::new("2026-01-17T00:30:00", &[Some(21.5), Some(63.126), Some(20.9)])
            .render()
            .unwrap();
        assert_eq!(line.as_str(), "2026-01-17T00:30:00;21.50;63.13;20.90;\n");
    }

    #[test]
    fn test_record_absent_value_is_empty_cell() {
        let line = LogRecord::new("2026-01-17T00:30:00", &[Some(-3.0), None])
            .render()
            .unwrap();
        assert_eq!(line.as_str(), "2026-01-17T00:30:00;-3.00;;\n");
    }

    #[test]
    fn test_ensure_initialized_is_idempotent() {
        let mut log = PersistentLog::open(MemFileSystem::new()).unwrap();
        log.append(
            Store::Maturation,
            &LogRecord::new("2026-01-17T00:30:00", &[Some(40.0), Some(55.0)]),
        )
        .unwrap();

        assert_eq!(log.ensure_initialized().unwrap(), 0);
        assert_eq!(log.ensure_initialized().unwrap(), 0);

        assert_eq!(
            log.volume_ref().text("MATURAT.CSV"),
            "date;temperature;humidity;\n2026-01-17T00:30:00;40.00;55.00;\n"
        );
        assert_eq!(log.volume_ref().text("MASTER.CSV"), "date;temperature;\n");
    }

    #[test]
    fn test_open_fails_without_volume() {
        let mut fs = MemFileSystem::new();
        fs.unavailable = true;
        assert!(matches!(
            PersistentLog::open(fs),
            Err(StorageError::Unavailable)
        ));
    }

    #[test]
    fn test_erase_all_leaves_only_headers() {
        let mut log = PersistentLog::open(MemFileSystem::new()).unwrap();
        log.volume().create("DATETIME.TXT", b"2026-01-17T00:00:00\n").unwrap();
        log.append(
            Store::Apport,
            &LogRecord::new("2026-01-17T00:30:00", &[Some(1.0), Some(2.0), Some(3.0)]),
        )
        .unwrap();

        log.erase_all().unwrap();

        for store in Store::ALL {
            assert_eq!(log.volume_ref().text(store.file_name()), store.header());
        }
        assert!(!log.volume_ref().exists("DATETIME.TXT").unwrap());
    }

    #[test]
    fn test_stream_all_reproduces_contents() {
        let mut log = PersistentLog::open(MemFileSystem::new()).unwrap();
        for i in 0..25 {
            let stamp = alloc::format!("2026-01-17T{:02}:00:00", i % 24);
            log.append(
                Store::Exterior,
                &LogRecord::new(&stamp, &[Some(i as f32), Some(50.0)]),
            )
            .unwrap();
        }

        let mut sink = Collect::default();
        let streamed = block_on(log.stream_all(&mut sink));
        assert_eq!(streamed, 4);

        let mut expected = Vec::new();
        for store in Store::ALL {
            expected.extend_from_slice(log.volume_ref().contents(store.file_name()).unwrap());
        }
        assert_eq!(sink.bytes, expected);
        assert_eq!(sink.events.first().map(String::as_str), Some("begin master"));
        assert_eq!(sink.events.last().map(String::as_str), Some("end exterieur"));
    }

    #[test]
    fn test_stream_all_reports_unreadable_store_and_continues() {
        let mut fs = MemFileSystem::new();
        fs.fail_reads_of = Some("APPORT.CSV");
        let log = PersistentLog::open(fs).unwrap();

        let mut sink = Collect::default();
        let streamed = block_on(log.stream_all(&mut sink));

        assert_eq!(streamed, 3);
        assert!(sink.events.iter().any(|e| e == "failed apport"));
        assert!(!sink.events.iter().any(|e| e == "begin apport"));
        assert!(sink.events.iter().any(|e| e == "end exterieur"));
    }
}
