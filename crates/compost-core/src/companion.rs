//! Companion app service: commands in, chunked log stream out.
//!
//! Notification sequence for `READ`:
//!
//! ```text
//! {"file":"master"}      framing, one per store
//! date;temperature;\n    raw store bytes, <= chunk_max_lines lines
//! ...                    and <= chunk_max_bytes bytes each
//! {"file":"apport"}
//! ...
//! {"end":true}           sentinel after the last store
//! ```
//!
//! `CLEAR` answers with a single `{"status":"cleared"}`. Any failure is
//! reported as `{"error":"<reason>"}`.

use core::fmt::Write;

use crate::clock::VirtualClock;
use crate::config::{MasterConfig, NOTIFICATION_CAPACITY};
use crate::radio::{CompanionCommand, CompanionInbox, CompanionLink};
use crate::storage::{FileSystem, LogSink, PersistentLog, StorageError, Store};
use crate::time::Timebase;

pub const END_MESSAGE: &[u8] = br#"{"end":true}"#;
pub const CLEARED_MESSAGE: &[u8] = br#"{"status":"cleared"}"#;

pub type Notification = heapless::Vec<u8, NOTIFICATION_CAPACITY>;

/// `{"<key>":"<value>"}` with `"` and `\` escaped. Values that do not fit
/// are cut short.
pub fn json_message(key: &str, value: &str) -> Notification {
    let mut out = Notification::new();
    let _ = out.extend_from_slice(b"{\"");
    let _ = out.extend_from_slice(key.as_bytes());
    let _ = out.extend_from_slice(b"\":\"");
    // Room for the closing `"}`.
    let limit = NOTIFICATION_CAPACITY - 2;
    for &b in value.as_bytes() {
        let escaped: &[u8] = match b {
            b'"' => b"\\\"",
            b'\\' => b"\\\\",
            _ => core::slice::from_ref(&b),
        };
        if out.len() + escaped.len() > limit {
            break;
        }
        let _ = out.extend_from_slice(escaped);
    }
    let _ = out.extend_from_slice(b"\"}");
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    pub max_lines: usize,
    pub max_bytes: usize,
    pub pacing_ms: u32,
}

impl From<&MasterConfig> for ChunkConfig {
    fn from(config: &MasterConfig) -> Self {
        Self {
            max_lines: config.chunk_max_lines.max(1),
            max_bytes: config.chunk_max_bytes.clamp(1, NOTIFICATION_CAPACITY),
            pacing_ms: config.chunk_pacing_ms,
        }
    }
}

/// Batches store bytes into paced notifications.
struct NotificationSink<'a, L, T> {
    link: &'a mut L,
    timebase: &'a mut T,
    chunk: ChunkConfig,
    pending: Notification,
    pending_lines: usize,
    sent: usize,
    dropped: usize,
}

impl<'a, L: CompanionLink, T: Timebase> NotificationSink<'a, L, T> {
    fn new(link: &'a mut L, timebase: &'a mut T, chunk: ChunkConfig) -> Self {
        Self {
            link,
            timebase,
            chunk,
            pending: Notification::new(),
            pending_lines: 0,
            sent: 0,
            dropped: 0,
        }
    }

    async fn send(&mut self, payload: &[u8]) {
        match self.link.notify(payload).await {
            Ok(()) => self.sent += 1,
            Err(e) => {
                self.dropped += 1;
                log::warn!("[BLE] notification of {} bytes lost: {}", payload.len(), e);
            }
        }
        self.timebase.delay_ms(self.chunk.pacing_ms).await;
    }

    async fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let chunk = core::mem::take(&mut self.pending);
        self.pending_lines = 0;
        self.send(&chunk).await;
    }

    async fn error(&mut self, reason: &str) {
        self.flush().await;
        let message = json_message("error", reason);
        self.send(&message).await;
    }

    async fn finish(mut self) -> (usize, usize) {
        self.flush().await;
        self.send(END_MESSAGE).await;
        (self.sent, self.dropped)
    }
}

impl<L: CompanionLink, T: Timebase> LogSink for NotificationSink<'_, L, T> {
    async fn begin_store(&mut self, store: Store) {
        self.flush().await;
        let framing = json_message("file", store.label());
        self.send(&framing).await;
    }

    async fn segment(&mut self, bytes: &[u8]) {
        // Keep whole lines together when the next one would not fit.
        if !self.pending.is_empty() && self.pending.len() + bytes.len() > self.chunk.max_bytes {
            self.flush().await;
        }

        let mut rest = bytes;
        while !rest.is_empty() {
            let room = self.chunk.max_bytes - self.pending.len();
            let (now, later) = rest.split_at(rest.len().min(room));
            let _ = self.pending.extend_from_slice(now);
            self.pending_lines += now.iter().filter(|&&b| b == b'\n').count();
            rest = later;

            if self.pending.len() >= self.chunk.max_bytes
                || self.pending_lines >= self.chunk.max_lines
            {
                self.flush().await;
            }
        }
    }

    async fn end_store(&mut self, _store: Store) {
        self.flush().await;
    }

    async fn store_failed(&mut self, store: Store, error: StorageError) {
        let mut reason: heapless::String<64> = heapless::String::new();
        let _ = write!(reason, "{}: {}", store.label(), error);
        self.error(&reason).await;
    }
}

/// Serves the companion app between controller steps.
pub struct CompanionBridge<'a> {
    inbox: &'a CompanionInbox,
    chunk: ChunkConfig,
}

impl<'a> CompanionBridge<'a> {
    pub fn new(inbox: &'a CompanionInbox, config: &MasterConfig) -> Self {
        Self {
            inbox,
            chunk: ChunkConfig::from(config),
        }
    }

    /// Handle whatever the radio callbacks left in the inbox: re-arm
    /// advertising after a disconnect, then serve at most one command.
    ///
    /// Returns the command that was served.
    pub async fn service<F, L, T>(
        &self,
        link: &mut L,
        log: Option<&mut PersistentLog<F>>,
        clock: &VirtualClock,
        timebase: &mut T,
    ) -> Option<CompanionCommand>
    where
        F: FileSystem,
        L: CompanionLink,
        T: Timebase,
    {
        if self.inbox.take_readvertise() {
            match link.start_advertising().await {
                Ok(()) => log::info!("[BLE] advertising re-armed"),
                Err(e) => log::error!("[BLE] cannot re-arm advertising: {}", e),
            }
        }

        let command = self.inbox.take_command()?;
        match command {
            CompanionCommand::Read => self.stream_logs(link, log.as_deref(), timebase).await,
            CompanionCommand::Clear => self.clear_logs(link, log, clock, timebase).await,
        }
        Some(command)
    }

    async fn stream_logs<F, L, T>(&self, link: &mut L, log: Option<&PersistentLog<F>>, timebase: &mut T)
    where
        F: FileSystem,
        L: CompanionLink,
        T: Timebase,
    {
        log::info!("[BLE] streaming logs to companion");
        let mut sink = NotificationSink::new(link, timebase, self.chunk);
        match log {
            Some(log) => {
                let streamed = log.stream_all(&mut sink).await;
                log::debug!("[BLE] {} store(s) streamed", streamed);
            }
            None => sink.error("storage unavailable").await,
        }
        let (sent, dropped) = sink.finish().await;
        log::info!("[BLE] transfer done, {} notifications, {} lost", sent, dropped);
    }

    async fn clear_logs<F, L, T>(
        &self,
        link: &mut L,
        log: Option<&mut PersistentLog<F>>,
        clock: &VirtualClock,
        timebase: &mut T,
    ) where
        F: FileSystem,
        L: CompanionLink,
        T: Timebase,
    {
        log::warn!("[BLE] companion requested erase");
        let mut sink = NotificationSink::new(link, timebase, self.chunk);

        let Some(log) = log else {
            sink.error("storage unavailable").await;
            return;
        };

        match log.erase_all() {
            Ok(()) => {
                // The erase takes the clock file with it.
                if let Err(e) = clock.persist(log.volume()) {
                    log::error!("[CLOCK] re-persist after erase failed: {}", e);
                }
                sink.send(CLEARED_MESSAGE).await;
            }
            Err(e) => {
                log::error!("[SD] erase failed: {}", e);
                let mut reason: heapless::String<64> = heapless::String::new();
                let _ = write!(reason, "{}", e);
                sink.error(&reason).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::CLOCK_FILE;
    use crate::storage::LogRecord;
    use crate::storage::mem::MemFileSystem;
    use crate::testing::{FakeRadio, FakeTimebase};
    use alloc::format;
    use alloc::vec::Vec;
    use embassy_futures::block_on;

    fn filled_log(rows: usize) -> PersistentLog<MemFileSystem> {
        let mut log = PersistentLog::open(MemFileSystem::new()).unwrap();
        for i in 0..rows {
            let stamp = format!("2026-01-{:02}T{:02}:30:00", 17 + i / 24, i % 24);
            log.append(Store::Master, &LogRecord::new(&stamp, &[Some(20.0 + i as f32)]))
                .unwrap();
            log.append(
                Store::Apport,
                &LogRecord::new(&stamp, &[Some(55.5), Some(61.25), Some(19.75)]),
            )
            .unwrap();
        }
        log
    }

    fn is_control(payload: &[u8]) -> bool {
        payload.starts_with(b"{\"file\":") || payload == END_MESSAGE
    }

    fn serve(
        radio: &mut FakeRadio,
        log: Option<&mut PersistentLog<MemFileSystem>>,
        inbox: &CompanionInbox,
        config: &MasterConfig,
    ) -> Option<CompanionCommand> {
        let bridge = CompanionBridge::new(inbox, config);
        let mut timebase = FakeTimebase::new();
        block_on(bridge.service(radio, log, &VirtualClock::seeded(), &mut timebase))
    }

    #[test]
    fn test_json_message_escapes() {
        assert_eq!(json_message("file", "apport").as_slice(), br#"{"file":"apport"}"#);
        assert_eq!(json_message("error", r#"a"b\c"#).as_slice(), br#"{"error":"a\"b\\c"}"#);
    }

    #[test]
    fn test_read_streams_exact_bytes() {
        let mut log = filled_log(37);
        let inbox = CompanionInbox::new();
        inbox.on_write(b"READ");
        let mut radio = FakeRadio::default();

        let served = serve(&mut radio, Some(&mut log), &inbox, &MasterConfig::default());
        assert_eq!(served, Some(CompanionCommand::Read));

        let data: Vec<u8> = radio
            .notifications
            .iter()
            .filter(|n| !is_control(n))
            .flat_map(|n| n.iter().copied())
            .collect();

        let mut expected = Vec::new();
        for store in Store::ALL {
            expected.extend_from_slice(log.volume_ref().contents(store.file_name()).unwrap());
        }
        assert_eq!(data, expected);
        assert_eq!(radio.notifications.last().unwrap().as_slice(), END_MESSAGE);
    }

    #[test]
    fn test_read_respects_chunk_bounds_and_framing() {
        let mut log = filled_log(23);
        let inbox = CompanionInbox::new();
        inbox.on_write(b"READ");
        let mut radio = FakeRadio::default();
        let config = MasterConfig::default();

        serve(&mut radio, Some(&mut log), &inbox, &config);

        let framing: Vec<&str> = radio
            .notifications
            .iter()
            .filter(|n| n.starts_with(b"{\"file\":"))
            .map(|n| core::str::from_utf8(n).unwrap())
            .collect();
        assert_eq!(
            framing,
            [
                r#"{"file":"master"}"#,
                r#"{"file":"apport"}"#,
                r#"{"file":"maturation"}"#,
                r#"{"file":"exterieur"}"#,
            ]
        );

        for n in radio.notifications.iter().filter(|n| !is_control(n)) {
            assert!(n.len() <= config.chunk_max_bytes);
            assert!(n.iter().filter(|&&b| b == b'\n').count() <= config.chunk_max_lines);
        }

        let first_apport = radio
            .notifications
            .iter()
            .position(|n| n.as_slice() == br#"{"file":"apport"}"#)
            .unwrap();
        assert!(radio.notifications[first_apport + 1].starts_with(b"date;temperature;humidity;oxygene;\n"));
    }

    #[test]
    fn test_read_paces_every_notification() {
        let mut log = filled_log(5);
        let inbox = CompanionInbox::new();
        inbox.on_write(b"READ");
        let mut radio = FakeRadio::default();
        let bridge = CompanionBridge::new(&inbox, &MasterConfig::default());
        let mut timebase = FakeTimebase::new();

        block_on(bridge.service(&mut radio, Some(&mut log), &VirtualClock::seeded(), &mut timebase));

        assert_eq!(timebase.now_ms(), 100 * radio.notifications.len() as u64);
    }

    #[test]
    fn test_lost_notifications_do_not_stop_the_transfer() {
        let mut log = filled_log(12);
        let inbox = CompanionInbox::new();
        inbox.on_write(b"READ");
        let mut radio = FakeRadio {
            fail_notify: true,
            ..FakeRadio::default()
        };
        let bridge = CompanionBridge::new(&inbox, &MasterConfig::default());
        let mut timebase = FakeTimebase::new();

        let served =
            block_on(bridge.service(&mut radio, Some(&mut log), &VirtualClock::seeded(), &mut timebase));

        assert_eq!(served, Some(CompanionCommand::Read));
        assert!(radio.notifications.is_empty());
        let framing = radio
            .lost
            .iter()
            .filter(|n| n.starts_with(b"{\"file\":"))
            .count();
        assert_eq!(framing, Store::ALL.len());
        assert_eq!(radio.lost.last().unwrap().as_slice(), END_MESSAGE);
        // Every attempt is paced, lost or not.
        assert_eq!(timebase.now_ms(), 100 * radio.lost.len() as u64);
    }

    #[test]
    fn test_read_without_storage_reports_error_then_end() {
        let inbox = CompanionInbox::new();
        inbox.on_write(b"READ");
        let mut radio = FakeRadio::default();

        serve(&mut radio, None, &inbox, &MasterConfig::default());

        assert_eq!(radio.notifications.len(), 2);
        assert_eq!(radio.notifications[0].as_slice(), br#"{"error":"storage unavailable"}"#);
        assert_eq!(radio.notifications[1].as_slice(), END_MESSAGE);
    }

    #[test]
    fn test_unreadable_store_reports_error_and_continues() {
        let mut fs = MemFileSystem::new();
        fs.fail_reads_of = Some("MATURAT.CSV");
        let mut log = PersistentLog::open(fs).unwrap();
        let inbox = CompanionInbox::new();
        inbox.on_write(b"READ");
        let mut radio = FakeRadio::default();

        serve(&mut radio, Some(&mut log), &inbox, &MasterConfig::default());

        assert!(radio
            .notifications
            .iter()
            .any(|n| n.starts_with(b"{\"error\":\"maturation: ")));
        assert!(radio
            .notifications
            .iter()
            .any(|n| n.as_slice() == br#"{"file":"exterieur"}"#));
        assert_eq!(radio.notifications.last().unwrap().as_slice(), END_MESSAGE);
    }

    #[test]
    fn test_clear_erases_and_acknowledges() {
        let mut log = filled_log(4);
        let inbox = CompanionInbox::new();
        inbox.on_write(b"CLEAR");
        let mut radio = FakeRadio::default();

        let served = serve(&mut radio, Some(&mut log), &inbox, &MasterConfig::default());

        assert_eq!(served, Some(CompanionCommand::Clear));
        assert_eq!(radio.notifications.len(), 1);
        assert_eq!(radio.notifications[0].as_slice(), CLEARED_MESSAGE);
        for store in Store::ALL {
            assert_eq!(log.volume_ref().text(store.file_name()), store.header());
        }
        assert_eq!(log.volume_ref().text(CLOCK_FILE), "2026-01-17T00:00:00\n");
    }

    #[test]
    fn test_clear_failure_reports_error() {
        let mut log = filled_log(1);
        log.volume().unavailable = true;
        let inbox = CompanionInbox::new();
        inbox.on_write(b"CLEAR");
        let mut radio = FakeRadio::default();

        serve(&mut radio, Some(&mut log), &inbox, &MasterConfig::default());

        assert_eq!(
            radio.notifications[0].as_slice(),
            br#"{"error":"storage volume unavailable"}"#
        );
    }

    #[test]
    fn test_disconnect_rearms_advertising_without_command() {
        let inbox = CompanionInbox::new();
        inbox.on_connect();
        inbox.on_disconnect();
        let mut radio = FakeRadio::default();

        let served = serve(&mut radio, None, &inbox, &MasterConfig::default());

        assert_eq!(served, None);
        assert_eq!(radio.advertising_starts, 1);
        assert!(radio.notifications.is_empty());
    }

    #[test]
    fn test_unknown_payload_serves_nothing() {
        let inbox = CompanionInbox::new();
        inbox.on_write(b"DELETE");
        let mut radio = FakeRadio::default();

        assert_eq!(serve(&mut radio, None, &inbox, &MasterConfig::default()), None);
        assert!(radio.notifications.is_empty());
    }
}
