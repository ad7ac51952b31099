//! Fast-forward time and scripted companion sessions.

use std::collections::VecDeque;

use compost_core::radio::CompanionInbox;
use compost_core::time::Timebase;
use embedded_hal_async::delay::DelayNs;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompanionEvent {
    Connect,
    Write(Vec<u8>),
    Disconnect,
}

/// Virtual time that only moves when the controller waits, so a whole
/// wake cycle replays in milliseconds of host time.
pub struct SimTimebase<'a> {
    now_ns: u64,
    inbox: &'a CompanionInbox,
    script: VecDeque<(u64, CompanionEvent)>,
}

impl<'a> SimTimebase<'a> {
    pub fn new(inbox: &'a CompanionInbox, mut script: Vec<(u64, CompanionEvent)>) -> Self {
        script.sort_by_key(|(at, _)| *at);
        Self {
            now_ns: 0,
            inbox,
            script: script.into(),
        }
    }

    fn deliver(&mut self) {
        let now_ms = self.now_ms();
        while self.script.front().is_some_and(|(at, _)| *at <= now_ms) {
            let Some((at, event)) = self.script.pop_front() else {
                break;
            };
            log::info!("[SIM] companion at {}ms: {:?}", at, event);
            match event {
                CompanionEvent::Connect => self.inbox.on_connect(),
                CompanionEvent::Disconnect => self.inbox.on_disconnect(),
                CompanionEvent::Write(payload) => {
                    self.inbox.on_write(&payload);
                }
            }
        }
    }
}

impl DelayNs for SimTimebase<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.now_ns += ns as u64;
        self.deliver();
    }
}

impl Timebase for SimTimebase<'_> {
    fn now_ms(&self) -> u64 {
        self.now_ns / 1_000_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use compost_core::radio::CompanionCommand;
    use embassy_futures::block_on;

    #[test]
    fn test_events_arrive_when_due() {
        let inbox = CompanionInbox::new();
        let script = vec![
            (250, CompanionEvent::Write(b"READ".to_vec())),
            (100, CompanionEvent::Connect),
        ];
        let mut time = SimTimebase::new(&inbox, script);

        block_on(time.delay_ms(100));
        assert!(inbox.is_connected());
        assert_eq!(inbox.take_command(), None);

        block_on(time.delay_ms(200));
        assert_eq!(time.now_ms(), 300);
        assert_eq!(inbox.take_command(), Some(CompanionCommand::Read));
    }
}
