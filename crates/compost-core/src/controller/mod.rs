//! The master's wake-cycle state machine.
//!
//! ```text
//! SCAN -> PROCESS -> WAIT_COMPANION -> PREPARE_SLEEP -> (deep sleep)
//!                          |
//!                          +-> BROKEN_LINK -> (long deep sleep)
//! ```
//!
//! Every wake starts in `Scan`. Nothing crosses a sleep except the stores,
//! the clock file and the [`RetainedState`] block.


use crate::clock::{ClockError, VirtualClock};
use crate::companion::CompanionBridge;
use crate::config::MasterConfig;
use crate::discovery::WirelessDiscovery;
use crate::ingestion::ingest;
use crate::power::{SleepReason, SleepRequest};
use crate::radio::{Central, CompanionInbox, CompanionLink, DiscoveryInbox};
use crate::readings::NodeSlots;
use crate::retained::{RetainedBlock, RetainedState};
use crate::sensors::{OnboardReadings, Sensor};
use crate::storage::{FileSystem, LogRecord, PersistentLog, Store};
use crate::time::Timebase;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterState {
    Scan,
    Process,
    WaitCompanion,
    PrepareSleep,
    BrokenLink,
}

/// Inboxes the radio callbacks write into.
#[derive(Clone, Copy)]
pub struct Inboxes<'a> {
    pub discovery: &'a DiscoveryInbox,
    pub companion: &'a CompanionInbox,
}

pub struct MasterController<'a, F, R, T, O> {
    config: MasterConfig,
    state: MasterState,
    clock: VirtualClock,
    log: Option<PersistentLog<F>>,
    radio: R,
    timebase: T,
    onboard: Option<O>,
    retained: RetainedState,
    retained_block: &'a mut RetainedBlock,
    discovery: WirelessDiscovery<'a>,
    bridge: CompanionBridge<'a>,
    slots: NodeSlots,
    wait_started_ms: u64,
}

impl<'a, F, R, T, O> MasterController<'a, F, R, T, O>
where
    F: FileSystem,
    R: Central + CompanionLink,
    T: Timebase,
    O: Sensor<Readings = OnboardReadings>,
{
    /// Cold-start path, run after every reset and every deep sleep.
    ///
    /// `storage` is `None` when the card could not be brought up. Storage
    /// problems degrade to running without persistence; a malformed clock
    /// file is replaced by the default date.
    pub fn boot(
        config: MasterConfig,
        storage: Option<F>,
        radio: R,
        timebase: T,
        onboard: Option<O>,
        inboxes: Inboxes<'a>,
        retained_block: &'a mut RetainedBlock,
    ) -> Self {
        let config = config.sanitized();

        let mut retained = RetainedState::load_or_fresh(retained_block, &config);
        retained.boot_count = retained.boot_count.wrapping_add(1);

        let mut log = match storage.map(PersistentLog::open) {
            Some(Ok(log)) => Some(log),
            Some(Err(e)) => {
                log::error!("[SD] storage unavailable, running without persistence: {}", e);
                None
            }
            None => {
                log::error!("[SD] no storage card, running without persistence");
                None
            }
        };

        let clock = match log.as_mut() {
            Some(log) => restore_clock(log),
            None => VirtualClock::seeded(),
        };

        log::info!(
            "[BOOT] boot #{}, clock {}, sleep {}s, escalation {}",
            retained.boot_count,
            clock.format(),
            retained.sleep_duration_secs,
            retained.escalation_count
        );

        let mut controller = Self {
            discovery: WirelessDiscovery::new(inboxes.discovery),
            bridge: CompanionBridge::new(inboxes.companion, &config),
            config,
            state: MasterState::Scan,
            clock,
            log,
            radio,
            timebase,
            onboard,
            retained,
            retained_block,
            slots: NodeSlots::new(),
            wait_started_ms: 0,
        };
        controller.save_retained();
        controller
    }

    /// Run one state. Returns the sleep to enter once the cycle is over.
    pub async fn step(&mut self) -> Option<SleepRequest> {
        match self.state {
            MasterState::Scan => {
                self.scan().await;
                None
            }
            MasterState::Process => {
                self.process().await;
                None
            }
            MasterState::WaitCompanion => {
                self.wait_companion().await;
                None
            }
            MasterState::PrepareSleep => Some(self.prepare_sleep().await),
            MasterState::BrokenLink => Some(self.broken_link().await),
        }
    }

    /// Step until the cycle ends. The caller hands the request to
    /// [`PowerControl::suspend`](crate::power::PowerControl::suspend).
    pub async fn run_until_sleep(&mut self) -> SleepRequest {
        loop {
            if let Some(request) = self.step().await {
                return request;
            }
        }
    }

    async fn scan(&mut self) {
        self.clock.advance(self.retained.last_sleep_secs);
        // A reset before the next sleep must not advance the clock again.
        self.retained.last_sleep_secs = 0;
        self.save_retained();
        if let Some(log) = self.log.as_mut() {
            if let Err(e) = self.clock.persist(log.volume()) {
                log::error!("[CLOCK] persist failed: {}", e);
            }
        }

        let stamp = self.clock.format();
        log::info!("[STATE] SCAN at {}", stamp);

        self.slots.reset();
        let found = self
            .discovery
            .start_scan(&mut self.radio, self.config.scan_window_secs)
            .await;

        let sleep_us = self.retained.sleep_duration_secs as u64 * 1_000_000;
        for node in found.iter() {
            // Failures are contained per node and already logged.
            let _ = ingest(&mut self.radio, node, &stamp, sleep_us, &mut self.slots).await;
        }

        self.discovery.stop_and_clear(&mut self.radio).await;
        self.state = MasterState::Process;
    }

    async fn process(&mut self) {
        log::info!("[STATE] PROCESS");

        for slot in self.slots.iter() {
            if slot.received {
                log::info!(
                    "[DATA] node {}: T={:?} H={:?} P={:?} O2={:?}",
                    slot.id,
                    slot.temperature,
                    slot.humidity,
                    slot.pressure,
                    slot.oxygen
                );
            } else {
                log::info!("[DATA] node {}: no data", slot.id);
            }
        }

        if let Some(log) = self.log.as_mut() {
            for slot in self.slots.received() {
                let columns = slot.columns();
                let record = LogRecord::new(&slot.timestamp, &columns);
                if let Err(e) = log.append(slot.id.store(), &record) {
                    log::error!("[SD] node {} not saved: {}", slot.id, e);
                }
            }
        }

        if let Some(sensor) = self.onboard.as_mut() {
            match sensor.read().await {
                Ok(readings) => {
                    log::info!("[DATA] master: T={:.2}", readings.temperature_celsius);
                    if let Some(log) = self.log.as_mut() {
                        let stamp = self.clock.format();
                        let values = [Some(readings.temperature_celsius)];
                        if let Err(e) = log.append(Store::Master, &LogRecord::new(&stamp, &values)) {
                            log::error!("[SD] master reading not saved: {}", e);
                        }
                    }
                }
                Err(e) => log::warn!("[DATA] onboard sensor: {}", e),
            }
        }

        if self.slots.received_count() == 0 {
            self.retained.unreachable_cycles = self.retained.unreachable_cycles.saturating_add(1);
            log::warn!(
                "[STATE] no node read, {} empty cycle(s) in a row",
                self.retained.unreachable_cycles
            );
        } else {
            self.retained.unreachable_cycles = 0;
        }

        self.retained.escalation_count = 0;
        self.save_retained();

        if let Err(e) = self.radio.start_advertising().await {
            log::error!("[BLE] advertising failed: {}", e);
        }

        self.wait_started_ms = self.timebase.now_ms();
        self.state = MasterState::WaitCompanion;
        log::info!("[STATE] WAIT_COMPANION");
    }

    /// One poll of the companion wait.
    async fn wait_companion(&mut self) {
        let now = self.timebase.now_ms();
        if now.saturating_sub(self.wait_started_ms) > self.sleep_duration_ms() {
            self.retained.escalation_count = self.retained.escalation_count.saturating_add(1);
            self.wait_started_ms = now;
            self.save_retained();
            log::info!(
                "[STATE] companion timeout {}/{}",
                self.retained.escalation_count,
                self.config.max_timeout_count
            );
        }

        let served = self
            .bridge
            .service(
                &mut self.radio,
                self.log.as_mut(),
                &self.clock,
                &mut self.timebase,
            )
            .await;
        if let Some(command) = served {
            log::info!("[STATE] served {:?}, escalation reset", command);
            self.retained.escalation_count = 0;
            self.wait_started_ms = self.timebase.now_ms();
            self.save_retained();
        }

        if self.retained.escalation_count >= self.config.max_timeout_count {
            self.state = if self.link_broken() {
                MasterState::BrokenLink
            } else {
                MasterState::PrepareSleep
            };
        } else {
            self.timebase.delay_ms(self.config.companion_poll_ms).await;
        }
    }

    async fn prepare_sleep(&mut self) -> SleepRequest {
        log::info!("[STATE] PREPARE_SLEEP");
        self.radio.shutdown().await;

        let request = SleepRequest {
            duration_secs: self.retained.sleep_duration_secs,
            reason: SleepReason::Scheduled,
        };
        self.retained.last_sleep_secs = request.duration_secs;
        self.save_retained();
        request
    }

    /// Back off after too many cycles without a single node. The counter is
    /// kept, so the next empty cycle backs off again right away; any
    /// successful read returns to the normal schedule.
    async fn broken_link(&mut self) -> SleepRequest {
        log::warn!(
            "[STATE] BROKEN_LINK after {} empty cycles",
            self.retained.unreachable_cycles
        );
        self.radio.shutdown().await;

        let request = SleepRequest {
            duration_secs: self.config.broken_link_sleep_secs,
            reason: SleepReason::BrokenLink,
        };
        self.retained.last_sleep_secs = request.duration_secs;
        self.save_retained();
        request
    }

    fn link_broken(&self) -> bool {
        self.config.broken_link_cycles > 0
            && self.retained.unreachable_cycles >= self.config.broken_link_cycles
    }

    fn sleep_duration_ms(&self) -> u64 {
        self.retained.sleep_duration_secs as u64 * 1000
    }

    fn save_retained(&mut self) {
        if let Err(e) = self.retained.store(self.retained_block) {
            log::error!("[RTC] {}", e);
        }
    }

    pub fn state(&self) -> MasterState {
        self.state
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn slots(&self) -> &NodeSlots {
        &self.slots
    }

    pub fn retained(&self) -> &RetainedState {
        &self.retained
    }

    pub fn storage(&self) -> Option<&PersistentLog<F>> {
        self.log.as_ref()
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn timebase(&self) -> &T {
        &self.timebase
    }
}

fn restore_clock<F: FileSystem>(log: &mut PersistentLog<F>) -> VirtualClock {
    match VirtualClock::load(log.volume()) {
        Ok(clock) => clock,
        Err(ClockError::Malformed) => {
            log::warn!("[CLOCK] persisted time malformed, reseeding");
            let clock = VirtualClock::seeded();
            if let Err(e) = clock.persist(log.volume()) {
                log::error!("[CLOCK] persist failed: {}", e);
            }
            clock
        }
        Err(e) => {
            log::error!("[CLOCK] {}, reseeding", e);
            VirtualClock::seeded()
        }
    }
}
