use core::sync::atomic::{AtomicBool, Ordering};
use core::time::Duration;

use compost_core::power::{PowerControl, SleepRequest};
use compost_core::retained::{RETAINED_LEN, RetainedBlock};
use esp_hal::peripherals::LPWR;
use esp_hal::rtc_cntl::Rtc;
use esp_hal::rtc_cntl::sleep::TimerWakeupSource;

/// Survives deep sleep. Holds garbage after power-on, which the magic
/// check of `RetainedState` rejects.
#[esp_hal::ram(unstable(rtc_fast, persistent))]
static mut RETAINED: RetainedBlock = [0; RETAINED_LEN];

static RETAINED_TAKEN: AtomicBool = AtomicBool::new(false);

/// The retained block, handed out once per boot.
pub fn take_retained_block() -> Option<&'static mut RetainedBlock> {
    if RETAINED_TAKEN.swap(true, Ordering::AcqRel) {
        return None;
    }
    // SAFETY: the flag above guarantees a single live reference.
    Some(unsafe { &mut *(&raw mut RETAINED) })
}

pub struct DeepSleep {
    rtc: Rtc<'static>,
}

impl DeepSleep {
    pub fn new(lpwr: LPWR<'static>) -> Self {
        Self { rtc: Rtc::new(lpwr) }
    }
}

impl PowerControl for DeepSleep {
    fn suspend(&mut self, request: SleepRequest) -> ! {
        log::info!(
            "[SLEEP] deep sleep for {}s ({:?})",
            request.duration_secs,
            request.reason
        );
        let timer = TimerWakeupSource::new(Duration::from_micros(request.duration_us()));
        self.rtc.sleep_deep(&[&timer]);
    }
}
