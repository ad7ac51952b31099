use compost_core::time::Timebase;
use embassy_time::{Delay, Instant};
use embedded_hal_async::delay::DelayNs;

/// Embassy time driver as the controller's clock and delay.
#[derive(Clone, Copy, Default)]
pub struct EmbassyTimebase;

impl DelayNs for EmbassyTimebase {
    async fn delay_ns(&mut self, ns: u32) {
        Delay.delay_ns(ns).await;
    }

    async fn delay_ms(&mut self, ms: u32) {
        Delay.delay_ms(ms).await;
    }
}

impl Timebase for EmbassyTimebase {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}
