use embedded_hal_async::delay::DelayNs;

/// Monotonic milliseconds plus async delays.
///
/// The companion wait loop measures its liveness timeout with `now_ms` and
/// yields with `delay_ms` between polls.
pub trait Timebase: DelayNs {
    /// Milliseconds since boot.
    fn now_ms(&self) -> u64;
}
