/// Why the master goes to sleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepReason {
    /// Normal end of a wake cycle.
    Scheduled,
    /// Nodes have been unreachable for too long; back off.
    BrokenLink,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SleepRequest {
    pub duration_secs: u32,
    pub reason: SleepReason,
}

impl SleepRequest {
    pub const fn duration_us(&self) -> u64 {
        self.duration_secs as u64 * 1_000_000
    }
}

/// Arms the wake-up timer and stops the processor.
///
/// Execution resumes at the cold start path, never after this call.
pub trait PowerControl {
    fn suspend(&mut self, request: SleepRequest) -> !;
}
