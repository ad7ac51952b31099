use serde::{Deserialize, Serialize};

/// Maximum number of sensor nodes a master serves.
pub const MAX_NODES: usize = 3;

/// Upper bound of a single companion notification payload.
///
/// Must stay at or below the negotiated ATT MTU minus the 3 byte header.
pub const NOTIFICATION_CAPACITY: usize = 244;

/// Runtime configuration of the master node.
///
/// Every field has a default so partial configuration files deserialize.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(default)]
pub struct MasterConfig {
    /// Length of one deep sleep, and the amount the virtual clock advances per cycle.
    pub sleep_duration_secs: u32,
    /// How long discovery listens for advertising nodes.
    pub scan_window_secs: u32,
    /// Liveness timeouts tolerated in `WaitCompanion` before sleeping.
    pub max_timeout_count: u8,
    /// Yield period of the companion poll loop.
    pub companion_poll_ms: u32,
    pub chunk_max_lines: usize,
    pub chunk_max_bytes: usize,
    /// Pause after every notification so slow receivers keep up.
    pub chunk_pacing_ms: u32,
    /// Consecutive cycles without any ingested node before the link is
    /// declared broken. Zero disables the policy.
    pub broken_link_cycles: u16,
    pub broken_link_sleep_secs: u32,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            sleep_duration_secs: 30 * 60,
            scan_window_secs: 10,
            max_timeout_count: 3,
            companion_poll_ms: 100,
            chunk_max_lines: 10,
            chunk_max_bytes: 240,
            chunk_pacing_ms: 100,
            broken_link_cycles: 12,
            broken_link_sleep_secs: 6 * 60 * 60,
        }
    }
}

impl MasterConfig {
    /// Clamp values that would break the streaming or wait loops.
    pub fn sanitized(mut self) -> Self {
        self.chunk_max_lines = self.chunk_max_lines.max(1);
        self.chunk_max_bytes = self.chunk_max_bytes.clamp(1, NOTIFICATION_CAPACITY);
        self.max_timeout_count = self.max_timeout_count.max(1);
        self.sleep_duration_secs = self.sleep_duration_secs.max(1);
        self.broken_link_sleep_secs = self.broken_link_sleep_secs.max(1);
        self
    }

    pub const fn sleep_duration_us(&self) -> u64 {
        self.sleep_duration_secs as u64 * 1_000_000
    }
}
