//! State kept in battery-backed memory across deep sleep.
//!
//! The block is a fixed byte array owned by the platform (RTC fast memory on
//! the ESP32). Its content is postcard encoded and guarded by a magic value,
//! so a cold boot with garbage or zeroed memory starts from fresh state.

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

use crate::config::MasterConfig;

pub const RETAINED_LEN: usize = 32;

const RETAINED_MAGIC: u16 = 0xC0A5;

pub type RetainedBlock = [u8; RETAINED_LEN];

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetainedError {
    #[error("retained state does not fit its block")]
    Encode,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetainedState {
    magic: u16,
    /// Liveness timeouts seen in the companion wait of the current cycle.
    pub escalation_count: u8,
    /// Operative sleep duration, seeded from configuration.
    pub sleep_duration_secs: u32,
    /// Duration actually armed before this wake; the clock advances by it.
    pub last_sleep_secs: u32,
    /// Consecutive cycles in which no node could be read.
    pub unreachable_cycles: u16,
    pub boot_count: u32,
}

impl RetainedState {
    pub fn fresh(config: &MasterConfig) -> Self {
        Self {
            magic: RETAINED_MAGIC,
            escalation_count: 0,
            sleep_duration_secs: config.sleep_duration_secs,
            last_sleep_secs: config.sleep_duration_secs,
            unreachable_cycles: 0,
            boot_count: 0,
        }
    }

    /// Decode a block, or `None` when it holds no valid state.
    pub fn load(block: &RetainedBlock) -> Option<Self> {
        postcard::from_bytes::<Self>(block)
            .ok()
            .filter(|state| state.magic == RETAINED_MAGIC)
    }

    /// Decode a block, falling back to fresh state.
    pub fn load_or_fresh(block: &RetainedBlock, config: &MasterConfig) -> Self {
        Self::load(block).unwrap_or_else(|| {
            log::info!("[RTC] no retained state, starting fresh");
            Self::fresh(config)
        })
    }

    pub fn store(&self, block: &mut RetainedBlock) -> Result<(), RetainedError> {
        block.fill(0);
        postcard::to_slice(self, block).map_err(|_| RetainedError::Encode)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_block_is_cold_boot() {
        let block = [0u8; RETAINED_LEN];
        assert_eq!(RetainedState::load(&block), None);

        let config = MasterConfig::default();
        let state = RetainedState::load_or_fresh(&block, &config);
        assert_eq!(state.sleep_duration_secs, 1800);
        assert_eq!(state.escalation_count, 0);
    }

    #[test]
    fn test_store_then_load() {
        let mut state = RetainedState::fresh(&MasterConfig::default());
        state.escalation_count = 2;
        state.unreachable_cycles = 7;
        state.boot_count = u32::MAX;
        state.last_sleep_secs = 21_600;

        let mut block = [0xffu8; RETAINED_LEN];
        state.store(&mut block).unwrap();
        assert_eq!(RetainedState::load(&block), Some(state));
    }

    #[test]
    fn test_foreign_magic_rejected() {
        let mut block = [0u8; RETAINED_LEN];
        block[0] = 0x01;
        block[1] = 0x02;
        assert_eq!(RetainedState::load(&block), None);
    }
}
