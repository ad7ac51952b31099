//! ESP32 platform layer of the compost monitor master node.
//!
//! Binds the traits of `compost-core` to the board: SD card over SPI,
//! trouble-host BLE, the SHT40 in the enclosure, embassy time and RTC deep
//! sleep.

#![no_std]

#[cfg(feature = "sensor-sht40")]
pub mod onboard;
pub mod power;
pub mod radio;
pub mod sd_card;
pub mod timebase;
