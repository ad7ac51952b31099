//! Hardware-independent core library for the compost monitor master node.
//!
//! This crate contains all platform-agnostic logic of the master: the
//! wake-cycle state machine, the virtual clock, the semicolon CSV stores,
//! node discovery and ingestion, and the companion bridge that streams the
//! stores to the mobile application.
//!
//! It is `#![no_std]` with `extern crate alloc` so it compiles on both
//! embedded targets (ESP32) and desktop hosts (for the simulator and tests).
//! Hardware is reached only through the traits in [`storage`], [`radio`],
//! [`time`], [`power`] and [`sensors`].

#![no_std]

extern crate alloc;

pub mod clock;
pub mod companion;
pub mod config;
pub mod controller;
pub mod discovery;
pub mod ingestion;
pub mod power;
pub mod radio;
pub mod readings;
pub mod retained;
pub mod sensors;
pub mod storage;
pub mod time;

#[cfg(test)]
pub(crate) mod testing;
