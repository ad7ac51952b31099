//! Radio seams: the central role used to pull node readings and the
//! peripheral role used by the companion app.
//!
//! The BLE stack itself lives in the firmware crate. Callbacks from its
//! dispatch only ever touch the inboxes in [`inbox`].

pub mod inbox;

pub use inbox::*;

use core::fmt;

use thiserror_no_std::Error;

/// GATT identifiers shared with the sensor nodes and the companion app.
pub mod uuids {
    pub const SENSOR_SERVICE: u128 = 0xA870DC1B_0265_4D5F_9A21_8AC5BD2BACD7;
    pub const TEMPERATURE: u128 = 0xA07038DF_7C8E_4914_87B3_131B91DAAB73;
    pub const PRESSURE: u128 = 0x594BF212_A4FC_4130_ACB1_8FD4FD28EFD3;
    pub const HUMIDITY: u128 = 0x72A7B435_989D_4369_8F58_D6E98B4AB262;
    pub const OXYGEN: u128 = 0x759E38A8_BB58_4F70_96EB_A4BDCEC3977A;

    pub const SLEEP_SERVICE: u128 = 0x9D818D7B_A445_46F5_8A3F_B9F86EA5DE2F;
    pub const SLEEP_DURATION: u128 = 0xCEF11275_083B_4027_AD0E_0DDB904278A5;

    pub const COMPANION_SERVICE: u128 = 0x6E400001_B5A3_F393_E0A9_E50E24DCCA9E;
    /// Master to app, notify.
    pub const COMPANION_TX: u128 = 0x6E400002_B5A3_F393_E0A9_E50E24DCCA9E;
    /// App to master, write.
    pub const COMPANION_RX: u128 = 0x6E400003_B5A3_F393_E0A9_E50E24DCCA9E;
}

/// Name the master advertises to the companion app.
pub const DEVICE_NAME: &str = "Compost_Master";

pub const NAME_CAPACITY: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    #[error("radio stack failure during {operation}")]
    Stack { operation: &'static str },
    #[error("peer did not answer in time")]
    Timeout,
    #[error("no active connection")]
    NotConnected,
    #[error("attribute not found")]
    AttributeNotFound,
}

/// 48-bit device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NodeAddress(pub [u8; 6]);

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// A node seen during the last scan window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredNode {
    pub address: NodeAddress,
    pub name: heapless::String<NAME_CAPACITY>,
}

impl DiscoveredNode {
    /// Long names keep their tail, which carries the node identity.
    pub fn new(address: NodeAddress, name: &str) -> Self {
        let mut start = name.len().saturating_sub(NAME_CAPACITY);
        while !name.is_char_boundary(start) {
            start += 1;
        }
        let mut bounded = heapless::String::new();
        let _ = bounded.push_str(&name[start..]);
        Self {
            address,
            name: bounded,
        }
    }
}

/// Raw advertising or scan response payload.
#[derive(Debug, Clone, Copy)]
pub struct AdvertisementData<'a> {
    raw: &'a [u8],
}

const AD_SHORT_NAME: u8 = 0x08;
const AD_COMPLETE_NAME: u8 = 0x09;
const AD_INCOMPLETE_UUID128: u8 = 0x06;
const AD_COMPLETE_UUID128: u8 = 0x07;

impl<'a> AdvertisementData<'a> {
    pub const fn new(raw: &'a [u8]) -> Self {
        Self { raw }
    }

    /// `(type, data)` of every well-formed AD structure.
    fn structures(&self) -> impl Iterator<Item = (u8, &'a [u8])> {
        let raw = self.raw;
        let mut at = 0usize;
        core::iter::from_fn(move || {
            let len = *raw.get(at)? as usize;
            let end = at + 1 + len;
            if len == 0 || end > raw.len() {
                return None;
            }
            let item = (raw[at + 1], &raw[at + 2..end]);
            at = end;
            Some(item)
        })
    }

    pub fn name(&self) -> Option<&'a str> {
        let mut short = None;
        for (kind, data) in self.structures() {
            match kind {
                AD_COMPLETE_NAME => return core::str::from_utf8(data).ok(),
                AD_SHORT_NAME => short = core::str::from_utf8(data).ok(),
                _ => {}
            }
        }
        short
    }

    pub fn advertises(&self, service: u128) -> bool {
        let wanted = service.to_le_bytes();
        self.structures()
            .filter(|(kind, _)| matches!(*kind, AD_INCOMPLETE_UUID128 | AD_COMPLETE_UUID128))
            .any(|(_, data)| data.chunks_exact(16).any(|uuid| uuid == wanted.as_slice()))
    }
}

/// Central role: scanning and one-shot GATT client connections.
///
/// There is no cancellation; a stuck operation relies on the stack's own
/// supervision timeout.
pub trait Central {
    /// Scan for `window_secs`, delivering every report to `inbox`.
    fn scan(
        &mut self,
        window_secs: u32,
        inbox: &DiscoveryInbox,
    ) -> impl Future<Output = Result<(), RadioError>>;

    fn stop_scan(&mut self) -> impl Future<Output = ()>;

    fn connect(&mut self, address: NodeAddress) -> impl Future<Output = Result<(), RadioError>>;

    /// Whether the connected peer exposes `service`.
    fn discover_service(&mut self, service: u128) -> impl Future<Output = Result<bool, RadioError>>;

    /// Read a characteristic value into `buf`, returning its length.
    fn read(
        &mut self,
        service: u128,
        characteristic: u128,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<usize, RadioError>>;

    fn write(
        &mut self,
        service: u128,
        characteristic: u128,
        data: &[u8],
    ) -> impl Future<Output = Result<(), RadioError>>;

    /// Release the current connection, if any.
    fn disconnect(&mut self) -> impl Future<Output = ()>;

    /// Tear down the whole stack before deep sleep.
    fn shutdown(&mut self) -> impl Future<Output = ()>;
}

/// Peripheral role towards the companion app.
pub trait CompanionLink {
    fn start_advertising(&mut self) -> impl Future<Output = Result<(), RadioError>>;

    /// Push one notification on the TX characteristic.
    fn notify(&mut self, payload: &[u8]) -> impl Future<Output = Result<(), RadioError>>;
}
