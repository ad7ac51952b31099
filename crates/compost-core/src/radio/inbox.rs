//! Single-slot inboxes written from radio callbacks and drained by the
//! controller between steps.

use core::cell::RefCell;
use core::sync::atomic::{AtomicBool, Ordering};

use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use heapless::Vec;

use super::{AdvertisementData, DiscoveredNode, NodeAddress};
use crate::config::MAX_NODES;

pub type DiscoveredNodes = Vec<DiscoveredNode, MAX_NODES>;

/// Capped list of nodes advertising `service` during the current scan.
pub struct DiscoveryInbox {
    service: u128,
    nodes: Mutex<CriticalSectionRawMutex, RefCell<DiscoveredNodes>>,
}

impl DiscoveryInbox {
    pub const fn new(service: u128) -> Self {
        Self {
            service,
            nodes: Mutex::new(RefCell::new(Vec::new())),
        }
    }

    /// Record one advertising or scan response report.
    ///
    /// A report carrying the service adds the node. A report carrying only a
    /// name fills in the name of a node already recorded. Once the list is
    /// full new nodes are dropped. Returns whether anything changed.
    pub fn on_advertisement(&self, address: NodeAddress, data: &AdvertisementData<'_>) -> bool {
        let matches = data.advertises(self.service);
        let name = data.name();

        self.nodes.lock(|nodes| {
            let mut nodes = nodes.borrow_mut();
            if let Some(known) = nodes.iter_mut().find(|n| n.address == address) {
                return match name {
                    Some(name) if known.name.is_empty() => {
                        *known = DiscoveredNode::new(address, name);
                        true
                    }
                    _ => false,
                };
            }

            if !matches {
                return false;
            }

            let node = DiscoveredNode::new(address, name.unwrap_or(""));
            match nodes.push(node) {
                Ok(()) => {
                    log::debug!("[SCAN] found {} '{}'", address, name.unwrap_or("?"));
                    true
                }
                Err(_) => false,
            }
        })
    }

    /// Drain the list.
    pub fn take(&self) -> DiscoveredNodes {
        self.nodes.lock(|nodes| core::mem::take(&mut *nodes.borrow_mut()))
    }

    pub fn clear(&self) {
        self.nodes.lock(|nodes| nodes.borrow_mut().clear());
    }

    pub fn len(&self) -> usize {
        self.nodes.lock(|nodes| nodes.borrow().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompanionCommand {
    Read,
    Clear,
}

impl CompanionCommand {
    /// Only the exact literals are commands.
    pub fn parse(payload: &[u8]) -> Option<Self> {
        match payload {
            b"READ" => Some(Self::Read),
            b"CLEAR" => Some(Self::Clear),
            _ => None,
        }
    }
}

/// Connection state and pending commands of the companion app.
pub struct CompanionInbox {
    connected: AtomicBool,
    read_requested: AtomicBool,
    clear_requested: AtomicBool,
    readvertise: AtomicBool,
}

impl Default for CompanionInbox {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanionInbox {
    pub const fn new() -> Self {
        Self {
            connected: AtomicBool::new(false),
            read_requested: AtomicBool::new(false),
            clear_requested: AtomicBool::new(false),
            readvertise: AtomicBool::new(false),
        }
    }

    pub fn on_connect(&self) {
        self.connected.store(true, Ordering::Release);
        log::info!("[BLE] companion connected");
    }

    /// Advertising stops on connection, so a disconnect must re-arm it.
    pub fn on_disconnect(&self) {
        self.connected.store(false, Ordering::Release);
        self.readvertise.store(true, Ordering::Release);
        log::info!("[BLE] companion disconnected");
    }

    /// Handle a write to the command characteristic.
    pub fn on_write(&self, payload: &[u8]) -> Option<CompanionCommand> {
        let command = CompanionCommand::parse(payload);
        match command {
            Some(CompanionCommand::Read) => self.read_requested.store(true, Ordering::Release),
            Some(CompanionCommand::Clear) => self.clear_requested.store(true, Ordering::Release),
            None => log::debug!("[BLE] ignoring {} byte command", payload.len()),
        }
        command
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Next pending command. A pending read is served before a clear.
    pub fn take_command(&self) -> Option<CompanionCommand> {
        if self.read_requested.swap(false, Ordering::AcqRel) {
            Some(CompanionCommand::Read)
        } else if self.clear_requested.swap(false, Ordering::AcqRel) {
            Some(CompanionCommand::Clear)
        } else {
            None
        }
    }

    pub fn take_readvertise(&self) -> bool {
        self.readvertise.swap(false, Ordering::AcqRel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::uuids::SENSOR_SERVICE;
    use alloc::vec::Vec as StdVec;

    fn report(name: Option<&str>, with_service: bool) -> StdVec<u8> {
        let mut raw = StdVec::new();
        if with_service {
            raw.push(17);
            raw.push(0x07);
            raw.extend_from_slice(&SENSOR_SERVICE.to_le_bytes());
        }
        if let Some(name) = name {
            raw.push(name.len() as u8 + 1);
            raw.push(0x09);
            raw.extend_from_slice(name.as_bytes());
        }
        raw
    }

    fn addr(last: u8) -> NodeAddress {
        NodeAddress([0, 0, 0, 0, 0, last])
    }

    #[test]
    fn test_discovery_caps_and_dedupes() {
        let inbox = DiscoveryInbox::new(SENSOR_SERVICE);
        for i in 1..=5u8 {
            let raw = report(Some("Compost_Slave1"), true);
            inbox.on_advertisement(addr(i), &AdvertisementData::new(&raw));
            inbox.on_advertisement(addr(i), &AdvertisementData::new(&raw));
        }
        assert_eq!(inbox.len(), MAX_NODES);

        let nodes = inbox.take();
        assert_eq!(nodes.len(), MAX_NODES);
        assert_eq!(nodes[0].address, addr(1));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_discovery_ignores_other_services() {
        let inbox = DiscoveryInbox::new(SENSOR_SERVICE);
        let raw = report(Some("Headphones"), false);
        assert!(!inbox.on_advertisement(addr(9), &AdvertisementData::new(&raw)));
        assert!(inbox.is_empty());
    }

    #[test]
    fn test_scan_response_fills_name() {
        let inbox = DiscoveryInbox::new(SENSOR_SERVICE);
        let adv = report(None, true);
        let rsp = report(Some("Compost_Slave3"), false);
        assert!(inbox.on_advertisement(addr(3), &AdvertisementData::new(&adv)));
        assert!(inbox.on_advertisement(addr(3), &AdvertisementData::new(&rsp)));

        let nodes = inbox.take();
        assert_eq!(nodes[0].name.as_str(), "Compost_Slave3");
    }

    #[test]
    fn test_commands_are_exact_literals() {
        let inbox = CompanionInbox::new();
        assert_eq!(inbox.on_write(b"read"), None);
        assert_eq!(inbox.on_write(b"READ\n"), None);
        assert_eq!(inbox.take_command(), None);

        assert_eq!(inbox.on_write(b"CLEAR"), Some(CompanionCommand::Clear));
        assert_eq!(inbox.on_write(b"READ"), Some(CompanionCommand::Read));
        assert_eq!(inbox.take_command(), Some(CompanionCommand::Read));
        assert_eq!(inbox.take_command(), Some(CompanionCommand::Clear));
        assert_eq!(inbox.take_command(), None);
    }

    #[test]
    fn test_disconnect_requests_readvertise() {
        let inbox = CompanionInbox::new();
        inbox.on_connect();
        assert!(inbox.is_connected());
        assert!(!inbox.take_readvertise());

        inbox.on_disconnect();
        assert!(!inbox.is_connected());
        assert!(inbox.take_readvertise());
        assert!(!inbox.take_readvertise());
    }
}
