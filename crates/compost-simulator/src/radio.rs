//! Synthetic BLE: three sensor nodes and a companion that only listens.

use compost_core::radio::{
    AdvertisementData, Central, CompanionLink, DEVICE_NAME, DiscoveryInbox, NodeAddress,
    RadioError, uuids,
};
use compost_core::readings::NodeId;

use crate::sensors::MockSensorGenerator;

const AD_COMPLETE_NAME: u8 = 0x09;
const AD_COMPLETE_UUID128: u8 = 0x07;

pub struct SimNode {
    pub id: u8,
    pub address: NodeAddress,
    pub reachable: bool,
}

impl SimNode {
    pub fn new(id: u8) -> Self {
        Self {
            id,
            address: NodeAddress([0x24, 0x6f, 0x28, 0x00, 0x00, id]),
            reachable: true,
        }
    }

    fn name(&self) -> String {
        format!("Compost_Slave{}", self.id)
    }

    fn advertisement(&self) -> Vec<u8> {
        let name = self.name();
        let mut raw = vec![17, AD_COMPLETE_UUID128];
        raw.extend_from_slice(&uuids::SENSOR_SERVICE.to_le_bytes());
        raw.push(name.len() as u8 + 1);
        raw.push(AD_COMPLETE_NAME);
        raw.extend_from_slice(name.as_bytes());
        raw
    }
}

pub struct SimRadio {
    nodes: Vec<SimNode>,
    generator: MockSensorGenerator,
    connected: Option<usize>,
    advertising: bool,
    /// Every notification pushed to the companion, in order.
    pub transcript: Vec<String>,
}

impl SimRadio {
    pub fn new(nodes: Vec<SimNode>, generator: MockSensorGenerator) -> Self {
        Self {
            nodes,
            generator,
            connected: None,
            advertising: false,
            transcript: Vec::new(),
        }
    }

    fn peer(&self) -> Result<&SimNode, RadioError> {
        self.connected
            .and_then(|i| self.nodes.get(i))
            .ok_or(RadioError::NotConnected)
    }
}

impl Central for SimRadio {
    async fn scan(&mut self, window_secs: u32, inbox: &DiscoveryInbox) -> Result<(), RadioError> {
        log::info!("[SIM] scanning {}s", window_secs);
        for node in &self.nodes {
            let raw = node.advertisement();
            inbox.on_advertisement(node.address, &AdvertisementData::new(&raw));
        }
        Ok(())
    }

    async fn stop_scan(&mut self) {}

    async fn connect(&mut self, address: NodeAddress) -> Result<(), RadioError> {
        let index = self
            .nodes
            .iter()
            .position(|n| n.address == address)
            .ok_or(RadioError::Timeout)?;
        if !self.nodes[index].reachable {
            log::info!("[SIM] node {} out of range", self.nodes[index].id);
            return Err(RadioError::Timeout);
        }
        self.connected = Some(index);
        Ok(())
    }

    async fn discover_service(&mut self, service: u128) -> Result<bool, RadioError> {
        self.peer()?;
        Ok(service == uuids::SENSOR_SERVICE)
    }

    async fn read(
        &mut self,
        _service: u128,
        characteristic: u128,
        buf: &mut [u8],
    ) -> Result<usize, RadioError> {
        let id = self.peer()?.id;
        let sample = self.generator.node_sample(id);
        let value = match characteristic {
            uuids::TEMPERATURE => Some(sample.temperature),
            uuids::HUMIDITY => Some(sample.humidity),
            uuids::PRESSURE => Some(sample.pressure),
            uuids::OXYGEN if NodeId::new(id).is_some_and(NodeId::has_oxygen) => {
                Some(sample.oxygen)
            }
            _ => None,
        };
        let bytes = value.ok_or(RadioError::AttributeNotFound)?.to_le_bytes();
        let dst = buf.get_mut(..4).ok_or(RadioError::Stack { operation: "read" })?;
        dst.copy_from_slice(&bytes);
        Ok(4)
    }

    async fn write(
        &mut self,
        _service: u128,
        characteristic: u128,
        data: &[u8],
    ) -> Result<(), RadioError> {
        let id = self.peer()?.id;
        if characteristic == uuids::SLEEP_DURATION {
            log::debug!(
                "[SIM] node {} told to sleep 0x{}us",
                id,
                String::from_utf8_lossy(data)
            );
        }
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.connected = None;
    }

    async fn shutdown(&mut self) {
        self.connected = None;
        self.advertising = false;
        log::info!("[SIM] radio down");
    }
}

impl CompanionLink for SimRadio {
    async fn start_advertising(&mut self) -> Result<(), RadioError> {
        if !self.advertising {
            log::info!("[SIM] advertising as {}", DEVICE_NAME);
        }
        self.advertising = true;
        Ok(())
    }

    async fn notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        let text = String::from_utf8_lossy(payload).into_owned();
        log::debug!("[SIM] notify {:?}", text);
        self.transcript.push(text);
        Ok(())
    }
}
