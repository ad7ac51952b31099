//! In-memory stand-ins for the radio, time and sensor seams.

use alloc::collections::VecDeque;
use alloc::string::String;
use alloc::vec::Vec;

use embedded_hal_async::delay::DelayNs;

use crate::radio::{
    AdvertisementData, Central, CompanionInbox, CompanionLink, DiscoveryInbox, NodeAddress,
    RadioError, uuids,
};
use crate::sensors::{OnboardReadings, Sensor, SensorError};
use crate::time::Timebase;

#[derive(Debug, Clone)]
pub struct FakeNode {
    pub address: NodeAddress,
    pub name: &'static str,
    pub temperature: f32,
    pub humidity: f32,
    pub pressure: Option<f32>,
    pub oxygen: Option<f32>,
    pub advertises: bool,
    pub has_service: bool,
    pub refuse_connect: bool,
    pub short_oxygen: bool,
}

impl FakeNode {
    pub fn healthy(id: u8) -> Self {
        Self {
            address: NodeAddress([0xc0, 0xff, 0xee, 0, 0, id]),
            name: match id {
                1 => "Compost_Slave1",
                2 => "Compost_Slave2",
                3 => "Compost_Slave3",
                _ => "Compost_Slave9",
            },
            temperature: 40.0 + id as f32,
            humidity: 60.0 + id as f32,
            pressure: Some(1013.25),
            oxygen: (id == 1).then_some(18.5),
            advertises: true,
            has_service: true,
            refuse_connect: false,
            short_oxygen: false,
        }
    }

    fn advertisement(&self) -> Vec<u8> {
        let mut raw = Vec::new();
        if self.advertises {
            raw.push(17);
            raw.push(0x07);
            raw.extend_from_slice(&uuids::SENSOR_SERVICE.to_le_bytes());
        }
        raw.push(self.name.len() as u8 + 1);
        raw.push(0x09);
        raw.extend_from_slice(self.name.as_bytes());
        raw
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FakeWrite {
    pub address: NodeAddress,
    pub service: u128,
    pub characteristic: u128,
    pub data: Vec<u8>,
}

#[derive(Default)]
pub struct FakeRadio {
    pub nodes: Vec<FakeNode>,
    pub connected: Option<NodeAddress>,
    pub writes: Vec<FakeWrite>,
    pub notifications: Vec<Vec<u8>>,
    /// Payloads refused while `fail_notify` is set.
    pub lost: Vec<Vec<u8>>,
    pub events: Vec<&'static str>,
    pub advertising_starts: usize,
    pub disconnects: usize,
    pub shutdowns: usize,
    pub fail_notify: bool,
}

impl FakeRadio {
    pub fn new(nodes: impl IntoIterator<Item = FakeNode>) -> Self {
        Self {
            nodes: nodes.into_iter().collect(),
            ..Self::default()
        }
    }

    pub fn sleep_writes(&self) -> Vec<(NodeAddress, String)> {
        self.writes
            .iter()
            .filter(|w| w.characteristic == uuids::SLEEP_DURATION)
            .map(|w| (w.address, String::from_utf8(w.data.clone()).unwrap()))
            .collect()
    }

    fn peer(&self) -> Result<&FakeNode, RadioError> {
        let address = self.connected.ok_or(RadioError::NotConnected)?;
        self.nodes
            .iter()
            .find(|n| n.address == address)
            .ok_or(RadioError::NotConnected)
    }
}

impl Central for FakeRadio {
    async fn scan(&mut self, _window_secs: u32, inbox: &DiscoveryInbox) -> Result<(), RadioError> {
        self.events.push("scan");
        for node in &self.nodes {
            let raw = node.advertisement();
            inbox.on_advertisement(node.address, &AdvertisementData::new(&raw));
        }
        Ok(())
    }

    async fn stop_scan(&mut self) {
        self.events.push("stop_scan");
    }

    async fn connect(&mut self, address: NodeAddress) -> Result<(), RadioError> {
        self.events.push("connect");
        match self.nodes.iter().find(|n| n.address == address) {
            Some(node) if !node.refuse_connect => {
                self.connected = Some(address);
                Ok(())
            }
            _ => Err(RadioError::Timeout),
        }
    }

    async fn discover_service(&mut self, service: u128) -> Result<bool, RadioError> {
        let node = self.peer()?;
        Ok(service == uuids::SENSOR_SERVICE && node.has_service)
    }

    async fn read(
        &mut self,
        _service: u128,
        characteristic: u128,
        buf: &mut [u8],
    ) -> Result<usize, RadioError> {
        let node = self.peer()?;
        let value = match characteristic {
            uuids::TEMPERATURE => Some(node.temperature),
            uuids::HUMIDITY => Some(node.humidity),
            uuids::PRESSURE => node.pressure,
            uuids::OXYGEN if node.short_oxygen => {
                buf[..3].copy_from_slice(&[0x00, 0x00, 0x94]);
                return Ok(3);
            }
            uuids::OXYGEN => node.oxygen,
            _ => None,
        };
        let value = value.ok_or(RadioError::AttributeNotFound)?;
        buf[..4].copy_from_slice(&value.to_le_bytes());
        Ok(4)
    }

    async fn write(
        &mut self,
        service: u128,
        characteristic: u128,
        data: &[u8],
    ) -> Result<(), RadioError> {
        let address = self.peer()?.address;
        self.writes.push(FakeWrite {
            address,
            service,
            characteristic,
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn disconnect(&mut self) {
        self.events.push("disconnect");
        self.connected = None;
        self.disconnects += 1;
    }

    async fn shutdown(&mut self) {
        self.events.push("shutdown");
        self.shutdowns += 1;
    }
}

impl CompanionLink for FakeRadio {
    async fn start_advertising(&mut self) -> Result<(), RadioError> {
        self.events.push("advertise");
        self.advertising_starts += 1;
        Ok(())
    }

    async fn notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if self.fail_notify {
            self.lost.push(payload.to_vec());
            return Err(RadioError::Stack { operation: "notify" });
        }
        self.notifications.push(payload.to_vec());
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ScriptEvent {
    Connect,
    Disconnect,
    Write(&'static [u8]),
}

/// Virtual time that only moves when delayed. Scripted companion events
/// are delivered once their time has come.
pub struct FakeTimebase<'a> {
    now_ns: u64,
    inbox: Option<&'a CompanionInbox>,
    script: VecDeque<(u64, ScriptEvent)>,
}

impl FakeTimebase<'static> {
    pub fn new() -> Self {
        Self {
            now_ns: 0,
            inbox: None,
            script: VecDeque::new(),
        }
    }
}

impl<'a> FakeTimebase<'a> {
    /// `script` holds `(at_ms, event)` pairs in time order.
    pub fn scripted(inbox: &'a CompanionInbox, script: &[(u64, ScriptEvent)]) -> Self {
        Self {
            now_ns: 0,
            inbox: Some(inbox),
            script: script.iter().copied().collect(),
        }
    }

    fn deliver(&mut self) {
        let Some(inbox) = self.inbox else {
            return;
        };
        let now_ms = self.now_ms();
        while let Some(&(at, event)) = self.script.front() {
            if at > now_ms {
                break;
            }
            self.script.pop_front();
            match event {
                ScriptEvent::Connect => inbox.on_connect(),
                ScriptEvent::Disconnect => inbox.on_disconnect(),
                ScriptEvent::Write(payload) => {
                    inbox.on_write(payload);
                }
            }
        }
    }
}

impl DelayNs for FakeTimebase<'_> {
    async fn delay_ns(&mut self, ns: u32) {
        self.now_ns += ns as u64;
        self.deliver();
    }
}

impl Timebase for FakeTimebase<'_> {
    fn now_ms(&self) -> u64 {
        self.now_ns / 1_000_000
    }
}

pub struct FakeSensor {
    pub temperature: Option<f32>,
    pub reads: usize,
}

impl FakeSensor {
    pub fn reading(temperature: f32) -> Self {
        Self {
            temperature: Some(temperature),
            reads: 0,
        }
    }
}

impl Sensor for FakeSensor {
    type Readings = OnboardReadings;

    async fn read(&mut self) -> Result<OnboardReadings, SensorError> {
        self.reads += 1;
        self.temperature
            .map(|temperature_celsius| OnboardReadings {
                temperature_celsius,
                humidity_percent: None,
            })
            .ok_or(SensorError::ReadFailed {
                sensor: "fake",
                operation: "measure",
                details: "scripted failure",
            })
    }
}
