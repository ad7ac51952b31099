//! Per-node measurement slots filled during one wake cycle.

use core::fmt;

use crate::clock::IsoTimestamp;
use crate::config::MAX_NODES;
use crate::storage::Store;

/// Identity of a sensor node, `1..=MAX_NODES`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct NodeId(u8);

impl NodeId {
    pub const fn new(raw: u8) -> Option<Self> {
        if raw >= 1 && raw as usize <= MAX_NODES {
            Some(Self(raw))
        } else {
            None
        }
    }

    /// Nodes advertise as `<prefix><digit>`; the trailing digit is the id.
    pub fn from_name(name: &str) -> Option<Self> {
        let digit = name.chars().last()?.to_digit(10)?;
        Self::new(digit as u8)
    }

    pub const fn get(self) -> u8 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize - 1
    }

    /// Store receiving this node's records.
    pub const fn store(self) -> Store {
        match self.0 {
            1 => Store::Apport,
            2 => Store::Maturation,
            _ => Store::Exterior,
        }
    }

    /// Only the fresh-material node carries an oxygen probe.
    pub const fn has_oxygen(self) -> bool {
        self.0 == 1
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Decode one characteristic value: a 4-byte little-endian IEEE-754 float.
///
/// Anything else, including a non-finite value, is treated as absent.
pub fn decode_f32(payload: &[u8]) -> Option<f32> {
    let bytes: [u8; 4] = payload.try_into().ok()?;
    let value = f32::from_le_bytes(bytes);
    value.is_finite().then_some(value)
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeReading {
    pub id: NodeId,
    pub temperature: Option<f32>,
    pub humidity: Option<f32>,
    pub pressure: Option<f32>,
    pub oxygen: Option<f32>,
    pub timestamp: IsoTimestamp,
    /// Set only when every field the node class requires was read this cycle.
    pub received: bool,
}

impl NodeReading {
    pub fn empty(id: NodeId) -> Self {
        Self {
            id,
            temperature: None,
            humidity: None,
            pressure: None,
            oxygen: None,
            timestamp: IsoTimestamp::new(),
            received: false,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::empty(self.id);
    }

    /// Whether the fields this node class must deliver are present.
    pub fn is_complete(&self) -> bool {
        self.temperature.is_some()
            && self.humidity.is_some()
            && (!self.id.has_oxygen() || self.oxygen.is_some())
    }

    /// Column values in the layout of [`NodeId::store`].
    pub fn columns(&self) -> heapless::Vec<Option<f32>, 3> {
        let mut values = heapless::Vec::new();
        let _ = values.push(self.temperature);
        let _ = values.push(self.humidity);
        if self.id.has_oxygen() {
            let _ = values.push(self.oxygen);
        }
        values
    }
}

/// One slot per node identity.
#[derive(Debug, Clone)]
pub struct NodeSlots {
    slots: [NodeReading; MAX_NODES],
}

impl Default for NodeSlots {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSlots {
    pub fn new() -> Self {
        Self {
            slots: core::array::from_fn(|i| {
                NodeReading::empty(NodeId((i + 1) as u8))
            }),
        }
    }

    pub fn reset(&mut self) {
        self.slots.iter_mut().for_each(NodeReading::reset);
    }

    pub fn get(&self, id: NodeId) -> &NodeReading {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: NodeId) -> &mut NodeReading {
        &mut self.slots[id.index()]
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeReading> {
        self.slots.iter()
    }

    pub fn received(&self) -> impl Iterator<Item = &NodeReading> {
        self.slots.iter().filter(|slot| slot.received)
    }

    pub fn received_count(&self) -> usize {
        self.received().count()
    }
}
