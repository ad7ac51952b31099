//! One-shot pull of a single node's readings.

use core::fmt::Write;

use thiserror_no_std::Error;

use crate::clock::IsoTimestamp;
use crate::radio::{Central, DiscoveredNode, uuids};
use crate::readings::{NodeId, NodeSlots, decode_f32};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestError {
    #[error("connection refused or timed out")]
    ConnectFailed,
    #[error("sensor service not found")]
    ServiceMissing,
    #[error("advertised name carries no valid node id")]
    InvalidIdentity,
    #[error("required field {0} unreadable")]
    MissingField(&'static str),
}

/// Connect to `node`, read its measurement characteristics into the slot
/// matching its identity and hand it the master's sleep duration.
///
/// Every failure stays local to this node: the connection is released and
/// an error returned, the caller moves on to the next node. Only the slot of
/// the identified node is touched, and it is marked received only when all
/// fields its class requires decoded.
pub async fn ingest<C: Central>(
    central: &mut C,
    node: &DiscoveredNode,
    timestamp: &IsoTimestamp,
    sleep_duration_us: u64,
    slots: &mut NodeSlots,
) -> Result<NodeId, IngestError> {
    log::info!("[NODE] connecting to {} '{}'", node.address, node.name);

    if let Err(e) = central.connect(node.address).await {
        log::warn!("[NODE] connect to {} failed: {}", node.address, e);
        return Err(IngestError::ConnectFailed);
    }

    let outcome = pull(central, node, timestamp, sleep_duration_us, slots).await;
    central.disconnect().await;

    match outcome {
        Ok(id) => log::info!("[NODE] node {} read", id),
        Err(e) => log::warn!("[NODE] '{}' skipped: {}", node.name, e),
    }
    outcome
}

async fn pull<C: Central>(
    central: &mut C,
    node: &DiscoveredNode,
    timestamp: &IsoTimestamp,
    sleep_duration_us: u64,
    slots: &mut NodeSlots,
) -> Result<NodeId, IngestError> {
    match central.discover_service(uuids::SENSOR_SERVICE).await {
        Ok(true) => {}
        Ok(false) => return Err(IngestError::ServiceMissing),
        Err(e) => {
            log::debug!("[NODE] service discovery failed: {}", e);
            return Err(IngestError::ServiceMissing);
        }
    }

    let id = NodeId::from_name(&node.name).ok_or(IngestError::InvalidIdentity)?;

    let slot = slots.get_mut(id);
    slot.reset();
    slot.temperature = read_field(central, uuids::TEMPERATURE, "temperature").await;
    slot.humidity = read_field(central, uuids::HUMIDITY, "humidity").await;
    slot.pressure = read_field(central, uuids::PRESSURE, "pressure").await;
    slot.oxygen = read_field(central, uuids::OXYGEN, "oxygen").await;
    slot.timestamp = timestamp.clone();

    sync_sleep(central, sleep_duration_us).await;

    if slot.temperature.is_none() {
        return Err(IngestError::MissingField("temperature"));
    }
    if slot.humidity.is_none() {
        return Err(IngestError::MissingField("humidity"));
    }
    if id.has_oxygen() && slot.oxygen.is_none() {
        return Err(IngestError::MissingField("oxygen"));
    }

    slot.received = true;
    Ok(id)
}

async fn read_field<C: Central>(central: &mut C, characteristic: u128, field: &str) -> Option<f32> {
    let mut buf = [0u8; 16];
    match central.read(uuids::SENSOR_SERVICE, characteristic, &mut buf).await {
        Ok(len) => {
            let value = decode_f32(&buf[..len.min(buf.len())]);
            if value.is_none() {
                log::debug!("[NODE] {} payload of {} bytes rejected", field, len);
            }
            value
        }
        Err(e) => {
            log::debug!("[NODE] {} unreadable: {}", field, e);
            None
        }
    }
}

/// Nodes sleep as long as the master; tell them the duration in hex
/// microseconds. Nodes without the sleep service keep their own schedule.
async fn sync_sleep<C: Central>(central: &mut C, sleep_duration_us: u64) {
    let mut hex: heapless::String<16> = heapless::String::new();
    if write!(hex, "{:x}", sleep_duration_us).is_err() {
        return;
    }

    if let Err(e) = central
        .write(uuids::SLEEP_SERVICE, uuids::SLEEP_DURATION, hex.as_bytes())
        .await
    {
        log::debug!("[NODE] sleep duration not accepted: {}", e);
    }
}
