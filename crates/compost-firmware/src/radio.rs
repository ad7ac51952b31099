//! trouble-host glue for both BLE roles.
//!
//! The controller drives [`BleRadio`] through the core traits. Everything
//! that has to keep running between those calls lives in tasks:
//!
//! - `ble_runner_task` runs the host and feeds scan reports to [`DISCOVERY`];
//! - `gatt_client_task` owns the GATT client of the current node connection
//!   and answers [`GattRequest`]s;
//! - `companion_task` advertises on demand, mirrors connection events and
//!   RX writes into [`COMPANION`], and pushes queued notifications.

use core::cell::Cell;

use bt_hci::controller::ExternalController;
use compost_core::companion::Notification;
use compost_core::radio::{
    AdvertisementData, Central, CompanionInbox, CompanionLink, DEVICE_NAME, DiscoveryInbox,
    NodeAddress, RadioError, uuids,
};
use embassy_futures::select::{Either, select};
use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_radio::ble::controller::BleConnector;
use trouble_host::prelude::*;

/// Max number of command slots for the controller.
pub const COMMAND_SLOTS: usize = 20;
/// One node and the companion may be connected at the same time.
pub const CONNECTIONS_MAX: usize = 2;
/// Signal + att per connection.
pub const L2CAP_CHANNELS_MAX: usize = 4;

const MAX_SERVICES: usize = 8;
const VALUE_CAPACITY: usize = 16;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

pub type BleController = ExternalController<BleConnector<'static>, COMMAND_SLOTS>;
pub type BleStack = Stack<'static, BleController, DefaultPacketPool>;
pub type BleResources = HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX>;

type Value = heapless::Vec<u8, VALUE_CAPACITY>;

pub static DISCOVERY: DiscoveryInbox = DiscoveryInbox::new(uuids::SENSOR_SERVICE);
pub static COMPANION: CompanionInbox = CompanionInbox::new();

#[gatt_server]
pub struct CompanionServer {
    pub companion: CompanionService,
}

#[gatt_service(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
pub struct CompanionService {
    /// Master to app.
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", notify)]
    pub tx: Notification,
    /// App to master, `READ` or `CLEAR`.
    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", write, write_without_response)]
    pub rx: Value,
}

pub enum GattRequest {
    Discover(u128),
    Read(u128, u128),
    Write(u128, u128, Value),
    Close,
}

pub enum GattReply {
    Ready,
    Found(bool),
    Value(Value),
    Done,
    Failed(RadioError),
}

/// Mailboxes between [`BleRadio`] and the tasks.
pub struct GattLink {
    sessions: Channel<NoopRawMutex, Connection<'static, DefaultPacketPool>, 1>,
    requests: Channel<NoopRawMutex, GattRequest, 1>,
    replies: Channel<NoopRawMutex, GattReply, 1>,
    advertise: Signal<NoopRawMutex, ()>,
    outgoing: Channel<NoopRawMutex, Notification, 2>,
}

impl GattLink {
    pub const fn new() -> Self {
        Self {
            sessions: Channel::new(),
            requests: Channel::new(),
            replies: Channel::new(),
            advertise: Signal::new(),
            outgoing: Channel::new(),
        }
    }
}

impl Default for GattLink {
    fn default() -> Self {
        Self::new()
    }
}

fn stack_error<E: core::fmt::Debug>(operation: &'static str) -> impl Fn(E) -> RadioError {
    move |e| {
        log::warn!("[BLE] {} failed: {:?}", operation, e);
        RadioError::Stack { operation }
    }
}

fn uuid(value: u128) -> Uuid {
    Uuid::new_long(value.to_le_bytes())
}

/// Addresses travel little endian over the air.
fn node_address(addr: &BdAddr) -> NodeAddress {
    let mut bytes = [0u8; 6];
    bytes.copy_from_slice(addr.raw());
    bytes.reverse();
    NodeAddress(bytes)
}

fn bd_addr(address: NodeAddress) -> BdAddr {
    let mut bytes = address.0;
    bytes.reverse();
    BdAddr::new(bytes)
}

/// Advertising reports go straight into the discovery inbox.
pub struct ScanEvents;

impl EventHandler for ScanEvents {
    fn on_adv_reports(&self, mut reports: LeAdvReportsIter<'_>) {
        while let Some(Ok(report)) = reports.next() {
            DISCOVERY.on_advertisement(node_address(&report.addr), &AdvertisementData::new(report.data));
        }
    }
}

#[embassy_executor::task]
pub async fn ble_runner_task(mut runner: Runner<'static, BleController, DefaultPacketPool>) {
    log::info!("[BLE] runner starting");
    loop {
        if let Err(e) = runner.run_with_handler(&ScanEvents).await {
            log::error!("[BLE] runner error: {:?}", e);
        }
    }
}

#[embassy_executor::task]
pub async fn gatt_client_task(stack: &'static BleStack, link: &'static GattLink) {
    loop {
        let conn = link.sessions.receive().await;
        match GattClient::<BleController, DefaultPacketPool, MAX_SERVICES>::new(stack, &conn).await {
            Ok(client) => {
                link.replies.send(GattReply::Ready).await;
                let pending = Cell::new(false);
                let closed = match select(client.task(), serve_requests(&client, link, &pending)).await {
                    Either::First(_) => false,
                    Either::Second(()) => true,
                };
                if !closed {
                    log::warn!("[BLE] node link lost");
                    if pending.get() {
                        link.replies.send(GattReply::Failed(RadioError::NotConnected)).await;
                    }
                    refuse_until_close(link).await;
                }
            }
            Err(e) => {
                log::warn!("[BLE] GATT client setup failed: {:?}", e);
                link.replies
                    .send(GattReply::Failed(RadioError::Stack { operation: "gatt client" }))
                    .await;
            }
        }
        conn.disconnect();
        link.replies.send(GattReply::Done).await;
    }
}

/// Answer requests made after the peer vanished until the controller lets go.
async fn refuse_until_close(link: &GattLink) {
    loop {
        match link.requests.receive().await {
            GattRequest::Close => return,
            _ => link.replies.send(GattReply::Failed(RadioError::NotConnected)).await,
        }
    }
}

async fn serve_requests(
    client: &GattClient<'_, BleController, DefaultPacketPool, MAX_SERVICES>,
    link: &GattLink,
    pending: &Cell<bool>,
) {
    loop {
        let request = link.requests.receive().await;
        pending.set(true);
        let reply = match request {
            GattRequest::Discover(service) => match client.services_by_uuid(&uuid(service)).await {
                Ok(found) => GattReply::Found(!found.is_empty()),
                Err(e) => GattReply::Failed(stack_error("discover")(e)),
            },
            GattRequest::Read(service, characteristic) => {
                match read_value(client, service, characteristic).await {
                    Ok(value) => GattReply::Value(value),
                    Err(e) => GattReply::Failed(e),
                }
            }
            GattRequest::Write(service, characteristic, value) => {
                match write_value(client, service, characteristic, &value).await {
                    Ok(()) => GattReply::Done,
                    Err(e) => GattReply::Failed(e),
                }
            }
            GattRequest::Close => return,
        };
        link.replies.send(reply).await;
        pending.set(false);
    }
}

async fn characteristic(
    client: &GattClient<'_, BleController, DefaultPacketPool, MAX_SERVICES>,
    service: u128,
    characteristic: u128,
) -> Result<Characteristic<u8>, RadioError> {
    let services = client
        .services_by_uuid(&uuid(service))
        .await
        .map_err(stack_error("discover"))?;
    let service = services.first().ok_or(RadioError::AttributeNotFound)?;
    client
        .characteristic_by_uuid(service, &uuid(characteristic))
        .await
        .map_err(|_| RadioError::AttributeNotFound)
}

async fn read_value(
    client: &GattClient<'_, BleController, DefaultPacketPool, MAX_SERVICES>,
    service: u128,
    uuid: u128,
) -> Result<Value, RadioError> {
    let handle = characteristic(client, service, uuid).await?;
    let mut buf = [0u8; VALUE_CAPACITY];
    let len = client
        .read_characteristic(&handle, &mut buf)
        .await
        .map_err(stack_error("read"))?;
    Value::from_slice(&buf[..len.min(VALUE_CAPACITY)]).map_err(|_| RadioError::Stack { operation: "read" })
}

async fn write_value(
    client: &GattClient<'_, BleController, DefaultPacketPool, MAX_SERVICES>,
    service: u128,
    uuid: u128,
    value: &[u8],
) -> Result<(), RadioError> {
    let handle = characteristic(client, service, uuid).await?;
    client
        .write_characteristic(&handle, value)
        .await
        .map_err(stack_error("write"))
}

#[embassy_executor::task]
pub async fn companion_task(
    mut peripheral: Peripheral<'static, BleController, DefaultPacketPool>,
    server: &'static CompanionServer<'static>,
    link: &'static GattLink,
) {
    loop {
        link.advertise.wait().await;
        let conn = match advertise(&mut peripheral, server).await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("[BLE] advertising failed: {:?}", e);
                continue;
            }
        };

        log::info!("[BLE] companion connected");
        COMPANION.on_connect();
        serve_companion(&conn, server, link).await;
        COMPANION.on_disconnect();
        // Drop anything queued for the old link.
        while link.outgoing.try_receive().is_ok() {}
    }
}

async fn advertise(
    peripheral: &mut Peripheral<'static, BleController, DefaultPacketPool>,
    server: &'static CompanionServer<'static>,
) -> Result<
    GattConnection<'static, 'static, DefaultPacketPool>,
    BleHostError<<BleController as Controller>::Error>,
> {
    let mut adv_data = [0; 31];
    let adv_len = AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids128(&[uuids::COMPANION_SERVICE.to_le_bytes()]),
        ],
        &mut adv_data[..],
    )?;

    let mut scan_data = [0; 31];
    let scan_len = AdStructure::encode_slice(
        &[AdStructure::CompleteLocalName(DEVICE_NAME.as_bytes())],
        &mut scan_data[..],
    )?;

    let advertiser = peripheral
        .advertise(
            &Default::default(),
            Advertisement::ConnectableScannableUndirected {
                adv_data: &adv_data[..adv_len],
                scan_data: &scan_data[..scan_len],
            },
        )
        .await?;
    log::info!("[BLE] advertising as {}", DEVICE_NAME);
    let conn = advertiser.accept().await?.with_attribute_server(server)?;
    Ok(conn)
}

async fn serve_companion(
    conn: &GattConnection<'static, 'static, DefaultPacketPool>,
    server: &CompanionServer<'static>,
    link: &GattLink,
) {
    loop {
        match select(conn.next(), link.outgoing.receive()).await {
            Either::First(GattConnectionEvent::Disconnected { reason }) => {
                log::info!("[BLE] companion disconnected: {:?}", reason);
                return;
            }
            Either::First(GattConnectionEvent::Gatt { event }) => {
                if let GattEvent::Write(write) = &event {
                    if write.handle() == server.companion.rx.handle {
                        COMPANION.on_write(write.data());
                    }
                }
                match event.accept() {
                    Ok(reply) => reply.send().await,
                    Err(e) => log::warn!("[BLE] response error: {:?}", e),
                }
            }
            Either::First(_) => {}
            Either::Second(payload) => {
                if let Err(e) = server.companion.tx.notify(conn, &payload).await {
                    log::warn!("[BLE] notify failed: {:?}", e);
                }
            }
        }
    }
}

/// Both roles behind the core radio traits.
pub struct BleRadio {
    central: Option<trouble_host::central::Central<'static, BleController, DefaultPacketPool>>,
    link: &'static GattLink,
    connected: bool,
}

impl BleRadio {
    pub fn new(
        central: trouble_host::central::Central<'static, BleController, DefaultPacketPool>,
        link: &'static GattLink,
    ) -> Self {
        Self {
            central: Some(central),
            link,
            connected: false,
        }
    }

    async fn request(&mut self, request: GattRequest) -> Result<GattReply, RadioError> {
        if !self.connected {
            return Err(RadioError::NotConnected);
        }
        self.link.requests.send(request).await;
        match self.link.replies.receive().await {
            GattReply::Failed(e) => Err(e),
            reply => Ok(reply),
        }
    }
}

impl Central for BleRadio {
    async fn scan(&mut self, window_secs: u32, _inbox: &DiscoveryInbox) -> Result<(), RadioError> {
        let central = self.central.take().ok_or(RadioError::Stack { operation: "scan" })?;
        let mut scanner = Scanner::new(central);

        let result = {
            let config = ScanConfig {
                active: true,
                ..Default::default()
            };
            match scanner.scan(&config).await {
                Ok(_session) => {
                    // Reports arrive through `ScanEvents` while the session lives.
                    Timer::after(Duration::from_secs(window_secs as u64)).await;
                    Ok(())
                }
                Err(e) => Err(stack_error("scan")(e)),
            }
        };

        self.central = Some(scanner.into_inner());
        result
    }

    async fn stop_scan(&mut self) {
        // The scan session ends when `scan` returns.
    }

    async fn connect(&mut self, address: NodeAddress) -> Result<(), RadioError> {
        let central = self.central.as_mut().ok_or(RadioError::NotConnected)?;
        let target = bd_addr(address);
        // Sensor nodes advertise with their public address.
        let filter = [(AddrKind::PUBLIC, &target)];
        let config = ConnectConfig {
            connect_params: Default::default(),
            scan_config: ScanConfig {
                filter_accept_list: &filter,
                timeout: CONNECT_TIMEOUT,
                ..Default::default()
            },
        };

        let conn = central.connect(&config).await.map_err(|e| {
            log::warn!("[BLE] connect failed: {:?}", e);
            RadioError::Timeout
        })?;

        self.link.sessions.send(conn).await;
        match self.link.replies.receive().await {
            GattReply::Ready => {
                self.connected = true;
                Ok(())
            }
            GattReply::Failed(e) => {
                // The client task still reports the teardown.
                let _ = self.link.replies.receive().await;
                Err(e)
            }
            _ => Err(RadioError::Stack { operation: "connect" }),
        }
    }

    async fn discover_service(&mut self, service: u128) -> Result<bool, RadioError> {
        match self.request(GattRequest::Discover(service)).await? {
            GattReply::Found(found) => Ok(found),
            _ => Err(RadioError::Stack { operation: "discover" }),
        }
    }

    async fn read(
        &mut self,
        service: u128,
        characteristic: u128,
        buf: &mut [u8],
    ) -> Result<usize, RadioError> {
        match self.request(GattRequest::Read(service, characteristic)).await? {
            GattReply::Value(value) => {
                let len = value.len().min(buf.len());
                buf[..len].copy_from_slice(&value[..len]);
                Ok(len)
            }
            _ => Err(RadioError::Stack { operation: "read" }),
        }
    }

    async fn write(
        &mut self,
        service: u128,
        characteristic: u128,
        data: &[u8],
    ) -> Result<(), RadioError> {
        let value = Value::from_slice(data).map_err(|_| RadioError::Stack { operation: "write" })?;
        match self.request(GattRequest::Write(service, characteristic, value)).await? {
            GattReply::Done => Ok(()),
            _ => Err(RadioError::Stack { operation: "write" }),
        }
    }

    async fn disconnect(&mut self) {
        if !self.connected {
            return;
        }
        self.link.requests.send(GattRequest::Close).await;
        let _ = self.link.replies.receive().await;
        self.connected = false;
    }

    async fn shutdown(&mut self) {
        self.disconnect().await;
        log::info!("[BLE] radio released for sleep");
    }
}

impl CompanionLink for BleRadio {
    async fn start_advertising(&mut self) -> Result<(), RadioError> {
        self.link.advertise.signal(());
        Ok(())
    }

    async fn notify(&mut self, payload: &[u8]) -> Result<(), RadioError> {
        if !COMPANION.is_connected() {
            return Err(RadioError::NotConnected);
        }
        let notification =
            Notification::from_slice(payload).map_err(|_| RadioError::Stack { operation: "notify" })?;
        self.link.outgoing.send(notification).await;
        Ok(())
    }
}
