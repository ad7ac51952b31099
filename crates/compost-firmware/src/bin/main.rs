#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]
#![deny(clippy::large_stack_frames)]

use compost_core::config::MasterConfig;
use compost_core::controller::{Inboxes, MasterController};
use compost_core::power::PowerControl;
use compost_core::radio::DEVICE_NAME;
use compost_firmware::power::{self, DeepSleep};
use compost_firmware::radio::{
    BleController, BleRadio, BleResources, BleStack, COMPANION, CompanionServer, DISCOVERY,
    GattLink, ble_runner_task, companion_task, gatt_client_task,
};
use compost_firmware::sd_card::SdFileSystem;
use compost_firmware::timebase::EmbassyTimebase;
use embassy_executor::Spawner;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::SdCard;
use esp_hal::clock::CpuClock;
use esp_hal::delay::Delay;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::spi::master::{Config as SpiConfig, Spi};
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::ble::controller::BleConnector;
use static_cell::StaticCell;
use trouble_host::prelude::*;

#[panic_handler]
fn panic(info: &core::panic::PanicInfo) -> ! {
    rtt_target::rprintln!("PANIC: {}", info);
    loop {}
}

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

fn master_config() -> MasterConfig {
    let mut config = MasterConfig::default();
    if let Some(secs) = option_env!("COMPOST_SLEEP_SECS").and_then(|s| s.parse().ok()) {
        config.sleep_duration_secs = secs;
    }
    config
}

#[allow(
    clippy::large_stack_frames,
    reason = "it's not unusual to allocate larger buffers etc. in main"
)]
#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    rtt_target::rtt_init_log!();

    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    log::info!("[BOOT] embassy initialized");

    let retained_block = power::take_retained_block().expect("retained block taken twice");

    // SD card on VSPI: CS 5, MOSI 23, MISO 19, SCK 18
    let sd_cs = Output::new(peripherals.GPIO5, Level::High, OutputConfig::default());
    let storage = Spi::new(
        peripherals.SPI2,
        SpiConfig::default().with_frequency(Rate::from_khz(400)),
    )
    .ok()
    .map(|bus| {
        bus.with_sck(peripherals.GPIO18)
            .with_mosi(peripherals.GPIO23)
            .with_miso(peripherals.GPIO19)
    })
    .and_then(|bus| ExclusiveDevice::new(bus, sd_cs, Delay::new()).ok())
    .and_then(|spi_device| SdFileSystem::new(SdCard::new(spi_device, Delay::new())).ok());

    // Enclosure sensor on I2C: SDA 21, SCL 22
    #[cfg(feature = "sensor-sht40")]
    let onboard = esp_hal::i2c::master::I2c::new(peripherals.I2C0, Default::default())
        .ok()
        .map(|i2c| {
            let i2c = i2c
                .with_sda(peripherals.GPIO21)
                .with_scl(peripherals.GPIO22)
                .into_async();
            compost_firmware::onboard::Sht40Sensor::new(i2c)
        });
    #[cfg(not(feature = "sensor-sht40"))]
    let onboard: Option<compost_core::sensors::NoSensor> = None;

    // BLE host
    static RADIO_INIT: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
    let radio_init = RADIO_INIT.init(esp_radio::init().expect("Failed to initialize BLE controller"));
    let transport = BleConnector::new(radio_init, peripherals.BT, Default::default())
        .expect("Failed to initialize BLE transport");
    let ble_controller: BleController = ExternalController::new(transport);

    static RESOURCES: StaticCell<BleResources> = StaticCell::new();
    static STACK: StaticCell<BleStack> = StaticCell::new();
    let stack: &'static BleStack =
        STACK.init(trouble_host::new(ble_controller, RESOURCES.init(HostResources::new())));
    let Host {
        central,
        peripheral,
        runner,
        ..
    } = stack.build();

    static SERVER: StaticCell<CompanionServer<'static>> = StaticCell::new();
    let server = SERVER.init(
        CompanionServer::new_with_config(GapConfig::Peripheral(PeripheralConfig {
            name: DEVICE_NAME,
            appearance: &appearance::thermometer::GENERIC_THERMOMETER,
        }))
        .expect("Failed to build GATT server"),
    );

    static LINK: StaticCell<GattLink> = StaticCell::new();
    let link: &'static GattLink = LINK.init(GattLink::new());

    spawner.must_spawn(ble_runner_task(runner));
    spawner.must_spawn(gatt_client_task(stack, link));
    spawner.must_spawn(companion_task(peripheral, server, link));

    let mut controller = MasterController::boot(
        master_config(),
        storage,
        BleRadio::new(central, link),
        EmbassyTimebase,
        onboard,
        Inboxes {
            discovery: &DISCOVERY,
            companion: &COMPANION,
        },
        retained_block,
    );

    let request = controller.run_until_sleep().await;
    DeepSleep::new(peripherals.LPWR).suspend(request)
}
