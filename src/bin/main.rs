#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_net::{Config as NetConfig, DhcpConfig, Runner, StackResources};
use esp_backtrace as _;
use esp_hal::{clock::CpuClock, gpio::Flex, rng::Rng, timer::timg::TimerGroup};
use esp_radio::wifi::WifiDevice;
use log::{info, warn};

use dht11_mqtt::{
    config::Config,
    hardware::{EmbassyClock, EspBoard, EspSystem, EspWatchdog, EspWifi, GpioBus, MqttHardware},
    node::{Node, Parts},
    sensor::Dht11,
};

esp_bootloader_esp_idf::esp_app_desc!();

macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}

#[esp_rtos::main]
async fn main(spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default().with_cpu_clock(CpuClock::max()));
    esp_alloc::heap_allocator!(#[esp_hal::ram(reclaimed)] size: 65536);

    let config = Config::from_env();
    info!("=== DHT11 MQTT node ({:?}) ===", config.variant);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let radio = &*mk_static!(
        esp_radio::Controller<'static>,
        esp_radio::init().expect("radio init failed")
    );
    let (controller, ifaces) = esp_radio::wifi::new(radio, peripherals.WIFI, Default::default())
        .expect("wifi init failed");

    let mut dhcp = DhcpConfig::default();
    dhcp.hostname = heapless::String::try_from(config.ota.hostname).ok();
    let rng = Rng::new();
    let seed = (u64::from(rng.random()) << 32) | u64::from(rng.random());
    let (stack, runner) = embassy_net::new(
        ifaces.sta,
        NetConfig::dhcpv4(dhcp),
        mk_static!(StackResources<5>, StackResources::new()),
        seed,
    );
    if let Err(e) = spawner.spawn(net_task(runner)) {
        warn!("failed to spawn network task: {:?}", e);
    }

    let sensor = Dht11::new(GpioBus::new(Flex::new(peripherals.GPIO2)));
    let wifi = EspWifi::new(controller, stack);
    let broker = mk_static!(
        MqttHardware,
        MqttHardware::new(stack, config.broker.host, config.broker.port)
    );

    #[cfg(not(feature = "basic"))]
    let (ota, free_space) = {
        use dht11_mqtt::hardware::{EspOta, OtaBuffers};

        let buffers = mk_static!(OtaBuffers, OtaBuffers::new());
        let flash = esp_storage::FlashStorage::new(peripherals.FLASH);
        let mut ota = EspOta::new(stack, buffers, flash, config.ota);
        let free_space = ota.capacity();
        (ota, free_space)
    };
    #[cfg(feature = "basic")]
    let (ota, free_space) = (dht11_mqtt::ota::Disabled, None);

    // armed last, everything above may block for a while
    let timg1 = TimerGroup::new(peripherals.TIMG1);
    let watchdog = EspWatchdog::new(timg1.wdt);

    let parts = Parts::<EspBoard<_>> {
        sensor,
        wifi,
        clock: EmbassyClock,
        watchdog,
        system: EspSystem::new(free_space),
        ota,
    };
    Node::new(config, parts).run(broker).await;
}
