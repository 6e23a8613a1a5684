//! ESP32-S3 bindings for the node traits

mod dht11;
mod mqtt;
mod ota;
mod system;
mod wifi;

use core::marker::PhantomData;

use embassy_time::{Duration, Instant, Timer};
use esp_hal::{
    peripherals::TIMG1,
    time,
    timer::timg::{MwdtStage, Wdt},
};

pub use dht11::GpioBus;
pub use mqtt::{MqttHardware, MqttSession};
pub use ota::{EspOta, OtaBuffers};
pub use system::EspSystem;
pub use wifi::EspWifi;

use crate::{
    config::WATCHDOG_TIMEOUT_MS,
    sensor::Dht11,
    traits::{Board, Clock, OtaPort, Watchdog},
};

/// Granularity of the main loop when nothing is due
const IDLE_MS: u64 = 10;

/// Marker type tying the hardware implementations together.
///
/// Builds without update support plug in [`crate::ota::Disabled`].
pub struct EspBoard<O = EspOta>(PhantomData<O>);

impl<O: OtaPort> Board for EspBoard<O> {
    type Sensor = Dht11<GpioBus>;
    type Wifi = EspWifi;
    type Clock = EmbassyClock;
    type Watchdog = EspWatchdog;
    type System = EspSystem;
    type Ota = O;
}

/// Milliseconds since boot from the embassy time driver
#[derive(Debug, Default, Clone, Copy)]
pub struct EmbassyClock;

impl Clock for EmbassyClock {
    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }

    async fn delay_ms(&mut self, ms: u64) {
        Timer::after(Duration::from_millis(ms)).await;
    }

    async fn idle(&mut self) {
        Timer::after(Duration::from_millis(IDLE_MS)).await;
    }
}

/// Main watchdog of timer group 1, resets the chip when not fed
pub struct EspWatchdog {
    wdt: Wdt<TIMG1<'static>>,
}

impl EspWatchdog {
    pub fn new(mut wdt: Wdt<TIMG1<'static>>) -> Self {
        wdt.set_timeout(
            MwdtStage::Stage0,
            time::Duration::from_millis(WATCHDOG_TIMEOUT_MS),
        );
        wdt.enable();
        Self { wdt }
    }
}

impl Watchdog for EspWatchdog {
    fn feed(&mut self) {
        self.wdt.feed();
    }
}
