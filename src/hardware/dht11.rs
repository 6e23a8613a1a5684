use embassy_time::{Instant, Timer};
use esp_hal::{
    gpio::{DriveMode, Flex, Level, OutputConfig, Pull},
    time,
};

use crate::{
    error::SensorError,
    sensor::{Dht11Bus, FRAME_BITS, Pulse},
};

/// Host start signal, the datasheet asks for at least 18 ms
const START_LOW_MS: u64 = 20;
/// Longest level the sensor ever holds during a frame
const LEVEL_TIMEOUT_US: u64 = 100;

/// Single-wire DHT11 data line on an open-drain GPIO
pub struct GpioBus {
    pin: Flex<'static>,
}

impl GpioBus {
    pub fn new(mut pin: Flex<'static>) -> Self {
        pin.apply_output_config(
            &OutputConfig::default()
                .with_drive_mode(DriveMode::OpenDrain)
                .with_pull(Pull::Up),
        );
        pin.set_input_enable(true);
        pin.set_output_enable(true);
        pin.set_level(Level::High);
        Self { pin }
    }

    /// Busy-wait while the line sits at `level`, returns the time spent
    fn hold(&self, level: Level) -> Result<u16, SensorError> {
        let start = time::Instant::now();
        let timeout = time::Duration::from_micros(LEVEL_TIMEOUT_US);
        while self.pin.level() == level {
            if start.elapsed() > timeout {
                return Err(SensorError::Timeout);
            }
        }
        Ok(start.elapsed().as_micros() as u16)
    }
}

impl Dht11Bus for GpioBus {
    async fn capture(&mut self, pulses: &mut [Pulse; FRAME_BITS]) -> Result<(), SensorError> {
        self.pin.set_level(Level::Low);
        Timer::after_millis(START_LOW_MS).await;

        critical_section::with(|_| {
            self.pin.set_level(Level::High);
            // release, then the sensor answers with 80 us low and 80 us high
            self.hold(Level::High).map_err(|_| SensorError::NoResponse)?;
            self.hold(Level::Low).map_err(|_| SensorError::NoResponse)?;
            self.hold(Level::High).map_err(|_| SensorError::NoResponse)?;

            for pulse in pulses.iter_mut() {
                pulse.low_us = self.hold(Level::Low)?;
                pulse.high_us = self.hold(Level::High)?;
            }
            Ok(())
        })
    }

    fn now_ms(&self) -> u64 {
        Instant::now().as_millis()
    }
}
