//! DHT11 protocol and the timed sensor read
//!
//! After the start signal the DHT11 sends 40 bits. Each bit is a ~50 µs low
//! level followed by a high level that lasts ~27 µs for a zero and ~70 µs for
//! a one. The five bytes are humidity (integral, decimal), temperature
//! (integral, decimal with the sign in bit 7) and a checksum.
#![allow(async_fn_in_trait)]

use log::debug;

use crate::{
    error::SensorError,
    model::Reading,
    traits::{Clock, HumiditySensor},
};

pub const FRAME_BITS: usize = 40;

/// Minimum time between two transactions with the sensor
pub const MIN_SAMPLE_INTERVAL_MS: u64 = 2_000;

/// Measured durations of one data bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pulse {
    pub low_us: u16,
    pub high_us: u16,
}

impl Pulse {
    pub fn bit(&self) -> bool {
        self.high_us > self.low_us
    }
}

/// Decoded, checksum-verified sensor frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame(pub [u8; 5]);

impl Frame {
    /// Verify the checksum of five raw bytes
    pub fn from_bytes(bytes: [u8; 5]) -> Result<Self, SensorError> {
        let expected = bytes[..4]
            .iter()
            .fold(0u8, |sum, byte| sum.wrapping_add(*byte));
        if expected != bytes[4] {
            return Err(SensorError::Checksum {
                expected,
                actual: bytes[4],
            });
        }
        Ok(Self(bytes))
    }

    /// Assemble bytes MSB first from captured pulses
    pub fn from_pulses(pulses: &[Pulse; FRAME_BITS]) -> Result<Self, SensorError> {
        let mut bytes = [0u8; 5];
        for (i, pulse) in pulses.iter().enumerate() {
            bytes[i / 8] <<= 1;
            if pulse.bit() {
                bytes[i / 8] |= 1;
            }
        }
        Self::from_bytes(bytes)
    }

    pub fn humidity(&self) -> f32 {
        self.0[0] as f32 + self.0[1] as f32 * 0.1
    }

    /// Bit 7 of the decimal byte flags a reading below zero. The integral
    /// part is then stored as `-1 - byte2` and the low nibble of the decimal
    /// byte is added on top, so `[.., 2, 0x83, ..]` is -2.7 C.
    pub fn temperature(&self) -> f32 {
        let integral = if self.0[3] & 0x80 != 0 {
            -1.0 - self.0[2] as f32
        } else {
            self.0[2] as f32
        };
        integral + (self.0[3] & 0x0f) as f32 * 0.1
    }
}

/// Raw single-wire access to a DHT11
pub trait Dht11Bus {
    /// Send the start signal and time the 40 data bits
    async fn capture(&mut self, pulses: &mut [Pulse; FRAME_BITS]) -> Result<(), SensorError>;

    /// Milliseconds since boot, used to pace transactions
    fn now_ms(&self) -> u64;
}

/// DHT11 driver
///
/// Talks to the sensor at most once per [`MIN_SAMPLE_INTERVAL_MS`] and serves
/// the previous outcome, failure included, in between.
pub struct Dht11<B> {
    bus: B,
    last: Option<(u64, Result<Frame, SensorError>)>,
}

impl<B: Dht11Bus> Dht11<B> {
    pub fn new(bus: B) -> Self {
        Self { bus, last: None }
    }

    pub async fn frame(&mut self) -> Result<Frame, SensorError> {
        let now = self.bus.now_ms();
        if let Some((at, result)) = self.last
            && now.saturating_sub(at) < MIN_SAMPLE_INTERVAL_MS
        {
            return result;
        }

        let mut pulses = [Pulse::default(); FRAME_BITS];
        let result = match self.bus.capture(&mut pulses).await {
            Ok(()) => Frame::from_pulses(&pulses),
            Err(e) => Err(e),
        };
        self.last = Some((now, result));
        result
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }
}

impl<B: Dht11Bus> HumiditySensor for Dht11<B> {
    async fn read_humidity(&mut self) -> Result<f32, SensorError> {
        Ok(self.frame().await?.humidity())
    }

    async fn read_temperature(&mut self) -> Result<f32, SensorError> {
        Ok(self.frame().await?.temperature())
    }
}

fn or_nan(result: Result<f32, SensorError>, channel: &str) -> f32 {
    match result {
        Ok(value) => value,
        Err(e) => {
            debug!("{} read failed: {}", channel, e);
            f32::NAN
        }
    }
}

/// Read humidity then temperature, timing each channel
///
/// Failed channels come back as NaN, the caller decides what to do with an
/// invalid [`Reading`].
pub async fn sample<S: HumiditySensor, C: Clock>(sensor: &mut S, clock: &C) -> Reading {
    let started = clock.now_ms();
    let humidity = or_nan(sensor.read_humidity().await, "humidity");
    let humidity_done = clock.now_ms();
    let temperature = or_nan(sensor.read_temperature().await, "temperature");
    let temperature_done = clock.now_ms();

    Reading {
        humidity,
        temperature,
        humidity_read_ms: humidity_done.saturating_sub(started),
        temperature_read_ms: temperature_done.saturating_sub(humidity_done),
    }
}
