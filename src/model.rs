//! Data produced and tracked by the node

use core::fmt;

/// One humidity/temperature sample and how long each channel took to read
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// Relative humidity in percent, NaN when the read failed
    pub humidity: f32,
    /// Celsius, NaN when the read failed
    pub temperature: f32,
    pub humidity_read_ms: u64,
    pub temperature_read_ms: u64,
}

impl Reading {
    /// Both channels carry a number
    pub fn is_valid(&self) -> bool {
        !self.humidity.is_nan() && !self.temperature.is_nan()
    }
}

/// Lifetime counters, reset only by a reboot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Counters {
    pub messages_sent: u64,
    pub successful_readings: u64,
    pub total_readings: u64,
}

/// Where the main loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connecting,
    Operating,
}

/// Value carried by a publish
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Payload<'a> {
    /// Rendered with two decimals
    Number(f64),
    Text(&'a str),
}

impl fmt::Display for Payload<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Number(value) => write!(f, "{:.2}", value),
            Payload::Text(text) => f.write_str(text),
        }
    }
}

impl From<f32> for Payload<'_> {
    fn from(value: f32) -> Self {
        Payload::Number(value as f64)
    }
}

impl From<u64> for Payload<'_> {
    fn from(value: u64) -> Self {
        Payload::Number(value as f64)
    }
}

impl<'a> From<&'a str> for Payload<'a> {
    fn from(value: &'a str) -> Self {
        Payload::Text(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(humidity: f32, temperature: f32) -> Reading {
        Reading {
            humidity,
            temperature,
            humidity_read_ms: 0,
            temperature_read_ms: 0,
        }
    }

    #[test]
    fn reading_with_nan_channel_is_invalid() {
        assert!(reading(45.0, 21.5).is_valid());
        assert!(!reading(f32::NAN, 21.5).is_valid());
        assert!(!reading(45.0, f32::NAN).is_valid());
        assert!(!reading(f32::NAN, f32::NAN).is_valid());
    }

    #[test]
    fn numbers_render_with_two_decimals() {
        assert_eq!(Payload::from(23.0f32).to_string(), "23.00");
        assert_eq!(Payload::from(1234u64).to_string(), "1234.00");
        assert_eq!(Payload::Number(-4.567).to_string(), "-4.57");
    }

    #[test]
    fn text_renders_verbatim() {
        assert_eq!(Payload::from("connected").to_string(), "connected");
    }
}
