//! Error types shared by the node and its hardware bindings

use core::fmt;

/// Failure talking to the DHT11
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    /// Sensor never answered the start pulse
    NoResponse,
    /// A level did not change within the expected window
    Timeout,
    /// Frame received but the parity byte does not match
    Checksum { expected: u8, actual: u8 },
}

impl fmt::Display for SensorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoResponse => write!(f, "sensor did not respond"),
            Self::Timeout => write!(f, "timed out waiting for level change"),
            Self::Checksum { expected, actual } => {
                write!(f, "checksum mismatch: expected {:#04x}, got {:#04x}", expected, actual)
            }
        }
    }
}

impl core::error::Error for SensorError {}

/// Wi-Fi link failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkError {
    /// Radio refused the station configuration
    Configuration,
    /// Radio could not be started
    Start,
    /// Association attempt rejected
    Association,
}

impl fmt::Display for LinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "invalid station configuration"),
            Self::Start => write!(f, "failed to start radio"),
            Self::Association => write!(f, "association rejected"),
        }
    }
}

impl core::error::Error for LinkError {}

/// Broker connection and publish failures
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrokerError {
    /// Broker host name did not resolve
    Dns,
    /// TCP connection to the broker failed
    Tcp,
    /// Broker refused the session, carries the MQTT reason code
    Refused(u8),
    /// Session is gone
    Disconnected,
    /// Transport failed mid-exchange
    Io,
}

impl fmt::Display for BrokerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dns => write!(f, "dns lookup failed"),
            Self::Tcp => write!(f, "tcp connect failed"),
            Self::Refused(code) => write!(f, "{}", code),
            Self::Disconnected => write!(f, "not connected"),
            Self::Io => write!(f, "transport error"),
        }
    }
}

impl core::error::Error for BrokerError {}

/// Payload did not fit its buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodeError {
    BufferFull,
}

impl fmt::Display for EncodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BufferFull => write!(f, "payload buffer full"),
        }
    }
}

impl core::error::Error for EncodeError {}

impl From<fmt::Error> for EncodeError {
    fn from(_: fmt::Error) -> Self {
        Self::BufferFull
    }
}

impl From<serde_json_core::ser::Error> for EncodeError {
    fn from(_: serde_json_core::ser::Error) -> Self {
        Self::BufferFull
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refused_renders_reason_code() {
        assert_eq!(BrokerError::Refused(135).to_string(), "135");
    }

    #[test]
    fn checksum_shows_both_bytes() {
        let err = SensorError::Checksum {
            expected: 0x2a,
            actual: 0x2b,
        };
        assert_eq!(
            err.to_string(),
            "checksum mismatch: expected 0x2a, got 0x2b"
        );
    }
}
