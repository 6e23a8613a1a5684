//! Build-time configuration
//!
//! Secrets come from environment variables read by `option_env!` when the
//! firmware is compiled, everything else is a constant of the node.

use crate::retry::RetryPolicy;

/// Wi-Fi station credentials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials<'a> {
    pub ssid: &'a str,
    pub password: &'a str,
}

/// Broker endpoint and session parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BrokerConfig {
    /// Host name or dotted IPv4 address
    pub host: &'static str,
    pub port: u16,
    pub username: Option<&'static str>,
    pub password: Option<&'static str>,
    pub client_id: &'static str,
    pub keep_alive_secs: u16,
}

/// Update channel settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OtaConfig {
    /// Also used as the DHCP host name
    pub hostname: &'static str,
    pub password: &'static str,
    pub port: u16,
}

/// Firmware flavour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// Prefixed topics, diagnostics and OTA
    Full,
    /// Flat topics, sensor values only
    Basic,
}

impl Variant {
    /// Flavour selected by the `basic` cargo feature
    pub const fn from_features() -> Self {
        if cfg!(feature = "basic") {
            Variant::Basic
        } else {
            Variant::Full
        }
    }

    pub fn topics(self) -> &'static Topics {
        match self {
            Variant::Full => &FULL_TOPICS,
            Variant::Basic => &BASIC_TOPICS,
        }
    }

    pub fn publishes_diagnostics(self) -> bool {
        self == Variant::Full
    }

    pub fn serves_updates(self) -> bool {
        self == Variant::Full
    }
}

/// Topic names for every value the node publishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Topics {
    pub now: &'static str,
    pub temperature_read_time: &'static str,
    pub humidity_read_time: &'static str,
    pub read_success: &'static str,
    pub temperature: &'static str,
    pub humidity: &'static str,
    pub status: &'static str,
    pub startup_info: Option<&'static str>,
    pub system_info: Option<&'static str>,
}

macro_rules! prefixed {
    ($suffix:literal) => {
        concat!("home/dht11", $suffix)
    };
}

pub const FULL_TOPICS: Topics = Topics {
    now: prefixed!("/now"),
    temperature_read_time: prefixed!("/temperature_read_time"),
    humidity_read_time: prefixed!("/humidity_read_time"),
    read_success: prefixed!("/read_success"),
    temperature: prefixed!("/temperature"),
    humidity: prefixed!("/humidity"),
    status: prefixed!("/status"),
    startup_info: Some(prefixed!("/startup_info_json")),
    system_info: Some(prefixed!("/system_info")),
};

pub const BASIC_TOPICS: Topics = Topics {
    now: "now",
    temperature_read_time: "temperature_read_time",
    humidity_read_time: "humidity_read_time",
    read_success: "read_success",
    temperature: "temperature",
    humidity: "humidity",
    status: "status",
    startup_info: None,
    system_info: None,
};

pub const PUBLISH_DELAY_MS: u64 = 1_000;
pub const BROKER_RETRY_MS: u64 = 5_000;
pub const WIFI_POLL_MS: u64 = 500;
pub const KEEP_ALIVE_SECS: u16 = 15;
pub const WATCHDOG_TIMEOUT_MS: u64 = 8_000;
/// Upper bound for any single network wait: DNS, TCP connect, CONNACK,
/// PINGRESP, socket reads and writes
pub const NETWORK_TIMEOUT_MS: u64 = 5_000;
pub const MQTT_BUFFER_SIZE: usize = 512;
pub const MQTT_CLIENT_ID: &str = "esp32dht11";
pub const DEFAULT_MQTT_PORT: u16 = 1883;
pub const DEFAULT_OTA_PORT: u16 = 3232;

/// Complete node configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub wifi: Credentials<'static>,
    pub broker: BrokerConfig,
    pub ota: OtaConfig,
    pub variant: Variant,
    /// Cadence of the sample-publish cycle
    pub publish_delay_ms: u64,
    pub wifi_retry: RetryPolicy,
    pub broker_retry: RetryPolicy,
}

impl Config {
    /// Configuration baked in at compile time
    pub fn from_env() -> Self {
        Self {
            wifi: Credentials {
                ssid: option_env!("WIFI_SSID").unwrap_or(""),
                password: option_env!("WIFI_PASSWORD").unwrap_or(""),
            },
            broker: BrokerConfig {
                host: option_env!("MQTT_SERVER").unwrap_or("mqtt.local"),
                port: parse_port(option_env!("MQTT_PORT"), DEFAULT_MQTT_PORT),
                username: non_empty(option_env!("MQTT_USER")),
                password: non_empty(option_env!("MQTT_PASSWORD")),
                client_id: MQTT_CLIENT_ID,
                keep_alive_secs: KEEP_ALIVE_SECS,
            },
            ota: OtaConfig {
                hostname: option_env!("OTA_HOSTNAME").unwrap_or("ESP32"),
                password: option_env!("OTA_PASSWORD").unwrap_or("esp8266"),
                port: DEFAULT_OTA_PORT,
            },
            variant: Variant::from_features(),
            publish_delay_ms: PUBLISH_DELAY_MS,
            wifi_retry: RetryPolicy::forever(WIFI_POLL_MS),
            broker_retry: RetryPolicy::forever(BROKER_RETRY_MS),
        }
    }

    pub fn topics(&self) -> &'static Topics {
        self.variant.topics()
    }
}

fn non_empty(value: Option<&'static str>) -> Option<&'static str> {
    value.filter(|v| !v.is_empty())
}

fn parse_port(value: Option<&str>, default: u16) -> u16 {
    value.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_topics_share_prefix() {
        let topics = Variant::Full.topics();
        for topic in [
            topics.now,
            topics.temperature_read_time,
            topics.humidity_read_time,
            topics.read_success,
            topics.temperature,
            topics.humidity,
            topics.status,
        ] {
            assert!(topic.starts_with("home/dht11/"), "{}", topic);
        }
        assert_eq!(topics.startup_info, Some("home/dht11/startup_info_json"));
        assert_eq!(topics.system_info, Some("home/dht11/system_info"));
    }

    #[test]
    fn basic_topics_are_flat_without_diagnostics() {
        let topics = Variant::Basic.topics();
        assert!(!topics.temperature.contains('/'));
        assert!(topics.startup_info.is_none());
        assert!(topics.system_info.is_none());
        assert!(!Variant::Basic.publishes_diagnostics());
    }

    #[test]
    fn port_falls_back_on_garbage() {
        assert_eq!(parse_port(Some("8883"), DEFAULT_MQTT_PORT), 8883);
        assert_eq!(parse_port(Some("nope"), DEFAULT_MQTT_PORT), 1883);
        assert_eq!(parse_port(None, DEFAULT_MQTT_PORT), 1883);
    }

    #[test]
    fn empty_credentials_are_absent() {
        assert_eq!(non_empty(Some("")), None);
        assert_eq!(non_empty(Some("user")), Some("user"));
    }

    #[test]
    fn network_waits_fit_in_the_watchdog_period() {
        assert!(NETWORK_TIMEOUT_MS < WATCHDOG_TIMEOUT_MS);
    }

    #[test]
    fn production_retries_forever() {
        let config = Config::from_env();
        assert_eq!(config.broker_retry, RetryPolicy::forever(5_000));
        assert_eq!(config.wifi_retry, RetryPolicy::forever(500));
        assert_eq!(config.publish_delay_ms, 1_000);
    }
}
