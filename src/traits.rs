//! Hardware abstraction traits
//!
//! The node only talks to the outside world through these, so the whole main
//! loop can be driven by a simulated board on the host.
#![allow(async_fn_in_trait)]

use core::net::Ipv4Addr;

use heapless::String;

use crate::{
    config::Credentials,
    error::{BrokerError, LinkError, SensorError},
};

/// Monotonic time source and cooperative waits
pub trait Clock {
    /// Milliseconds since boot
    fn now_ms(&self) -> u64;

    /// Suspend for `ms` milliseconds
    async fn delay_ms(&mut self, ms: u64);

    /// Give the executor a chance to run other tasks
    async fn idle(&mut self);
}

/// Hardware watchdog that resets the chip unless fed
pub trait Watchdog {
    fn feed(&mut self);
}

/// Combined humidity/temperature sensor
pub trait HumiditySensor {
    /// Relative humidity in percent
    async fn read_humidity(&mut self) -> Result<f32, SensorError>;

    /// Temperature in Celsius
    async fn read_temperature(&mut self) -> Result<f32, SensorError>;
}

/// Station mode wireless link
pub trait WifiLink {
    /// Start associating with the access point
    async fn begin(&mut self, credentials: &Credentials<'_>) -> Result<(), LinkError>;

    /// Link is associated and holds an IPv4 lease
    async fn is_connected(&mut self) -> bool;

    fn local_ip(&self) -> Option<Ipv4Addr>;

    /// MAC address of the access point we are associated with
    fn bssid(&self) -> Option<[u8; 6]>;
}

/// Everything needed to open a broker session
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConnectOptions<'a> {
    pub client_id: &'a str,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub keep_alive_secs: u16,
    pub will: LastWill<'a>,
}

/// Message the broker publishes for us when we drop off uncleanly
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LastWill<'a> {
    pub topic: &'a str,
    pub payload: &'a str,
    pub retain: bool,
}

/// Opens broker sessions
///
/// Sessions borrow the connector so buffers and sockets can live in it.
pub trait BrokerConnector {
    type Session<'s>: BrokerSession
    where
        Self: 's;

    async fn connect<'s>(
        &'s mut self,
        options: &ConnectOptions<'_>,
    ) -> Result<Self::Session<'s>, BrokerError>;
}

/// An established MQTT session
pub trait BrokerSession {
    /// False once the transport or the broker gave up on us
    fn is_connected(&self) -> bool;

    /// Publish with QoS 0
    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool)
    -> Result<(), BrokerError>;

    /// Service the session (keep-alive pings)
    async fn poll(&mut self) -> Result<(), BrokerError>;
}

/// Heap usage as reported by the allocator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapStats {
    pub free: u32,
    pub largest_free_block: Option<u32>,
    /// 0 to 100
    pub fragmentation: Option<u8>,
}

/// Facts about the running image
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FirmwareInfo {
    pub md5: Option<String<32>>,
    pub size: Option<u32>,
    /// Room for the next image
    pub free_space: Option<u32>,
    pub version: &'static str,
}

/// Platform introspection used by the diagnostics snapshots
pub trait SystemInfo {
    /// Short name of the last reset cause
    fn reset_reason(&self) -> &'static str;

    /// Longer description of the last reset, when available
    fn reset_info(&self) -> Option<String<64>>;

    fn heap(&self) -> HeapStats;

    /// CPU cycle counter, when the platform exposes it
    fn cycle_count(&self) -> Option<u32>;

    /// Supply voltage in millivolts
    fn supply_millivolts(&self) -> Option<u16>;

    /// Bytes left on the main task stack
    fn free_stack(&self) -> Option<u32>;

    fn mac_address(&self) -> [u8; 6];

    fn firmware(&self) -> FirmwareInfo;
}

/// Over-the-air update endpoint
pub trait OtaPort {
    /// Check for an update request and serve it.
    ///
    /// Returns quickly when nobody is asking. A successful update restarts
    /// the device and never returns.
    async fn handle<W: Watchdog>(&mut self, watchdog: &mut W);
}

/// The set of peripherals a [`crate::node::Node`] runs on
pub trait Board {
    type Sensor: HumiditySensor;
    type Wifi: WifiLink;
    type Clock: Clock;
    type Watchdog: Watchdog;
    type System: SystemInfo;
    type Ota: OtaPort;
}
