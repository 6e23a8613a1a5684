//! Startup and runtime snapshots published as JSON
//!
//! Key names are fixed, downstream dashboards depend on them. Values the
//! platform cannot report are left out of the object.

use core::fmt::Write;

use heapless::String;
use log::warn;
use serde::Serialize;

use crate::{
    broker,
    error::EncodeError,
    model::{Counters, Payload},
    traits::{BrokerSession, SystemInfo, WifiLink},
};

pub const STARTUP_JSON_CAPACITY: usize = 512;
pub const STATS_JSON_CAPACITY: usize = 256;

#[derive(Debug, Serialize)]
struct StartupInfo<'a> {
    #[serde(rename = "ResetInfo", skip_serializing_if = "Option::is_none")]
    reset_info: Option<&'a str>,
    #[serde(rename = "ResetReason")]
    reset_reason: &'a str,
    #[serde(rename = "LocalIP")]
    local_ip: &'a str,
    #[serde(rename = "MacAddress")]
    mac_address: &'a str,
    #[serde(rename = "SSID")]
    ssid: &'a str,
    #[serde(rename = "BSSIDstr", skip_serializing_if = "Option::is_none")]
    bssid: Option<&'a str>,
    #[serde(rename = "SketchMD5", skip_serializing_if = "Option::is_none")]
    sketch_md5: Option<&'a str>,
    #[serde(rename = "SketchSize", skip_serializing_if = "Option::is_none")]
    sketch_size: Option<u32>,
    #[serde(rename = "FreeSketchSpace", skip_serializing_if = "Option::is_none")]
    free_sketch_space: Option<u32>,
    #[serde(rename = "FullVersion")]
    full_version: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SystemStats {
    hfree: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    hmax: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    hfrag: Option<u8>,
    #[serde(rename = "CycleCount", skip_serializing_if = "Option::is_none")]
    cycle_count: Option<u32>,
    #[serde(rename = "Vcc", skip_serializing_if = "Option::is_none")]
    vcc: Option<u16>,
    #[serde(rename = "FreeContStack", skip_serializing_if = "Option::is_none")]
    free_cont_stack: Option<u32>,
    mqtt_messages_sent: u64,
    dht11_successful_readings: u64,
    dht11_total_readings: u64,
}

/// `AA:BB:CC:DD:EE:FF`
pub fn format_mac(mac: &[u8; 6]) -> String<17> {
    let mut out = String::new();
    for (i, byte) in mac.iter().enumerate() {
        if i > 0 {
            let _ = out.push(':');
        }
        let _ = write!(out, "{:02X}", byte);
    }
    out
}

/// One-off snapshot taken right after the first broker connection
pub fn startup_json<Y: SystemInfo, L: WifiLink>(
    system: &Y,
    wifi: &L,
    ssid: &str,
) -> Result<String<STARTUP_JSON_CAPACITY>, EncodeError> {
    let mut local_ip: String<15> = String::new();
    match wifi.local_ip() {
        Some(ip) => write!(local_ip, "{}", ip)?,
        None => local_ip.push_str("0.0.0.0").map_err(|_| EncodeError::BufferFull)?,
    }
    let mac = format_mac(&system.mac_address());
    let bssid = wifi.bssid().map(|b| format_mac(&b));
    let reset_info = system.reset_info();
    let firmware = system.firmware();

    let info = StartupInfo {
        reset_info: reset_info.as_deref(),
        reset_reason: system.reset_reason(),
        local_ip: &local_ip,
        mac_address: &mac,
        ssid,
        bssid: bssid.as_deref(),
        sketch_md5: firmware.md5.as_deref(),
        sketch_size: firmware.size,
        free_sketch_space: firmware.free_space,
        full_version: firmware.version,
    };
    Ok(serde_json_core::to_string(&info)?)
}

/// Heap, CPU and counter snapshot
pub fn stats_json<Y: SystemInfo>(
    system: &Y,
    counters: &Counters,
) -> Result<String<STATS_JSON_CAPACITY>, EncodeError> {
    let heap = system.heap();
    let stats = SystemStats {
        hfree: heap.free,
        hmax: heap.largest_free_block,
        hfrag: heap.fragmentation,
        cycle_count: system.cycle_count(),
        vcc: system.supply_millivolts(),
        free_cont_stack: system.free_stack(),
        mqtt_messages_sent: counters.messages_sent,
        dht11_successful_readings: counters.successful_readings,
        dht11_total_readings: counters.total_readings,
    };
    Ok(serde_json_core::to_string(&stats)?)
}

pub async fn publish_startup_info<S, Y, L>(
    session: &mut S,
    counters: &mut Counters,
    topic: &str,
    system: &Y,
    wifi: &L,
    ssid: &str,
) where
    S: BrokerSession,
    Y: SystemInfo,
    L: WifiLink,
{
    match startup_json(system, wifi, ssid) {
        Ok(json) => broker::publish(session, counters, topic, Payload::Text(&json)).await,
        Err(e) => warn!("startup info not published: {}", e),
    }
}

pub async fn publish_system_info<S, Y>(
    session: &mut S,
    counters: &mut Counters,
    topic: &str,
    system: &Y,
) where
    S: BrokerSession,
    Y: SystemInfo,
{
    match stats_json(system, counters) {
        Ok(json) => broker::publish(session, counters, topic, Payload::Text(&json)).await,
        Err(e) => warn!("system info not published: {}", e),
    }
}
