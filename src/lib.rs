//! DHT11 humidity/temperature node publishing to MQTT over Wi-Fi.
//!
//! Everything outside [`hardware`] is platform independent and runs on the
//! host under `cargo test`. The ESP32-S3 bindings live behind the `esp32s3`
//! feature.
#![cfg_attr(not(test), no_std)]

pub mod broker;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod logic;
pub mod model;
pub mod network;
pub mod node;
pub mod ota;
pub mod retry;
pub mod sensor;
pub mod traits;

#[cfg(feature = "esp32s3")]
pub mod hardware;
