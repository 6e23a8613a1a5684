#![no_std]
#![no_main]

use core::fmt::Write;

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::{gpio::Flex, timer::timg::TimerGroup};
use heapless::String;

use dht11_mqtt::{
    hardware::{EmbassyClock, GpioBus},
    logic::Cadence,
    model::Payload,
    sensor::{self, Dht11, Frame, MIN_SAMPLE_INTERVAL_MS},
    traits::Clock,
};

esp_bootloader_esp_idf::esp_app_desc!();

struct TestResults {
    passed: u32,
    failed: u32,
}

impl TestResults {
    fn new() -> Self {
        Self {
            passed: 0,
            failed: 0,
        }
    }

    fn total(&self) -> u32 {
        self.passed + self.failed
    }

    fn check(&mut self, condition: bool, name: &str) {
        if condition {
            self.passed += 1;
            esp_println::println!("  ok   {}", name);
        } else {
            self.failed += 1;
            esp_println::println!("  FAIL {}", name);
        }
    }

    fn check_eq<T: PartialEq + core::fmt::Debug>(&mut self, left: T, right: T, name: &str) {
        if left == right {
            self.check(true, name);
        } else {
            self.failed += 1;
            esp_println::println!("  FAIL {}: {:?} != {:?}", name, left, right);
        }
    }

    fn check_close(&mut self, value: f32, expected: f32, name: &str) {
        if (value - expected).abs() < 0.01 {
            self.check(true, name);
        } else {
            self.failed += 1;
            esp_println::println!("  FAIL {}: {:.2} not close to {:.2}", name, value, expected);
        }
    }

    fn summary(&self) {
        esp_println::println!("\n------------------------------------------");
        esp_println::println!(
            "{} checks, {} passed, {} failed",
            self.total(),
            self.passed,
            self.failed
        );
        esp_println::println!("------------------------------------------");
    }
}

fn test_frame_decoding(results: &mut TestResults) {
    esp_println::println!("\n[TEST] DHT11 frame decoding");

    match Frame::from_bytes([55, 0, 23, 4, 82]) {
        Ok(frame) => {
            results.check_close(frame.humidity(), 55.0, "humidity integral part");
            results.check_close(frame.temperature(), 23.4, "temperature with decimal");
        }
        Err(_) => results.check(false, "valid frame accepted"),
    }
    results.check(
        Frame::from_bytes([55, 0, 23, 4, 0]).is_err(),
        "bad checksum rejected",
    );
    match Frame::from_bytes([30, 0, 2, 0x85, 0xA5]) {
        Ok(frame) => results.check_close(frame.temperature(), -2.5, "negative temperature"),
        Err(_) => results.check(false, "negative frame accepted"),
    }
}

fn test_cadence(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Publish cadence");

    let mut cadence = Cadence::new(1_000);
    results.check_eq(cadence.delay_ms(), 1_000, "delay kept");
    results.check(!cadence.poll(1_000), "not due at exactly the delay");
    results.check(cadence.poll(1_001), "due once the delay elapsed");
    results.check(!cadence.poll(1_500), "not due again right away");
    results.check_eq(cadence.last_ms(), 1_001, "last tick recorded");
}

fn test_payload_format(results: &mut TestResults) {
    esp_println::println!("\n[TEST] Payload formatting");

    let mut out: String<32> = String::new();
    let _ = write!(out, "{}", Payload::from(21.0f32));
    results.check_eq(out.as_str(), "21.00", "float uses two decimals");

    out.clear();
    let _ = write!(out, "{}", Payload::from(1234u64));
    results.check_eq(out.as_str(), "1234.00", "integers share the float format");
}

async fn test_dht11(results: &mut TestResults, pin: Flex<'static>) {
    esp_println::println!("\n[TEST] DHT11 on GPIO2");

    let mut dht = Dht11::new(GpioBus::new(pin));
    let clock = EmbassyClock;

    // sensor needs a moment after power up
    Timer::after(Duration::from_millis(MIN_SAMPLE_INTERVAL_MS)).await;

    let mut valid = 0;
    for i in 0..3 {
        let reading = sensor::sample(&mut dht, &clock).await;
        esp_println::println!(
            "    sample {}: {:.1} %RH {:.1} C ({} ms / {} ms)",
            i + 1,
            reading.humidity,
            reading.temperature,
            reading.humidity_read_ms,
            reading.temperature_read_ms
        );
        if reading.is_valid() {
            valid += 1;
            results.check(
                (0.0..=100.0).contains(&reading.humidity),
                "humidity in range",
            );
            results.check(
                (-20.0..=60.0).contains(&reading.temperature),
                "temperature in range",
            );
        }
        Timer::after(Duration::from_millis(MIN_SAMPLE_INTERVAL_MS + 100)).await;
    }
    results.check(valid > 0, "at least one valid reading");

    let start = clock.now_ms();
    let cached = sensor::sample(&mut dht, &clock).await;
    let again = sensor::sample(&mut dht, &clock).await;
    results.check(
        clock.now_ms() - start < MIN_SAMPLE_INTERVAL_MS,
        "second read within the interval is served from cache",
    );
    results.check(
        cached.temperature.to_bits() == again.temperature.to_bits(),
        "cached value repeats",
    );
}

#[esp_rtos::main]
async fn main(_spawner: Spawner) {
    esp_println::logger::init_logger_from_env();
    let peripherals = esp_hal::init(esp_hal::Config::default());

    esp_println::println!("\n=== DHT11 node hardware checks ===");

    let mut results = TestResults::new();
    test_frame_decoding(&mut results);
    test_cadence(&mut results);
    test_payload_format(&mut results);

    let dht_pin = Flex::new(peripherals.GPIO2);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    test_dht11(&mut results, dht_pin).await;

    results.summary();

    loop {
        Timer::after(Duration::from_secs(5)).await;
        if results.failed == 0 {
            esp_println::println!("all checks passed");
        } else {
            esp_println::println!("{} checks failed", results.failed);
        }
    }
}
