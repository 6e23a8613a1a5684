use std::process::Command;

fn main() {
    // Build timestamp reported in the startup snapshot
    let timestamp = Command::new("date")
        .arg("+%Y-%m-%d %H:%M:%S UTC")
        .env("TZ", "UTC")
        .output()
        .ok()
        .and_then(|output| String::from_utf8(output.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string());

    println!("cargo:rustc-env=BUILD_TIMESTAMP={}", timestamp);

    // Secrets are baked in with option_env!, rebuild when they change
    for key in [
        "WIFI_SSID",
        "WIFI_PASSWORD",
        "MQTT_SERVER",
        "MQTT_PORT",
        "MQTT_USER",
        "MQTT_PASSWORD",
        "OTA_HOSTNAME",
        "OTA_PASSWORD",
    ] {
        println!("cargo:rerun-if-env-changed={}", key);
    }

    println!("cargo:rerun-if-changed=build.rs");
}
