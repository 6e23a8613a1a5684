use core::fmt::Write;

use esp_hal::{
    efuse::Efuse,
    rtc_cntl::{SocResetReason, reset_reason},
    system::Cpu,
};
use heapless::String;

use crate::traits::{FirmwareInfo, HeapStats, SystemInfo};

pub const VERSION: &str = concat!(
    env!("CARGO_PKG_NAME"),
    " ",
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("BUILD_TIMESTAMP"),
    ")"
);

/// Chip facts captured at boot plus live heap figures
pub struct EspSystem {
    reset: Option<SocResetReason>,
    mac: [u8; 6],
    free_space: Option<u32>,
}

impl EspSystem {
    /// `free_space` is the size of the partition the next update lands in
    pub fn new(free_space: Option<u32>) -> Self {
        Self {
            reset: reset_reason(Cpu::ProCpu),
            mac: Efuse::mac_address(),
            free_space,
        }
    }
}

impl SystemInfo for EspSystem {
    fn reset_reason(&self) -> &'static str {
        match self.reset {
            Some(SocResetReason::ChipPowerOn) => "Power on",
            Some(SocResetReason::CoreSw | SocResetReason::Cpu0Sw) => "Software/System restart",
            Some(SocResetReason::CoreDeepSleep) => "Deep-Sleep Wake",
            Some(SocResetReason::SysBrownOut) => "Brownout",
            Some(
                SocResetReason::CoreMwdt0
                | SocResetReason::CoreMwdt1
                | SocResetReason::Cpu0Mwdt0
                | SocResetReason::Cpu0Mwdt1,
            ) => "Hardware Watchdog",
            Some(SocResetReason::CoreRtcWdt | SocResetReason::Cpu0RtcWdt | SocResetReason::SysRtcWdt) => {
                "RTC Watchdog"
            }
            Some(_) => "Other",
            None => "Unknown",
        }
    }

    fn reset_info(&self) -> Option<String<64>> {
        let reason = self.reset.as_ref()?;
        let mut info = String::new();
        write!(info, "Reset reason: {:?}", reason).ok()?;
        Some(info)
    }

    fn heap(&self) -> HeapStats {
        HeapStats {
            free: esp_alloc::HEAP.free() as u32,
            largest_free_block: None,
            fragmentation: None,
        }
    }

    fn cycle_count(&self) -> Option<u32> {
        None
    }

    fn supply_millivolts(&self) -> Option<u16> {
        None
    }

    fn free_stack(&self) -> Option<u32> {
        None
    }

    fn mac_address(&self) -> [u8; 6] {
        self.mac
    }

    fn firmware(&self) -> FirmwareInfo {
        FirmwareInfo {
            md5: None,
            size: None,
            free_space: self.free_space,
            version: VERSION,
        }
    }
}
