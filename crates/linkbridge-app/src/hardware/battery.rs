//! Battery gauge under `/sys/class/power_supply`

use std::fmt;
use std::path::PathBuf;

pub const BATTERY_ROOT: &str = "/sys/class/power_supply/battery";

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryInfo {
    /// Percent
    pub capacity: i32,
    /// Volts
    pub voltage: f32,
    pub charging: bool,
}

/// `电量: 87% 电池电压: 4.012V 充电中 `
impl fmt::Display for BatteryInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "电量: {}% 电池电压: {:.3}V {}",
            self.capacity,
            self.voltage,
            if self.charging { "充电中 " } else { " " }
        )
    }
}

#[derive(Debug, Clone)]
pub struct BatteryReader {
    root: PathBuf,
}

impl Default for BatteryReader {
    fn default() -> Self {
        Self::new(BATTERY_ROOT)
    }
}

impl BatteryReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Current reading, `None` without a gauge or with a negative capacity
    pub fn read(&self) -> Option<BatteryInfo> {
        let capacity: i32 = self.attribute("capacity")?.parse().ok()?;
        if capacity < 0 {
            return None;
        }
        let voltage = self
            .attribute("voltage_now")
            .and_then(|uv| uv.parse::<i64>().ok())
            .map(|uv| uv as f32 / 1_000_000.0)
            .unwrap_or(0.0);
        let charging = self
            .attribute("status")
            .is_some_and(|status| status.starts_with("Charging"));

        Some(BatteryInfo {
            capacity,
            voltage,
            charging,
        })
    }

    fn attribute(&self, name: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(name))
            .ok()
            .map(|s| s.trim().to_string())
    }
}
