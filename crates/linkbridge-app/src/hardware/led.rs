//! LEDs under `/sys/class/leds`

use std::path::{Path, PathBuf};

use linkbridge_core::prelude::*;
use linkbridge_core::LedPattern;

use super::StatusLed;

pub const LEDS_ROOT: &str = "/sys/class/leds";

#[derive(Debug, Clone)]
pub struct SysfsLed {
    dir: PathBuf,
}

impl SysfsLed {
    /// LED `name` under the default class directory
    pub fn named(name: &str) -> Self {
        Self::new(Path::new(LEDS_ROOT).join(name))
    }

    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn write(&self, attribute: &str, value: &str) -> Result<()> {
        let path = self.dir.join(attribute);
        std::fs::write(&path, value)
            .map_err(|e| Error::hardware(format!("write {}: {}", path.display(), e)))
    }
}

impl StatusLed for SysfsLed {
    fn set(&self, pattern: LedPattern) -> Result<()> {
        trace!("{} <- {:?}", self.dir.display(), pattern);
        match pattern {
            LedPattern::Off => {
                self.write("trigger", "none")?;
                self.write("brightness", "0")
            }
            LedPattern::Timer { on_ms, off_ms } => {
                // The delay files only exist once the timer trigger is active
                self.write("trigger", "timer")?;
                self.write("delay_on", &on_ms.to_string())?;
                self.write("delay_off", &off_ms.to_string())
            }
            LedPattern::Heartbeat => self.write("trigger", "heartbeat"),
        }
    }
}
