//! Output lines under `/sys/class/gpio`

use std::path::PathBuf;

use linkbridge_core::prelude::*;

use super::{MuxRoute, UsbMux};

pub const GPIO_ROOT: &str = "/sys/class/gpio";

/// One exported output line
#[derive(Debug, Clone)]
pub struct SysfsGpio {
    root: PathBuf,
    line: u32,
}

impl SysfsGpio {
    pub fn new(line: u32) -> Self {
        Self::with_root(GPIO_ROOT, line)
    }

    pub fn with_root(root: impl Into<PathBuf>, line: u32) -> Self {
        Self {
            root: root.into(),
            line,
        }
    }

    pub fn line(&self) -> u32 {
        self.line
    }

    fn line_dir(&self) -> PathBuf {
        self.root.join(format!("gpio{}", self.line))
    }

    /// Export the line unless the kernel already did
    pub fn export(&self) -> Result<()> {
        if self.line_dir().is_dir() {
            return Ok(());
        }
        let export = self.root.join("export");
        debug!("Exporting gpio{}", self.line);
        std::fs::write(&export, self.line.to_string())
            .map_err(|e| Error::hardware(format!("export gpio{}: {}", self.line, e)))
    }

    /// Drive the line as an output at the given level
    pub fn set_output(&self, high: bool) -> Result<()> {
        let path = self.line_dir().join("direction");
        let direction = if high { "high" } else { "low" };
        std::fs::write(&path, direction)
            .map_err(|e| Error::hardware(format!("write {}: {}", path.display(), e)))
    }
}

impl UsbMux for SysfsGpio {
    fn route(&self, route: MuxRoute) -> Result<()> {
        self.export()?;
        self.set_output(route == MuxRoute::Host)
    }
}
