//! Front-panel and board hardware
//!
//! The subsystems talk to hardware through the narrow traits below so tests
//! can substitute mocks. The sysfs implementations live in the submodules.

pub mod battery;
pub mod buttons;
pub mod gpio;
pub mod led;
pub mod power;

use linkbridge_core::prelude::*;
use linkbridge_core::LedPattern;

pub use battery::{BatteryInfo, BatteryReader};
pub use buttons::{ButtonTracker, InputButtons, KeyInput};
pub use gpio::SysfsGpio;
pub use led::SysfsLed;
pub use power::ShellPower;

/// A status LED driven through a kernel trigger
#[cfg_attr(test, mockall::automock)]
pub trait StatusLed: Send + Sync {
    fn set(&self, pattern: LedPattern) -> Result<()>;
}

/// Where the debug probe's USB lines are routed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MuxRoute {
    /// Local USB connector, probe server stopped
    Local,
    /// Host side, probe server running
    Host,
}

/// The USB multiplexer select line
#[cfg_attr(test, mockall::automock)]
pub trait UsbMux: Send + Sync {
    fn route(&self, route: MuxRoute) -> Result<()>;
}

/// Whole-device power actions. Neither returns on real hardware.
#[cfg_attr(test, mockall::automock)]
pub trait PowerControl: Send + Sync {
    fn reboot(&self);
    fn poweroff(&self);
}
