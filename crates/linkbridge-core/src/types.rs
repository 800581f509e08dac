//! Domain types shared by every subsystem

use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::Error;

// ─────────────────────────────────────────────────────────────────
// Device mode
// ─────────────────────────────────────────────────────────────────

/// Top-level operating personality of the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceMode {
    /// Boot value only, left on the first tick
    Uninitialized,
    UsbBridge,
    WifiClient,
    WifiAp,
    /// Transient dwell between two modes
    Transitioning,
}

impl DeviceMode {
    /// Value stored under `main.state_last`
    pub fn persisted_value(self) -> i64 {
        match self {
            DeviceMode::Uninitialized => 0,
            DeviceMode::UsbBridge => 1,
            DeviceMode::WifiClient => 2,
            DeviceMode::WifiAp => 3,
            DeviceMode::Transitioning => 4,
        }
    }

    /// Restore a persisted mode. Only the three settled modes are restorable.
    pub fn from_persisted(value: i64) -> Option<Self> {
        match value {
            1 => Some(DeviceMode::UsbBridge),
            2 => Some(DeviceMode::WifiClient),
            3 => Some(DeviceMode::WifiAp),
            _ => None,
        }
    }

    /// Round-robin successor: usb → client → ap → usb
    pub fn next(self) -> Self {
        match self {
            DeviceMode::UsbBridge => DeviceMode::WifiClient,
            DeviceMode::WifiClient => DeviceMode::WifiAp,
            DeviceMode::WifiAp => DeviceMode::UsbBridge,
            DeviceMode::Uninitialized | DeviceMode::Transitioning => DeviceMode::UsbBridge,
        }
    }

    /// Network mode the device runs while settled in this mode
    pub fn wifi_mode(self) -> WifiMode {
        match self {
            DeviceMode::WifiClient => WifiMode::Station,
            DeviceMode::WifiAp => WifiMode::AccessPoint,
            _ => WifiMode::Disabled,
        }
    }

    /// Whether the probe server should run in this mode
    pub fn runs_probe(self) -> bool {
        matches!(self, DeviceMode::WifiClient | DeviceMode::WifiAp)
    }
}

impl fmt::Display for DeviceMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DeviceMode::Uninitialized => "uninitialized",
            DeviceMode::UsbBridge => "usb",
            DeviceMode::WifiClient => "sta",
            DeviceMode::WifiAp => "ap",
            DeviceMode::Transitioning => "wait",
        };
        f.write_str(name)
    }
}

// ─────────────────────────────────────────────────────────────────
// Network
// ─────────────────────────────────────────────────────────────────

/// Radio personality stored under `wifi.mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WifiMode {
    Disabled,
    #[default]
    Station,
    AccessPoint,
}

impl WifiMode {
    pub fn as_i64(self) -> i64 {
        match self {
            WifiMode::Disabled => 0,
            WifiMode::Station => 1,
            WifiMode::AccessPoint => 2,
        }
    }

    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            0 => Some(WifiMode::Disabled),
            1 => Some(WifiMode::Station),
            2 => Some(WifiMode::AccessPoint),
            _ => None,
        }
    }
}

impl fmt::Display for WifiMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WifiMode::Disabled => "disabled",
            WifiMode::Station => "sta",
            WifiMode::AccessPoint => "ap",
        };
        f.write_str(name)
    }
}

/// Station IP addressing, stored under `wifi.sta_addr_mode`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddrMode {
    #[default]
    Dhcp,
    Static,
}

impl AddrMode {
    pub fn from_i64(value: i64) -> Self {
        if value == 1 {
            AddrMode::Static
        } else {
            AddrMode::Dhcp
        }
    }
}

/// Observed station connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StationStatus {
    pub connected: bool,
    /// Address reported by the supplicant, if any
    pub ip: Option<Ipv4Addr>,
    /// Average signal strength in dBm
    pub rssi: i8,
}

// ─────────────────────────────────────────────────────────────────
// MAC address
// ─────────────────────────────────────────────────────────────────

/// Six-byte hardware address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }

    /// `AA-BB-CC-DD-EE-FF`, as shown on the web pages
    pub fn to_dashed_upper(&self) -> String {
        self.0
            .iter()
            .map(|b| format!("{:02X}", b))
            .collect::<Vec<_>>()
            .join("-")
    }
}

/// Lowercase, colon separated
impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Parses `XX?XX?XX?XX?XX?XX` where `?` is any single separator used
/// consistently across the address.
impl FromStr for MacAddr {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::protocol(format!("invalid MAC address: {s:?}"));
        let bytes = s.trim().as_bytes();
        if bytes.len() != 17 {
            return Err(invalid());
        }
        let sep = bytes[2];
        if sep.is_ascii_hexdigit() || [5, 8, 11, 14].iter().any(|&i| bytes[i] != sep) {
            return Err(invalid());
        }

        let mut mac = [0u8; 6];
        for (i, octet) in mac.iter_mut().enumerate() {
            let pair = std::str::from_utf8(&bytes[i * 3..i * 3 + 2]).map_err(|_| invalid())?;
            if !pair.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(invalid());
            }
            *octet = u8::from_str_radix(pair, 16).map_err(|_| invalid())?;
        }
        Ok(MacAddr(mac))
    }
}

// ─────────────────────────────────────────────────────────────────
// Buttons and LEDs
// ─────────────────────────────────────────────────────────────────

/// Physical buttons on the enclosure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Button {
    /// Cycles the device mode
    Mode,
    Power,
}

impl Button {
    pub const ALL: [Button; 2] = [Button::Mode, Button::Power];
}

/// Debounced level of a button
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ButtonState {
    #[default]
    Released,
    Pressed,
}

/// Events produced by the per-button state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ButtonEvent {
    /// Released before the long-press threshold
    Click,
    /// Held for at least the long-press threshold
    LongPress,
}

/// A kernel LED trigger setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    Timer { on_ms: u32, off_ms: u32 },
    Heartbeat,
}

impl LedPattern {
    pub const fn timer(on_ms: u32, off_ms: u32) -> Self {
        LedPattern::Timer { on_ms, off_ms }
    }
}
