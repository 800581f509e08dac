//! Typed settings snapshots
//!
//! Each `load` reads its keys through [`ConfigStore`], so every missing key
//! is written back with its default on first use.

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use linkbridge_core::prelude::*;
use linkbridge_core::{AddrMode, WifiMode};

use super::store::ConfigStore;

/// Longest SSID accepted by the radio daemons
pub const MAX_SSID_LEN: usize = 32;

/// Longest WPA password
pub const MAX_PASSWORD_LEN: usize = 64;

/// Number of input devices scanned for buttons
pub const MAX_EVENT_DEVICES: i64 = 2;

/// Linux key code of F1, the default mode button
pub const KEY_F1: i64 = 59;

/// Linux key code of the power key
pub const KEY_POWER: i64 = 116;

// ─────────────────────────────────────────────────────────────────
// WiFi
// ─────────────────────────────────────────────────────────────────

/// `[wifi]` group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WifiSettings {
    pub wpa_ctrl_path: PathBuf,
    pub hostapd_ctrl_path: PathBuf,
    pub if_name: String,
    pub mode: WifiMode,
    pub sta_ssid: String,
    pub sta_password: String,
    pub sta_hidden: bool,
    pub sta_addr_mode: AddrMode,
    pub sta_ip: Ipv4Addr,
    pub sta_mask: Ipv4Addr,
    pub sta_gateway: Ipv4Addr,
    pub sta_dns0: Ipv4Addr,
    pub sta_dns1: Ipv4Addr,
    pub ap_ssid: String,
    pub ap_password: String,
    pub ap_hidden: bool,
}

impl WifiSettings {
    pub fn load(store: &ConfigStore) -> Self {
        let mode = store.get_int("wifi", "mode", WifiMode::Station.as_i64());
        let mode = WifiMode::from_i64(mode).unwrap_or_else(|| {
            warn!("wifi.mode {} is not a known mode, using station", mode);
            WifiMode::Station
        });

        Self {
            wpa_ctrl_path: store
                .get_str("wifi", "wpa_ctrl_path", "/var/run/wpa_supplicant/wlan0")
                .into(),
            hostapd_ctrl_path: store
                .get_str("wifi", "hostapd_ctrl_path", "/var/run/hostapd/wlan0")
                .into(),
            if_name: store.get_str("wifi", "if_name", "wlan0"),
            mode,
            sta_ssid: truncate(store.get_str("wifi", "sta_ssid", "jlink"), MAX_SSID_LEN),
            sta_password: truncate(store.get_str("wifi", "sta_password", ""), MAX_PASSWORD_LEN),
            sta_hidden: store.get_int("wifi", "sta_hidden", 0) != 0,
            sta_addr_mode: AddrMode::from_i64(store.get_int("wifi", "sta_addr_mode", 0)),
            sta_ip: ipv4_or_reset(store, "sta_ip", Ipv4Addr::new(192, 168, 1, 123)),
            sta_mask: ipv4_or_reset(store, "sta_mask", Ipv4Addr::new(255, 255, 255, 0)),
            sta_gateway: ipv4_or_reset(store, "sta_gateway", Ipv4Addr::new(192, 168, 1, 1)),
            sta_dns0: ipv4_or_reset(store, "sta_dns0", Ipv4Addr::new(192, 168, 1, 1)),
            sta_dns1: ipv4_or_reset(store, "sta_dns1", Ipv4Addr::new(8, 8, 8, 8)),
            ap_ssid: truncate(store.get_str("wifi", "ap_ssid", "J-Link"), MAX_SSID_LEN),
            ap_password: truncate(
                store.get_str("wifi", "ap_password", "jlink wifi"),
                MAX_PASSWORD_LEN,
            ),
            ap_hidden: store.get_int("wifi", "ap_hidden", 0) != 0,
        }
    }

    /// Prefix length of `sta_mask`
    pub fn sta_prefix_len(&self) -> u32 {
        u32::from(self.sta_mask).count_ones()
    }
}

/// Read a dotted-quad key, writing the default back if it does not parse
fn ipv4_or_reset(store: &ConfigStore, key: &str, default: Ipv4Addr) -> Ipv4Addr {
    let text = store.get_str("wifi", key, &default.to_string());
    match text.trim().parse() {
        Ok(ip) => ip,
        Err(_) => {
            warn!("wifi.{} = {:?} is not an IPv4 address, resetting", key, text);
            if let Err(e) = store.set_str("wifi", key, &default.to_string()) {
                error!("Failed to reset wifi.{}: {}", key, e);
            }
            default
        }
    }
}

/// Cut `value` to at most `max` bytes on a character boundary
fn truncate(mut value: String, max: usize) -> String {
    if value.len() > max {
        let mut end = max;
        while !value.is_char_boundary(end) {
            end -= 1;
        }
        value.truncate(end);
    }
    value
}

// ─────────────────────────────────────────────────────────────────
// Probe server
// ─────────────────────────────────────────────────────────────────

/// `[jlink]` group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeSettings {
    pub remote_server_path: PathBuf,
    pub usb_switch_gpio: u32,
}

impl ProbeSettings {
    pub fn load(store: &ConfigStore) -> Self {
        let gpio = store.get_int("jlink", "usb_switch_gpio_num", 69);
        Self {
            remote_server_path: store
                .get_str(
                    "jlink",
                    "remote_server_path",
                    "/mnt/UDISK/JLinkRemoteServerCLExe",
                )
                .into(),
            usb_switch_gpio: u32::try_from(gpio).unwrap_or(69),
        }
    }

    /// Process name used to find stray instances
    pub fn process_name(&self) -> String {
        self.remote_server_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.remote_server_path.to_string_lossy().into_owned())
    }
}

// ─────────────────────────────────────────────────────────────────
// Front panel
// ─────────────────────────────────────────────────────────────────

/// `[key]` group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonSettings {
    pub mode_key_code: u16,
    pub power_key_code: u16,
    pub long_press: Duration,
    pub event_paths: Vec<PathBuf>,
}

impl ButtonSettings {
    pub fn load(store: &ConfigStore) -> Self {
        let mode_key_code = store.get_int("key", "key_key_code", KEY_F1);
        let power_key_code = store.get_int("key", "power_key_code", KEY_POWER);
        let long_press_ms = store.get_int("key", "long_press_ms", 1000).max(0);

        let mut event_num = store.get_int("key", "event_num", MAX_EVENT_DEVICES);
        if !(0..=MAX_EVENT_DEVICES).contains(&event_num) {
            warn!("key.event_num {} out of range, clamping", event_num);
            event_num = MAX_EVENT_DEVICES;
            if let Err(e) = store.set_int("key", "event_num", event_num) {
                error!("Failed to reset key.event_num: {}", e);
            }
        }

        let event_paths = (0..event_num)
            .map(|i| {
                let default = format!("/dev/input/event{i}");
                PathBuf::from(store.get_str("key", &format!("event_path{i}"), &default))
            })
            .collect();

        Self {
            mode_key_code: u16::try_from(mode_key_code).unwrap_or(KEY_F1 as u16),
            power_key_code: u16::try_from(power_key_code).unwrap_or(KEY_POWER as u16),
            long_press: Duration::from_millis(long_press_ms as u64),
            event_paths,
        }
    }
}

/// `[led]` group
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedSettings {
    pub state_name: String,
    pub error_name: String,
}

impl LedSettings {
    pub fn load(store: &ConfigStore) -> Self {
        Self {
            state_name: store.get_str("led", "state_name", "state"),
            error_name: store.get_str("led", "error_name", "error"),
        }
    }
}

// ─────────────────────────────────────────────────────────────────
// Network services
// ─────────────────────────────────────────────────────────────────

/// What the discovery reply advertises
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub dev_type: u8,
    pub if_name: String,
}

impl DiscoverySettings {
    pub fn load(store: &ConfigStore) -> Self {
        let dev_type = store.get_int("udp", "dev_type", 0);
        Self {
            dev_type: u8::try_from(dev_type).unwrap_or(0),
            if_name: store.get_str("wifi", "if_name", "wlan0"),
        }
    }
}

/// What the web pages need beyond the other groups
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpSettings {
    pub if_name: String,
    /// File that the radio driver reads its MAC address from
    pub mac_conf_path: PathBuf,
}

impl HttpSettings {
    pub fn load(store: &ConfigStore) -> Self {
        Self {
            if_name: store.get_str("wifi", "if_name", "wlan0"),
            mac_conf_path: store
                .get_str("http", "mac_conf_path", "/etc/wifi/xr_wifi.conf")
                .into(),
        }
    }
}
