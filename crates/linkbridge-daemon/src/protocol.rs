//! Control-socket command vocabulary and reply parsing
//!
//! Covers only the request/response pairs the network orchestrator uses
//! against the station supplicant and the access-point daemon.

use std::net::Ipv4Addr;

use linkbridge_core::StationStatus;

/// Signal strength clamp applied to `AVG_RSSI`
pub const RSSI_MIN: i32 = -127;
pub const RSSI_MAX: i32 = 127;

/// Minimum passphrase length accepted by the access-point daemon
pub const MIN_PASSPHRASE_LEN: usize = 8;

// ─────────────────────────────────────────────────────────────────
// Station supplicant
// ─────────────────────────────────────────────────────────────────

pub const LIST_NETWORKS: &str = "LIST_NETWORKS";
pub const ADD_NETWORK: &str = "ADD_NETWORK";
pub const RECONNECT: &str = "RECONNECT";
pub const DISCONNECT: &str = "DISCONNECT";
pub const STATUS: &str = "STATUS";
pub const SIGNAL_POLL: &str = "SIGNAL_POLL";

/// Credentials for the single network profile the station keeps
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StationProfile {
    pub ssid: String,
    /// Empty means an open network
    pub password: String,
    pub hidden: bool,
}

impl StationProfile {
    /// Commands that configure profile `id` and bring it up, in order
    pub fn commands(&self, id: u32) -> Vec<String> {
        let mut commands = vec![format!("SET_NETWORK {id} ssid \"{}\"", self.ssid)];
        if self.password.is_empty() {
            commands.push(format!("SET_NETWORK {id} key_mgmt NONE"));
        } else {
            commands.push(format!("SET_NETWORK {id} psk \"{}\"", self.password));
        }
        if self.hidden {
            commands.push(format!("SET_NETWORK {id} scan_ssid 1"));
        }
        commands.push(format!("ENABLE_NETWORK {id}"));
        commands.push(RECONNECT.to_string());
        commands
    }
}

pub fn remove_network(id: u32) -> String {
    format!("REMOVE_NETWORK {id}")
}

/// Profile ids from a `LIST_NETWORKS` reply.
///
/// The first line is a column header; listing stops at the first line that
/// does not start with a digit.
pub fn parse_network_ids(reply: &str) -> Vec<u32> {
    reply
        .lines()
        .skip(1)
        .map_while(|line| {
            let digits: String = line.chars().take_while(char::is_ascii_digit).collect();
            digits.parse().ok()
        })
        .collect()
}

/// Profile id from an `ADD_NETWORK` reply
pub fn parse_added_network(reply: &str) -> Option<u32> {
    reply.trim().parse().ok()
}

/// Look up `key=` in a `key=value` per line reply
pub fn reply_value<'a>(reply: &'a str, key: &str) -> Option<&'a str> {
    reply.lines().find_map(|line| {
        line.strip_prefix(key)
            .and_then(|rest| rest.strip_prefix('='))
            .map(|value| value.trim_end_matches('\r'))
    })
}

/// Connection state and address from a `STATUS` reply.
///
/// Only `wpa_state=COMPLETED` counts as connected. The address is reported
/// only while connected.
pub fn parse_status(reply: &str) -> (bool, Option<Ipv4Addr>) {
    let connected = reply_value(reply, "wpa_state") == Some("COMPLETED");
    let ip = if connected {
        reply_value(reply, "ip_address").and_then(|ip| ip.parse().ok())
    } else {
        None
    };
    (connected, ip)
}

/// Average RSSI from a `SIGNAL_POLL` reply, clamped to the i8 range used for display
pub fn parse_avg_rssi(reply: &str) -> Option<i8> {
    let value: i32 = reply_value(reply, "AVG_RSSI")?.trim().parse().ok()?;
    Some(value.clamp(RSSI_MIN, RSSI_MAX) as i8)
}

/// Merge a status and a signal poll into one observation
pub fn station_status(status_reply: &str, signal_reply: Option<&str>) -> StationStatus {
    let (connected, ip) = parse_status(status_reply);
    let rssi = signal_reply.and_then(parse_avg_rssi).unwrap_or(0);
    StationStatus { connected, ip, rssi }
}

// ─────────────────────────────────────────────────────────────────
// Access-point daemon
// ─────────────────────────────────────────────────────────────────

pub const ENABLE: &str = "ENABLE";
pub const DISABLE: &str = "DISABLE";

/// Parameters pushed to the access-point daemon
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessPointProfile {
    pub ssid: String,
    pub passphrase: String,
    pub hidden: bool,
}

impl AccessPointProfile {
    /// Whether the passphrase is long enough to be applied
    pub fn passphrase_applies(&self) -> bool {
        self.passphrase.len() >= MIN_PASSPHRASE_LEN
    }

    /// Full reconfiguration sequence, bracketed by DISABLE / ENABLE
    pub fn commands(&self) -> Vec<String> {
        let mut commands = vec![DISABLE.to_string(), format!("SET ssid {}", self.ssid)];
        if self.passphrase_applies() {
            commands.push(format!("SET wpa_passphrase {}", self.passphrase));
        }
        commands.push(format!(
            "SET ignore_broadcast_ssid {}",
            if self.hidden { 1 } else { 0 }
        ));
        commands.push(ENABLE.to_string());
        commands
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST_REPLY: &str = "network id / ssid / bssid / flags\n\
        0\tjlink\tany\t[CURRENT]\n\
        3\toffice\tany\t[DISABLED]\n";

    #[test]
    fn test_parse_network_ids_skips_header() {
        assert_eq!(parse_network_ids(LIST_REPLY), vec![0, 3]);
        assert!(parse_network_ids("network id / ssid / bssid / flags").is_empty());
    }

    #[test]
    fn test_parse_added_network() {
        assert_eq!(parse_added_network("4"), Some(4));
        assert_eq!(parse_added_network("FAIL"), None);
    }

    #[test]
    fn test_status_completed_with_ip() {
        let reply = "bssid=00:11:22:33:44:55\nssid=jlink\nwpa_state=COMPLETED\nip_address=10.0.0.5\naddress=aa:bb:cc:dd:ee:ff";
        assert_eq!(
            parse_status(reply),
            (true, Some(Ipv4Addr::new(10, 0, 0, 5)))
        );
    }

    #[test]
    fn test_status_scanning_is_disconnected() {
        let reply = "wpa_state=SCANNING\nip_address=10.0.0.5";
        assert_eq!(parse_status(reply), (false, None));
        assert_eq!(parse_status("wpa_state=COMPLETED"), (true, None));
    }

    #[test]
    fn test_rssi_is_clamped() {
        assert_eq!(parse_avg_rssi("RSSI=-60\nAVG_RSSI=-58\n"), Some(-58));
        assert_eq!(parse_avg_rssi("AVG_RSSI=-300"), Some(-127));
        assert_eq!(parse_avg_rssi("AVG_RSSI=400"), Some(127));
        assert_eq!(parse_avg_rssi("RSSI=-60"), None);
    }

    #[test]
    fn test_open_hidden_station_profile() {
        let profile = StationProfile {
            ssid: "lab".into(),
            password: String::new(),
            hidden: true,
        };
        assert_eq!(
            profile.commands(2),
            vec![
                "SET_NETWORK 2 ssid \"lab\"",
                "SET_NETWORK 2 key_mgmt NONE",
                "SET_NETWORK 2 scan_ssid 1",
                "ENABLE_NETWORK 2",
                "RECONNECT",
            ]
        );
    }

    #[test]
    fn test_secured_station_profile() {
        let profile = StationProfile {
            ssid: "jlink".into(),
            password: "secret123".into(),
            hidden: false,
        };
        let commands = profile.commands(0);
        assert_eq!(commands[1], "SET_NETWORK 0 psk \"secret123\"");
        assert_eq!(commands.len(), 4);
    }

    #[test]
    fn test_short_ap_passphrase_is_not_applied() {
        let profile = AccessPointProfile {
            ssid: "J-Link_260100123".into(),
            passphrase: "short".into(),
            hidden: false,
        };
        assert_eq!(
            profile.commands(),
            vec![
                "DISABLE",
                "SET ssid J-Link_260100123",
                "SET ignore_broadcast_ssid 0",
                "ENABLE",
            ]
        );
    }

    #[test]
    fn test_ap_profile_with_passphrase() {
        let profile = AccessPointProfile {
            ssid: "J-Link_1".into(),
            passphrase: "jlink wifi".into(),
            hidden: true,
        };
        let commands = profile.commands();
        assert!(commands.contains(&"SET wpa_passphrase jlink wifi".to_string()));
        assert!(commands.contains(&"SET ignore_broadcast_ssid 1".to_string()));
    }
}
