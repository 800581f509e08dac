//! Network orchestrator
//!
//! A reload tears down the running mode, kills every network daemon, resets
//! the interface and brings up the configured mode from scratch. Between
//! reloads the tick polls the station supplicant for connection state.
//!
//! A daemon that cannot be killed or started leaves the network in an
//! unknown state, so both escalate to a device reboot.

use std::convert::Infallible;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use linkbridge_core::prelude::*;
use linkbridge_core::{AddrMode, StationStatus, WifiMode};
use linkbridge_daemon::protocol::{self, AccessPointProfile, StationProfile};
use linkbridge_daemon::ControlSocket;

use super::system::NetworkSystem;
use super::NetworkHandle;
use crate::config::{ConfigStore, WifiSettings};
use crate::hardware::PowerControl;
use crate::probe::ProbeHandle;
use crate::runtime::Subsystem;

/// Budget for killing or starting one daemon
pub const DAEMON_TIMEOUT: Duration = Duration::from_secs(10);

/// Daemons owned by the orchestrator, killed on every reload
const MANAGED_DAEMONS: [&str; 4] = ["wpa_supplicant", "udhcpc", "hostapd", "dnsmasq"];

const WPA_SUPPLICANT_CONF: &str = "/opt/jlink/etc/wpa_supplicant.conf";
const HOSTAPD_CONF: &str = "/opt/jlink/etc/hostapd.conf";
const DNSMASQ_CONF: &str = "/opt/jlink/etc/dnsmasq.conf";

/// Address the device takes in access-point mode
const AP_ADDRESS: &str = "192.168.1.1/24";

pub struct NetworkOrchestrator<S> {
    store: Arc<ConfigStore>,
    settings: WifiSettings,
    system: S,
    power: Arc<dyn PowerControl>,
    handle: NetworkHandle,
    probe: ProbeHandle,
    /// Mode the daemons were last brought up for
    applied: WifiMode,
    apply_pending: bool,
    station: Option<ControlSocket>,
    poll_failing: bool,
}

impl<S: NetworkSystem> NetworkOrchestrator<S> {
    /// The configured mode is applied on the first tick
    pub fn new(
        store: Arc<ConfigStore>,
        system: S,
        power: Arc<dyn PowerControl>,
        handle: NetworkHandle,
        probe: ProbeHandle,
    ) -> Self {
        let settings = WifiSettings::load(&store);
        Self {
            store,
            settings,
            system,
            power,
            handle,
            probe,
            applied: WifiMode::Disabled,
            apply_pending: true,
            station: None,
            poll_failing: false,
        }
    }

    pub fn handle(&self) -> NetworkHandle {
        self.handle.clone()
    }

    /// Mode the daemons were last brought up for
    pub fn applied_mode(&self) -> WifiMode {
        self.applied
    }

    fn escalate(&self, what: &str, err: &Error) {
        error!("{} failed: {}, rebooting", what, err);
        self.power.reboot();
    }

    /// Send the teardown command of the mode currently up
    async fn teardown(&mut self) {
        self.station = None;
        let (path, command) = match self.applied {
            WifiMode::Station => (&self.settings.wpa_ctrl_path, protocol::DISCONNECT),
            WifiMode::AccessPoint => (&self.settings.hostapd_ctrl_path, protocol::DISABLE),
            WifiMode::Disabled => return,
        };
        let result = match ControlSocket::open(path) {
            Ok(ctrl) => ctrl.request_ok(command).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            warn!("{} teardown: {}", self.applied, e);
        }
    }

    async fn apply(&mut self) {
        self.teardown().await;
        match ConfigStore::blocking(&self.store, |store| Ok(WifiSettings::load(store))).await {
            Ok(settings) => self.settings = settings,
            Err(e) => warn!("Keeping previous network settings: {}", e),
        }
        let mode = self.settings.mode;
        info!("Applying network mode {}", mode);

        for name in MANAGED_DAEMONS {
            if let Err(e) = self.system.kill_by_name(name, DAEMON_TIMEOUT).await {
                self.escalate(&format!("kill {name}"), &e);
                return;
            }
        }

        let if_name = &self.settings.if_name;
        let reset = format!(
            "ip addr flush dev {if_name} && ip link set {if_name} down && ip link set {if_name} up"
        );
        if let Err(e) = self.system.run(&reset).await {
            warn!("Interface reset: {}", e);
        }

        let result = match mode {
            WifiMode::Disabled => self.system.set_radio_power(false).await,
            WifiMode::Station => self.bring_up_station().await,
            WifiMode::AccessPoint => self.bring_up_access_point().await,
        };
        match result {
            Ok(()) => {}
            Err(e) if e.is_fatal() => {
                self.escalate(&format!("{mode} bring-up"), &e);
                return;
            }
            Err(e) => warn!("{} bring-up incomplete: {}", mode, e),
        }

        self.applied = mode;
        self.handle.publish_mode(mode);
        self.handle.publish_status(StationStatus::default());
    }

    async fn bring_up_station(&self) -> Result<()> {
        let settings = &self.settings;
        if let Err(e) = self.system.set_radio_power(true).await {
            warn!("Radio power on: {}", e);
        }

        let command = format!(
            "wpa_supplicant -D nl80211 -i {} -c {WPA_SUPPLICANT_CONF} -B",
            settings.if_name
        );
        self.system
            .start_daemon(&command, "wpa_supplicant", DAEMON_TIMEOUT)
            .await
            .map_err(as_start_failure)?;

        let profile = StationProfile {
            ssid: settings.sta_ssid.clone(),
            password: settings.sta_password.clone(),
            hidden: settings.sta_hidden,
        };
        if let Err(e) = configure_station(&settings.wpa_ctrl_path, &profile).await {
            warn!("Station profile not applied: {}", e);
        }

        match settings.sta_addr_mode {
            AddrMode::Dhcp => {
                info!("DHCP addressing");
                let command = format!("udhcpc -b -i {} -R &", settings.if_name);
                self.system.launch(&command).await?;
            }
            AddrMode::Static => {
                info!("Static address {}/{}", settings.sta_ip, settings.sta_prefix_len());
                let commands = [
                    format!(
                        "ip addr add {}/{} dev {}",
                        settings.sta_ip,
                        settings.sta_prefix_len(),
                        settings.if_name
                    ),
                    format!(
                        "ip route add default via {} dev {}",
                        settings.sta_gateway, settings.if_name
                    ),
                ];
                for command in &commands {
                    if let Err(e) = self.system.run(command).await {
                        warn!("{}", e);
                    }
                }
                self.system
                    .write_resolv_conf(&[settings.sta_dns0, settings.sta_dns1])
                    .await?;
            }
        }
        Ok(())
    }

    async fn bring_up_access_point(&self) -> Result<()> {
        let settings = &self.settings;
        if let Err(e) = self.system.set_radio_power(true).await {
            warn!("Radio power on: {}", e);
        }

        let command = format!("hostapd -i {} -B {HOSTAPD_CONF}", settings.if_name);
        self.system
            .start_daemon(&command, "hostapd", DAEMON_TIMEOUT)
            .await
            .map_err(as_start_failure)?;

        let profile = AccessPointProfile {
            ssid: format!("{}_{}", settings.ap_ssid, self.probe.serial()),
            passphrase: settings.ap_password.clone(),
            hidden: settings.ap_hidden,
        };
        if !profile.passphrase_applies() {
            warn!(
                "AP password shorter than {} bytes, keeping the previous one",
                protocol::MIN_PASSPHRASE_LEN
            );
        }
        if let Err(e) = configure_access_point(&settings.hostapd_ctrl_path, &profile).await {
            warn!("Access point profile not applied: {}", e);
        }

        let address = format!("ip addr add {AP_ADDRESS} dev {}", settings.if_name);
        if let Err(e) = self.system.run(&address).await {
            warn!("{}", e);
        }
        let dnsmasq = format!("dnsmasq -i {} -C {DNSMASQ_CONF}", settings.if_name);
        self.system.launch(&dnsmasq).await
    }

    /// One `STATUS` + `SIGNAL_POLL` round trip
    async fn poll_station(&mut self) -> Result<StationStatus> {
        if self.station.is_none() {
            self.station = Some(ControlSocket::open(&self.settings.wpa_ctrl_path)?);
        }
        let Some(ctrl) = self.station.as_ref() else {
            return Ok(StationStatus::default());
        };

        let status = ctrl.request(protocol::STATUS).await?;
        let signal = ctrl.request(protocol::SIGNAL_POLL).await.ok();
        Ok(protocol::station_status(&status, signal.as_deref()))
    }
}

/// Daemon start failures that are not already fatal still leave a half-up
/// network behind
fn as_start_failure(err: Error) -> Error {
    if err.is_fatal() {
        err
    } else {
        Error::ProcessSpawn {
            reason: err.to_string(),
        }
    }
}

/// Replace every stored supplicant profile with `profile`.
///
/// The supplicant may refuse single commands (a psk shorter than eight
/// characters, a profile already gone); those are logged and the sequence
/// continues so the profile still gets enabled. Only losing the socket, or
/// not getting a profile id, stops it.
async fn configure_station(path: &Path, profile: &StationProfile) -> Result<()> {
    let ctrl = ControlSocket::open(path)?;

    let listing = ctrl.request(protocol::LIST_NETWORKS).await?;
    for id in protocol::parse_network_ids(&listing) {
        request_tolerant(&ctrl, &protocol::remove_network(id)).await?;
    }

    let reply = ctrl.request(protocol::ADD_NETWORK).await?;
    let id = protocol::parse_added_network(&reply)
        .ok_or_else(|| Error::control_reply(protocol::ADD_NETWORK, reply))?;
    for command in profile.commands(id) {
        request_tolerant(&ctrl, &command).await?;
    }
    Ok(())
}

/// Send `command`, logging a reply other than `OK` instead of failing
async fn request_tolerant(ctrl: &ControlSocket, command: &str) -> Result<()> {
    match ctrl.request_ok(command).await {
        Err(Error::ControlReply { command, reply }) => {
            warn!("'{}' answered {}", command, reply);
            Ok(())
        }
        other => other,
    }
}

async fn configure_access_point(path: &Path, profile: &AccessPointProfile) -> Result<()> {
    let ctrl = ControlSocket::open(path)?;
    for command in profile.commands() {
        ctrl.request_ok(&command).await?;
    }
    Ok(())
}

impl<S: NetworkSystem + Send + Sync + 'static> Subsystem for NetworkOrchestrator<S> {
    type Io = Infallible;

    fn name(&self) -> &'static str {
        "network"
    }

    async fn tick(&mut self, _now: Instant) {
        if self.apply_pending {
            self.apply_pending = false;
            self.apply().await;
        }

        if self.applied != WifiMode::Station {
            self.handle.publish_status(StationStatus::default());
            return;
        }

        match self.poll_station().await {
            Ok(status) => {
                if self.poll_failing {
                    info!("Station control socket answering again");
                    self.poll_failing = false;
                }
                self.handle.publish_status(status);
            }
            Err(e) => {
                if !self.poll_failing {
                    warn!("Station poll failed: {}", e);
                    self.poll_failing = true;
                }
                self.station = None;
                self.handle.publish_status(StationStatus::default());
            }
        }
    }

    async fn next_io(&mut self) -> Infallible {
        std::future::pending().await
    }

    async fn handle_io(&mut self, io: Infallible) {
        match io {}
    }

    async fn reload(&mut self) {
        self.apply_pending = true;
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.station = None;
        self.handle.publish_status(StationStatus::default());
        Ok(())
    }
}
