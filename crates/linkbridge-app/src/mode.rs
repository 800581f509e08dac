//! Device mode orchestrator
//!
//! Owns the front panel. A long press on the mode button steps the device
//! round robin through usb, client and ap, with a short transitioning dwell
//! in between. Entering a mode sets the state LED, starts or stops the probe
//! server, stores the matching `wifi.mode` and asks the network orchestrator
//! to rebuild. A long press on the power button turns the device off.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use linkbridge_core::prelude::*;
use linkbridge_core::{Button, ButtonEvent, DeviceMode, LedPattern, WifiMode};

use crate::config::{ButtonSettings, ConfigStore, LedSettings};
use crate::hardware::{
    BatteryReader, ButtonTracker, InputButtons, KeyInput, PowerControl, StatusLed, SysfsLed,
};
use crate::network::NetworkHandle;
use crate::probe::ProbeHandle;
use crate::runtime::Subsystem;

/// Dwell time of the transitioning state
pub const TRANSITION_DWELL: Duration = Duration::from_millis(500);

/// Interval between battery log lines
pub const BATTERY_LOG_INTERVAL: Duration = Duration::from_secs(3 * 60);

const USB_LED: LedPattern = LedPattern::timer(0, 1);
const CLIENT_LED: LedPattern = LedPattern::timer(50, 2500);
const TRANSITION_LED: LedPattern = LedPattern::timer(100, 100);
const DISCONNECTED_LED: LedPattern = LedPattern::timer(500, 500);

/// LED pattern shown while settled in `mode`
pub fn state_led_pattern(mode: DeviceMode) -> LedPattern {
    match mode {
        DeviceMode::UsbBridge => USB_LED,
        DeviceMode::WifiClient => CLIENT_LED,
        DeviceMode::WifiAp => LedPattern::Heartbeat,
        DeviceMode::Transitioning => TRANSITION_LED,
        DeviceMode::Uninitialized => LedPattern::Off,
    }
}

/// Shared view of the orchestrator: current mode and the last client address
#[derive(Debug, Clone)]
pub struct ModeHandle {
    mode: Arc<watch::Sender<DeviceMode>>,
    last_sta_ip: Arc<watch::Sender<Option<Ipv4Addr>>>,
}

impl Default for ModeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ModeHandle {
    pub fn new() -> Self {
        Self {
            mode: Arc::new(watch::Sender::new(DeviceMode::Uninitialized)),
            last_sta_ip: Arc::new(watch::Sender::new(None)),
        }
    }

    pub fn mode(&self) -> DeviceMode {
        *self.mode.borrow()
    }

    /// Address the client mode most recently obtained. Kept after leaving
    /// client mode, cleared when the client disconnects.
    pub fn last_sta_ip(&self) -> Option<Ipv4Addr> {
        *self.last_sta_ip.borrow()
    }
}

/// LEDs, buttons and battery gauge
pub struct FrontPanel {
    pub state_led: Box<dyn StatusLed>,
    pub error_led: Box<dyn StatusLed>,
    pub buttons: InputButtons,
    pub battery: BatteryReader,
}

impl FrontPanel {
    /// Open the board's LEDs, input devices and battery gauge
    pub fn open(store: &ConfigStore) -> Self {
        let leds = LedSettings::load(store);
        let buttons = ButtonSettings::load(store);
        Self {
            state_led: Box::new(SysfsLed::named(&leds.state_name)),
            error_led: Box::new(SysfsLed::named(&leds.error_name)),
            buttons: InputButtons::open(&buttons),
            battery: BatteryReader::default(),
        }
    }
}

pub struct ModeOrchestrator {
    store: Arc<ConfigStore>,
    panel: FrontPanel,
    power: Arc<dyn PowerControl>,
    probe: ProbeHandle,
    network: NetworkHandle,
    handle: ModeHandle,
    tracker: ButtonTracker,
    mode: DeviceMode,
    /// Entry actions of `mode` have run
    entered: bool,
    /// Mode that follows the transitioning dwell
    next: DeviceMode,
    transition_since: Option<Instant>,
    /// Last observed client connection, `None` until the first observation
    sta_connected: Option<bool>,
    state_last: i64,
    battery_logged_at: Option<Instant>,
}

impl ModeOrchestrator {
    /// Turns both LEDs off. The mode is decided on the first tick.
    pub fn new(
        store: Arc<ConfigStore>,
        panel: FrontPanel,
        power: Arc<dyn PowerControl>,
        probe: ProbeHandle,
        network: NetworkHandle,
    ) -> Self {
        let buttons = ButtonSettings::load(&store);
        let state_last = store.get_int("main", "state_last", 0);

        let orchestrator = Self {
            store,
            panel,
            power,
            probe,
            network,
            handle: ModeHandle::new(),
            tracker: ButtonTracker::new(buttons.long_press),
            mode: DeviceMode::Uninitialized,
            entered: false,
            next: DeviceMode::UsbBridge,
            transition_since: None,
            sta_connected: None,
            state_last,
            battery_logged_at: None,
        };
        orchestrator.set_state_led(LedPattern::Off);
        orchestrator.set_error_led(LedPattern::Off);
        orchestrator
    }

    pub fn handle(&self) -> ModeHandle {
        self.handle.clone()
    }

    pub fn mode(&self) -> DeviceMode {
        self.mode
    }

    fn set_state_led(&self, pattern: LedPattern) {
        if let Err(e) = self.panel.state_led.set(pattern) {
            error!("state LED: {}", e);
        }
    }

    fn set_error_led(&self, pattern: LedPattern) {
        if let Err(e) = self.panel.error_led.set(pattern) {
            error!("error LED: {}", e);
        }
    }

    fn set_mode(&mut self, mode: DeviceMode) {
        self.mode = mode;
        self.entered = false;
        self.handle.mode.send_replace(mode);
    }

    fn log_battery(&mut self, now: Instant) {
        let due = self
            .battery_logged_at
            .map_or(true, |at| now.saturating_duration_since(at) >= BATTERY_LOG_INTERVAL);
        if !due {
            return;
        }
        self.battery_logged_at = Some(now);
        if let Some(battery) = self.panel.battery.read() {
            info!(
                "battery capacity: {}% voltage: {:.3}V",
                battery.capacity, battery.voltage
            );
        }
    }

    /// Entry actions of a settled mode.
    ///
    /// The network is only reloaded when the stored radio mode changes; at
    /// boot it already applies the stored mode on its own.
    async fn enter(&mut self, mode: DeviceMode) {
        info!("{} state", mode);
        self.entered = true;
        self.set_state_led(state_led_pattern(mode));
        self.probe.set_run(mode.runs_probe());

        let wifi_mode = mode.wifi_mode().as_i64();
        let state_last = mode.persisted_value();
        self.state_last = state_last;
        let stored = ConfigStore::blocking(&self.store, move |store| {
            let changed = store.get_int("wifi", "mode", WifiMode::Station.as_i64()) != wifi_mode;
            if changed {
                store.set_int("wifi", "mode", wifi_mode)?;
            }
            store.set_int("main", "state_last", state_last)?;
            Ok(changed)
        })
        .await;

        match stored {
            Ok(true) => self.network.request_reload(),
            Ok(false) => debug!("Network already set up for {}", mode),
            Err(e) => {
                error!("Failed to store mode {}: {}", mode, e);
                self.network.request_reload();
            }
        }
    }

    /// Track client connectivity on the error LED and remember its address
    fn observe_station(&mut self) {
        let status = self.network.station_status();

        if self.sta_connected != Some(status.connected) {
            self.sta_connected = Some(status.connected);
            if status.connected {
                match status.ip {
                    Some(ip) => info!("sta connect success, ip: {}", ip),
                    None => info!("sta connect success, no address yet"),
                }
                self.set_error_led(LedPattern::Off);
                self.handle.last_sta_ip.send_replace(status.ip);
            } else {
                info!("sta disconnect");
                self.set_error_led(DISCONNECTED_LED);
                self.handle.last_sta_ip.send_replace(None);
            }
        } else if status.connected && self.handle.last_sta_ip().is_none() {
            if let Some(ip) = status.ip {
                info!("sta ip get success: {}", ip);
                self.handle.last_sta_ip.send_replace(Some(ip));
            }
        }
    }

    /// Leave a settled mode for the transitioning dwell
    fn begin_transition(&mut self) {
        if self.mode == DeviceMode::WifiClient {
            self.sta_connected = None;
            self.set_error_led(LedPattern::Off);
        }
        self.next = self.mode.next();
        self.set_mode(DeviceMode::Transitioning);
    }
}

impl Subsystem for ModeOrchestrator {
    type Io = KeyInput;

    fn name(&self) -> &'static str {
        "mode"
    }

    async fn tick(&mut self, now: Instant) {
        self.log_battery(now);

        let power = self.tracker.take(Button::Power, now);
        let mode_key = self.tracker.take(Button::Mode, now);
        if power == Some(ButtonEvent::LongPress) {
            info!("power key long press, poweroff");
            self.power.poweroff();
            return;
        }
        let mode_change = mode_key == Some(ButtonEvent::LongPress);
        if mode_change {
            info!("mode key long press, mode change");
        }

        match self.mode {
            DeviceMode::Uninitialized => {
                let restored = DeviceMode::from_persisted(self.state_last)
                    .unwrap_or(DeviceMode::UsbBridge);
                self.set_mode(restored);
            }
            DeviceMode::UsbBridge | DeviceMode::WifiClient | DeviceMode::WifiAp => {
                let mode = self.mode;
                if !self.entered {
                    self.enter(mode).await;
                }
                if mode == DeviceMode::WifiClient {
                    self.observe_station();
                }
                if mode_change {
                    self.begin_transition();
                }
            }
            DeviceMode::Transitioning => {
                let since = match self.transition_since {
                    Some(since) if self.entered => since,
                    _ => {
                        info!("wait state");
                        self.entered = true;
                        self.set_state_led(TRANSITION_LED);
                        self.transition_since = Some(now);
                        now
                    }
                };
                if now.saturating_duration_since(since) >= TRANSITION_DWELL {
                    self.transition_since = None;
                    self.set_mode(self.next);
                }
            }
        }
    }

    async fn next_io(&mut self) -> KeyInput {
        self.panel.buttons.next().await
    }

    async fn handle_io(&mut self, input: KeyInput) {
        self.tracker.feed(input, Instant::now());
    }

    async fn reload(&mut self) {
        let buttons = ButtonSettings::load(&self.store);
        self.tracker.set_long_press(buttons.long_press);
        self.state_last = self.store.get_int("main", "state_last", self.state_last);
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.panel.state_led.set(LedPattern::Off)?;
        self.panel.error_led.set(LedPattern::Off)?;
        Ok(())
    }
}
