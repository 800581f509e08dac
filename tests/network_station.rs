//! Network orchestration end to end: configured client mode against a fake
//! supplicant control socket, driven by the real subsystem loop.

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Barrier};

use linkbridge::app::config::{reload_channel, ConfigStore};
use linkbridge::app::hardware::PowerControl;
use linkbridge::app::network::{NetworkHandle, NetworkOrchestrator, NetworkSystem};
use linkbridge::app::probe::ProbeHandle;
use linkbridge::app::runtime::{self, LoopContext};
use linkbridge::core::{Result, WifiMode};
use linkbridge_daemon::test_utils::{station_reply, FakeControlDaemon};

/// Records operations instead of touching the board
#[derive(Clone, Default)]
struct RecordingSystem {
    calls: Arc<Mutex<Vec<String>>>,
}

impl RecordingSystem {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl NetworkSystem for RecordingSystem {
    async fn kill_by_name(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.record(format!("kill {name}"));
        Ok(())
    }

    async fn start_daemon(&self, command: &str, _name: &str, _timeout: Duration) -> Result<()> {
        self.record(format!("start {command}"));
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<()> {
        self.record(format!("run {command}"));
        Ok(())
    }

    async fn launch(&self, command: &str) -> Result<()> {
        self.record(format!("launch {command}"));
        Ok(())
    }

    async fn set_radio_power(&self, on: bool) -> Result<()> {
        self.record(format!("rfkill {}", u8::from(on)));
        Ok(())
    }

    async fn write_resolv_conf(&self, servers: &[Ipv4Addr]) -> Result<()> {
        self.record(format!("resolv {servers:?}"));
        Ok(())
    }
}

#[derive(Default)]
struct CountingPower {
    reboots: AtomicUsize,
}

impl PowerControl for CountingPower {
    fn reboot(&self) {
        self.reboots.fetch_add(1, Ordering::SeqCst);
    }

    fn poweroff(&self) {}
}

async fn wait_until(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..500 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for {what}");
}

#[tokio::test]
async fn test_configured_station_comes_up_and_reports_status() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ConfigStore::open(dir.path().join("jlink.toml"), dir.path().join("jlink.bak.toml"))
            .unwrap(),
    );
    let wpa = dir.path().join("wpa");
    store.set_int("wifi", "mode", 1).unwrap();
    store.set_str("wifi", "sta_ssid", "lab").unwrap();
    store.set_str("wifi", "sta_password", "secret99").unwrap();
    store
        .set_str("wifi", "wpa_ctrl_path", &wpa.to_string_lossy())
        .unwrap();
    let daemon = FakeControlDaemon::connected_station(&wpa, "10.0.0.5").unwrap();

    let (trigger, reload) = reload_channel();
    let handle = NetworkHandle::new(trigger.clone());
    let system = RecordingSystem::default();
    let power = Arc::new(CountingPower::default());
    let orchestrator = NetworkOrchestrator::new(
        store.clone(),
        system.clone(),
        power.clone(),
        handle.clone(),
        ProbeHandle::new(),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let ctx = LoopContext::new(Arc::new(Barrier::new(1)), shutdown_rx, reload);
    let task = runtime::spawn(orchestrator, ctx);

    wait_until("station connected", || handle.station_status().connected).await;
    assert_eq!(handle.mode(), WifiMode::Station);
    let status = handle.station_status();
    assert_eq!(status.ip, Some(Ipv4Addr::new(10, 0, 0, 5)));
    assert_eq!(status.rssi, -55);

    let commands = daemon.commands();
    assert!(commands.contains(&"SET_NETWORK 1 ssid \"lab\"".to_string()));
    assert!(commands.contains(&"SET_NETWORK 1 psk \"secret99\"".to_string()));
    assert!(system
        .calls()
        .contains(&"launch udhcpc -b -i wlan0 -R &".to_string()));

    // Switching to disabled tears the client down and powers the radio off
    store.set_int("wifi", "mode", 0).unwrap();
    trigger.trigger();
    wait_until("radio off", || handle.mode() == WifiMode::Disabled).await;
    assert!(daemon.commands().contains(&"DISCONNECT".to_string()));
    assert_eq!(system.calls().last().unwrap(), "rfkill 0");
    assert!(!handle.station_status().connected);

    shutdown.send_replace(true);
    task.await.unwrap().unwrap();
    assert_eq!(power.reboots.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_refused_psk_does_not_block_enable() {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(
        ConfigStore::open(dir.path().join("jlink.toml"), dir.path().join("jlink.bak.toml"))
            .unwrap(),
    );
    let wpa = dir.path().join("wpa");
    store.set_int("wifi", "mode", 1).unwrap();
    store.set_str("wifi", "sta_ssid", "lab").unwrap();
    store.set_str("wifi", "sta_password", "short").unwrap();
    store
        .set_str("wifi", "wpa_ctrl_path", &wpa.to_string_lossy())
        .unwrap();
    let daemon = FakeControlDaemon::spawn(&wpa, |command| {
        if command.starts_with("SET_NETWORK 1 psk") {
            "FAIL\n".to_string()
        } else {
            station_reply(command, "10.0.0.7")
        }
    })
    .unwrap();

    let (trigger, reload) = reload_channel();
    let handle = NetworkHandle::new(trigger);
    let power = Arc::new(CountingPower::default());
    let orchestrator = NetworkOrchestrator::new(
        store,
        RecordingSystem::default(),
        power.clone(),
        handle.clone(),
        ProbeHandle::new(),
    );

    let (shutdown, shutdown_rx) = watch::channel(false);
    let ctx = LoopContext::new(Arc::new(Barrier::new(1)), shutdown_rx, reload);
    let task = runtime::spawn(orchestrator, ctx);

    wait_until("station connected", || handle.station_status().connected).await;
    let commands = daemon.commands();
    let psk = commands
        .iter()
        .position(|c| c == "SET_NETWORK 1 psk \"short\"")
        .unwrap();
    assert_eq!(
        &commands[psk + 1..psk + 3],
        &["ENABLE_NETWORK 1".to_string(), "RECONNECT".to_string()]
    );

    shutdown.send_replace(true);
    task.await.unwrap().unwrap();
    assert_eq!(power.reboots.load(Ordering::SeqCst), 0);
}
