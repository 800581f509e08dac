//! Probe-server supervisor
//!
//! Keeps the remote probe server running while the device is in a WiFi
//! mode, routes the probe's USB lines to the host while it runs, and picks
//! the probe serial number out of the server's output.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use regex::Regex;
use tokio::sync::watch;
use tokio::time::Instant;

use linkbridge_core::prelude::*;
use linkbridge_daemon::{ProcTable, SupervisedProcess};

use crate::config::{ConfigStore, ProbeSettings};
use crate::hardware::{MuxRoute, UsbMux};
use crate::runtime::Subsystem;

/// Budget for killing stray server instances
pub const STRAY_KILL_TIMEOUT: Duration = Duration::from_millis(2000);

/// Pause after a failed start or an unexpected exit
pub const RESTART_DELAY: Duration = Duration::from_secs(5);

/// How long a stopping child gets to be reaped
const STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// Shared view of the supervisor: the run request and the last serial
#[derive(Debug, Clone)]
pub struct ProbeHandle {
    run: Arc<watch::Sender<bool>>,
    serial: Arc<watch::Sender<u32>>,
}

impl Default for ProbeHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl ProbeHandle {
    pub fn new() -> Self {
        Self {
            run: Arc::new(watch::Sender::new(false)),
            serial: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Request the server to run or stop. Applied on the next tick.
    pub fn set_run(&self, run: bool) {
        self.run.send_replace(run);
    }

    pub fn run_requested(&self) -> bool {
        *self.run.borrow()
    }

    /// Serial number of the connected probe, 0 when none
    pub fn serial(&self) -> u32 {
        *self.serial.borrow()
    }

    fn publish_serial(&self, serial: u32) {
        self.serial.send_if_modified(|current| {
            let changed = *current != serial;
            *current = serial;
            changed
        });
    }
}

enum ProbeState {
    Idle,
    Running(SupervisedProcess),
    Wait { since: Instant },
}

impl ProbeState {
    fn label(&self) -> &'static str {
        match self {
            ProbeState::Idle => "idle",
            ProbeState::Running(_) => "running",
            ProbeState::Wait { .. } => "wait",
        }
    }
}

pub struct ProbeSupervisor {
    store: Arc<ConfigStore>,
    settings: ProbeSettings,
    mux: Box<dyn UsbMux>,
    procs: ProcTable,
    handle: ProbeHandle,
    state: ProbeState,
    serial_pattern: Regex,
}

impl ProbeSupervisor {
    /// Load settings and park the USB lines on the local connector
    pub fn new(
        store: Arc<ConfigStore>,
        handle: ProbeHandle,
        mux: Box<dyn UsbMux>,
    ) -> Result<Self> {
        let settings = ProbeSettings::load(&store);
        let serial_pattern = Regex::new(r"S/N\D*(\d+)")
            .map_err(|e| Error::subsystem("probe", format!("serial pattern: {e}")))?;

        if let Err(e) = mux.route(MuxRoute::Local) {
            error!("USB mux init failed: {}", e);
        }
        info!(
            "Probe server {} (usb switch gpio {})",
            settings.remote_server_path.display(),
            settings.usb_switch_gpio
        );

        Ok(Self {
            store,
            settings,
            mux,
            procs: ProcTable::default(),
            handle,
            state: ProbeState::Idle,
            serial_pattern,
        })
    }

    pub fn with_proc_table(mut self, procs: ProcTable) -> Self {
        self.procs = procs;
        self
    }

    pub fn handle(&self) -> ProbeHandle {
        self.handle.clone()
    }

    /// Name of the current state, for logs and tests
    pub fn state_label(&self) -> &'static str {
        self.state.label()
    }

    /// Serial number announced in `line`, if any
    pub fn parse_serial(&self, line: &str) -> Option<u32> {
        parse_serial(&self.serial_pattern, line)
    }

    async fn kill_strays(&self) -> Result<()> {
        let name = self.settings.process_name();
        self.procs.kill_by_name(&name, STRAY_KILL_TIMEOUT).await
    }

    fn set_route(&self, route: MuxRoute) {
        if let Err(e) = self.mux.route(route) {
            error!("USB mux {:?} failed: {}", route, e);
        }
    }

    async fn start(&mut self, now: Instant) {
        if let Err(e) = self.kill_strays().await {
            warn!("Could not clear stray probe servers: {}", e);
            self.state = ProbeState::Wait { since: now };
            return;
        }

        debug!("Starting probe server");
        match SupervisedProcess::spawn(&self.settings.remote_server_path, &[]) {
            Ok(child) => {
                self.set_route(MuxRoute::Host);
                self.state = ProbeState::Running(child);
            }
            Err(e) => {
                error!("Probe server start failed: {}", e);
                self.state = ProbeState::Wait { since: now };
            }
        }
    }

    /// Stop the child and any stray copies. Returns false if a copy survived.
    async fn stop(&mut self) -> bool {
        if let ProbeState::Running(child) = &mut self.state {
            child.stop(STOP_TIMEOUT).await;
        }
        if let Err(e) = self.kill_strays().await {
            error!("Probe server did not stop: {}", e);
            return false;
        }
        self.set_route(MuxRoute::Local);
        self.handle.publish_serial(0);
        true
    }

    fn drain_output(&mut self) {
        let ProbeState::Running(child) = &mut self.state else {
            return;
        };
        let mut found = None;
        while let Some(line) = child.try_next_line() {
            let line = line.trim_end_matches(['\r', '\n']);
            debug!("probe: {}", line);
            if let Some(serial) = parse_serial(&self.serial_pattern, line) {
                found = Some(serial);
            }
        }
        if let Some(serial) = found {
            info!("sn: {}", serial);
            self.handle.publish_serial(serial);
        }
    }
}

fn parse_serial(pattern: &Regex, line: &str) -> Option<u32> {
    let captures = pattern.captures(line)?;
    captures.get(1)?.as_str().parse().ok()
}

impl Subsystem for ProbeSupervisor {
    type Io = Infallible;

    fn name(&self) -> &'static str {
        "probe"
    }

    async fn tick(&mut self, now: Instant) {
        let run = self.handle.run_requested();
        let exited = matches!(&self.state, ProbeState::Running(child) if child.has_exited());

        match self.state {
            ProbeState::Idle => {
                if run {
                    self.start(now).await;
                }
            }
            ProbeState::Running(_) if !run => {
                debug!("Stopping probe server");
                if self.stop().await {
                    self.state = ProbeState::Idle;
                }
            }
            ProbeState::Running(_) if exited => {
                self.drain_output();
                warn!(
                    "Probe server exited on its own, restarting in {:?}",
                    RESTART_DELAY
                );
                self.set_route(MuxRoute::Local);
                self.handle.publish_serial(0);
                self.state = ProbeState::Wait { since: now };
            }
            ProbeState::Running(_) => self.drain_output(),
            ProbeState::Wait { since } => {
                if now.saturating_duration_since(since) >= RESTART_DELAY {
                    self.state = ProbeState::Idle;
                }
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
        let settings = ProbeSettings::load(&self.store);
        if settings.usb_switch_gpio != self.settings.usb_switch_gpio {
            warn!(
                "USB switch gpio changed to {}, applies after restart",
                settings.usb_switch_gpio
            );
        }
        self.settings = settings;
    }

    async fn shutdown(&mut self) -> Result<()> {
        let result = match &mut self.state {
            ProbeState::Running(child) => {
                child.stop(STOP_TIMEOUT).await;
                self.kill_strays().await
            }
            _ => Ok(()),
        };
        self.state = ProbeState::Idle;
        self.handle.publish_serial(0);
        self.mux.route(MuxRoute::Local)?;
        result
    }
}
