//! Operating-system side of network orchestration

use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::time::Duration;

use linkbridge_core::prelude::*;
use linkbridge_daemon::{shell, ProcTable};

/// Radio kill switch of the WiFi chip
pub const RFKILL_STATE: &str = "/sys/class/rfkill/rfkill0/state";

/// Resolver configuration written for static addressing
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// Process and device operations used while switching network modes
#[trait_variant::make(NetworkSystem: Send)]
pub trait LocalNetworkSystem {
    /// Kill every process whose command line contains `name`
    async fn kill_by_name(&self, name: &str, timeout: Duration) -> Result<()>;

    /// Launch a daemonizing command line and wait until `name` shows up
    async fn start_daemon(&self, command: &str, name: &str, timeout: Duration) -> Result<()>;

    /// Run a command line and wait for it to finish
    async fn run(&self, command: &str) -> Result<()>;

    /// Run a command line that leaves a background job behind
    async fn launch(&self, command: &str) -> Result<()>;

    async fn set_radio_power(&self, on: bool) -> Result<()>;

    async fn write_resolv_conf(&self, servers: &[Ipv4Addr]) -> Result<()>;
}

/// The real board: `/proc`, `sh -c`, rfkill and `/etc/resolv.conf`
#[derive(Debug, Clone)]
pub struct LinuxNetworkSystem {
    procs: ProcTable,
    rfkill: PathBuf,
    resolv_conf: PathBuf,
}

impl Default for LinuxNetworkSystem {
    fn default() -> Self {
        Self {
            procs: ProcTable::default(),
            rfkill: PathBuf::from(RFKILL_STATE),
            resolv_conf: PathBuf::from(RESOLV_CONF),
        }
    }
}

impl LinuxNetworkSystem {
    pub fn new() -> Self {
        Self::default()
    }
}

impl NetworkSystem for LinuxNetworkSystem {
    async fn kill_by_name(&self, name: &str, timeout: Duration) -> Result<()> {
        self.procs.kill_by_name(name, timeout).await
    }

    async fn start_daemon(&self, command: &str, name: &str, timeout: Duration) -> Result<()> {
        shell::launch(command).await?;
        self.procs.wait_for_name(name, timeout).await?;
        debug!("{} started", name);
        Ok(())
    }

    async fn run(&self, command: &str) -> Result<()> {
        shell::run(command).await
    }

    async fn launch(&self, command: &str) -> Result<()> {
        shell::launch(command).await
    }

    async fn set_radio_power(&self, on: bool) -> Result<()> {
        let value = if on { "1" } else { "0" };
        tokio::fs::write(&self.rfkill, value)
            .await
            .map_err(|e| Error::hardware(format!("{}: {e}", self.rfkill.display())))
    }

    async fn write_resolv_conf(&self, servers: &[Ipv4Addr]) -> Result<()> {
        let contents: String = servers
            .iter()
            .map(|server| format!("nameserver {server}\n"))
            .collect();
        tokio::fs::write(&self.resolv_conf, contents).await?;
        Ok(())
    }
}
