//! Network orchestration
//!
//! - [`NetworkHandle`] - status snapshot and reload requests, shared with other subsystems
//! - [`NetworkSystem`] - process, shell and radio operations the orchestrator needs
//! - [`NetworkOrchestrator`] - applies `[wifi]` and polls the station

pub mod orchestrator;
pub mod system;

use std::sync::Arc;

use tokio::sync::watch;

use linkbridge_core::{StationStatus, WifiMode};

use crate::config::ReloadTrigger;

pub use orchestrator::{NetworkOrchestrator, DAEMON_TIMEOUT};
pub use system::{LinuxNetworkSystem, LocalNetworkSystem, NetworkSystem};

/// Shared view of the network orchestrator
#[derive(Debug, Clone)]
pub struct NetworkHandle {
    status: Arc<watch::Sender<StationStatus>>,
    mode: Arc<watch::Sender<WifiMode>>,
    reload: ReloadTrigger,
}

impl NetworkHandle {
    pub fn new(reload: ReloadTrigger) -> Self {
        Self {
            status: Arc::new(watch::Sender::new(StationStatus::default())),
            mode: Arc::new(watch::Sender::new(WifiMode::Disabled)),
            reload,
        }
    }

    /// Last observed station status. All zero outside station mode.
    pub fn station_status(&self) -> StationStatus {
        *self.status.borrow()
    }

    /// Mode most recently applied
    pub fn mode(&self) -> WifiMode {
        *self.mode.borrow()
    }

    /// Re-read `[wifi]` and rebuild the network on the next tick
    pub fn request_reload(&self) {
        self.reload.trigger();
    }

    /// Number of reloads requested so far
    pub fn reload_generation(&self) -> u64 {
        self.reload.generation()
    }

    pub(crate) fn publish_status(&self, status: StationStatus) {
        self.status.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });
    }

    pub(crate) fn publish_mode(&self, mode: WifiMode) {
        self.mode.send_replace(mode);
    }
}
