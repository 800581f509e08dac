//! Engine - bootstrap and lifetime of the subsystem loops
//!
//! The Engine opens the configuration store, builds every subsystem with
//! its shared handles, and runs one loop task per subsystem. No loop starts
//! work until all of them are spawned. Shutdown is a single watch flag set
//! by the signal handler; the loops are then joined in reverse start order.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{watch, Barrier};
use tokio::task::JoinHandle;

use linkbridge_core::prelude::*;
use linkbridge_daemon::NetInterfaces;

use crate::config::{self, reload_channel, ConfigStore, ProbeSettings, ReloadTrigger};
use crate::discovery::DiscoveryResponder;
use crate::hardware::{BatteryReader, PowerControl, ShellPower, SysfsGpio};
use crate::http::{HttpServer, Pages, StatusSources};
use crate::mode::{FrontPanel, ModeOrchestrator};
use crate::network::{LinuxNetworkSystem, NetworkHandle, NetworkOrchestrator};
use crate::probe::{ProbeHandle, ProbeSupervisor};
use crate::runtime::{self, LoopContext};
use crate::signals;

/// Number of subsystem loops the engine runs
pub const SUBSYSTEM_COUNT: usize = 5;

/// Where the engine finds its files and which ports it serves
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub config_dir: PathBuf,
    pub www_dir: PathBuf,
    pub http_addr: SocketAddr,
    pub discovery_addr: SocketAddr,
}

/// Every subsystem, built and ready to run.
pub struct Engine {
    store: Arc<ConfigStore>,
    reload: ReloadTrigger,

    /// Send `true` to stop all loops
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,

    probe: ProbeSupervisor,
    network: NetworkOrchestrator<LinuxNetworkSystem>,
    mode: ModeOrchestrator,
    http: HttpServer,
    discovery: DiscoveryResponder,
}

impl Engine {
    /// Open the store and build the subsystems.
    ///
    /// An error here is an init failure; subsystems built so far are
    /// dropped in reverse order of construction.
    pub fn new(options: EngineOptions) -> Result<Self> {
        let store = Arc::new(config::open_store(&options.config_dir)?);
        info!(
            "Configuration loaded from {} (write count {})",
            options.config_dir.display(),
            store.write_count()
        );

        let (reload, _) = reload_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let power: Arc<dyn PowerControl> = Arc::new(ShellPower);

        let probe_settings = ProbeSettings::load(&store);
        let probe = ProbeSupervisor::new(
            store.clone(),
            ProbeHandle::new(),
            Box::new(SysfsGpio::new(probe_settings.usb_switch_gpio)),
        )?;

        let network_handle = NetworkHandle::new(reload.clone());
        let network = NetworkOrchestrator::new(
            store.clone(),
            LinuxNetworkSystem::default(),
            power.clone(),
            network_handle.clone(),
            probe.handle(),
        );

        let mode = ModeOrchestrator::new(
            store.clone(),
            FrontPanel::open(&store),
            power.clone(),
            probe.handle(),
            network_handle.clone(),
        );

        let sources = StatusSources {
            probe: probe.handle(),
            network: network_handle,
            mode: mode.handle(),
            battery: BatteryReader::default(),
            interfaces: NetInterfaces::default(),
        };
        let http = HttpServer::new(
            store.clone(),
            Pages::new(&options.www_dir),
            sources,
            power,
            options.http_addr,
        );

        let discovery =
            DiscoveryResponder::new(store.clone(), NetInterfaces::default(), options.discovery_addr);

        Ok(Self {
            store,
            reload,
            shutdown_tx,
            shutdown_rx,
            probe,
            network,
            mode,
            http,
            discovery,
        })
    }

    /// A handle that stops the engine when `true` is sent
    pub fn shutdown_handle(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run until SIGINT/SIGTERM or the shutdown handle fires.
    ///
    /// Returns the first loop error, if any.
    pub async fn run(self) -> Result<()> {
        let Engine {
            store,
            reload,
            shutdown_tx,
            mut shutdown_rx,
            probe,
            network,
            mode,
            http,
            discovery,
        } = self;

        signals::spawn_signal_handler(shutdown_tx);

        let barrier = Arc::new(Barrier::new(SUBSYSTEM_COUNT + 1));
        let ctx = || LoopContext::new(barrier.clone(), shutdown_rx.clone(), reload.subscribe());

        let loops: Vec<(&'static str, JoinHandle<Result<()>>)> = vec![
            ("probe", runtime::spawn(probe, ctx())),
            ("network", runtime::spawn(network, ctx())),
            ("mode", runtime::spawn(mode, ctx())),
            ("http", runtime::spawn(http, ctx())),
            ("discovery", runtime::spawn(discovery, ctx())),
        ];

        barrier.wait().await;
        info!("All {} subsystems running", SUBSYSTEM_COUNT);

        if shutdown_rx.wait_for(|stop| *stop).await.is_err() {
            warn!("Shutdown channel closed");
        }
        info!("Stopping subsystems");

        let mut first_error = None;
        for (name, handle) in loops.into_iter().rev() {
            let outcome = match handle.await {
                Ok(result) => result,
                Err(e) => Err(Error::subsystem(name, format!("task failed: {e}"))),
            };
            match outcome {
                Ok(()) => debug!("{} stopped", name),
                Err(e) => {
                    error!("{} stopped with error: {}", name, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        info!("Stopped (config write count {})", store.write_count());
        first_error.map_or(Ok(()), Err)
    }
}
