//! Persistent configuration for the bridge
//!
//! - [`ConfigStore`] - dual-replica TOML store with self-healing reads
//! - [`settings`] - typed snapshots read through the store
//! - [`ReloadTrigger`] / [`ReloadWatch`] - versioned "configuration changed" handles

pub mod reload;
pub mod settings;
pub mod store;

use std::path::{Path, PathBuf};

pub use reload::{reload_channel, ReloadTrigger, ReloadWatch};
pub use settings::{
    ButtonSettings, DiscoverySettings, HttpSettings, LedSettings, ProbeSettings, WifiSettings,
};
pub use store::{ConfigStore, ConfigValue, COUNTER_GROUP, COUNTER_KEY};

/// Default configuration directory on the device
pub const DEFAULT_CONFIG_DIR: &str = "/opt/jlink/etc";

/// File name of replica 0
pub const PRIMARY_FILE: &str = "jlink.toml";

/// File name of replica 1
pub const BACKUP_FILE: &str = "jlink.bak.toml";

/// Paths of both replicas inside `config_dir`
pub fn replica_paths(config_dir: &Path) -> (PathBuf, PathBuf) {
    (config_dir.join(PRIMARY_FILE), config_dir.join(BACKUP_FILE))
}

/// Open the store kept in `config_dir`
pub fn open_store(config_dir: &Path) -> linkbridge_core::Result<ConfigStore> {
    let (primary, backup) = replica_paths(config_dir);
    ConfigStore::open(primary, backup)
}
