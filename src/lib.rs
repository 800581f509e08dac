//! linkbridge Library
//!
//! Control core of the J-Link network bridge: probe server supervision,
//! WiFi client/access-point management, the configuration pages and LAN
//! discovery.

pub use linkbridge_app as app;
pub use linkbridge_core as core;
pub use linkbridge_daemon as daemon;

pub use linkbridge_app::{Engine, EngineOptions};

use linkbridge_core::prelude::*;

/// Build every subsystem and run until shutdown
pub async fn run(options: EngineOptions) -> Result<()> {
    let result = match Engine::new(options) {
        Ok(engine) => engine.run().await,
        Err(e) => Err(e),
    };

    if let Err(ref e) = result {
        error!("Bridge error: {:?}", e);
    }
    info!("linkbridge exiting");
    result
}
