//! linkbridge - J-Link network bridge
//!
//! This is the binary entry point. All logic lives in the library.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use linkbridge::app::config::DEFAULT_CONFIG_DIR;
use linkbridge::app::discovery::DISCOVERY_PORT;
use linkbridge::core::logging;
use linkbridge::EngineOptions;

/// Control daemon of the J-Link network bridge
#[derive(Parser, Debug)]
#[command(name = "linkbridge", version)]
#[command(about = "Control daemon of the J-Link network bridge", long_about = None)]
struct Args {
    /// Directory holding jlink.toml and jlink.bak.toml
    #[arg(long, value_name = "DIR", default_value = DEFAULT_CONFIG_DIR)]
    config_dir: PathBuf,

    /// Directory of the configuration pages
    #[arg(long, value_name = "DIR", default_value = "/opt/jlink/www")]
    www_dir: PathBuf,

    /// Log directory (defaults to the user data directory)
    #[arg(long, value_name = "DIR")]
    log_dir: Option<PathBuf>,

    /// Port of the configuration pages
    #[arg(long, default_value_t = 80)]
    http_port: u16,

    /// Port discovery requests arrive on
    #[arg(long, default_value_t = DISCOVERY_PORT)]
    discovery_port: u16,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();

    logging::init(args.log_dir.as_deref())?;

    let options = EngineOptions {
        config_dir: args.config_dir,
        www_dir: args.www_dir,
        http_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.http_port)),
        discovery_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.discovery_port)),
    };

    linkbridge::run(options).await?;
    Ok(())
}
