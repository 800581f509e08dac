//! linkbridge-app - Subsystems of the J-Link network bridge
//!
//! Every subsystem is a state machine implementing [`runtime::Subsystem`]
//! and driven by its own loop task:
//!
//! - [`probe::ProbeSupervisor`] - keeps the probe server running and routes USB
//! - [`network::NetworkOrchestrator`] - radio daemons, addressing, link status
//! - [`mode::ModeOrchestrator`] - device mode, buttons, LEDs
//! - [`http::HttpServer`] - configuration pages
//! - [`discovery::DiscoveryResponder`] - LAN discovery replies
//!
//! [`engine::Engine`] builds them around one [`config::ConfigStore`] and
//! runs them until shutdown.

pub mod config;
pub mod discovery;
pub mod engine;
pub mod hardware;
pub mod http;
pub mod mode;
pub mod network;
pub mod probe;
pub mod runtime;
pub mod signals;

pub use config::ConfigStore;
pub use engine::{Engine, EngineOptions};
pub use runtime::Subsystem;
