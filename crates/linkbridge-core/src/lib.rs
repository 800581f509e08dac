//! # linkbridge-core - Core Domain Types
//!
//! Foundation crate for linkbridge. Provides domain types, error handling,
//! logging setup and the discovery checksum.
//!
//! This crate has **zero internal dependencies** -- it only depends on external
//! crates (thiserror, tracing, tracing-subscriber, tracing-appender, dirs).
//!
//! ## Public API
//!
//! ### Domain Types (`types`)
//! - [`DeviceMode`] - Top-level mode (usb bridge, WiFi client, WiFi AP, transitioning)
//! - [`WifiMode`], [`AddrMode`] - Network personality and station addressing
//! - [`StationStatus`] - Observed station connection state
//! - [`MacAddr`] - Hardware address with separator-agnostic parsing
//! - [`Button`], [`ButtonEvent`], [`ButtonState`], [`LedPattern`] - Front panel types
//!
//! ### Error Handling (`error`)
//! - [`Error`] - Custom error enum; [`Error::is_fatal`] marks errors that call for a reboot
//! - [`Result`] - Type alias for `std::result::Result<T, Error>`
//!
//! ## Prelude
//!
//! Import commonly used types with:
//! ```rust
//! use linkbridge_core::prelude::*;
//! ```

pub mod checksum;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;

pub use checksum::crc16_ccitt;
pub use error::{Error, Result};
pub use types::{
    AddrMode, Button, ButtonEvent, ButtonState, DeviceMode, LedPattern, MacAddr, StationStatus,
    WifiMode,
};
