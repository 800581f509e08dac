//! LAN discovery for companion software
//!
//! Companion tools broadcast a checksummed request; the device answers with
//! its type, MAC and IPv4 address.

pub mod codec;
pub mod responder;

pub use codec::{decode, encode_reply, encode_request, DeviceInfo, Rejected};
pub use responder::{DiscoveryResponder, DISCOVERY_PORT, REPLY_PORT};
