//! # linkbridge-daemon - External Process Control
//!
//! Everything that talks to programs outside this one: the supervised probe
//! server child, name-based control of system daemons through `/proc`, the
//! Unix-datagram control socket of the network daemons and its command
//! vocabulary, shell commands, and network interface queries.
//!
//! ## Public API
//!
//! - [`SupervisedProcess`] - Tracked child with merged output lines and kill-on-drop
//! - [`ProcTable`] - Count, wait for, and kill processes by command-line match
//! - [`ControlSocket`] - Request/response client for daemon control sockets
//! - [`protocol`] - Station/AP command builders and reply parsers
//! - [`shell`] - `sh -c` execution with exit status checking
//! - [`NetInterfaces`] - Interface MAC and IPv4 lookup

pub mod ctrl_socket;
pub mod netif;
pub mod proc_table;
pub mod process;
pub mod protocol;
pub mod shell;

#[cfg(any(test, feature = "test-helpers"))]
pub mod test_utils;

pub use ctrl_socket::{ControlSocket, REQUEST_TIMEOUT};
pub use netif::NetInterfaces;
pub use proc_table::ProcTable;
pub use process::SupervisedProcess;
pub use protocol::{AccessPointProfile, StationProfile};
