//! Configuration web interface
//!
//! A minimal HTTP/1.x server for the device's setup pages: the client
//! credentials form behind a password, the MAC address page, and a status
//! line on the login page.

pub mod pages;
pub mod parser;
pub mod response;
pub mod server;

pub use pages::{Pages, SystemInfo};
pub use parser::{Request, RequestParser};
pub use response::Response;
pub use server::{HttpServer, StatusSources, PASSWORD, SESSION_TIMEOUT};
