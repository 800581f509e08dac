//! Response building

use std::fmt::Write as _;

/// Version reported in the `Server` header and on the login page
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub reason: &'static str,
    pub content_type: Option<&'static str>,
    /// Sent only with 3xx statuses
    pub location: Option<String>,
    pub body: Vec<u8>,
}

impl Response {
    pub fn html(body: Vec<u8>) -> Self {
        Self::ok(Some("text/html"), body)
    }

    pub fn ok(content_type: Option<&'static str>, body: Vec<u8>) -> Self {
        Self {
            status: 200,
            reason: "OK",
            content_type,
            location: None,
            body,
        }
    }

    /// `302 Found` to `location`
    pub fn found(location: &str) -> Self {
        Self {
            status: 302,
            reason: "Found",
            content_type: Some("text/html"),
            location: Some(location.to_string()),
            body: Vec::new(),
        }
    }

    pub fn not_found() -> Self {
        Self {
            status: 404,
            reason: "Not Found",
            content_type: None,
            location: None,
            body: Vec::new(),
        }
    }

    /// Status line, headers and body. The connection is always closed after
    /// a response, which the `Connection` header announces.
    pub fn encode(&self, version: (u8, u8)) -> Vec<u8> {
        let mut head = String::new();
        let _ = write!(
            head,
            "HTTP/{}.{} {} {}\r\n",
            version.0, version.1, self.status, self.reason
        );
        let _ = write!(head, "Server: jlink/{VERSION}\r\n");
        head.push_str("Connection: close\r\n");
        if !self.body.is_empty() {
            let _ = write!(head, "Content-Length: {}\r\n", self.body.len());
        }
        if let Some(content_type) = self.content_type {
            let _ = write!(head, "Content-Type: {content_type}\r\n");
        }
        if (300..400).contains(&self.status) {
            if let Some(location) = &self.location {
                let _ = write!(head, "Location: {location}\r\n");
            }
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(&self.body);
        bytes
    }
}
