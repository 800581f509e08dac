//! Page rendering
//!
//! Pages are static files from the www directory. Dynamic values are
//! appended as small `<script>` snippets that fill elements by id.

use std::fmt;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};

use linkbridge_core::prelude::*;
use linkbridge_core::MacAddr;

use super::response::VERSION;
use crate::hardware::BatteryInfo;

/// Product name shown next to the version
pub const DEVICE_NAME: &str = "J-Link WiFi";

pub const LOGIN_PAGE: &str = "login.html";
pub const CONFIG_PAGE: &str = "config1.html";
pub const MAC_PAGE: &str = "m.html";
pub const LOGO: &str = "logo.gif";

/// Status line shown on the login page
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SystemInfo {
    pub battery: Option<BatteryInfo>,
    /// Signal strength while connected as a client
    pub rssi: Option<i8>,
    /// Last client address while running as an access point
    pub last_sta_ip: Option<Ipv4Addr>,
    pub serial: u32,
}

impl fmt::Display for SystemInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(battery) = &self.battery {
            write!(f, "{battery}")?;
        }
        if let Some(rssi) = self.rssi {
            write!(f, "WiFi RSSI: {rssi}dBm ")?;
        } else if let Some(ip) = self.last_sta_ip {
            write!(f, "Last STA IP: {ip} ")?;
        }
        write!(f, "J-Link S/N: {}", self.serial)
    }
}

/// Content type by file extension
pub fn content_type(name: &str) -> Option<&'static str> {
    match Path::new(name).extension()?.to_str()? {
        "html" => Some("text/html"),
        "gif" => Some("image/gif"),
        "log" => Some("application/octet-stream"),
        _ => None,
    }
}

/// Renders pages from a www directory
#[derive(Debug, Clone)]
pub struct Pages {
    www_dir: PathBuf,
}

impl Pages {
    pub fn new(www_dir: impl Into<PathBuf>) -> Self {
        Self {
            www_dir: www_dir.into(),
        }
    }

    async fn read(&self, name: &str) -> Result<Vec<u8>> {
        let path = self.www_dir.join(name);
        tokio::fs::read(&path)
            .await
            .map_err(|e| Error::config(format!("{}: {e}", path.display())))
    }

    pub async fn login(&self, info: &SystemInfo, message: &str) -> Result<Vec<u8>> {
        let mut page = self.read(LOGIN_PAGE).await?;
        set_inner_html(&mut page, "system_info", &info.to_string());
        set_inner_html(&mut page, "version", &format!("{DEVICE_NAME} {VERSION}"));
        set_inner_html(&mut page, "info", message);
        Ok(page)
    }

    /// Client credentials form, pre-filled with the stored values
    pub async fn config(
        &self,
        mac: MacAddr,
        ssid: &str,
        password: &str,
        message: &str,
    ) -> Result<Vec<u8>> {
        let mut page = self.read(CONFIG_PAGE).await?;
        set_inner_html(
            &mut page,
            "macaddr",
            &format!("MAC地址:{}", mac.to_dashed_upper()),
        );
        set_form_value(&mut page, "T0", ssid);
        set_form_value(&mut page, "T1", password);
        set_inner_html(&mut page, "info", message);
        Ok(page)
    }

    pub async fn mac_setting(&self, mac: MacAddr, message: &str) -> Result<Vec<u8>> {
        let mut page = self.read(MAC_PAGE).await?;
        set_inner_html(&mut page, "macaddrset", &mac.to_dashed_upper());
        set_inner_html(&mut page, "info", message);
        Ok(page)
    }

    /// A static file and its content type
    pub async fn asset(&self, name: &str) -> Result<(Option<&'static str>, Vec<u8>)> {
        let body = self.read(name).await?;
        Ok((content_type(name), body))
    }
}

fn set_inner_html(page: &mut Vec<u8>, id: &str, value: &str) {
    let script = format!(
        "<script>document.getElementById('{id}').innerHTML='{}';</script>",
        js_escape(value)
    );
    page.extend_from_slice(script.as_bytes());
}

fn set_form_value(page: &mut Vec<u8>, field: &str, value: &str) {
    let script = format!(
        "<script>setform.{field}.value='{}';</script>",
        js_escape(value)
    );
    page.extend_from_slice(script.as_bytes());
}

/// Escape for a single-quoted script string inside an HTML document
fn js_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '<' => out.push_str("\\x3c"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out
}
