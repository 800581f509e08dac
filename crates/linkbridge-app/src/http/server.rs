//! Configuration web server
//!
//! Serves one client at a time. A connection accepted while another is
//! open is closed straight away. Every response closes the connection.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::Instant;

use linkbridge_core::prelude::*;
use linkbridge_core::{MacAddr, WifiMode};
use linkbridge_daemon::NetInterfaces;

use super::pages::{Pages, SystemInfo, LOGO};
use super::parser::{Request, RequestParser, RECV_CAPACITY};
use super::response::Response;
use crate::config::{ConfigStore, HttpSettings, WifiSettings};
use crate::hardware::{BatteryReader, PowerControl};
use crate::mode::ModeHandle;
use crate::network::NetworkHandle;
use crate::probe::ProbeHandle;
use crate::runtime::Subsystem;

/// Shared secret for the configuration pages
pub const PASSWORD: &str = "12345678";

/// How long a password check stays valid
pub const SESSION_TIMEOUT: Duration = Duration::from_secs(120);

/// Pause between bind attempts
pub const BIND_RETRY: Duration = Duration::from_secs(5);

/// Budget for writing one response
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

const WRONG_PASSWORD: &str = "您输入的密码错误!";
const SAVED: &str = "保存成功";
const WRONG_MAC: &str = "您输入的MAC地址错误!";
const MAC_CHANGED: &str = "修改MAC地址成功!";
const MAC_WRITE_FAILED: &str = "修改MAC地址失败!";

/// Views of the other subsystems shown on the pages
#[derive(Clone)]
pub struct StatusSources {
    pub probe: ProbeHandle,
    pub network: NetworkHandle,
    pub mode: ModeHandle,
    pub battery: BatteryReader,
    pub interfaces: NetInterfaces,
}

enum Listener {
    Unbound,
    Wait { since: Instant },
    Bound(TcpListener),
}

struct Client {
    stream: TcpStream,
    peer: SocketAddr,
    parser: RequestParser,
}

pub enum HttpIo {
    Accepted(io::Result<(TcpStream, SocketAddr)>),
    Received(io::Result<usize>),
}

/// What to do once the response is on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum After {
    Nothing,
    Reboot,
}

pub struct HttpServer {
    store: Arc<ConfigStore>,
    settings: HttpSettings,
    pages: Pages,
    sources: StatusSources,
    power: Arc<dyn PowerControl>,
    addr: SocketAddr,
    listener: Listener,
    local_addr: watch::Sender<Option<SocketAddr>>,
    client: Option<Client>,
    buf: Vec<u8>,
    /// When the password was last accepted
    session: Option<Instant>,
}

impl HttpServer {
    /// The socket is bound on the first tick
    pub fn new(
        store: Arc<ConfigStore>,
        pages: Pages,
        sources: StatusSources,
        power: Arc<dyn PowerControl>,
        addr: SocketAddr,
    ) -> Self {
        let settings = HttpSettings::load(&store);
        Self {
            store,
            settings,
            pages,
            sources,
            power,
            addr,
            listener: Listener::Unbound,
            local_addr: watch::Sender::new(None),
            client: None,
            buf: vec![0; RECV_CAPACITY],
            session: None,
        }
    }

    /// Address actually bound, `None` until the bind succeeds
    pub fn local_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.local_addr.subscribe()
    }

    fn system_info(&self) -> SystemInfo {
        let network = &self.sources.network;
        let status = network.station_status();
        let (rssi, last_sta_ip) = match network.mode() {
            WifiMode::Station if status.connected => (Some(status.rssi), None),
            WifiMode::AccessPoint => (None, self.sources.mode.last_sta_ip()),
            _ => (None, None),
        };
        SystemInfo {
            battery: self.sources.battery.read(),
            rssi,
            last_sta_ip,
            serial: self.sources.probe.serial(),
        }
    }

    fn current_mac(&self) -> MacAddr {
        match self.sources.interfaces.mac_address(&self.settings.if_name) {
            Ok(mac) => mac,
            Err(e) => {
                warn!("MAC of {}: {}", self.settings.if_name, e);
                MacAddr([0; 6])
            }
        }
    }

    async fn login_page(&self, message: &str) -> Response {
        page(self.pages.login(&self.system_info(), message).await)
    }

    async fn config_page(&self, message: &str) -> Response {
        let wifi = WifiSettings::load(&self.store);
        let mac = self.current_mac();
        page(
            self.pages
                .config(mac, &wifi.sta_ssid, &wifi.sta_password, message)
                .await,
        )
    }

    async fn mac_page(&self, message: &str) -> Response {
        page(self.pages.mac_setting(self.current_mac(), message).await)
    }

    async fn route(&mut self, request: &Request, now: Instant) -> (Response, After) {
        let response = match (request.method.as_str(), request.path.as_str()) {
            ("GET", "/") => Response::found("/login.html"),
            ("GET", "/login.html") => self.login_page("").await,
            ("GET", "/m") => Response::found("/m.html"),
            ("GET", "/m.html") => self.mac_page("").await,
            ("GET", "/logo.gif") => match self.pages.asset(LOGO).await {
                Ok((content_type, body)) => Response::ok(content_type, body),
                Err(e) => {
                    warn!("{}", e);
                    Response::not_found()
                }
            },
            ("POST", path) => {
                self.expire_session(now);
                return self.post(path, &request.body, now).await;
            }
            _ => Response::not_found(),
        };
        (response, After::Nothing)
    }

    fn expire_session(&mut self, now: Instant) {
        if let Some(since) = self.session {
            if now.saturating_duration_since(since) >= SESSION_TIMEOUT {
                debug!("Configuration session expired");
                self.session = None;
            }
        }
    }

    async fn post(&mut self, path: &str, body: &[u8], now: Instant) -> (Response, After) {
        match path {
            "/config1.html" => {
                if form_value(body, "pwd").as_deref() == Some(PASSWORD) {
                    self.session = Some(now);
                    (self.config_page("").await, After::Nothing)
                } else {
                    (self.login_page(WRONG_PASSWORD).await, After::Nothing)
                }
            }
            "/save1.html" => {
                if self.session.is_none() {
                    return (Response::found("/login.html"), After::Nothing);
                }
                self.save_credentials(body).await;
                let response = self.config_page(SAVED).await;
                self.sources.network.request_reload();
                (response, After::Nothing)
            }
            "/m.html" => self.change_mac(body).await,
            _ => (Response::not_found(), After::Nothing),
        }
    }

    async fn save_credentials(&self, body: &[u8]) {
        let fields: Vec<(&'static str, String)> = [("T0", "sta_ssid"), ("T1", "sta_password")]
            .into_iter()
            .filter_map(|(field, key)| Some((key, form_value(body, field)?)))
            .collect();

        let saved = ConfigStore::blocking(&self.store, move |store| {
            for (key, value) in &fields {
                info!("{} set: {}", key, value);
                if let Err(e) = store.set_str("wifi", key, value) {
                    error!("Failed to store wifi.{}: {}", key, e);
                }
            }
            Ok(())
        })
        .await;
        if let Err(e) = saved {
            error!("Credential save failed: {}", e);
        }
    }

    async fn change_mac(&self, body: &[u8]) -> (Response, After) {
        let Some(mac) = form_value(body, "mac").and_then(|text| text.parse::<MacAddr>().ok())
        else {
            return (self.mac_page(WRONG_MAC).await, After::Nothing);
        };

        let path = &self.settings.mac_conf_path;
        if let Err(e) = tokio::fs::write(path, format!("{mac}\n")).await {
            error!("Failed to write {}: {}", path.display(), e);
            return (self.mac_page(MAC_WRITE_FAILED).await, After::Nothing);
        }
        info!("web set mac: {}", mac);
        (self.mac_page(MAC_CHANGED).await, After::Reboot)
    }

    async fn respond(&mut self, request: Request) {
        let now = Instant::now();
        let (response, after) = self.route(&request, now).await;
        debug!(
            "{} {} -> {} {}",
            request.method, request.path, response.status, response.reason
        );

        if let Some(mut client) = self.client.take() {
            let bytes = response.encode(request.version);
            let written = tokio::time::timeout(WRITE_TIMEOUT, async {
                client.stream.write_all(&bytes).await?;
                client.stream.shutdown().await
            })
            .await;
            match written {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("Write to {} failed: {}", client.peer, e),
                Err(_) => warn!("Write to {} timed out", client.peer),
            }
        }

        if after == After::Reboot {
            self.power.reboot();
        }
    }
}

/// Turn a page render result into a response
fn page(rendered: Result<Vec<u8>>) -> Response {
    match rendered {
        Ok(body) => Response::html(body),
        Err(e) => {
            error!("Page render failed: {}", e);
            Response::not_found()
        }
    }
}

/// First value of `field` in an urlencoded form body
fn form_value(body: &[u8], field: &str) -> Option<String> {
    url::form_urlencoded::parse(body)
        .find(|(name, _)| name == field)
        .map(|(_, value)| value.into_owned())
}

impl Subsystem for HttpServer {
    type Io = HttpIo;

    fn name(&self) -> &'static str {
        "http"
    }

    async fn tick(&mut self, now: Instant) {
        match self.listener {
            Listener::Unbound => match TcpListener::bind(self.addr).await {
                Ok(listener) => {
                    let local = listener.local_addr().ok();
                    info!("HTTP server listening on {:?}", local);
                    self.local_addr.send_replace(local);
                    self.listener = Listener::Bound(listener);
                }
                Err(e) => {
                    error!("bind {} error: {}, retrying in {:?}", self.addr, e, BIND_RETRY);
                    self.listener = Listener::Wait { since: now };
                }
            },
            Listener::Wait { since } => {
                if now.saturating_duration_since(since) >= BIND_RETRY {
                    self.listener = Listener::Unbound;
                }
            }
            Listener::Bound(_) => {}
        }
    }

    async fn next_io(&mut self) -> HttpIo {
        let Listener::Bound(listener) = &self.listener else {
            return std::future::pending().await;
        };
        match self.client.as_mut() {
            Some(client) => tokio::select! {
                accepted = listener.accept() => HttpIo::Accepted(accepted),
                received = client.stream.read(&mut self.buf) => HttpIo::Received(received),
            },
            None => HttpIo::Accepted(listener.accept().await),
        }
    }

    async fn handle_io(&mut self, io: HttpIo) {
        match io {
            HttpIo::Accepted(Ok((stream, peer))) => {
                if let Some(current) = &self.client {
                    warn!("accept {} refused: busy with {}", peer, current.peer);
                    drop(stream);
                    return;
                }
                info!("accept {}", peer);
                self.client = Some(Client {
                    stream,
                    peer,
                    parser: RequestParser::new(),
                });
            }
            HttpIo::Accepted(Err(e)) => error!("accept error: {}", e),
            HttpIo::Received(Ok(0)) => {
                if let Some(client) = self.client.take() {
                    debug!("{} closed the connection", client.peer);
                }
            }
            HttpIo::Received(Err(e)) => {
                if let Some(client) = self.client.take() {
                    warn!("read from {} failed: {}", client.peer, e);
                }
            }
            HttpIo::Received(Ok(n)) => {
                let Some(client) = self.client.as_mut() else {
                    return;
                };
                match client.parser.feed(&self.buf[..n]) {
                    Ok(Some(request)) => self.respond(request).await,
                    Ok(None) => {}
                    Err(e) => {
                        warn!("Closing {}: {}", client.peer, e);
                        self.client = None;
                    }
                }
            }
        }
    }

    async fn reload(&mut self) {
        self.settings = HttpSettings::load(&self.store);
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.client = None;
        self.listener = Listener::Unbound;
        self.local_addr.send_replace(None);
        Ok(())
    }
}
