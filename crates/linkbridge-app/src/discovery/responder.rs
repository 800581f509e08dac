//! UDP discovery responder

use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::time::Instant;

use linkbridge_core::prelude::*;
use linkbridge_core::MacAddr;
use linkbridge_daemon::NetInterfaces;

use super::codec::{self, DeviceInfo, CMD_MODULE_DISCOVERY};
use crate::config::{ConfigStore, DiscoverySettings};
use crate::runtime::Subsystem;

pub const DISCOVERY_PORT: u16 = 21678;

/// Port companion software listens on for replies
pub const REPLY_PORT: u16 = 21677;

/// Pause between bind attempts
pub const BIND_RETRY: Duration = Duration::from_secs(5);

const RECV_CAPACITY: usize = 4096;

enum Socket {
    Unbound,
    Wait { since: Instant },
    Bound(UdpSocket),
}

pub struct DiscoveryResponder {
    store: Arc<ConfigStore>,
    settings: DiscoverySettings,
    interfaces: NetInterfaces,
    bind_addr: SocketAddr,
    reply_addr: SocketAddr,
    socket: Socket,
    local_addr: watch::Sender<Option<SocketAddr>>,
    buf: Vec<u8>,
}

impl DiscoveryResponder {
    pub fn new(store: Arc<ConfigStore>, interfaces: NetInterfaces, bind_addr: SocketAddr) -> Self {
        let settings = DiscoverySettings::load(&store);
        Self {
            store,
            settings,
            interfaces,
            bind_addr,
            reply_addr: SocketAddrV4::new(Ipv4Addr::BROADCAST, REPLY_PORT).into(),
            socket: Socket::Unbound,
            local_addr: watch::Sender::new(None),
            buf: vec![0; RECV_CAPACITY],
        }
    }

    /// Send replies somewhere other than the LAN broadcast address
    pub fn with_reply_addr(mut self, reply_addr: SocketAddr) -> Self {
        self.reply_addr = reply_addr;
        self
    }

    /// Address actually bound, `None` until the bind succeeds
    pub fn local_addr(&self) -> watch::Receiver<Option<SocketAddr>> {
        self.local_addr.subscribe()
    }

    fn device_info(&self) -> DeviceInfo {
        let if_name = &self.settings.if_name;
        let mac = self.interfaces.mac_address(if_name).unwrap_or_else(|e| {
            warn!("MAC of {}: {}", if_name, e);
            MacAddr([0; 6])
        });
        let ip = match self.interfaces.ipv4_address(if_name) {
            Ok(ip) => ip.unwrap_or(Ipv4Addr::UNSPECIFIED),
            Err(e) => {
                warn!("IPv4 address of {}: {}", if_name, e);
                Ipv4Addr::UNSPECIFIED
            }
        };
        DeviceInfo {
            dev_type: self.settings.dev_type,
            mac,
            ip,
        }
    }

    async fn answer(&self, len: usize, peer: SocketAddr) {
        let request = match codec::decode(&self.buf[..len]) {
            Ok(request) => request,
            Err(e) => {
                trace!("Dropped {} byte datagram from {}: {}", len, peer, e);
                return;
            }
        };
        if request.command != CMD_MODULE_DISCOVERY {
            debug!("Ignoring discovery command {:#06x}", request.command);
            return;
        }

        let Socket::Bound(socket) = &self.socket else {
            return;
        };
        let reply = codec::encode_reply(&self.device_info());
        if let Err(e) = socket.set_broadcast(true) {
            error!("udp broadcast enable error: {}", e);
        }
        match socket.send_to(&reply, self.reply_addr).await {
            Ok(_) => info!("discovery reply to {} len {}", self.reply_addr, reply.len()),
            Err(e) => error!("discovery reply len {} error: {}", reply.len(), e),
        }
    }
}

impl Subsystem for DiscoveryResponder {
    type Io = io::Result<(usize, SocketAddr)>;

    fn name(&self) -> &'static str {
        "discovery"
    }

    async fn tick(&mut self, now: Instant) {
        match self.socket {
            Socket::Unbound => match UdpSocket::bind(self.bind_addr).await {
                Ok(socket) => {
                    let local = socket.local_addr().ok();
                    info!("Discovery listening on {:?}", local);
                    self.local_addr.send_replace(local);
                    self.socket = Socket::Bound(socket);
                }
                Err(e) => {
                    error!("bind {} error: {}", self.bind_addr, e);
                    self.socket = Socket::Wait { since: now };
                }
            },
            Socket::Wait { since } => {
                if now.saturating_duration_since(since) >= BIND_RETRY {
                    self.socket = Socket::Unbound;
                }
            }
            Socket::Bound(_) => {}
        }
    }

    async fn next_io(&mut self) -> Self::Io {
        match &self.socket {
            Socket::Bound(socket) => socket.recv_from(&mut self.buf).await,
            _ => std::future::pending().await,
        }
    }

    async fn handle_io(&mut self, io: Self::Io) {
        match io {
            Ok((len, peer)) => self.answer(len, peer).await,
            // Transient receive errors such as ICMP port-unreachable
            Err(e) => debug!("discovery recv: {}", e),
        }
    }

    async fn reload(&mut self) {
        self.settings = DiscoverySettings::load(&self.store);
    }

    async fn shutdown(&mut self) -> Result<()> {
        self.socket = Socket::Unbound;
        self.local_addr.send_replace(None);
        Ok(())
    }
}
