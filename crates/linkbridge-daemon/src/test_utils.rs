//! Test utilities for control-socket clients
//!
//! Provides a fake station/access-point daemon that answers control-socket
//! commands from a caller-supplied responder and records what it received.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::net::UnixDatagram;
use tokio::task::JoinHandle;

type Responder = Box<dyn Fn(&str) -> String + Send + Sync>;

/// A fake daemon bound to a Unix datagram socket.
///
/// The socket task is aborted when the handle is dropped.
pub struct FakeControlDaemon {
    path: PathBuf,
    commands: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl FakeControlDaemon {
    /// Bind at `path` and answer every command with `responder(command)`
    pub fn spawn<F>(path: impl AsRef<Path>, responder: F) -> std::io::Result<Self>
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let path = path.as_ref().to_path_buf();
        let _ = std::fs::remove_file(&path);
        let socket = UnixDatagram::bind(&path)?;
        let commands = Arc::new(Mutex::new(Vec::new()));
        let responder: Responder = Box::new(responder);

        let log = Arc::clone(&commands);
        let task = tokio::spawn(async move {
            let mut buf = vec![0u8; 4096];
            while let Ok((n, peer)) = socket.recv_from(&mut buf).await {
                let command = String::from_utf8_lossy(&buf[..n]).to_string();
                let reply = responder(&command);
                if let Ok(mut log) = log.lock() {
                    log.push(command);
                }
                if let Some(peer) = peer.as_pathname() {
                    let _ = socket.send_to(reply.as_bytes(), peer).await;
                }
            }
        });

        Ok(Self {
            path,
            commands,
            task,
        })
    }

    /// A station supplicant that reports a completed association at `ip`
    pub fn connected_station(path: impl AsRef<Path>, ip: &str) -> std::io::Result<Self> {
        let ip = ip.to_string();
        Self::spawn(path, move |command| station_reply(command, &ip))
    }

    /// An access-point daemon that accepts every command
    pub fn access_point(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Self::spawn(path, |_| "OK\n".to_string())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Commands received so far, in arrival order
    pub fn commands(&self) -> Vec<String> {
        self.commands
            .lock()
            .map(|log| log.clone())
            .unwrap_or_default()
    }
}

impl Drop for FakeControlDaemon {
    fn drop(&mut self) {
        self.task.abort();
        let _ = std::fs::remove_file(&self.path);
    }
}

/// Canned supplicant replies for an associated station
pub fn station_reply(command: &str, ip: &str) -> String {
    match command {
        "LIST_NETWORKS" => {
            "network id / ssid / bssid / flags\n0\told\tany\t[CURRENT]\n".to_string()
        }
        "ADD_NETWORK" => "1\n".to_string(),
        "STATUS" => format!(
            "bssid=00:11:22:33:44:55\nssid=jlink\nwpa_state=COMPLETED\nip_address={ip}\n"
        ),
        "SIGNAL_POLL" => "RSSI=-52\nLINKSPEED=72\nNOISE=9999\nFREQUENCY=2437\nAVG_RSSI=-55\n"
            .to_string(),
        _ => "OK\n".to_string(),
    }
}
