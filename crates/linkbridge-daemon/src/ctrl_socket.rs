//! Control socket client for the station and access-point daemons
//!
//! Both daemons listen on a Unix datagram socket. A client binds its own
//! socket path so replies can be addressed back to it, sends one command per
//! datagram and reads one reply datagram. Unsolicited event messages (those
//! starting with `<`) can arrive interleaved with replies and are skipped.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tokio::net::UnixDatagram;
use tokio::time::Instant;

use linkbridge_core::prelude::*;

/// Default reply timeout
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Largest reply accepted in one datagram
const REPLY_CAPACITY: usize = 4096;

static CLIENT_COUNTER: AtomicU32 = AtomicU32::new(0);

/// An open request/response channel to a daemon's control socket
#[derive(Debug)]
pub struct ControlSocket {
    socket: UnixDatagram,
    local_path: PathBuf,
    remote_path: PathBuf,
    timeout: Duration,
}

impl ControlSocket {
    /// Connect to the daemon listening on `remote_path`
    pub fn open(remote_path: &Path) -> Result<Self> {
        let local_path = std::env::temp_dir().join(format!(
            "linkbridge_ctrl_{}-{}",
            std::process::id(),
            CLIENT_COUNTER.fetch_add(1, Ordering::Relaxed)
        ));
        let _ = std::fs::remove_file(&local_path);

        let socket = UnixDatagram::bind(&local_path)
            .map_err(|e| Error::control_socket(&local_path, format!("bind failed: {e}")))?;

        if let Err(e) = socket.connect(remote_path) {
            let _ = std::fs::remove_file(&local_path);
            return Err(Error::control_socket(
                remote_path,
                format!("connect failed: {e}"),
            ));
        }

        Ok(Self {
            socket,
            local_path,
            remote_path: remote_path.to_path_buf(),
            timeout: REQUEST_TIMEOUT,
        })
    }

    /// Override the reply timeout
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote_path
    }

    /// Send `command` and return the reply with trailing CR/LF removed
    pub async fn request(&self, command: &str) -> Result<String> {
        self.socket
            .send(command.as_bytes())
            .await
            .map_err(|e| Error::control_socket(&self.remote_path, format!("send failed: {e}")))?;

        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; REPLY_CAPACITY];
        loop {
            let received = tokio::time::timeout_at(deadline, self.socket.recv(&mut buf))
                .await
                .map_err(|_| Error::ControlTimeout {
                    command: command.to_string(),
                })?
                .map_err(|e| {
                    Error::control_socket(&self.remote_path, format!("recv failed: {e}"))
                })?;

            let reply = String::from_utf8_lossy(&buf[..received]);
            if reply.starts_with('<') {
                trace!("skipping unsolicited event: {}", reply.trim_end());
                continue;
            }

            let reply = reply.trim_end_matches(['\r', '\n']).to_string();
            trace!("{} -> {}", command, reply);
            return Ok(reply);
        }
    }

    /// Send `command` and require the literal reply `OK`
    pub async fn request_ok(&self, command: &str) -> Result<()> {
        let reply = self.request(command).await?;
        if reply == "OK" {
            Ok(())
        } else {
            Err(Error::control_reply(command, reply))
        }
    }
}

impl Drop for ControlSocket {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.local_path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Bind a daemon-side socket that answers each datagram via `reply`
    fn spawn_echo_daemon(
        path: PathBuf,
        reply: fn(&str) -> Vec<String>,
    ) -> tokio::task::JoinHandle<()> {
        let daemon = UnixDatagram::bind(&path).unwrap();
        tokio::spawn(async move {
            let mut buf = vec![0u8; 1024];
            while let Ok((n, peer)) = daemon.recv_from(&mut buf).await {
                let command = String::from_utf8_lossy(&buf[..n]).to_string();
                let Some(peer) = peer.as_pathname().map(Path::to_path_buf) else {
                    continue;
                };
                for datagram in reply(&command) {
                    let _ = daemon.send_to(datagram.as_bytes(), &peer).await;
                }
            }
        })
    }

    #[tokio::test]
    async fn test_request_strips_trailing_crlf() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlan0");
        let task = spawn_echo_daemon(path.clone(), |cmd| vec![format!("{cmd}-reply\r\n")]);

        let ctrl = ControlSocket::open(&path).unwrap();
        assert_eq!(ctrl.request("PING").await.unwrap(), "PING-reply");
        task.abort();
    }

    #[tokio::test]
    async fn test_unsolicited_events_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlan0");
        let task = spawn_echo_daemon(path.clone(), |_| {
            vec![
                "<3>CTRL-EVENT-SCAN-STARTED".to_string(),
                "OK\n".to_string(),
            ]
        });

        let ctrl = ControlSocket::open(&path).unwrap();
        ctrl.request_ok("RECONNECT").await.unwrap();
        task.abort();
    }

    #[tokio::test]
    async fn test_request_ok_rejects_fail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlan0");
        let task = spawn_echo_daemon(path.clone(), |_| vec!["FAIL\n".to_string()]);

        let ctrl = ControlSocket::open(&path).unwrap();
        let err = ctrl.request_ok("ENABLE").await.unwrap_err();
        assert!(matches!(err, Error::ControlReply { .. }));
        task.abort();
    }

    #[tokio::test]
    async fn test_missing_daemon_fails_to_open() {
        let dir = tempfile::tempdir().unwrap();
        let err = ControlSocket::open(&dir.path().join("absent")).unwrap_err();
        assert!(matches!(err, Error::ControlSocket { .. }));
    }

    #[tokio::test]
    async fn test_silent_daemon_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlan0");
        let task = spawn_echo_daemon(path.clone(), |_| Vec::new());

        let ctrl = ControlSocket::open(&path)
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let err = ctrl.request("STATUS").await.unwrap_err();
        assert!(matches!(err, Error::ControlTimeout { .. }));
        task.abort();
    }

    #[tokio::test]
    async fn test_local_socket_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wlan0");
        let _daemon = UnixDatagram::bind(&path).unwrap();

        let ctrl = ControlSocket::open(&path).unwrap();
        let local = ctrl.local_path.clone();
        assert!(local.exists());
        drop(ctrl);
        assert!(!local.exists());
    }
}
