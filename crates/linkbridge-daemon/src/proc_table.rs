//! Name-based process control through `/proc`
//!
//! Used for daemons this program did not spawn itself (the network daemons may
//! already be running at boot, and the probe server may have left strays).
//! A process matches `name` when its command line, with argument separators
//! turned into spaces, contains `name` as a substring.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::time::Instant;

use linkbridge_core::prelude::*;

/// Poll period while waiting for processes to appear or disappear
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// View of the process table rooted at a procfs mount
#[derive(Debug, Clone)]
pub struct ProcTable {
    root: PathBuf,
}

impl Default for ProcTable {
    fn default() -> Self {
        Self::new("/proc")
    }
}

impl ProcTable {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// PIDs whose command line contains `name`, excluding this process.
    ///
    /// The directory walk runs on the blocking pool.
    pub async fn pids_by_name(&self, name: &str) -> Vec<i32> {
        let root = self.root.clone();
        let pattern = name.to_string();
        match tokio::task::spawn_blocking(move || scan(&root, &pattern)).await {
            Ok(pids) => pids,
            Err(e) => {
                warn!("/proc scan for '{}' failed: {}", name, e);
                Vec::new()
            }
        }
    }

    /// Number of live processes matching `name`
    pub async fn count_by_name(&self, name: &str) -> usize {
        self.pids_by_name(name).await.len()
    }

    /// Terminate every process matching `name`.
    ///
    /// Sends SIGTERM until half of `timeout` has elapsed, SIGKILL after that,
    /// and fails once the full budget is spent with matches still alive.
    pub async fn kill_by_name(&self, name: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        let half = timeout / 2;
        let mut announced = false;

        loop {
            let pids = self.pids_by_name(name).await;
            if pids.is_empty() {
                if announced {
                    info!("All '{}' processes terminated", name);
                }
                return Ok(());
            }

            let elapsed = start.elapsed();
            if elapsed >= timeout {
                error!("'{}' survived {:?} ({} left)", name, timeout, pids.len());
                return Err(Error::KillTimeout {
                    name: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }

            let signal = if elapsed < half {
                libc::SIGTERM
            } else {
                libc::SIGKILL
            };
            if !announced {
                info!("Terminating {} '{}' process(es): {:?}", pids.len(), name, pids);
                announced = true;
            }
            for pid in pids {
                send_signal(pid, signal);
            }

            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    /// Wait until at least one process matching `name` exists
    pub async fn wait_for_name(&self, name: &str, timeout: Duration) -> Result<()> {
        let start = Instant::now();
        loop {
            if self.count_by_name(name).await > 0 {
                debug!("'{}' is up after {:?}", name, start.elapsed());
                return Ok(());
            }
            if start.elapsed() >= timeout {
                return Err(Error::StartTimeout {
                    name: name.to_string(),
                    timeout_ms: timeout.as_millis() as u64,
                });
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

fn scan(root: &Path, name: &str) -> Vec<i32> {
    let Ok(entries) = std::fs::read_dir(root) else {
        return Vec::new();
    };
    let own_pid = std::process::id() as i32;

    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
        .filter(|&pid| pid != own_pid)
        .filter(|&pid| {
            read_cmdline(&root.join(pid.to_string()))
                .map(|cmdline| cmdline.contains(name))
                .unwrap_or(false)
        })
        .collect()
}

/// Command line with NUL separators replaced by spaces.
///
/// Kernel threads and zombies have an empty command line and never match.
fn read_cmdline(proc_dir: &Path) -> Option<String> {
    let raw = std::fs::read(proc_dir.join("cmdline")).ok()?;
    if raw.is_empty() {
        return None;
    }
    let text: String = String::from_utf8_lossy(&raw)
        .chars()
        .map(|c| if c == '\0' { ' ' } else { c })
        .collect();
    Some(text)
}

fn send_signal(pid: i32, signal: libc::c_int) {
    // SAFETY: kill(2) has no memory-safety preconditions; a stale pid only
    // yields ESRCH.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        trace!(
            "kill({}, {}) failed: {}",
            pid,
            signal,
            std::io::Error::last_os_error()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn fake_proc(entries: &[(&str, &[u8])]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (pid, cmdline) in entries {
            let proc_dir = dir.path().join(pid);
            std::fs::create_dir_all(&proc_dir).unwrap();
            std::fs::write(proc_dir.join("cmdline"), cmdline).unwrap();
        }
        std::fs::create_dir_all(dir.path().join("sys")).unwrap();
        dir
    }

    #[tokio::test]
    async fn test_matches_across_argument_boundaries() {
        let dir = fake_proc(&[
            ("101", b"wpa_supplicant\0-D\0nl80211\0-i\0wlan0\0"),
            ("102", b"udhcpc\0-b\0-i\0wlan0\0"),
            ("103", b""),
        ]);
        let table = ProcTable::new(dir.path());

        assert_eq!(table.pids_by_name("wpa_supplicant").await, vec![101]);
        assert_eq!(table.count_by_name("-i wlan0").await, 2);
        assert_eq!(table.count_by_name("hostapd").await, 0);
    }

    #[tokio::test]
    async fn test_kill_with_no_matches_succeeds_immediately() {
        let dir = fake_proc(&[]);
        let table = ProcTable::new(dir.path());
        assert!(table
            .kill_by_name("dnsmasq", Duration::from_millis(50))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_wait_for_name_times_out() {
        let dir = fake_proc(&[]);
        let table = ProcTable::new(dir.path());
        let err = table
            .wait_for_name("hostapd", Duration::from_millis(30))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::StartTimeout { .. }));
    }

    #[tokio::test]
    #[serial]
    async fn test_kill_real_process_by_name() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("913.25")
            .kill_on_drop(true)
            .spawn()
            .expect("sleep must be available in test environment");

        let table = ProcTable::default();
        table
            .wait_for_name("sleep 913.25", Duration::from_secs(2))
            .await
            .unwrap();

        let reaper = tokio::spawn(async move { child.wait().await });
        table
            .kill_by_name("sleep 913.25", Duration::from_secs(4))
            .await
            .unwrap();
        assert!(reaper.await.unwrap().is_ok());
    }
}
