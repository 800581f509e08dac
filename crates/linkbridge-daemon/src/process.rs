//! Supervised child process management
//!
//! Used for the probe server: a long-running executable whose textual output
//! is scanned for status announcements.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot, Notify};

use linkbridge_core::prelude::*;

/// Capacity of the merged output line channel
const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// Manages a supervised child process.
///
/// The `Child` handle is moved into a dedicated `wait_for_exit` task that owns
/// it until the process is gone. `SupervisedProcess` keeps a kill channel, an
/// atomic exit flag for synchronous `has_exited()` checks, and a [`Notify`] so
/// `stop()` can await termination without polling.
///
/// Stdout and stderr are merged into a single line channel, drained with
/// [`SupervisedProcess::try_next_line`] from a tick handler without blocking.
pub struct SupervisedProcess {
    /// Merged stdout/stderr lines
    output_rx: mpsc::Receiver<String>,
    /// Process ID for logging
    pid: Option<u32>,
    /// Tells the wait task to kill the process. Consumed on first use (or on drop).
    kill_tx: Option<oneshot::Sender<()>>,
    /// Set by the wait task once the child has exited
    exited: Arc<AtomicBool>,
    /// Notified by the wait task immediately after the child exits
    exit_notify: Arc<Notify>,
}

impl SupervisedProcess {
    /// Spawn `program` with its output captured
    pub fn spawn(program: &Path, args: &[&str]) -> Result<Self> {
        info!(
            "Spawning supervised process: {} {}",
            program.display(),
            args.join(" ")
        );

        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::ProcessSpawn {
                reason: format!("{}: {}", program.display(), e),
            })?;

        let pid = child.id();
        info!("Supervised process started with PID: {:?}", pid);

        let (output_tx, output_rx) = mpsc::channel::<String>(OUTPUT_CHANNEL_CAPACITY);
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(Self::line_reader(stdout, output_tx.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(Self::line_reader(stderr, output_tx, "stderr"));
        }

        let exited = Arc::new(AtomicBool::new(false));
        let exit_notify = Arc::new(Notify::new());
        let (kill_tx, kill_rx) = oneshot::channel::<()>();

        tokio::spawn(Self::wait_for_exit(
            child,
            kill_rx,
            Arc::clone(&exited),
            Arc::clone(&exit_notify),
        ));

        Ok(Self {
            output_rx,
            pid,
            kill_tx: Some(kill_tx),
            exited,
            exit_notify,
        })
    }

    /// Background task: owns `child` and waits for it to exit, either
    /// naturally or after `kill_rx` fires.
    async fn wait_for_exit(
        mut child: Child,
        kill_rx: oneshot::Receiver<()>,
        exited: Arc<AtomicBool>,
        exit_notify: Arc<Notify>,
    ) {
        tokio::select! {
            result = child.wait() => {
                match result {
                    Ok(status) => info!("Supervised process exited with status: {:?}", status),
                    Err(e) => error!("Error waiting for supervised process: {}", e),
                }
            }
            _ = kill_rx => {
                info!("Kill requested, terminating supervised process");
                if let Err(e) = child.kill().await {
                    error!("Failed to kill supervised process: {}", e);
                }
                match child.wait().await {
                    Ok(status) => info!("Supervised process killed, exit status: {:?}", status),
                    Err(e) => error!("Error waiting after kill: {}", e),
                }
            }
        }

        exited.store(true, Ordering::Release);
        exit_notify.notify_waiters();
    }

    /// Forward lines from one of the child's pipes into the merged channel
    async fn line_reader<R>(pipe: R, tx: mpsc::Sender<String>, stream: &'static str)
    where
        R: AsyncRead + Unpin,
    {
        let mut reader = BufReader::new(pipe).lines();

        while let Ok(Some(line)) = reader.next_line().await {
            trace!("{}: {}", stream, line);
            if tx.send(line).await.is_err() {
                debug!("{} channel closed", stream);
                break;
            }
        }

        debug!("{} reader finished", stream);
    }

    /// Take the next buffered output line without waiting
    pub fn try_next_line(&mut self) -> Option<String> {
        self.output_rx.try_recv().ok()
    }

    /// Kill the process and wait up to `timeout` for it to be reaped.
    ///
    /// Returns `true` when the process is confirmed gone.
    pub async fn stop(&mut self, timeout: Duration) -> bool {
        let notified = self.exit_notify.notified();
        if self.has_exited() {
            return true;
        }

        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }

        match tokio::time::timeout(timeout, notified).await {
            Ok(()) => true,
            Err(_) => {
                warn!("Supervised process {:?} not reaped within {:?}", self.pid, timeout);
                self.has_exited()
            }
        }
    }

    /// Non-blocking check backed by the wait task's exit flag
    pub fn has_exited(&self) -> bool {
        self.exited.load(Ordering::Acquire)
    }

    pub fn is_running(&self) -> bool {
        !self.has_exited()
    }

    pub fn id(&self) -> Option<u32> {
        self.pid
    }
}

impl Drop for SupervisedProcess {
    fn drop(&mut self) {
        if let Some(tx) = self.kill_tx.take() {
            let _ = tx.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Use `sh -c` as a stand-in for the probe server
    fn spawn_shell(body: &str) -> SupervisedProcess {
        SupervisedProcess::spawn(Path::new("sh"), &["-c", body])
            .expect("sh must be available in test environment")
    }

    #[tokio::test]
    async fn test_spawn_missing_program() {
        let result = SupervisedProcess::spawn(Path::new("/nonexistent/JLinkRemoteServer"), &[]);
        assert!(matches!(result, Err(Error::ProcessSpawn { .. })));
    }

    #[tokio::test]
    async fn test_stdout_and_stderr_are_merged() {
        let mut process = spawn_shell("echo out-line; echo err-line >&2; sleep 5");

        let mut lines = Vec::new();
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while lines.len() < 2 && tokio::time::Instant::now() < deadline {
            match process.try_next_line() {
                Some(line) => lines.push(line),
                None => tokio::time::sleep(Duration::from_millis(10)).await,
            }
        }
        lines.sort();
        assert_eq!(lines, vec!["err-line".to_string(), "out-line".to_string()]);

        assert!(process.stop(Duration::from_secs(2)).await);
        assert!(process.has_exited());
    }

    #[tokio::test]
    async fn test_natural_exit_sets_flag() {
        let process = spawn_shell("exit 3");

        let result = tokio::time::timeout(Duration::from_secs(5), async {
            while process.is_running() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(result.is_ok(), "process should exit on its own");
    }

    #[tokio::test]
    async fn test_stop_after_exit_is_immediate() {
        let mut process = spawn_shell("exit 0");
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(process.stop(Duration::from_millis(50)).await);
    }
}
