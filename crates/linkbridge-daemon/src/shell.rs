//! Shell-level command execution

use std::process::Stdio;

use tokio::process::Command;

use linkbridge_core::prelude::*;

/// Run `command` through `sh -c` and require a zero exit status
pub async fn run(command: &str) -> Result<()> {
    debug!("sh -c {:?}", command);
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::ProcessSpawn {
            reason: format!("sh -c {command:?}: {e}"),
        })?;

    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr);
        warn!("{:?} failed: {}", command, stderr.trim());
        Err(Error::Command {
            command: command.to_string(),
            code: output.status.code(),
        })
    }
}

/// Run `command` with every standard stream detached.
///
/// For command lines that leave a daemon behind: the daemon may keep
/// inherited pipes open forever, so nothing is captured and only the exit
/// status of the shell itself is checked.
pub async fn launch(command: &str) -> Result<()> {
    debug!("sh -c {:?} (detached)", command);
    let status = Command::new("sh")
        .arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await
        .map_err(|e| Error::ProcessSpawn {
            reason: format!("sh -c {command:?}: {e}"),
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(Error::Command {
            command: command.to_string(),
            code: status.code(),
        })
    }
}

/// Flush filesystem buffers
pub async fn sync() {
    if let Err(e) = run("sync").await {
        warn!("sync failed: {}", e);
    }
}
