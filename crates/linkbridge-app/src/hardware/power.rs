//! Reboot and poweroff through the shell

use std::process::Command;

use tokio::runtime::Handle;

use linkbridge_core::prelude::*;

use super::PowerControl;

/// Flushes filesystems and forces the board down
#[derive(Debug, Clone, Default)]
pub struct ShellPower;

impl ShellPower {
    /// Runs on the blocking pool when called from the runtime, since `sync`
    /// can stall for seconds on slow flash.
    fn run(&self, action: &'static str) {
        let script = format!("sync; {action} -f");
        warn!("Device {}: {}", action, script);
        match Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn_blocking(move || run_script(&script));
            }
            Err(_) => run_script(&script),
        }
    }
}

fn run_script(script: &str) {
    match Command::new("sh").arg("-c").arg(script).status() {
        Ok(status) if status.success() => {}
        Ok(status) => error!("'{}' exited with {}", script, status),
        Err(e) => error!("Failed to run '{}': {}", script, e),
    }
}

impl PowerControl for ShellPower {
    fn reboot(&self) {
        self.run("reboot");
    }

    fn poweroff(&self) {
        self.run("poweroff");
    }
}
