//! OS signal handling for orderly shutdown

use tokio::sync::watch;

use linkbridge_core::prelude::*;

/// Spawn a task that flips `shutdown` to true on SIGINT or SIGTERM
pub fn spawn_signal_handler(shutdown: watch::Sender<bool>) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_signal().await {
            error!("Signal handler error: {}", e);
            return;
        }

        info!("Shutdown signal received");
        shutdown.send_replace(true);
    });
}

async fn wait_for_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| Error::subsystem("signals", format!("SIGINT handler: {e}")))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| Error::subsystem("signals", format!("SIGTERM handler: {e}")))?;

    tokio::select! {
        _ = sigint.recv() => info!("Received SIGINT"),
        _ = sigterm.recv() => info!("Received SIGTERM"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_signal_handler_leaves_flag_alone() {
        let (tx, rx) = watch::channel(false);
        spawn_signal_handler(tx);

        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(!*rx.borrow());
    }
}
