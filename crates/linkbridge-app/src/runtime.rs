//! Subsystem event loop
//!
//! Every subsystem is an owned state machine driven by one task. The task
//! waits for the startup barrier, then repeatedly waits for the earliest of
//! shutdown, the periodic tick, or the subsystem's own I/O. The task owns the
//! subsystem, so a tick and an I/O handler never run at the same time.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Barrier};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use linkbridge_core::prelude::*;

use crate::config::ReloadWatch;

/// Period of the subsystem tick
pub const TICK_PERIOD: Duration = Duration::from_millis(10);

/// A state machine driven by [`spawn`]
pub trait Subsystem: Send + 'static {
    /// Readiness value produced by [`Subsystem::next_io`]
    type Io: Send;

    /// Name used in logs and errors
    fn name(&self) -> &'static str;

    /// Advance the state machine by one tick
    fn tick(&mut self, now: Instant) -> impl Future<Output = ()> + Send;

    /// Wait for the next I/O event. Must be cancel-safe: the loop drops this
    /// future whenever another branch wins.
    fn next_io(&mut self) -> impl Future<Output = Self::Io> + Send;

    fn handle_io(&mut self, io: Self::Io) -> impl Future<Output = ()> + Send;

    /// Re-read configuration after a reload request
    fn reload(&mut self) -> impl Future<Output = ()> + Send;

    /// Release children, sockets and GPIO lines before the task exits
    fn shutdown(&mut self) -> impl Future<Output = Result<()>> + Send;
}

/// Everything a loop needs besides its subsystem
pub struct LoopContext {
    pub barrier: Arc<Barrier>,
    pub shutdown: watch::Receiver<bool>,
    pub reload: ReloadWatch,
    pub tick_period: Duration,
}

impl LoopContext {
    pub fn new(
        barrier: Arc<Barrier>,
        shutdown: watch::Receiver<bool>,
        reload: ReloadWatch,
    ) -> Self {
        Self {
            barrier,
            shutdown,
            reload,
            tick_period: TICK_PERIOD,
        }
    }
}

/// Spawn the loop task for `subsystem`
pub fn spawn<S: Subsystem>(subsystem: S, ctx: LoopContext) -> JoinHandle<Result<()>> {
    tokio::spawn(run(subsystem, ctx))
}

/// Drive `subsystem` until shutdown is signalled
pub async fn run<S: Subsystem>(mut subsystem: S, ctx: LoopContext) -> Result<()> {
    let LoopContext {
        barrier,
        mut shutdown,
        mut reload,
        tick_period,
    } = ctx;
    let name = subsystem.name();

    barrier.wait().await;
    info!("{} loop started", name);

    let mut ticker = tokio::time::interval(tick_period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                if reload.take_pending() {
                    debug!("{} reloading configuration", name);
                    subsystem.reload().await;
                }
                subsystem.tick(Instant::now()).await;
            }
            io = subsystem.next_io() => {
                subsystem.handle_io(io).await;
            }
        }
    }

    info!("{} loop stopping", name);
    subsystem
        .shutdown()
        .await
        .map_err(|e| Error::subsystem(name, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::reload_channel;
    use tokio::sync::mpsc;

    /// Records what the loop did with it
    struct Probe {
        ticks: u32,
        reloads: u32,
        io: Vec<u32>,
        rx: mpsc::Receiver<u32>,
        done: mpsc::UnboundedSender<(u32, u32, Vec<u32>)>,
        fail_shutdown: bool,
    }

    impl Subsystem for Probe {
        type Io = u32;

        fn name(&self) -> &'static str {
            "probe"
        }

        async fn tick(&mut self, _now: Instant) {
            self.ticks += 1;
        }

        async fn next_io(&mut self) -> u32 {
            match self.rx.recv().await {
                Some(v) => v,
                None => std::future::pending().await,
            }
        }

        async fn handle_io(&mut self, io: u32) {
            self.io.push(io);
        }

        async fn reload(&mut self) {
            self.reloads += 1;
        }

        async fn shutdown(&mut self) -> Result<()> {
            let _ = self
                .done
                .send((self.ticks, self.reloads, std::mem::take(&mut self.io)));
            if self.fail_shutdown {
                Err(Error::hardware("gpio stuck"))
            } else {
                Ok(())
            }
        }
    }

    type Outcome = mpsc::UnboundedReceiver<(u32, u32, Vec<u32>)>;

    fn probe(fail_shutdown: bool) -> (Probe, mpsc::Sender<u32>, Outcome) {
        let (tx, rx) = mpsc::channel(8);
        let (done, done_rx) = mpsc::unbounded_channel();
        (
            Probe {
                ticks: 0,
                reloads: 0,
                io: Vec::new(),
                rx,
                done,
                fail_shutdown,
            },
            tx,
            done_rx,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_loop_waits_for_barrier_then_ticks() {
        let (subsystem, _io, mut done) = probe(false);
        let barrier = Arc::new(Barrier::new(2));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_trigger, reload) = reload_channel();

        let handle = spawn(
            subsystem,
            LoopContext::new(Arc::clone(&barrier), shutdown_rx, reload),
        );
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(done.try_recv().is_err());

        barrier.wait().await;
        tokio::time::sleep(Duration::from_millis(95)).await;
        shutdown_tx.send(true).unwrap();

        assert!(handle.await.unwrap().is_ok());
        let (ticks, reloads, _) = done.recv().await.unwrap();
        assert!((9..=11).contains(&ticks), "ticks = {ticks}");
        assert_eq!(reloads, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_observed_on_next_tick() {
        let (subsystem, _io, mut done) = probe(false);
        let barrier = Arc::new(Barrier::new(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (trigger, reload) = reload_channel();

        let handle = spawn(subsystem, LoopContext::new(barrier, shutdown_rx, reload));
        trigger.trigger();
        trigger.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.trigger();
        tokio::time::sleep(Duration::from_millis(50)).await;
        shutdown_tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
        let (_, reloads, _) = done.recv().await.unwrap();
        assert_eq!(reloads, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_dispatched_in_order() {
        let (subsystem, io, mut done) = probe(false);
        let barrier = Arc::new(Barrier::new(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_trigger, reload) = reload_channel();

        let handle = spawn(subsystem, LoopContext::new(barrier, shutdown_rx, reload));
        for v in [3, 1, 4] {
            io.send(v).await.unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();

        handle.await.unwrap().unwrap();
        let (_, _, seen) = done.recv().await.unwrap();
        assert_eq!(seen, vec![3, 1, 4]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_error_names_subsystem() {
        let (subsystem, _io, _done) = probe(true);
        let barrier = Arc::new(Barrier::new(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (_trigger, reload) = reload_channel();

        let handle = spawn(subsystem, LoopContext::new(barrier, shutdown_rx, reload));
        shutdown_tx.send(true).unwrap();

        let err = handle.await.unwrap().unwrap_err();
        assert!(matches!(err, Error::Subsystem { ref name, .. } if name == "probe"));
    }
}
